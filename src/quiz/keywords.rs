//! Keyword-based question generator. Works offline; output varies run to run.

use rand::seq::SliceRandom;
use serde_json::{json, Value};

const STOP_WORDS: &[&str] = &[
  "this", "that", "with", "from", "have", "will", "your", "into", "about", "they", "them", "than", "then", "also",
];

const DEFAULT_POOL: &[&str] = &["concept", "example", "practice", "method", "result"];

const MIN_WORD_LEN: usize = 4;

/// Case-folded alphabetic runs of at least four letters, minus stop words,
/// first occurrence kept.
pub fn extract_keywords(text: &str) -> Vec<String> {
  let lowered = text.to_lowercase();
  let mut uniq: Vec<String> = Vec::new();
  for word in lowered.split(|c: char| !c.is_ascii_alphabetic()) {
    if word.len() < MIN_WORD_LEN || STOP_WORDS.contains(&word) {
      continue;
    }
    if !uniq.iter().any(|w| w == word) {
      uniq.push(word.to_string());
    }
  }
  uniq
}

/// Shuffled keyword pool of at most `k` entries, or the default pool.
pub fn keyword_pool(text: &str, k: usize) -> Vec<String> {
  let mut pool = extract_keywords(text);
  pool.shuffle(&mut rand::thread_rng());
  pool.truncate(k);
  if pool.is_empty() {
    return DEFAULT_POOL.iter().map(|w| w.to_string()).collect();
  }
  pool
}

/// Build `n` raw candidates for the normalizer. Option lists can come out
/// shorter than four when the answer is also drawn as a distractor.
pub fn generate_candidates(lesson_text: &str, n: usize) -> Vec<Value> {
  let pool = keyword_pool(lesson_text, 12.max(n + 3));
  let mut rng = rand::thread_rng();

  (0..n)
    .map(|i| {
      let answer = &pool[i % pool.len()];
      let mut options: Vec<&String> = vec![answer];
      for d in pool.choose_multiple(&mut rng, 3.min(pool.len())) {
        if !options.contains(&d) {
          options.push(d);
        }
      }
      options.shuffle(&mut rng);

      json!({
        "question": format!("Which keyword is most related to this lesson? (Q{})", i + 1),
        "options": options,
        "answer": answer,
        "explanation": format!("'{answer}' is a key term found in the lesson."),
      })
    })
    .collect()
}
