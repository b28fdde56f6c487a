//! Untrusted candidate records → canonical questions.
//!
//! Generated questions are repaired rather than rejected wherever possible
//! (padding, truncation, answer casing, default explanation); only records
//! with no question text or no option list are dropped.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::domain::{Question, EXPLANATION_PLACEHOLDER, OPTION_COUNT};
use crate::error::{EduError, EduResult};

pub const PAD_OPTION: &str = "None of the above";

/// Why a single candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
  NotAnObject,
  MissingQuestion,
  OptionsNotAList,
}

/// Normalize one candidate. Never panics on any JSON shape.
pub fn normalize_candidate(candidate: &Value) -> Result<Question, Rejection> {
  let obj = candidate.as_object().ok_or(Rejection::NotAnObject)?;

  let text = obj.get("question").and_then(scalar_to_string).unwrap_or_default();
  if text.is_empty() {
    return Err(Rejection::MissingQuestion);
  }

  let raw_options = obj
    .get("options")
    .and_then(Value::as_array)
    .ok_or(Rejection::OptionsNotAList)?;
  let mut options: Vec<String> = raw_options
    .iter()
    .filter_map(scalar_to_string)
    .filter(|o| !o.is_empty())
    .collect();

  while options.len() < OPTION_COUNT {
    options.push(PAD_OPTION.to_string());
  }
  if options.len() > OPTION_COUNT {
    options.truncate(OPTION_COUNT);
  }

  let wanted = obj.get("answer").and_then(scalar_to_string).unwrap_or_default();
  let answer = resolve_answer(&wanted, &options);

  let explanation = obj
    .get("explanation")
    .and_then(scalar_to_string)
    .filter(|e| !e.is_empty())
    .unwrap_or_else(|| EXPLANATION_PLACEHOLDER.to_string());

  Ok(Question { text, options, answer, explanation })
}

/// Normalize a batch, keeping at most `limit` questions in input order.
pub fn normalize_questions(candidates: &[Value], limit: usize) -> EduResult<Vec<Question>> {
  let mut out = Vec::with_capacity(limit.min(candidates.len()));
  for (idx, c) in candidates.iter().enumerate() {
    if out.len() >= limit {
      break;
    }
    match normalize_candidate(c) {
      Ok(q) => out.push(q),
      Err(reason) => debug!(target: "quiz", idx, ?reason, "Dropped candidate question"),
    }
  }
  if out.is_empty() {
    return Err(EduError::NoValidQuestions);
  }
  Ok(out)
}

/// Strict check for teacher-authored questions: nothing is repaired except
/// the explanation default, and any violation rejects the whole set.
pub fn validate_manual(questions: Vec<Question>) -> EduResult<Vec<Question>> {
  if questions.is_empty() {
    return Err(EduError::Validation("Quiz must contain at least one question".into()));
  }
  questions
    .into_iter()
    .enumerate()
    .map(|(idx, mut q)| {
      let n = idx + 1;
      q.text = q.text.trim().to_string();
      if q.text.is_empty() {
        return Err(EduError::Validation(format!("Question {n}: text is empty")));
      }
      q.options = q.options.iter().map(|o| o.trim().to_string()).collect();
      if q.options.len() != OPTION_COUNT {
        return Err(EduError::Validation(format!(
          "Question {n}: expected {OPTION_COUNT} options, got {}",
          q.options.len()
        )));
      }
      if q.options.iter().any(|o| o.is_empty()) {
        return Err(EduError::Validation(format!("Question {n}: options must not be empty")));
      }
      if q.options.iter().collect::<HashSet<_>>().len() != q.options.len() {
        return Err(EduError::Validation(format!("Question {n}: options must be distinct")));
      }
      if !q.options.contains(&q.answer) {
        return Err(EduError::Validation(format!("Question {n}: answer must be one of the options")));
      }
      if q.explanation.trim().is_empty() {
        q.explanation = EXPLANATION_PLACEHOLDER.to_string();
      }
      Ok(q)
    })
    .collect()
}

fn resolve_answer(wanted: &str, options: &[String]) -> String {
  if let Some(exact) = options.iter().find(|o| o.as_str() == wanted) {
    return exact.clone();
  }
  let folded = wanted.to_lowercase();
  if let Some(ci) = options.iter().find(|o| o.to_lowercase() == folded) {
    return ci.clone();
  }
  options[0].clone()
}

fn scalar_to_string(v: &Value) -> Option<String> {
  match v {
    Value::String(s) => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}
