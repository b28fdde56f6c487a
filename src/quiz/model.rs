//! Generative-model side of quiz generation: the text-generation seam,
//! prompt assembly, count clamping and reply parsing.
//!
//! Exactly one call is made per generation request. Failures are returned
//! to the caller as-is; nothing here retries.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Prompts;
use crate::error::{EduError, EduResult};
use crate::util::fill_template;

pub const MAX_QUESTIONS: usize = 20;
pub const MAX_QUESTIONS_FREE: usize = 10;

/// Binary content handed to the model next to the prompt.
#[derive(Clone, Debug)]
pub struct Blob {
  pub mime_type: String,
  pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct GenerationRequest {
  pub prompt: String,
  pub blob: Option<Blob>,
  pub max_output_tokens: u32,
  pub premium: bool,
}

/// External text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
  fn name(&self) -> &str;

  async fn generate(&self, req: GenerationRequest) -> EduResult<String>;
}

/// Clamp the requested question count to what the caller's plan allows.
pub fn clamp_question_count(requested: i64, premium: bool) -> usize {
  let cap = if premium { MAX_QUESTIONS } else { MAX_QUESTIONS_FREE };
  requested.clamp(1, MAX_QUESTIONS as i64).min(cap as i64) as usize
}

/// Prompt for a quiz over lesson text (or over an attached file when
/// `lesson_text` is empty).
pub fn build_prompt(prompts: &Prompts, lesson_text: &str, difficulty: &str, count: usize) -> String {
  let count = count.to_string();
  let instructions = fill_template(
    &prompts.quiz_instructions,
    &[("count", count.as_str()), ("difficulty", difficulty)],
  );
  if lesson_text.trim().is_empty() {
    format!("{instructions}\n\n{}", prompts.quiz_attachment_note)
  } else {
    format!("{instructions}\n\n--- LESSON CONTENT ---\n{}", lesson_text.trim())
  }
}

fn strip_code_fences(text: &str) -> String {
  text.replace("```json", "").replace("```JSON", "").replace("```", "").trim().to_string()
}

/// Pull a JSON array of candidate questions out of free-form model output.
pub fn parse_model_reply(text: &str) -> EduResult<Vec<Value>> {
  let cleaned = strip_code_fences(text);

  if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&cleaned) {
    return Ok(items);
  }

  if let (Some(start), Some(end)) = (cleaned.find('['), cleaned.rfind(']')) {
    if start < end {
      if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
        return Ok(items);
      }
    }
  }

  Err(EduError::UnparsableModelReply)
}
