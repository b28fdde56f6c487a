//! Scoring a submission and folding it into the mastery estimate.

use serde::Serialize;

use crate::domain::Question;
use crate::error::{EduError, EduResult};

/// Weight kept from the previous mastery score on each update.
const MASTERY_RETAIN: f64 = 0.7;
/// Weight given to the new attempt.
const MASTERY_EVIDENCE: f64 = 0.3;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnswerDetail {
  pub question: String,
  pub student_answer: String,
  pub correct_answer: String,
  pub is_correct: bool,
}

#[derive(Clone, Debug)]
pub struct Grade {
  pub score: f64,
  pub correct: usize,
  pub details: Vec<AnswerDetail>,
}

/// Position-wise, case-sensitive comparison against the stored answers.
pub fn grade(questions: &[Question], answers: &[String]) -> EduResult<Grade> {
  if answers.len() != questions.len() {
    return Err(EduError::AnswerCountMismatch { expected: questions.len(), got: answers.len() });
  }

  let details: Vec<AnswerDetail> = questions
    .iter()
    .zip(answers)
    .map(|(q, given)| AnswerDetail {
      question: q.text.clone(),
      student_answer: given.clone(),
      correct_answer: q.answer.clone(),
      is_correct: *given == q.answer,
    })
    .collect();

  let correct = details.iter().filter(|d| d.is_correct).count();
  let score = if questions.is_empty() { 0.0 } else { 100.0 * correct as f64 / questions.len() as f64 };
  Ok(Grade { score, correct, details })
}

/// First attempt seeds the record as-is; later ones are exponentially smoothed.
pub fn next_mastery(previous: Option<f64>, attempt_score: f64) -> f64 {
  match previous {
    None => attempt_score,
    Some(old) => MASTERY_RETAIN * old + MASTERY_EVIDENCE * attempt_score,
  }
}

pub fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}
