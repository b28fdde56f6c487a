//! Error taxonomy shared by the core logic and the HTTP layer.
//!
//! Every variant maps to one HTTP status and a stable snake_case code so
//! callers can tell "fix your input" from "try again later" from "not allowed".

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type EduResult<T> = Result<T, EduError>;

#[derive(Debug, Error)]
pub enum EduError {
  #[error("Missing or invalid identity: {0}")]
  Unauthorized(String),

  #[error("{0} not found")]
  NotFound(&'static str),

  #[error("{0}")]
  Forbidden(String),

  #[error("{0}")]
  Validation(String),

  #[error("Answers count must match questions count (expected {expected}, got {got})")]
  AnswerCountMismatch { expected: usize, got: usize },

  #[error("Lesson has no text and no readable attachment to generate from")]
  NoLessonContent,

  #[error("Model reply could not be parsed as a JSON array of questions")]
  UnparsableModelReply,

  #[error("Generative service is not configured")]
  ServiceUnavailable,

  #[error("Generative service error: {0}")]
  ExternalService(String),

  #[error("Generation produced no usable questions")]
  NoValidQuestions,

  #[error("Storage error: {0}")]
  Storage(String),
}

impl EduError {
  pub fn code(&self) -> &'static str {
    match self {
      EduError::Unauthorized(_) => "unauthorized",
      EduError::NotFound(_) => "not_found",
      EduError::Forbidden(_) => "forbidden",
      EduError::Validation(_) => "validation_error",
      EduError::AnswerCountMismatch { .. } => "answer_count_mismatch",
      EduError::NoLessonContent => "no_lesson_content",
      EduError::UnparsableModelReply => "unparsable_model_reply",
      EduError::ServiceUnavailable => "external_service_unconfigured",
      EduError::ExternalService(_) => "external_service_error",
      EduError::NoValidQuestions => "no_valid_questions",
      EduError::Storage(_) => "storage_error",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      EduError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      EduError::NotFound(_) => StatusCode::NOT_FOUND,
      EduError::Forbidden(_) => StatusCode::FORBIDDEN,
      EduError::Validation(_) | EduError::AnswerCountMismatch { .. } => StatusCode::BAD_REQUEST,
      EduError::NoLessonContent | EduError::NoValidQuestions => StatusCode::UNPROCESSABLE_ENTITY,
      EduError::UnparsableModelReply | EduError::ExternalService(_) => StatusCode::BAD_GATEWAY,
      EduError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
      EduError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<reqwest::Error> for EduError {
  fn from(e: reqwest::Error) -> Self {
    EduError::ExternalService(e.to_string())
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: &'static str,
  error_description: String,
}

impl IntoResponse for EduError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(target: "edumate_backend", code = self.code(), error = %self, "Request failed");
    }
    let body = ErrorBody { error: self.code(), error_description: self.to_string() };
    (status, Json(body)).into_response()
  }
}
