//! Domain models: roles and plans, courses/lessons, quizzes, attempts and mastery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder used when a question arrives without an explanation.
pub const EXPLANATION_PLACEHOLDER: &str = "Explanation not provided.";

/// Every stored question has exactly this many options.
pub const OPTION_COUNT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Student,
  Teacher,
  Admin,
}

impl std::str::FromStr for Role {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "student" => Ok(Role::Student),
      "teacher" => Ok(Role::Teacher),
      "admin" => Ok(Role::Admin),
      other => Err(format!("unknown role '{other}'")),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
  #[default]
  Free,
  Premium,
}

/// Billing-side view of a user. Unknown users are treated as free.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
  pub email: String,
  #[serde(default)] pub plan: Plan,
  #[serde(default)] pub premium_until: Option<DateTime<Utc>>,
}

impl User {
  /// Premium with no expiry never lapses; otherwise it must not have expired yet.
  pub fn is_premium(&self, now: DateTime<Utc>) -> bool {
    match (self.plan, self.premium_until) {
      (Plan::Premium, None) => true,
      (Plan::Premium, Some(until)) => until > now,
      (Plan::Free, _) => false,
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Course {
  pub id: Uuid,
  pub title: String,
  pub subject: String,
  pub teacher_email: String,
}

/// Reference to a file kept in attachment storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
  pub reference: String,
  #[serde(default)] pub name: Option<String>,
  #[serde(default)] pub mime_type: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lesson {
  pub id: Uuid,
  pub course_id: Uuid,
  pub title: String,
  pub topic: String,
  #[serde(default)] pub content_text: String,
  #[serde(default)] pub attachment: Option<Attachment>,
  pub created_at: DateTime<Utc>,
}

/// Canonical multiple-choice question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Question {
  #[serde(rename = "question")]
  pub text: String,
  pub options: Vec<String>,
  pub answer: String,
  #[serde(default)]
  pub explanation: String,
}

/// A persisted question set. Never edited after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quiz {
  pub id: Uuid,
  pub lesson_id: Uuid,
  pub difficulty: String,
  pub questions: Vec<Question>,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attempt {
  pub id: Uuid,
  pub quiz_id: Uuid,
  pub student_email: String,
  pub answers: Vec<String>,
  pub score: f64,
  pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasteryRecord {
  pub student_email: String,
  pub subject: String,
  pub topic: String,
  pub score: f64,
  pub updated_at: DateTime<Utc>,
}

impl MasteryRecord {
  pub fn matches(&self, student_email: &str, subject: &str, topic: &str) -> bool {
    self.student_email == student_email && self.subject == subject && self.topic == topic
  }
}
