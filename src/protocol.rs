//! Public request/response structs for the HTTP API (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Attachment, Plan, Question, Quiz};
use crate::quiz::grading::AnswerDetail;
use crate::quiz::progress::{StudentStats, TopicMastery, TopicReport, WeekBucket};

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub model_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CourseIn {
    pub title: String,
    pub subject: String,
}

#[derive(Debug, Deserialize)]
pub struct EnrollIn {
    pub student_email: String,
}

#[derive(Serialize)]
pub struct EnrollOut {
    pub message: &'static str,
    pub student_email: String,
}

#[derive(Debug, Deserialize)]
pub struct LessonIn {
    pub course_id: Uuid,
    pub title: String,
    pub topic: String,
    #[serde(default)]
    pub content_text: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// Where generated questions come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizSource {
    /// Model when configured, keywords otherwise.
    #[default]
    Auto,
    Keyword,
    Model,
}

fn default_num_questions() -> i64 {
    5
}
fn default_difficulty() -> String {
    "easy".into()
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuizIn {
    #[serde(default = "default_num_questions")]
    pub num_questions: i64,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default)]
    pub source: QuizSource,
}

impl Default for GenerateQuizIn {
    fn default() -> Self {
        Self { num_questions: default_num_questions(), difficulty: default_difficulty(), source: QuizSource::Auto }
    }
}

#[derive(Debug, Deserialize)]
pub struct ManualQuizIn {
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    pub questions: Vec<Question>,
}

#[derive(Serialize)]
pub struct QuizOut {
    pub quiz_id: Uuid,
    pub lesson_id: Uuid,
    pub difficulty: String,
    pub created_at: DateTime<Utc>,
    pub questions: Vec<Question>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<QuizSource>,
}

impl QuizOut {
    pub fn new(q: Quiz, source: Option<QuizSource>) -> Self {
        Self {
            quiz_id: q.id,
            lesson_id: q.lesson_id,
            difficulty: q.difficulty,
            created_at: q.created_at,
            questions: q.questions,
            source,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QuizSummary {
    pub quiz_id: Uuid,
    pub difficulty: String,
    pub created_at: DateTime<Utc>,
    pub question_count: usize,
}

#[derive(Serialize)]
pub struct QuizListOut {
    pub lesson_id: Uuid,
    pub quizzes: Vec<QuizSummary>,
}

#[derive(Serialize)]
pub struct DeletedOut {
    pub message: &'static str,
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AttemptIn {
    pub answers: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AttemptOut {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub score: f64,
    pub subject: String,
    pub topic: String,
    pub mastery: f64,
    pub details: Vec<AnswerDetail>,
}

#[derive(Serialize)]
pub struct StatsOut {
    pub student_email: String,
    #[serde(flatten)]
    pub stats: StudentStats,
}

#[derive(Debug, Deserialize)]
pub struct WeeklyQuery {
    #[serde(default)]
    pub weeks: Option<i64>,
}

#[derive(Serialize)]
pub struct WeeklyOut {
    pub student_email: String,
    pub weeks_data: Vec<WeekBucket>,
}

#[derive(Serialize)]
pub struct ReportOut {
    pub student_email: String,
    #[serde(flatten)]
    pub report: TopicReport,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StudentProgress {
    pub student_email: String,
    pub quizzes_done: usize,
    pub avg_score: f64,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct StudentsProgressOut {
    pub course_id: Uuid,
    pub students: Vec<StudentProgress>,
}

#[derive(Serialize)]
pub struct StudentWeeklyOut {
    pub course_id: Uuid,
    pub student_email: String,
    pub weeks_data: Vec<WeekBucket>,
}

#[derive(Serialize)]
pub struct WeakTopicsOut {
    pub course_id: Uuid,
    pub student_email: String,
    pub weak_topics: Vec<TopicMastery>,
}

#[derive(Debug, Deserialize)]
pub struct PlanIn {
    pub plan: Plan,
    #[serde(default)]
    pub premium_until: Option<DateTime<Utc>>,
}
