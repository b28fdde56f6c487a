//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; the caller identity comes from gateway headers.

use std::sync::Arc;
use axum::{
  body::Bytes,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
  Json,
};
use serde::de::DeserializeOwned;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::EduError;
use crate::identity::Identity;
use crate::logic;
use crate::protocol::*;
use crate::state::AppState;

type HttpResult<T> = Result<T, EduError>;

fn parse_optional_body<T: DeserializeOwned + Default>(raw: &[u8]) -> HttpResult<T> {
  if raw.iter().all(u8::is_ascii_whitespace) {
    return Ok(T::default());
  }
  serde_json::from_slice(raw).map_err(|e| EduError::Validation(format!("Invalid request body: {e}")))
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, model_enabled: state.generator.is_some() })
}

// -------- Courses & lessons --------

#[instrument(level = "info", skip(state, body))]
pub async fn http_create_course(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Json(body): Json<CourseIn>,
) -> HttpResult<impl IntoResponse> {
  let course = logic::create_course(&state, &who, body).await?;
  Ok((StatusCode::CREATED, Json(course)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_my_courses(State(state): State<Arc<AppState>>, who: Identity) -> HttpResult<impl IntoResponse> {
  Ok(Json(logic::my_courses(&state, &who).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_course(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(course_id): Path<Uuid>,
) -> HttpResult<impl IntoResponse> {
  logic::delete_course(&state, &who, course_id).await?;
  Ok(Json(DeletedOut { message: "Course deleted", id: course_id }))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_enroll_student(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(course_id): Path<Uuid>,
  Json(body): Json<EnrollIn>,
) -> HttpResult<impl IntoResponse> {
  let (added, student_email) = logic::enroll_student(&state, &who, course_id, body).await?;
  let message = if added { "Student enrolled" } else { "Student already enrolled" };
  Ok(Json(EnrollOut { message, student_email }))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_create_lesson(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Json(body): Json<LessonIn>,
) -> HttpResult<impl IntoResponse> {
  let lesson = logic::create_lesson(&state, &who, body).await?;
  Ok((StatusCode::CREATED, Json(lesson)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_lessons(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(course_id): Path<Uuid>,
) -> HttpResult<impl IntoResponse> {
  Ok(Json(logic::list_lessons(&state, &who, course_id).await?))
}

// -------- Quizzes --------

/// An empty body generates 5 easy questions; a body that is present must
/// parse, otherwise the request is rejected.
#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_generate_quiz(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(lesson_id): Path<Uuid>,
  body: Bytes,
) -> HttpResult<impl IntoResponse> {
  let body = parse_optional_body::<GenerateQuizIn>(&body)?;
  let (quiz, source) = logic::generate_quiz(&state, &who, lesson_id, body).await?;
  info!(target: "quiz", quiz_id = %quiz.id, ?source, "HTTP quiz generated");
  Ok((StatusCode::CREATED, Json(QuizOut::new(quiz, Some(source)))))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_create_manual_quiz(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(lesson_id): Path<Uuid>,
  Json(body): Json<ManualQuizIn>,
) -> HttpResult<impl IntoResponse> {
  let quiz = logic::create_manual_quiz(&state, &who, lesson_id, body).await?;
  Ok((StatusCode::CREATED, Json(QuizOut::new(quiz, None))))
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_quizzes(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(lesson_id): Path<Uuid>,
) -> HttpResult<impl IntoResponse> {
  let quizzes = logic::list_quizzes(&state, &who, lesson_id).await?;
  Ok(Json(QuizListOut { lesson_id, quizzes }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_quiz(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(quiz_id): Path<Uuid>,
) -> HttpResult<impl IntoResponse> {
  let quiz = logic::get_quiz(&state, &who, quiz_id).await?;
  Ok(Json(QuizOut::new(quiz, None)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_quiz(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(quiz_id): Path<Uuid>,
) -> HttpResult<impl IntoResponse> {
  logic::delete_quiz(&state, &who, quiz_id).await?;
  Ok(Json(DeletedOut { message: "Quiz deleted", id: quiz_id }))
}

// -------- Attempts & progress --------

#[instrument(level = "info", skip(state, body), fields(answers = body.answers.len()))]
pub async fn http_submit_attempt(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(quiz_id): Path<Uuid>,
  Json(body): Json<AttemptIn>,
) -> HttpResult<impl IntoResponse> {
  let out = logic::submit_attempt(&state, &who, quiz_id, body.answers).await?;
  Ok((StatusCode::CREATED, Json(out)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_my_stats(State(state): State<Arc<AppState>>, who: Identity) -> HttpResult<impl IntoResponse> {
  let stats = logic::student_stats(&state, &who).await?;
  Ok(Json(StatsOut { student_email: who.email, stats }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_my_weekly_progress(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Query(q): Query<WeeklyQuery>,
) -> HttpResult<impl IntoResponse> {
  let weeks_data = logic::weekly_progress(&state, &who, q.weeks).await?;
  Ok(Json(WeeklyOut { student_email: who.email, weeks_data }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_my_report(State(state): State<Arc<AppState>>, who: Identity) -> HttpResult<impl IntoResponse> {
  let report = logic::topic_report(&state, &who).await?;
  Ok(Json(ReportOut { student_email: who.email, report }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_students_progress(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(course_id): Path<Uuid>,
) -> HttpResult<impl IntoResponse> {
  let students = logic::course_progress(&state, &who, course_id).await?;
  Ok(Json(StudentsProgressOut { course_id, students }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_student_weekly_progress(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path((course_id, email)): Path<(Uuid, String)>,
  Query(q): Query<WeeklyQuery>,
) -> HttpResult<impl IntoResponse> {
  let (student_email, weeks_data) = logic::student_course_weekly(&state, &who, course_id, &email, q.weeks).await?;
  Ok(Json(StudentWeeklyOut { course_id, student_email, weeks_data }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_student_weak_topics(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path((course_id, email)): Path<(Uuid, String)>,
) -> HttpResult<impl IntoResponse> {
  let (student_email, weak_topics) = logic::student_weak_topics(&state, &who, course_id, &email).await?;
  Ok(Json(WeakTopicsOut { course_id, student_email, weak_topics }))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_set_plan(
  State(state): State<Arc<AppState>>,
  who: Identity,
  Path(email): Path<String>,
  Json(body): Json<PlanIn>,
) -> HttpResult<impl IntoResponse> {
  let user = logic::set_plan(&state, &who, &email, body).await?;
  info!(target: "edumate_backend", email = %user.email, plan = ?user.plan, "Plan updated");
  Ok(Json(user))
}
