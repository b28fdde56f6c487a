//! Router assembly: HTTP endpoints, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - JSON API under `/api/v1/...` (identity from gateway headers)
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        .route("/api/v1/health", get(http::http_health))
        // Courses & lessons
        .route("/api/v1/courses", post(http::http_create_course))
        .route("/api/v1/courses/my", get(http::http_my_courses))
        .route("/api/v1/courses/:course_id", delete(http::http_delete_course))
        .route("/api/v1/courses/:course_id/enroll-student", post(http::http_enroll_student))
        .route("/api/v1/lessons", post(http::http_create_lesson))
        .route("/api/v1/lessons/course/:course_id", get(http::http_list_lessons))
        // Quizzes
        .route("/api/v1/quizzes/generate/:lesson_id", post(http::http_generate_quiz))
        .route("/api/v1/quizzes/manual/:lesson_id", post(http::http_create_manual_quiz))
        .route("/api/v1/quizzes/lesson/:lesson_id", get(http::http_list_quizzes))
        .route("/api/v1/quizzes/:quiz_id", get(http::http_get_quiz).delete(http::http_delete_quiz))
        // Attempts & progress
        .route("/api/v1/attempts/submit/:quiz_id", post(http::http_submit_attempt))
        .route("/api/v1/attempts/my/stats", get(http::http_my_stats))
        .route("/api/v1/attempts/my/weekly-progress", get(http::http_my_weekly_progress))
        .route("/api/v1/attempts/my/report", get(http::http_my_report))
        .route("/api/v1/teacher/course/:course_id/students-progress", get(http::http_students_progress))
        .route(
            "/api/v1/teacher/course/:course_id/student/:email/weekly-progress",
            get(http::http_student_weekly_progress),
        )
        .route("/api/v1/teacher/course/:course_id/student/:email/weak-topics", get(http::http_student_weak_topics))
        // Admin
        .route("/api/v1/admin/users/:email/plan", put(http::http_set_plan))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
