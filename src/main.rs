//! EduMate · Quiz Lifecycle Backend
//!
//! - Axum HTTP API for courses, lessons, quizzes, attempts and progress
//! - Optional Gemini integration for quiz generation (keyword fallback otherwise)
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                 : u16 (default 8000)
//!   GEMINI_API_KEY       : enables Gemini integration if present
//!   GEMINI_BASE_URL      : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_FREE_MODEL    : default "gemini-2.0-flash"
//!   GEMINI_PREMIUM_MODEL : default "gemini-3-flash-preview"
//!   EDUMATE_CONFIG_PATH  : path to TOML config (prompts, limits, storage)
//!   EDUMATE_DATA_PATH    : JSON snapshot file; in-memory only when unset
//!   EDUMATE_UPLOAD_DIR   : attachment root (default "uploads")
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod identity;
mod attachments;
mod store;
mod state;
mod protocol;
mod logic;
mod gemini;
mod quiz;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::config::Settings;
use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Settings: TOML file (optional) then env overrides.
  let settings = Settings::from_env();
  let addr = SocketAddr::from(([0, 0, 0, 0], settings.port()));

  // Shared application state (record store, attachments, Gemini client, prompts).
  let state = Arc::new(AppState::new(settings).await?);

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  let listener = TcpListener::bind(addr).await?;
  info!(target: "edumate_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if tokio::signal::ctrl_c().await.is_ok() {
    info!(target: "edumate_backend", "Shutdown signal received");
  }
}
