//! Process configuration: an optional TOML file, then environment overrides.
//!
//! Built once in `main` and handed to `AppState`; nothing reads the
//! environment after start-up.
//!
//! TOML schema (all keys optional):
//! ```toml
//! [gemini]
//! base_url = "https://generativelanguage.googleapis.com/v1beta"
//! free_model = "gemini-2.0-flash"
//! premium_model = "gemini-3-flash-preview"
//! free_max_output_tokens = 1024
//! premium_max_output_tokens = 2048
//! request_timeout_secs = 60
//!
//! [storage]
//! data_path = "data/edumate.json"
//! upload_dir = "uploads"
//!
//! [prompts]
//! quiz_instructions = "... {count} ... {difficulty} ..."
//! quiz_attachment_note = "..."
//! ```

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct Settings {
  #[serde(default)]
  pub port: Option<u16>,
  #[serde(default)]
  pub gemini: GeminiSettings,
  #[serde(default)]
  pub storage: StorageSettings,
  #[serde(default)]
  pub prompts: Prompts,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
  /// Never read from TOML; only `GEMINI_API_KEY`.
  #[serde(skip)]
  pub api_key: Option<String>,
  pub base_url: String,
  pub free_model: String,
  pub premium_model: String,
  pub free_max_output_tokens: u32,
  pub premium_max_output_tokens: u32,
  pub request_timeout_secs: u64,
}

impl Default for GeminiSettings {
  fn default() -> Self {
    Self {
      api_key: None,
      base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
      free_model: "gemini-2.0-flash".into(),
      premium_model: "gemini-3-flash-preview".into(),
      free_max_output_tokens: 1024,
      premium_max_output_tokens: 2048,
      request_timeout_secs: 60,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
  /// JSON snapshot file. In-memory only when unset.
  pub data_path: Option<PathBuf>,
  /// Root directory lesson attachment references resolve against.
  pub upload_dir: PathBuf,
}

impl Default for StorageSettings {
  fn default() -> Self {
    Self { data_path: None, upload_dir: PathBuf::from("uploads") }
  }
}

/// Prompt text for quiz generation. `{count}` and `{difficulty}` are filled in.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub quiz_instructions: String,
  pub quiz_attachment_note: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      quiz_instructions: "You are EduMate, a quiz author for teachers.\n\
        Write exactly {count} multiple-choice questions at {difficulty} difficulty based only on the lesson material.\n\
        Return ONLY a JSON array, no prose and no markdown. Each element must be an object with keys:\n\
        \"question\" (string), \"options\" (array of exactly 4 distinct strings), \
        \"answer\" (string, exactly equal to one of the options), \"explanation\" (one short sentence)."
        .into(),
      quiz_attachment_note: "The lesson material is the attached file.".into(),
    }
  }
}

impl Settings {
  /// TOML from `EDUMATE_CONFIG_PATH` (if set and readable), then env overrides.
  pub fn from_env() -> Self {
    let mut s = load_toml_from_env().unwrap_or_default();
    s.apply_env(|k| std::env::var(k).ok());
    s
  }

  fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("PORT").and_then(|p| p.parse::<u16>().ok()) {
      self.port = Some(port);
    }
    self.gemini.api_key = var("GEMINI_API_KEY").filter(|k| !k.trim().is_empty());
    if let Some(v) = var("GEMINI_BASE_URL") {
      self.gemini.base_url = v;
    }
    if let Some(v) = var("GEMINI_FREE_MODEL") {
      self.gemini.free_model = v;
    }
    if let Some(v) = var("GEMINI_PREMIUM_MODEL") {
      self.gemini.premium_model = v;
    }
    if let Some(v) = var("EDUMATE_DATA_PATH") {
      self.storage.data_path = Some(PathBuf::from(v));
    }
    if let Some(v) = var("EDUMATE_UPLOAD_DIR") {
      self.storage.upload_dir = PathBuf::from(v);
    }
  }

  pub fn port(&self) -> u16 {
    self.port.unwrap_or(8000)
  }
}

/// On any parse/IO error, logs and returns None so defaults apply.
fn load_toml_from_env() -> Option<Settings> {
  let path = std::env::var("EDUMATE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<Settings>(&s) {
      Ok(cfg) => {
        info!(target: "edumate_backend", %path, "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "edumate_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "edumate_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
