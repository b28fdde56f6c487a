//! Minimal Gemini client for quiz generation.
//!
//! We only call `models/{model}:generateContent` with one user turn made of
//! the prompt plus an optional inline file. Calls are instrumented and log
//! model names, latencies and token usage (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::GeminiSettings;
use crate::error::{EduError, EduResult};
use crate::quiz::model::{GenerationRequest, TextGenerator};
use crate::util::trunc_for_log;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct Gemini {
  pub client: reqwest::Client,
  api_key: String,
  pub base_url: String,
  pub free_model: String,
  pub premium_model: String,
}

impl Gemini {
  /// Construct the client if an API key is configured; otherwise return None.
  pub fn from_settings(cfg: &GeminiSettings) -> Option<Self> {
    let api_key = cfg.api_key.clone()?;
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.request_timeout_secs))
      .build()
      .map_err(|e| error!(target: "edumate_backend", error = %e, "Failed to build HTTP client for Gemini"))
      .ok()?;

    Some(Self {
      client,
      api_key,
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      free_model: cfg.free_model.clone(),
      premium_model: cfg.premium_model.clone(),
    })
  }

  fn model_for(&self, premium: bool) -> &str {
    if premium { &self.premium_model } else { &self.free_model }
  }
}

#[async_trait]
impl TextGenerator for Gemini {
  fn name(&self) -> &str {
    "gemini"
  }

  #[instrument(
    level = "info",
    skip(self, req),
    fields(model = %self.model_for(req.premium), prompt_len = req.prompt.len(), has_blob = req.blob.is_some())
  )]
  async fn generate(&self, req: GenerationRequest) -> EduResult<String> {
    let model = self.model_for(req.premium);
    let url = format!("{}/models/{}:generateContent", self.base_url, model);

    let mut parts = vec![Part::Text { text: req.prompt }];
    if let Some(blob) = req.blob {
      parts.push(Part::InlineData {
        inline_data: InlineData { mime_type: blob.mime_type, data: BASE64.encode(&blob.data) },
      });
    }
    let body = GenerateContentRequest {
      contents: vec![Content { role: "user".into(), parts }],
      generation_config: GenerationConfig { max_output_tokens: req.max_output_tokens, temperature: 0.7 },
    };

    let start = std::time::Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "edumate-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(API_KEY_HEADER, &self.api_key)
      .json(&body).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_api_error(&body).unwrap_or_else(|| trunc_for_log(&body, 300));
      error!(elapsed = ?start.elapsed(), %status, "Gemini call failed");
      return Err(EduError::ExternalService(format!("Gemini HTTP {}: {}", status, msg)));
    }

    let body: GenerateContentResponse = res.json().await?;
    if let Some(usage) = &body.usage_metadata {
      info!(
        elapsed = ?start.elapsed(),
        prompt_tokens = ?usage.prompt_token_count,
        completion_tokens = ?usage.candidates_token_count,
        total_tokens = ?usage.total_token_count,
        "Gemini usage"
      );
    }

    let text: String = body.candidates.first()
      .and_then(|c| c.content.as_ref())
      .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect::<Vec<_>>().join(""))
      .unwrap_or_default();

    if text.trim().is_empty() {
      let reason = body.candidates.first().and_then(|c| c.finish_reason.clone()).unwrap_or_else(|| "none".into());
      return Err(EduError::ExternalService(format!("Gemini returned no text (finish reason: {reason})")));
    }
    Ok(text.trim().to_string())
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  contents: Vec<Content>,
  generation_config: GenerationConfig,
}
#[derive(Serialize)]
struct Content { role: String, parts: Vec<Part> }
#[derive(Serialize)]
#[serde(untagged)]
enum Part {
  Text { text: String },
  InlineData { inline_data: InlineData },
}
#[derive(Serialize)]
struct InlineData { mime_type: String, data: String }
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig { max_output_tokens: u32, temperature: f32 }

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] usage_metadata: Option<UsageMetadata>,
}
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
  #[serde(default)] content: Option<CandidateContent>,
  #[serde(default)] finish_reason: Option<String>,
}
#[derive(Deserialize)]
struct CandidateContent { #[serde(default)] parts: Vec<CandidatePart> }
#[derive(Deserialize)]
struct CandidatePart { #[serde(default)] text: Option<String> }
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

/// Try to extract a clean error message from a Google API error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
