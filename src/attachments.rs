//! Lesson attachment storage: files under a configured upload directory,
//! turned into model input (inline text or a binary blob).

use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument};

use crate::domain::Attachment;
use crate::error::{EduError, EduResult};
use crate::quiz::model::Blob;
use crate::util::take_chars;

pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_INLINE_TEXT_CHARS: usize = 12_000;

/// What the model gets to see of an attachment.
#[derive(Clone, Debug)]
pub enum Material {
  Text(String),
  File(Blob),
}

#[derive(Clone, Debug)]
pub struct AttachmentStore {
  root: PathBuf,
}

impl AttachmentStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Resolve a reference inside the upload root. References that are absolute
  /// or climb out of the root never resolve.
  fn resolve(&self, reference: &str) -> Option<PathBuf> {
    let rel = Path::new(reference.trim_start_matches("/uploads/").trim_start_matches("uploads/"));
    let clean = rel.components().all(|c| matches!(c, Component::Normal(_)));
    (clean && !reference.is_empty()).then(|| self.root.join(rel))
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn read(&self, reference: &str) -> EduResult<Vec<u8>> {
    let path = self.resolve(reference).ok_or(EduError::NotFound("Attachment"))?;
    let meta = match tokio::fs::metadata(&path).await {
      Ok(meta) => meta,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(EduError::NotFound("Attachment")),
      Err(e) => return Err(EduError::Storage(format!("stat {}: {e}", path.display()))),
    };
    if meta.len() > MAX_ATTACHMENT_BYTES as u64 {
      return Err(too_large());
    }
    match tokio::fs::read(&path).await {
      Ok(bytes) => {
        debug!(target: "quiz", path = %path.display(), bytes = bytes.len(), "Attachment read");
        Ok(bytes)
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EduError::NotFound("Attachment")),
      Err(e) => Err(EduError::Storage(format!("read {}: {e}", path.display()))),
    }
  }
}

fn too_large() -> EduError {
  EduError::Validation("Attachment too large. Max 10MB.".into())
}

/// Decide how an attachment is presented to the model.
pub fn to_material(att: &Attachment, raw: Vec<u8>) -> EduResult<Material> {
  if raw.len() > MAX_ATTACHMENT_BYTES {
    return Err(too_large());
  }
  let name = att.name.as_deref().unwrap_or(&att.reference).to_lowercase();
  let mime = att.mime_type.as_deref().unwrap_or("").to_lowercase();

  if mime.starts_with("text/") || name.ends_with(".txt") || name.ends_with(".md") {
    let text = String::from_utf8_lossy(&raw);
    return Ok(Material::Text(take_chars(&text, MAX_INLINE_TEXT_CHARS)));
  }

  let mime_type = if mime == "application/pdf" || name.ends_with(".pdf") {
    "application/pdf"
  } else if mime == "image/png" || name.ends_with(".png") {
    "image/png"
  } else if matches!(mime.as_str(), "image/jpeg" | "image/jpg") || name.ends_with(".jpg") || name.ends_with(".jpeg") {
    "image/jpeg"
  } else {
    return Err(EduError::Validation("Unsupported attachment type. Use PDF, PNG/JPG or TXT/MD.".into()));
  };
  Ok(Material::File(Blob { mime_type: mime_type.into(), data: raw }))
}
