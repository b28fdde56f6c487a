//! Application state: the record store, attachment storage, the optional
//! generative model client, and settings.
//!
//! Built once at start-up from `Settings`; handlers get it as `Arc<AppState>`.
//! If no model is configured, quiz generation falls back to keywords in
//! `auto` mode and refuses `model` mode.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::attachments::AttachmentStore;
use crate::config::Settings;
use crate::error::EduResult;
use crate::gemini::Gemini;
use crate::quiz::model::TextGenerator;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub attachments: AttachmentStore,
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub settings: Settings,
}

impl AppState {
    /// Build state from settings: open the store, init the Gemini client.
    #[instrument(level = "info", skip_all)]
    pub async fn new(settings: Settings) -> EduResult<Self> {
        let store = match &settings.storage.data_path {
            Some(path) => Store::open(path).await?,
            None => {
                info!(target: "edumate_backend", "No EDUMATE_DATA_PATH; records live in memory only.");
                Store::in_memory()
            }
        };

        let generator: Option<Arc<dyn TextGenerator>> = match Gemini::from_settings(&settings.gemini) {
            Some(g) => {
                info!(target: "edumate_backend", base_url = %g.base_url, free_model = %g.free_model, premium_model = %g.premium_model, "Gemini enabled.");
                Some(Arc::new(g))
            }
            None => {
                info!(target: "edumate_backend", "Gemini disabled (no GEMINI_API_KEY). Quiz generation uses keywords.");
                None
            }
        };

        Ok(Self {
            store,
            attachments: AttachmentStore::new(settings.storage.upload_dir.clone()),
            generator,
            settings,
        })
    }

    /// State with an explicit generator and no disk persistence.
    #[cfg(test)]
    pub fn with_generator(settings: Settings, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            store: Store::in_memory(),
            attachments: AttachmentStore::new(settings.storage.upload_dir.clone()),
            generator,
            settings,
        }
    }
}
