pub mod api;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod security;

use std::sync::Arc;

use crate::api::AppState;
use crate::config::AppConfig;
use crate::downloader::fallback::FallbackController;
use crate::downloader::profiles::ProfileRegistry;
use crate::downloader::store::DownloadStore;
use crate::downloader::Extractor;
use crate::errors::Result;
use crate::security::credentials::CredentialStore;

/// Wires the immutable application context: store, credential blob,
/// profile registry and the fallback controller around the given engine
/// adapter. Tests hand in scripted extractors through the same seam.
pub async fn build_state(config: AppConfig, extractor: Arc<dyn Extractor>) -> Result<AppState> {
    let store = Arc::new(DownloadStore::open(&config.download_dir).await?);
    let credentials = Arc::new(CredentialStore::load(
        config.credential_blob_base64.as_deref(),
    ));
    let registry = ProfileRegistry::from_config(&config)?;
    let controller = Arc::new(FallbackController::new(
        registry,
        credentials,
        extractor,
        &config,
    ));

    Ok(AppState {
        config: Arc::new(config),
        controller,
        store,
    })
}
