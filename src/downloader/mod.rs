pub mod fallback;
pub mod profiles;
pub mod store;
pub mod ytdlp;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::downloader::profiles::ProfileSpec;
use crate::errors::{ErrorKind, ExtractError};
use crate::security::credentials::CredentialHandle;

/// Immutable metadata snapshot returned by a probe. Every field except the
/// canonical URL is optional; the engine omits what the upstream withholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub duration_string: Option<String>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub description: Option<String>,
    pub filesize_approx: Option<u64>,
    pub webpage_url: String,
    pub extractor: Option<String>,
    pub formats_available: usize,
}

/// A file staged in the download store, owned by the request handler
/// until streamed.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub mime_type: String,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Caps applied to a single fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchCaps {
    pub max_size_bytes: u64,
    pub max_duration_seconds: u64,
}

/// Everything the adapter needs to run one download attempt.
pub struct FetchRequest {
    pub url: String,
    pub format_selector: String,
    /// Engine output template, `<store>/<id>.%(ext)s`; the adapter picks
    /// the concrete extension and the returned path is authoritative.
    pub output_template: PathBuf,
    pub caps: FetchCaps,
    pub progress: mpsc::Sender<ProgressEvent>,
    pub cancel: CancellationToken,
}

/// Progress notifications published by the adapter on a bounded channel.
/// Publishing never blocks the download task; a slow consumer just misses
/// intermediate milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Started,
    /// 25, 50 or 75.
    Milestone(u8),
    Completed,
    Failed,
}

/// Outcome of one profile attempt, accumulated into the response on
/// fallback failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub profile: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Ok,
    Transient,
    Permanent,
}

/// Seam between the fallback controller and the engine. Implemented by
/// the yt-dlp adapter in production and by scripted fakes in tests.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    /// Metadata only; no bytes downloaded.
    async fn probe(
        &self,
        url: &str,
        profile: &ProfileSpec,
        credentials: Option<&CredentialHandle>,
    ) -> Result<MediaInfo, ExtractError>;

    /// Downloads bytes below the request's caps into the store.
    async fn fetch(
        &self,
        request: &FetchRequest,
        profile: &ProfileSpec,
        credentials: Option<&CredentialHandle>,
    ) -> Result<FetchedFile, ExtractError>;
}
