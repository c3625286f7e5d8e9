use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use log::{error, info};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::models::{
    error_response, error_response_with, failure_response, DownloadRequest, InfoRequest,
    InfoResponse,
};
use crate::api::AppState;
use crate::downloader::{FetchCaps, FetchRequest, FetchedFile, ProgressEvent};
use crate::errors::ErrorKind;
use crate::security::input_validation::InputValidator;

const DEFAULT_FORMAT: &str = "best[ext=mp4]/best";

/// Liveness plus the store's disk headroom. Never blocks beyond a stat
/// of the store directory.
pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.free_disk_bytes() {
        Ok(free) => Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "freeDiskBytes": free,
            "downloadDir": state.config.download_dir,
            "version": env!("CARGO_PKG_VERSION"),
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed to stat store: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "unhealthy" })),
            )
                .into_response()
        }
    }
}

/// JSON 404 for unknown routes.
pub async fn not_found() -> Response {
    error_response_with(ErrorKind::NotFound, "The requested endpoint does not exist")
}

pub async fn info(
    State(state): State<AppState>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    if let Err(e) = InputValidator::new().validate_url(&request.url) {
        return bad_request(e.to_string());
    }

    let corr_id = correlation_id();
    info!("[{corr_id}] Probe requested");

    match state
        .controller
        .run_probe(&request.url, request.profile.as_deref())
        .await
    {
        Ok(outcome) => {
            info!(
                "[{corr_id}] Probe succeeded after {} attempt(s)",
                outcome.attempts.len()
            );
            Json(InfoResponse {
                success: true,
                data: outcome.info,
            })
            .into_response()
        }
        Err(failure) => {
            info!(
                "[{corr_id}] Probe failed: {} after {} attempt(s)",
                failure.kind(),
                failure.attempts.len()
            );
            failure_response(failure)
        }
    }
}

pub async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    run_download(state, payload, true).await
}

/// Streaming variant. The adapter stages the file before any bytes can
/// move, so this degrades to a synchronous download delivered without a
/// Content-Length.
pub async fn stream(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    run_download(state, payload, false).await
}

async fn run_download(
    state: AppState,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
    include_length: bool,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let validator = InputValidator::new();
    if let Err(e) = validator.validate_url(&request.url) {
        return bad_request(e.to_string());
    }
    let format_selector = request
        .format
        .clone()
        .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
    if let Err(e) = validator.validate_format_selector(&format_selector) {
        return bad_request(e.to_string());
    }

    // A client may tighten the operator's duration cap, never widen it.
    let max_duration_seconds = request
        .max_duration_seconds
        .unwrap_or(state.config.max_duration_seconds)
        .min(state.config.max_duration_seconds);

    let corr_id = correlation_id();
    let id = state.store.new_identifier(&request.url);
    info!("[{corr_id}] Download requested, store id {id}");

    let (progress_tx, progress_rx) = mpsc::channel(16);
    spawn_progress_logger(corr_id.clone(), progress_rx);

    // The guard cancels the token if the client disconnects and this
    // handler future is dropped; the spawned fetch task then kills the
    // engine and releases any partial files.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let fetch_request = Arc::new(FetchRequest {
        url: request.url.clone(),
        format_selector,
        output_template: state.store.output_template(&id),
        caps: FetchCaps {
            max_size_bytes: state.config.max_download_size_bytes(),
            max_duration_seconds,
        },
        progress: progress_tx,
        cancel,
    });

    let outcome = {
        let controller = Arc::clone(&state.controller);
        let store = Arc::clone(&state.store);
        let profile = request.profile.clone();
        let id = id.clone();
        let task = tokio::spawn(async move {
            let result = controller.run_fetch(fetch_request, profile.as_deref()).await;
            if result.is_err() {
                // Failed downloads release their partial files before the
                // response goes out, whether or not anyone is listening.
                store.discard(&id).await;
            }
            result
        });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("[{corr_id}] Download task panicked: {e}");
                return error_response(ErrorKind::Internal);
            }
        }
    };

    match outcome {
        Ok(outcome) => {
            info!(
                "[{corr_id}] Download complete: {} ({} bytes)",
                outcome.file.file_name, outcome.file.size_bytes
            );
            serve_file(&state, &corr_id, outcome.file, include_length).await
        }
        Err(failure) => {
            info!(
                "[{corr_id}] Download failed: {} after {} attempt(s)",
                failure.kind(),
                failure.attempts.len()
            );
            failure_response(failure)
        }
    }
}

/// Streams the staged file and hands its ownership to the reaper by
/// scheduling the eager post-response deletion.
async fn serve_file(
    state: &AppState,
    corr_id: &str,
    file: FetchedFile,
    include_length: bool,
) -> Response {
    let handle = match tokio::fs::File::open(&file.path).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("[{corr_id}] Staged file vanished: {e}");
            let _ = tokio::fs::remove_file(&file.path).await;
            return error_response(ErrorKind::Internal);
        }
    };

    state.store.schedule_removal(
        file.path.clone(),
        Duration::from_secs(state.config.post_response_delay_seconds),
    );

    let mut response = Body::from_stream(ReaderStream::new(handle)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if include_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size_bytes));
    }
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&file.file_name));
    response
}

fn content_disposition(file_name: &str) -> HeaderValue {
    // Header values must stay in the visible-ASCII range; anything the
    // sanitiser let through that does not fit falls back to a stand-in.
    HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"video.mp4\""))
}

fn bad_request(message: String) -> Response {
    error_response_with(ErrorKind::BadRequest, message)
}

fn correlation_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn spawn_progress_logger(corr_id: String, mut rx: mpsc::Receiver<ProgressEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Started => info!("[{corr_id}] Transfer started"),
                ProgressEvent::Milestone(p) => info!("[{corr_id}] Transfer at {p}%"),
                ProgressEvent::Completed => info!("[{corr_id}] Transfer completed"),
                ProgressEvent::Failed => info!("[{corr_id}] Transfer failed"),
            }
        }
    });
}
