use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::downloader::fallback::FallbackFailure;
use crate::downloader::{AttemptRecord, MediaInfo};
use crate::errors::ErrorKind;

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub url: String,
    pub profile: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: String,
    pub format: Option<String>,
    pub profile: Option<String>,
    pub max_duration_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub success: bool,
    pub data: MediaInfo,
}

/// Error body shared by every non-success path. `attempts` is present
/// only for fallback failures.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<Vec<AttemptRecord>>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            error: kind.as_str(),
            message: message_for(kind).to_string(),
            attempts: None,
        }
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: kind.as_str(),
            message: message.into(),
            attempts: None,
        }
    }
}

pub fn error_response(kind: ErrorKind) -> Response {
    (status_for(kind), Json(ErrorBody::new(kind))).into_response()
}

pub fn error_response_with(kind: ErrorKind, message: impl Into<String>) -> Response {
    (status_for(kind), Json(ErrorBody::with_message(kind, message))).into_response()
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::BadRequest | ErrorKind::AmbiguousInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::GeoBlocked => StatusCode::FORBIDDEN,
        ErrorKind::TooLarge | ErrorKind::TooLong => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::BadFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::BotChallenge
        | ErrorKind::Unavailable
        | ErrorKind::Throttled
        | ErrorKind::AuthRequired
        | ErrorKind::NoProfilesAvailable => StatusCode::BAD_GATEWAY,
        ErrorKind::NoSpace | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Human strings for the wire. Deliberately static: adapter internals,
/// file paths and engine output never reach a response body.
fn message_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::BotChallenge => "Upstream demanded human verification",
        ErrorKind::Unavailable => "Upstream was unavailable",
        ErrorKind::Throttled => "Upstream rate limit hit",
        ErrorKind::AuthRequired => "Profile requires credentials that are not configured",
        ErrorKind::NotFound => "Video not found, deleted or private",
        ErrorKind::GeoBlocked => "Video is not available in this region",
        ErrorKind::TooLong => "Video duration exceeds the configured cap",
        ErrorKind::TooLarge => "Download size exceeds the configured cap",
        ErrorKind::BadFormat => "Format selector was rejected",
        ErrorKind::AmbiguousInput => "URL did not resolve to a single video",
        ErrorKind::NoProfilesAvailable => "No usable player profiles are configured",
        ErrorKind::NoSpace => "Service is out of disk space",
        ErrorKind::Timeout => "Request deadline exceeded",
        ErrorKind::Unauthorized => "Invalid or missing API key",
        ErrorKind::BadRequest => "Request was malformed",
        ErrorKind::Internal => "An unexpected error occurred",
    }
}

/// Maps a fallback failure to its wire response, attaching the ordered
/// attempt list.
pub fn failure_response(failure: FallbackFailure) -> Response {
    let kind = failure.kind();
    let body = ErrorBody {
        error: kind.as_str(),
        message: message_for(kind).to_string(),
        attempts: if failure.attempts.is_empty() {
            None
        } else {
            Some(failure.attempts)
        },
    };
    (status_for(kind), Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::fallback::FailureReason;
    use crate::downloader::AttemptOutcome;

    #[test]
    fn status_mapping_matches_the_wire_contract() {
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::TooLarge), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(status_for(ErrorKind::TooLong), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            status_for(ErrorKind::BadFormat),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Unavailable), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn attempts_serialize_with_camel_case_elapsed() {
        let failure = FallbackFailure {
            reason: FailureReason::Permanent(ErrorKind::NotFound),
            attempts: vec![AttemptRecord {
                profile: "tv".to_string(),
                outcome: AttemptOutcome::Permanent,
                kind: Some(ErrorKind::NotFound),
                elapsed_ms: 12,
            }],
        };
        let body = ErrorBody {
            error: failure.kind().as_str(),
            message: "m".to_string(),
            attempts: Some(failure.attempts),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "NotFound");
        assert_eq!(json["attempts"][0]["profile"], "tv");
        assert_eq!(json["attempts"][0]["outcome"], "permanent");
        assert_eq!(json["attempts"][0]["elapsedMs"], 12);
    }

    #[test]
    fn download_request_accepts_camel_case_duration() {
        let req: DownloadRequest = serde_json::from_str(
            r#"{"url":"https://youtu.be/a","maxDurationSeconds":600}"#,
        )
        .unwrap();
        assert_eq!(req.max_duration_seconds, Some(600));
        assert!(req.format.is_none());
    }
}
