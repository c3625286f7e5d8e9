use serde::Serialize;
use thiserror::Error;

/// Symbolic error kinds surfaced on the wire and used by the fallback
/// controller to decide between advancing to the next profile and
/// stopping immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Upstream demanded human verification.
    BotChallenge,
    /// Network failure or 5xx from upstream.
    Unavailable,
    /// Upstream rate limit.
    Throttled,
    /// Profile needs credentials and none were supplied.
    AuthRequired,
    /// Video deleted or private.
    NotFound,
    /// Regional restriction.
    GeoBlocked,
    /// Probed duration exceeds the cap.
    TooLong,
    /// Approximate or actual size exceeds the cap.
    TooLarge,
    /// Format selector rejected by the engine.
    BadFormat,
    /// Playlist or otherwise unresolvable input.
    AmbiguousInput,
    /// The fallback plan resolved to nothing.
    NoProfilesAvailable,
    /// Store filesystem is out of space.
    NoSpace,
    /// Per-request hard deadline expired.
    Timeout,
    /// Missing or wrong API key.
    Unauthorized,
    /// Malformed request input.
    BadRequest,
    /// Adapter or service malfunction.
    Internal,
}

impl ErrorKind {
    /// Transient kinds let the controller advance to the next profile;
    /// everything else terminates the fallback immediately.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::BotChallenge
                | ErrorKind::Unavailable
                | ErrorKind::Throttled
                | ErrorKind::AuthRequired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BotChallenge => "BotChallenge",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Throttled => "Throttled",
            ErrorKind::AuthRequired => "AuthRequired",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::GeoBlocked => "GeoBlocked",
            ErrorKind::TooLong => "TooLong",
            ErrorKind::TooLarge => "TooLarge",
            ErrorKind::BadFormat => "BadFormat",
            ErrorKind::AmbiguousInput => "AmbiguousInput",
            ErrorKind::NoProfilesAvailable => "NoProfilesAvailable",
            ErrorKind::NoSpace => "NoSpace",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced at the extractor adapter boundary. The engine's
/// exception-style failures are translated into exactly one kind here;
/// nothing above the adapter sees raw engine output.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ExtractError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExtractError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Credential error: {0}")]
    Credential(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_match_controller_table() {
        let transient = [
            ErrorKind::BotChallenge,
            ErrorKind::Unavailable,
            ErrorKind::Throttled,
            ErrorKind::AuthRequired,
        ];
        let permanent = [
            ErrorKind::NotFound,
            ErrorKind::GeoBlocked,
            ErrorKind::TooLong,
            ErrorKind::TooLarge,
            ErrorKind::BadFormat,
            ErrorKind::AmbiguousInput,
            ErrorKind::Internal,
        ];
        for kind in transient {
            assert!(kind.is_transient(), "{kind} should advance the fallback");
        }
        for kind in permanent {
            assert!(!kind.is_transient(), "{kind} should stop the fallback");
        }
    }

    #[test]
    fn kinds_serialize_symbolically() {
        let json = serde_json::to_string(&ErrorKind::BotChallenge).unwrap();
        assert_eq!(json, "\"BotChallenge\"");
    }
}
