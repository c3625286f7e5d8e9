use url::Url;

use crate::errors::{AppError, Result};

pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// The request URL must be an absolute http(s) URL with a host. The
    /// engine decides whether the site itself is supported.
    pub fn validate_url(&self, url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        if parsed.host_str().is_none() {
            return Err(AppError::Validation("URL must have a host".to_string()));
        }

        Ok(())
    }

    /// Format selectors pass through to the engine verbatim, so only
    /// reject input that could never be a selector.
    pub fn validate_format_selector(&self, selector: &str) -> Result<()> {
        if selector.is_empty() {
            return Err(AppError::Validation(
                "Format selector cannot be empty".to_string(),
            ));
        }
        if selector.len() > 256 {
            return Err(AppError::Validation(
                "Format selector too long (max 256 characters)".to_string(),
            ));
        }
        if selector.chars().any(|c| c.is_control()) {
            return Err(AppError::Validation(
                "Format selector contains control characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Sanitizes a title into a Content-Disposition-safe filename.
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        return "video".to_string();
    }

    if trimmed.len() > 200 {
        let mut cut = 200;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        trimmed[..cut].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_video_urls() {
        let v = InputValidator::new();
        assert!(v
            .validate_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .is_ok());
        assert!(v.validate_url("http://vimeo.com/12345").is_ok());
    }

    #[test]
    fn rejects_empty_and_relative_urls() {
        let v = InputValidator::new();
        assert!(v.validate_url("").is_err());
        assert!(v.validate_url("watch?v=abc").is_err());
    }

    #[test]
    fn rejects_non_http_schemes() {
        let v = InputValidator::new();
        assert!(v.validate_url("file:///etc/passwd").is_err());
        assert!(v.validate_url("ftp://example.com/video").is_err());
    }

    #[test]
    fn format_selector_limits() {
        let v = InputValidator::new();
        assert!(v.validate_format_selector("best[ext=mp4]/best").is_ok());
        assert!(v.validate_format_selector("").is_err());
        assert!(v.validate_format_selector("bad\nselector").is_err());
        assert!(v.validate_format_selector(&"x".repeat(300)).is_err());
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?f"), "a_b_c_d_e_f");
        assert_eq!(sanitize_filename("  .hidden.  "), "hidden");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_filename("///"), "video");
        assert_eq!(sanitize_filename(""), "video");
    }

    #[test]
    fn sanitize_truncates_long_titles_on_char_boundary() {
        let long = "é".repeat(300);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 200);
        assert!(!out.is_empty());
    }
}
