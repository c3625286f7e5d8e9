use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::errors::{AppError, Result};

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

/// Holds the decoded credential blob in memory and materialises it as a
/// short-lived owner-only file whenever a credentialled profile runs.
/// Each acquisition gets its own copy, so concurrent fetches never share
/// a file on the ephemeral filesystem.
pub struct CredentialStore {
    blob: Option<String>,
}

impl CredentialStore {
    /// Decodes the configured blob at startup. Invalid encoding is a
    /// non-fatal warning: the store loads empty and credentialled
    /// profiles are simply dropped from every plan.
    pub fn load(encoded: Option<&str>) -> Self {
        let blob = encoded.and_then(|raw| match decode_blob(raw) {
            Ok(text) => {
                info!("Credential blob loaded ({} bytes)", text.len());
                Some(text)
            }
            Err(e) => {
                warn!("Ignoring credential blob: {e}");
                None
            }
        });
        Self { blob }
    }

    pub fn empty() -> Self {
        Self { blob: None }
    }

    pub fn is_populated(&self) -> bool {
        self.blob.is_some()
    }

    /// Materialises a fresh credential file. The handle owns the file;
    /// dropping it unlinks the path on every exit path, panics included.
    pub fn acquire(&self) -> Result<CredentialHandle> {
        let blob = self
            .blob
            .as_deref()
            .ok_or_else(|| AppError::Credential("credential store is empty".to_string()))?;

        // tempfile creates 0600 files on unix; the scratch location keeps
        // credential material out of the shared download directory.
        let mut file = tempfile::Builder::new()
            .prefix("vg_cookies_")
            .suffix(".txt")
            .tempfile()
            .map_err(|e| AppError::Credential(format!("failed to create credential file: {e}")))?;
        file.write_all(blob.as_bytes())
            .map_err(|e| AppError::Credential(format!("failed to write credential file: {e}")))?;
        file.flush()
            .map_err(|e| AppError::Credential(format!("failed to flush credential file: {e}")))?;

        debug!("Materialised credential file");
        Ok(CredentialHandle { file })
    }
}

/// Scoped credential file. The path stays valid until the handle drops.
pub struct CredentialHandle {
    file: NamedTempFile,
}

impl CredentialHandle {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

fn decode_blob(encoded: &str) -> std::result::Result<String, String> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64 encoding: {e}"))?;
    let text = String::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {e}"))?;
    if text.trim().is_empty() {
        return Err("decoded blob is empty".to_string());
    }
    // The engine insists on the Netscape header line.
    if text.starts_with(NETSCAPE_HEADER) {
        Ok(text)
    } else {
        Ok(format!(
            "{NETSCAPE_HEADER}\n# This is a generated file! Do not edit.\n{text}"
        ))
    }
}
