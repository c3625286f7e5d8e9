use std::path::PathBuf;

use crate::errors::{AppError, Result};

/// Immutable application context, read once from the process environment
/// at startup and passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub bind_address: String,
    /// 0 lets the runtime pick its default worker count.
    pub worker_count: usize,
    pub log_level: String,
    pub download_dir: PathBuf,
    pub max_download_size_mb: u64,
    pub max_duration_seconds: u64,
    pub reaper_window_minutes: u64,
    pub reaper_tick_seconds: u64,
    pub post_response_delay_seconds: u64,
    pub default_profile: String,
    pub default_order: Vec<String>,
    pub allow_credential_profile: bool,
    pub credential_blob_base64: Option<String>,
    pub probe_timeout_seconds: u64,
    pub fetch_timeout_seconds: u64,
    pub request_deadline_seconds: u64,
    /// Overrides engine binary discovery when set.
    pub ytdlp_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            bind_address: "0.0.0.0:8080".to_string(),
            worker_count: 0,
            log_level: "info".to_string(),
            download_dir: PathBuf::from("/tmp/downloads"),
            max_download_size_mb: 500,
            max_duration_seconds: 7200,
            reaper_window_minutes: 30,
            reaper_tick_seconds: 300,
            post_response_delay_seconds: 60,
            default_profile: "tv".to_string(),
            default_order: vec![
                "tv".to_string(),
                "ios".to_string(),
                "android".to_string(),
                "cookies".to_string(),
            ],
            allow_credential_profile: true,
            credential_blob_base64: None,
            probe_timeout_seconds: 120,
            fetch_timeout_seconds: 900,
            request_deadline_seconds: 300,
            ytdlp_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let api_key = env_string("API_KEY")
            .ok_or_else(|| AppError::Config("API_KEY must be set".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(AppError::Config("API_KEY must not be empty".to_string()));
        }

        let default_order = match env_string("DEFAULT_ORDER") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.default_order.clone(),
        };

        Ok(Self {
            api_key,
            bind_address: env_string("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            worker_count: env_parse("WORKER_COUNT", defaults.worker_count)?,
            log_level: env_string("LOG_LEVEL").unwrap_or(defaults.log_level),
            download_dir: env_string("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            max_download_size_mb: env_parse("MAX_DOWNLOAD_SIZE_MB", defaults.max_download_size_mb)?,
            max_duration_seconds: env_parse("MAX_DURATION_SECONDS", defaults.max_duration_seconds)?,
            reaper_window_minutes: env_parse(
                "REAPER_WINDOW_MINUTES",
                defaults.reaper_window_minutes,
            )?,
            reaper_tick_seconds: env_parse("REAPER_TICK_SECONDS", defaults.reaper_tick_seconds)?,
            post_response_delay_seconds: env_parse(
                "POST_RESPONSE_DELAY_SECONDS",
                defaults.post_response_delay_seconds,
            )?,
            default_profile: env_string("DEFAULT_PROFILE")
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or(defaults.default_profile),
            default_order,
            allow_credential_profile: env_bool(
                "ALLOW_CREDENTIAL_PROFILE",
                defaults.allow_credential_profile,
            ),
            credential_blob_base64: env_string("CREDENTIAL_BLOB_BASE64"),
            probe_timeout_seconds: env_parse(
                "PROBE_TIMEOUT_SECONDS",
                defaults.probe_timeout_seconds,
            )?,
            fetch_timeout_seconds: env_parse(
                "FETCH_TIMEOUT_SECONDS",
                defaults.fetch_timeout_seconds,
            )?,
            request_deadline_seconds: env_parse(
                "REQUEST_DEADLINE_SECONDS",
                defaults.request_deadline_seconds,
            )?,
            ytdlp_path: env_string("YTDLP_PATH").map(PathBuf::from),
        })
    }

    pub fn max_download_size_bytes(&self) -> u64 {
        self.max_download_size_mb * 1024 * 1024
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match env_string(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_string(name) {
        Some(raw) => !matches!(raw.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_documented_table() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_download_size_mb, 500);
        assert_eq!(cfg.max_duration_seconds, 7200);
        assert_eq!(cfg.reaper_window_minutes, 30);
        assert_eq!(cfg.reaper_tick_seconds, 300);
        assert_eq!(cfg.post_response_delay_seconds, 60);
        assert_eq!(cfg.default_profile, "tv");
        assert_eq!(cfg.default_order, vec!["tv", "ios", "android", "cookies"]);
        assert!(cfg.allow_credential_profile);
    }

    #[test]
    fn size_cap_converts_to_bytes() {
        let cfg = AppConfig {
            max_download_size_mb: 10,
            ..AppConfig::default()
        };
        assert_eq!(cfg.max_download_size_bytes(), 10 * 1024 * 1024);
    }
}
