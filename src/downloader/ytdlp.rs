use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::downloader::profiles::ProfileSpec;
use crate::downloader::{FetchRequest, FetchedFile, MediaInfo, ProgressEvent};
use crate::errors::{ErrorKind, ExtractError};
use crate::security::credentials::CredentialHandle;
use crate::security::input_validation::sanitize_filename;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Adapter around the external yt-dlp engine. All engine invocation,
/// output parsing and error translation is confined here; the controller
/// above only ever sees `MediaInfo`, `FetchedFile` and `ExtractError`.
pub struct YtDlpExtractor {
    binary: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(binary_override: Option<PathBuf>) -> Self {
        let binary = binary_override.unwrap_or_else(locate_binary);
        info!("Using extractor engine at {binary:?}");
        Self { binary }
    }

    fn probe_args(
        &self,
        url: &str,
        profile: &ProfileSpec,
        credentials: Option<&CredentialHandle>,
    ) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            "15".to_string(),
            "--retries".to_string(),
            "2".to_string(),
            "--user-agent".to_string(),
            USER_AGENT.to_string(),
        ];
        push_profile_args(&mut args, url, profile, credentials);
        args.push(url.to_string());
        args
    }

    fn fetch_args(
        &self,
        request: &FetchRequest,
        profile: &ProfileSpec,
        credentials: Option<&CredentialHandle>,
    ) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            request.format_selector.clone(),
            "-o".to_string(),
            request.output_template.to_string_lossy().to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
            "--retries".to_string(),
            "2".to_string(),
            "--max-filesize".to_string(),
            request.caps.max_size_bytes.to_string(),
            "--user-agent".to_string(),
            USER_AGENT.to_string(),
            "--progress-template".to_string(),
            "download:progress %(progress._percent_str)s".to_string(),
        ];
        push_profile_args(&mut args, &request.url, profile, credentials);
        args.push(request.url.clone());
        args
    }

    async fn run_probe(&self, args: &[String]) -> Result<serde_json::Value, ExtractError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractError::internal(format!("failed to spawn engine: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = classify_stderr(&stderr);
            debug!("Engine probe failed ({kind}): {}", excerpt(&stderr));
            return Err(ExtractError::new(kind, excerpt(&stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::internal(format!("engine produced invalid JSON: {e}")))
    }
}

#[async_trait::async_trait]
impl crate::downloader::Extractor for YtDlpExtractor {
    async fn probe(
        &self,
        url: &str,
        profile: &ProfileSpec,
        credentials: Option<&CredentialHandle>,
    ) -> Result<MediaInfo, ExtractError> {
        debug!("Probing {url} with profile {}", profile.name());
        let value = self
            .run_probe(&self.probe_args(url, profile, credentials))
            .await?;
        parse_media_info(&value, url)
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        profile: &ProfileSpec,
        credentials: Option<&CredentialHandle>,
    ) -> Result<FetchedFile, ExtractError> {
        // Probe first: both caps are enforced before any bytes move.
        let info = self.probe(&request.url, profile, credentials).await?;

        if let Some(duration) = info.duration {
            if duration > request.caps.max_duration_seconds as f64 {
                return Err(ExtractError::new(
                    ErrorKind::TooLong,
                    format!(
                        "duration {duration:.0}s exceeds cap of {}s",
                        request.caps.max_duration_seconds
                    ),
                ));
            }
        }
        if let Some(size) = info.filesize_approx {
            if size > request.caps.max_size_bytes {
                return Err(ExtractError::new(
                    ErrorKind::TooLarge,
                    format!(
                        "approximate size {size} exceeds cap of {} bytes",
                        request.caps.max_size_bytes
                    ),
                ));
            }
        }

        publish(&request.progress, ProgressEvent::Started);

        let args = self.fetch_args(request, profile, credentials);
        match self.run_fetch(&args, request).await {
            Ok(()) => {}
            Err(e) => {
                publish(&request.progress, ProgressEvent::Failed);
                return Err(e);
            }
        }

        let path = find_output_file(&request.output_template)
            .await
            .ok_or_else(|| {
                publish(&request.progress, ProgressEvent::Failed);
                ExtractError::internal("no output file found after download")
            })?;

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| ExtractError::internal(format!("failed to stat output file: {e}")))?;

        // Exceeding the cap during download aborts and releases the file;
        // a size exactly at the cap is accepted.
        if size_bytes > request.caps.max_size_bytes {
            let _ = tokio::fs::remove_file(&path).await;
            publish(&request.progress, ProgressEvent::Failed);
            return Err(ExtractError::new(
                ErrorKind::TooLarge,
                format!(
                    "downloaded {size_bytes} bytes, cap is {}",
                    request.caps.max_size_bytes
                ),
            ));
        }

        publish(&request.progress, ProgressEvent::Completed);

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();
        let title = info.title.as_deref().unwrap_or("video");

        Ok(FetchedFile {
            mime_type: mime_for_extension(&ext).to_string(),
            file_name: format!("{}.{ext}", sanitize_filename(title)),
            size_bytes,
            path,
        })
    }
}

impl YtDlpExtractor {
    async fn run_fetch(&self, args: &[String], request: &FetchRequest) -> Result<(), ExtractError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::internal(format!("failed to spawn engine: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::internal("engine stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::internal("engine stderr not captured"))?;

        let progress = request.progress.clone();
        let stdout_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut milestone = 0u8;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = parse_progress_line(&line) {
                    while let Some(next) = next_milestone(milestone) {
                        if percent < next as f64 {
                            break;
                        }
                        milestone = next;
                        publish(&progress, ProgressEvent::Milestone(next));
                    }
                }
            }
        });

        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if buf.len() < 16 * 1024 {
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| ExtractError::internal(format!("engine process failed: {e}")))?
            }
            _ = request.cancel.cancelled() => {
                warn!("Download cancelled, killing engine process");
                let _ = child.kill().await;
                let _ = stdout_reader.await;
                let _ = stderr_reader.await;
                cleanup_partials(&request.output_template).await;
                return Err(ExtractError::internal("download cancelled"));
            }
        };

        let _ = stdout_reader.await;
        let stderr_text = stderr_reader.await.unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        let kind = classify_stderr(&stderr_text);
        error!("Engine download failed ({kind}): {}", excerpt(&stderr_text));
        cleanup_partials(&request.output_template).await;
        Err(ExtractError::new(kind, excerpt(&stderr_text)))
    }
}

fn push_profile_args(
    args: &mut Vec<String>,
    url: &str,
    profile: &ProfileSpec,
    credentials: Option<&CredentialHandle>,
) {
    // Impersonation parameters only mean something to the YouTube
    // extractor; other sites get the engine defaults.
    if is_youtube_url(url) {
        args.push("--extractor-args".to_string());
        args.push(format!(
            "youtube:player_client={}",
            profile.client.player_client_arg()
        ));
    }
    if let Some(handle) = credentials {
        args.push("--cookies".to_string());
        args.push(handle.path().to_string_lossy().to_string());
    }
}

fn is_youtube_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("youtube.com") || lower.contains("youtu.be")
}

/// Finds the engine binary in the common install locations, falling back
/// to PATH resolution at spawn time.
fn locate_binary() -> PathBuf {
    for candidate in ["/usr/local/bin/yt-dlp", "/usr/bin/yt-dlp", "/opt/homebrew/bin/yt-dlp"] {
        if Path::new(candidate).exists() {
            return PathBuf::from(candidate);
        }
    }
    PathBuf::from("yt-dlp")
}

fn parse_media_info(value: &serde_json::Value, url: &str) -> Result<MediaInfo, ExtractError> {
    // A flat playlist payload means the input did not resolve to a single
    // entry even under no-playlist semantics.
    if value.get("entries").is_some() {
        return Err(ExtractError::new(
            ErrorKind::AmbiguousInput,
            "input resolved to a playlist, not a single video",
        ));
    }

    let get_str = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };
    let get_u64 = |key: &str| value.get(key).and_then(|v| v.as_u64());

    Ok(MediaInfo {
        title: get_str("title"),
        duration: value.get("duration").and_then(|v| v.as_f64()),
        duration_string: get_str("duration_string"),
        thumbnail: get_str("thumbnail"),
        uploader: get_str("uploader"),
        upload_date: get_str("upload_date"),
        view_count: get_u64("view_count"),
        like_count: get_u64("like_count"),
        description: get_str("description").map(|d| d.chars().take(500).collect()),
        filesize_approx: get_u64("filesize_approx").or_else(|| get_u64("filesize")),
        webpage_url: get_str("webpage_url").unwrap_or_else(|| url.to_string()),
        extractor: get_str("extractor"),
        formats_available: value
            .get("formats")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0),
    })
}

/// Maps engine stderr onto the service taxonomy. Every failure lands on
/// exactly one kind; unrecognised upstream complaints are treated as
/// transient `Unavailable` so the fallback can advance.
pub fn classify_stderr(stderr: &str) -> ErrorKind {
    let text = stderr.to_lowercase();

    if text.contains("sign in to confirm you're not a bot")
        || text.contains("sign in to confirm you\u{2019}re not a bot")
        || text.contains("captcha")
    {
        ErrorKind::BotChallenge
    } else if text.contains("http error 429") || text.contains("too many requests") {
        ErrorKind::Throttled
    } else if text.contains("sign in to confirm your age")
        || text.contains("login required")
        || text.contains("members-only")
        || text.contains("cookies are no longer valid")
        || text.contains("requires authentication")
    {
        ErrorKind::AuthRequired
    } else if text.contains("video unavailable")
        || text.contains("private video")
        || text.contains("has been removed")
        || text.contains("does not exist")
        || text.contains("http error 404")
    {
        ErrorKind::NotFound
    } else if text.contains("not available in your country")
        || text.contains("geo restricted")
        || text.contains("geo-restricted")
        || text.contains("blocked it in your country")
    {
        ErrorKind::GeoBlocked
    } else if text.contains("requested format is not available")
        || text.contains("invalid format specification")
    {
        ErrorKind::BadFormat
    } else if text.contains("file is larger than max-filesize") {
        ErrorKind::TooLarge
    } else if text.contains("no space left on device") {
        ErrorKind::NoSpace
    } else if text.contains("is not a valid url") || text.contains("unsupported url") {
        ErrorKind::BadRequest
    } else {
        // Timeouts, 403s, 5xx and anything unrecognised: let the next
        // profile have a go.
        ErrorKind::Unavailable
    }
}

/// Parses a `--progress-template` line into a percentage.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let rest = line.trim().strip_prefix("progress ")?;
    rest.trim().trim_end_matches('%').trim().parse().ok()
}

fn next_milestone(current: u8) -> Option<u8> {
    match current {
        0 => Some(25),
        25 => Some(50),
        50 => Some(75),
        _ => None,
    }
}

fn publish(progress: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
    // try_send keeps the download task decoupled from slow consumers.
    if progress.try_send(event).is_err() {
        debug!("Progress consumer lagging, dropped {event:?}");
    }
}

/// Resolves `<id>.%(ext)s` to whatever file the engine actually wrote.
async fn find_output_file(template: &Path) -> Option<PathBuf> {
    let dir = template.parent()?;
    let stem = template
        .file_name()?
        .to_string_lossy()
        .replace(".%(ext)s", "");

    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&stem) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Some(entry.path());
        }
    }
    None
}

/// Failed downloads release their partial files before returning.
async fn cleanup_partials(template: &Path) {
    let Some(dir) = template.parent() else { return };
    let stem = match template.file_name() {
        Some(name) => name.to_string_lossy().replace(".%(ext)s", ""),
        None => return,
    };

    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&stem) {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!("Failed to remove partial {:?}: {e}", entry.path());
            }
        }
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

fn excerpt(stderr: &str) -> String {
    let important: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:") || l.contains("HTTP Error"))
        .take(2)
        .collect();
    if !important.is_empty() {
        return important.join(" | ");
    }
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown engine error")
        .chars()
        .take(220)
        .collect()
}
