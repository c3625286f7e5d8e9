use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::downloader::profiles::{PlayerClient, ProfileRegistry, ProfileSpec};
use crate::downloader::{
    AttemptOutcome, AttemptRecord, Extractor, FetchRequest, FetchedFile, MediaInfo,
};
use crate::errors::{ErrorKind, ExtractError};
use crate::security::credentials::CredentialStore;

/// Why a fallback run ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The plan resolved to nothing.
    NoProfilesAvailable,
    /// A profile failed with a permanent kind; no further profiles tried.
    Permanent(ErrorKind),
    /// Every profile in the plan was tried and failed transiently.
    Exhausted,
    /// The per-request hard deadline expired mid-plan.
    TimedOut,
}

#[derive(Debug)]
pub struct FallbackFailure {
    pub reason: FailureReason,
    pub attempts: Vec<AttemptRecord>,
}

impl FallbackFailure {
    /// The symbolic kind reported on the wire.
    pub fn kind(&self) -> ErrorKind {
        match self.reason {
            FailureReason::NoProfilesAvailable => ErrorKind::NoProfilesAvailable,
            FailureReason::Permanent(kind) => kind,
            FailureReason::TimedOut => ErrorKind::Timeout,
            FailureReason::Exhausted => self
                .attempts
                .last()
                .and_then(|a| a.kind)
                .unwrap_or(ErrorKind::Unavailable),
        }
    }
}

#[derive(Debug)]
pub struct ProbeOutcome {
    pub info: MediaInfo,
    pub attempts: Vec<AttemptRecord>,
}

pub struct FetchOutcome {
    pub file: FetchedFile,
    pub attempts: Vec<AttemptRecord>,
}

/// Owns the per-request profile ordering and drives the adapter through
/// it: advance on transient failures, stop on permanent ones, record
/// every attempt for the response.
pub struct FallbackController {
    registry: ProfileRegistry,
    credentials: Arc<CredentialStore>,
    extractor: Arc<dyn Extractor>,
    probe_timeout: Duration,
    fetch_timeout: Duration,
    request_deadline: Duration,
}

impl FallbackController {
    pub fn new(
        registry: ProfileRegistry,
        credentials: Arc<CredentialStore>,
        extractor: Arc<dyn Extractor>,
        config: &AppConfig,
    ) -> Self {
        Self {
            registry,
            credentials,
            extractor,
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_seconds),
            request_deadline: Duration::from_secs(config.request_deadline_seconds),
        }
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Builds the ordered, deduplicated plan: the preferred profile (or
    /// the configured default) first, the configured order after it,
    /// credentialled profiles dropped when no credentials are loaded.
    /// Unknown preferred names are ignored, not rejected.
    pub fn build_plan(&self, preferred: Option<&str>) -> Vec<ProfileSpec> {
        let mut clients: Vec<PlayerClient> = Vec::new();

        let lead = match preferred {
            Some(name) => match PlayerClient::from_name(name) {
                Some(client) => Some(client),
                None => {
                    info!("Ignoring unknown preferred profile: {name}");
                    Some(self.registry.default_profile())
                }
            },
            None => Some(self.registry.default_profile()),
        };
        if let Some(client) = lead {
            clients.push(client);
        }

        for &client in self.registry.default_order() {
            if !clients.contains(&client) {
                clients.push(client);
            }
        }

        clients.retain(|client| {
            if !client.requires_credentials() {
                return true;
            }
            self.registry.allow_credential_profile() && self.credentials.is_populated()
        });

        clients.into_iter().map(PlayerClient::spec).collect()
    }

    pub async fn run_probe(
        &self,
        url: &str,
        preferred: Option<&str>,
    ) -> Result<ProbeOutcome, FallbackFailure> {
        self.run(url, preferred, self.probe_timeout, |profile, handle| {
            let extractor = Arc::clone(&self.extractor);
            let url = url.to_string();
            async move { extractor.probe(&url, &profile, handle.as_ref()).await }
        })
        .await
        .map(|(info, attempts)| ProbeOutcome { info, attempts })
    }

    pub async fn run_fetch(
        &self,
        request: Arc<FetchRequest>,
        preferred: Option<&str>,
    ) -> Result<FetchOutcome, FallbackFailure> {
        let url = request.url.clone();
        self.run(&url, preferred, self.fetch_timeout, |profile, handle| {
            let extractor = Arc::clone(&self.extractor);
            let request = Arc::clone(&request);
            async move { extractor.fetch(&request, &profile, handle.as_ref()).await }
        })
        .await
        .map(|(file, attempts)| FetchOutcome { file, attempts })
    }

    /// The shared attempt loop. `op` runs one adapter call for a profile;
    /// elapsed time is measured tightly around it. The credential handle
    /// moves into the attempt future, so the file is unlinked as soon as
    /// the attempt finishes, times out or is dropped.
    async fn run<T, F, Fut>(
        &self,
        url: &str,
        preferred: Option<&str>,
        attempt_timeout: Duration,
        op: F,
    ) -> Result<(T, Vec<AttemptRecord>), FallbackFailure>
    where
        F: Fn(ProfileSpec, Option<crate::security::credentials::CredentialHandle>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ExtractError>>,
    {
        let plan = self.build_plan(preferred);
        if plan.is_empty() {
            warn!("No usable profiles for request");
            return Err(FallbackFailure {
                reason: FailureReason::NoProfilesAvailable,
                attempts: Vec::new(),
            });
        }

        let deadline = Instant::now() + self.request_deadline;
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        for profile in plan {
            let handle = if profile.requires_credentials() {
                match self.credentials.acquire() {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        warn!("Profile {} needs credentials: {e}", profile.name());
                        attempts.push(AttemptRecord {
                            profile: profile.name().to_string(),
                            outcome: AttemptOutcome::Transient,
                            kind: Some(ErrorKind::AuthRequired),
                            elapsed_ms: 0,
                        });
                        continue;
                    }
                }
            } else {
                None
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FallbackFailure {
                    reason: FailureReason::TimedOut,
                    attempts,
                });
            }
            let budget = attempt_timeout.min(remaining);

            info!(
                "Trying profile {} (ceiling {}) for {url}",
                profile.name(),
                profile.quality_ceiling().as_str()
            );
            let started = Instant::now();
            let result = tokio::time::timeout(budget, op(profile, handle)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(value)) => {
                    info!("Profile {} succeeded in {elapsed_ms}ms", profile.name());
                    attempts.push(AttemptRecord {
                        profile: profile.name().to_string(),
                        outcome: AttemptOutcome::Ok,
                        kind: None,
                        elapsed_ms,
                    });
                    return Ok((value, attempts));
                }
                Ok(Err(err)) => {
                    warn!(
                        "Profile {} failed in {elapsed_ms}ms: {} ({})",
                        profile.name(),
                        err.kind,
                        err.message
                    );
                    let transient = err.kind.is_transient();
                    attempts.push(AttemptRecord {
                        profile: profile.name().to_string(),
                        outcome: if transient {
                            AttemptOutcome::Transient
                        } else {
                            AttemptOutcome::Permanent
                        },
                        kind: Some(err.kind),
                        elapsed_ms,
                    });
                    if !transient {
                        return Err(FallbackFailure {
                            reason: FailureReason::Permanent(err.kind),
                            attempts,
                        });
                    }
                }
                Err(_) => {
                    let hard_deadline = Instant::now() >= deadline;
                    warn!(
                        "Profile {} timed out after {elapsed_ms}ms (hard deadline: {hard_deadline})",
                        profile.name()
                    );
                    attempts.push(AttemptRecord {
                        profile: profile.name().to_string(),
                        outcome: AttemptOutcome::Transient,
                        kind: Some(if hard_deadline {
                            ErrorKind::Timeout
                        } else {
                            ErrorKind::Unavailable
                        }),
                        elapsed_ms,
                    });
                    if hard_deadline {
                        return Err(FallbackFailure {
                            reason: FailureReason::TimedOut,
                            attempts,
                        });
                    }
                }
            }
        }

        Err(FallbackFailure {
            reason: FailureReason::Exhausted,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::FetchCaps;
    use crate::security::credentials::CredentialHandle;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Scripted engine double: each profile name maps to an outcome.
    struct ScriptedExtractor {
        outcomes: HashMap<&'static str, Result<(), ErrorKind>>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedExtractor {
        fn new(outcomes: &[(&'static str, Result<(), ErrorKind>)]) -> Self {
            Self {
                outcomes: outcomes.iter().cloned().collect(),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn outcome(&self, profile: &ProfileSpec) -> Result<(), ExtractError> {
            self.calls.lock().unwrap().push(profile.name().to_string());
            match self.outcomes.get(profile.name()) {
                Some(Ok(())) => Ok(()),
                Some(Err(kind)) => Err(ExtractError::new(*kind, "scripted failure")),
                None => Err(ExtractError::new(ErrorKind::Unavailable, "unscripted")),
            }
        }
    }

    fn media_info(url: &str) -> MediaInfo {
        MediaInfo {
            title: Some("T1".to_string()),
            duration: Some(600.0),
            duration_string: Some("10:00".to_string()),
            thumbnail: None,
            uploader: None,
            upload_date: None,
            view_count: None,
            like_count: None,
            description: None,
            filesize_approx: None,
            webpage_url: url.to_string(),
            extractor: Some("youtube".to_string()),
            formats_available: 1,
        }
    }

    #[async_trait::async_trait]
    impl Extractor for ScriptedExtractor {
        async fn probe(
            &self,
            url: &str,
            profile: &ProfileSpec,
            _credentials: Option<&CredentialHandle>,
        ) -> Result<MediaInfo, ExtractError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome(profile).map(|_| media_info(url))
        }

        async fn fetch(
            &self,
            request: &FetchRequest,
            profile: &ProfileSpec,
            _credentials: Option<&CredentialHandle>,
        ) -> Result<FetchedFile, ExtractError> {
            self.outcome(profile).map(|_| FetchedFile {
                path: request.output_template.with_extension("mp4"),
                mime_type: "video/mp4".to_string(),
                file_name: "T1.mp4".to_string(),
                size_bytes: 3,
            })
        }
    }

    fn controller_with(
        order: &[&str],
        credentials: CredentialStore,
        extractor: ScriptedExtractor,
    ) -> (FallbackController, Arc<ScriptedExtractor>) {
        let config = AppConfig {
            default_order: order.iter().map(|s| s.to_string()).collect(),
            default_profile: order[0].to_string(),
            ..AppConfig::default()
        };
        let registry = ProfileRegistry::from_config(&config).unwrap();
        let extractor = Arc::new(extractor);
        let controller = FallbackController::new(
            registry,
            Arc::new(credentials),
            Arc::clone(&extractor) as Arc<dyn Extractor>,
            &config,
        );
        (controller, extractor)
    }

    fn populated_credentials() -> CredentialStore {
        CredentialStore::load(Some(&BASE64.encode("cookie data")))
    }

    #[tokio::test]
    async fn first_profile_success_stops_the_plan() {
        let (controller, extractor) = controller_with(
            &["tv", "ios"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[("tv", Ok(()))]),
        );
        let outcome = controller.run_probe("https://youtu.be/a", None).await.unwrap();
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Ok);
        assert_eq!(extractor.calls(), vec!["tv"]);
    }

    #[tokio::test]
    async fn transient_failure_advances_to_next_profile() {
        let (controller, extractor) = controller_with(
            &["tv", "ios"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[
                ("tv", Err(ErrorKind::BotChallenge)),
                ("ios", Ok(())),
            ]),
        );
        let outcome = controller.run_probe("https://youtu.be/a", None).await.unwrap();
        assert_eq!(extractor.calls(), vec!["tv", "ios"]);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Transient);
        assert_eq!(outcome.attempts[0].kind, Some(ErrorKind::BotChallenge));
        assert_eq!(outcome.attempts[1].outcome, AttemptOutcome::Ok);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let (controller, extractor) = controller_with(
            &["tv", "ios"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[
                ("tv", Err(ErrorKind::NotFound)),
                ("ios", Ok(())),
            ]),
        );
        let failure = controller
            .run_probe("https://youtu.be/a", None)
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::Permanent(ErrorKind::NotFound));
        assert_eq!(failure.attempts.len(), 1);
        assert_eq!(extractor.calls(), vec!["tv"], "ios must not be attempted");
    }

    #[tokio::test]
    async fn missing_credentials_drop_cookie_profile_from_plan() {
        let (controller, extractor) = controller_with(
            &["tv", "cookies", "android"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[
                ("tv", Err(ErrorKind::Unavailable)),
                ("android", Err(ErrorKind::Throttled)),
            ]),
        );
        let failure = controller
            .run_probe("https://youtu.be/a", None)
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::Exhausted);
        assert_eq!(failure.attempts.len(), 2, "exactly tv and android");
        assert_eq!(extractor.calls(), vec!["tv", "android"]);
    }

    #[tokio::test]
    async fn populated_credentials_enable_cookie_profile() {
        let (controller, extractor) = controller_with(
            &["cookies", "tv"],
            populated_credentials(),
            ScriptedExtractor::new(&[("cookies", Ok(()))]),
        );
        controller.run_probe("https://youtu.be/a", None).await.unwrap();
        assert_eq!(extractor.calls(), vec!["cookies"]);
    }

    #[tokio::test]
    async fn unknown_preferred_profile_is_ignored() {
        let (controller, extractor) = controller_with(
            &["tv", "ios"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[("tv", Ok(()))]),
        );
        let outcome = controller
            .run_probe("https://youtu.be/a", Some("nonsense"))
            .await
            .unwrap();
        assert_eq!(outcome.attempts[0].profile, "tv");
        assert_eq!(extractor.calls(), vec!["tv"]);
    }

    #[tokio::test]
    async fn preferred_profile_moves_to_front_without_duplicates() {
        let (controller, _) = controller_with(
            &["tv", "ios", "android"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[]),
        );
        let plan: Vec<&str> = controller
            .build_plan(Some("android"))
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(plan, vec!["android", "tv", "ios"]);
    }

    #[tokio::test]
    async fn plan_construction_is_deterministic() {
        let (controller, _) = controller_with(
            &["tv", "ios", "android"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[]),
        );
        let a: Vec<&str> = controller.build_plan(Some("ios")).iter().map(|p| p.name()).collect();
        let b: Vec<&str> = controller.build_plan(Some("ios")).iter().map(|p| p.name()).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt_in_plan_order() {
        let (controller, _) = controller_with(
            &["tv", "ios", "android"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[
                ("tv", Err(ErrorKind::BotChallenge)),
                ("ios", Err(ErrorKind::Throttled)),
                ("android", Err(ErrorKind::Unavailable)),
            ]),
        );
        let failure = controller
            .run_probe("https://youtu.be/a", None)
            .await
            .unwrap_err();
        let profiles: Vec<&str> = failure.attempts.iter().map(|a| a.profile.as_str()).collect();
        assert_eq!(profiles, vec!["tv", "ios", "android"]);
        assert_eq!(failure.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_deadline_terminates_the_plan() {
        let config = AppConfig {
            default_order: vec!["tv".to_string(), "ios".to_string()],
            default_profile: "tv".to_string(),
            probe_timeout_seconds: 600,
            request_deadline_seconds: 5,
            ..AppConfig::default()
        };
        let registry = ProfileRegistry::from_config(&config).unwrap();
        let extractor = Arc::new(
            ScriptedExtractor::new(&[("tv", Ok(()))]).with_delay(Duration::from_secs(60)),
        );
        let controller = FallbackController::new(
            registry,
            Arc::new(CredentialStore::empty()),
            Arc::clone(&extractor) as Arc<dyn Extractor>,
            &config,
        );

        let failure = controller
            .run_probe("https://youtu.be/a", None)
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::TimedOut);
        assert_eq!(failure.kind(), ErrorKind::Timeout);
        assert_eq!(failure.attempts.len(), 1, "second profile never starts");
    }

    #[tokio::test]
    async fn fetch_runs_through_the_same_fallback() {
        let (controller, extractor) = controller_with(
            &["tv", "ios"],
            CredentialStore::empty(),
            ScriptedExtractor::new(&[
                ("tv", Err(ErrorKind::BotChallenge)),
                ("ios", Ok(())),
            ]),
        );
        let (progress, _rx) = mpsc::channel(16);
        let request = Arc::new(FetchRequest {
            url: "https://youtu.be/a".to_string(),
            format_selector: "best[ext=mp4]/best".to_string(),
            output_template: std::env::temp_dir().join("vg_test.%(ext)s"),
            caps: FetchCaps {
                max_size_bytes: 1024,
                max_duration_seconds: 7200,
            },
            progress,
            cancel: CancellationToken::new(),
        });
        let outcome = controller.run_fetch(request, None).await.unwrap();
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.file.mime_type, "video/mp4");
        assert_eq!(extractor.calls(), vec!["tv", "ios"]);
    }
}
