use log::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Player-client impersonation profiles. A closed set: each variant
/// carries the upstream client the engine should impersonate, the quality
/// ceiling that client is known to expose, and whether it only works with
/// a signed-in identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerClient {
    Tv,
    Ios,
    Android,
    Mweb,
    Web,
    /// Web client driven through an authenticated cookie jar.
    Cookies,
}

impl PlayerClient {
    pub const ALL: [PlayerClient; 6] = [
        PlayerClient::Tv,
        PlayerClient::Ios,
        PlayerClient::Android,
        PlayerClient::Mweb,
        PlayerClient::Web,
        PlayerClient::Cookies,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PlayerClient::Tv => "tv",
            PlayerClient::Ios => "ios",
            PlayerClient::Android => "android",
            PlayerClient::Mweb => "mweb",
            PlayerClient::Web => "web",
            PlayerClient::Cookies => "cookies",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// The `player_client` value handed to the engine's extractor args.
    /// The cookies profile rides the web client; its distinguishing
    /// parameter is the credential file, not the client name.
    pub fn player_client_arg(self) -> &'static str {
        match self {
            PlayerClient::Tv => "tv",
            PlayerClient::Ios => "ios",
            PlayerClient::Android => "android",
            PlayerClient::Mweb => "mweb",
            PlayerClient::Web | PlayerClient::Cookies => "web",
        }
    }

    pub fn requires_credentials(self) -> bool {
        matches!(self, PlayerClient::Cookies)
    }

    /// Highest resolution each client is known to serve. Android tops out
    /// at 360p; iOS exposes the full range including 4K.
    pub fn quality_ceiling(self) -> QualityCeiling {
        match self {
            PlayerClient::Ios | PlayerClient::Cookies => QualityCeiling::Uhd2160,
            PlayerClient::Tv | PlayerClient::Web => QualityCeiling::Hd1080,
            PlayerClient::Mweb => QualityCeiling::Hd720,
            PlayerClient::Android => QualityCeiling::Sd360,
        }
    }

    pub fn spec(self) -> ProfileSpec {
        ProfileSpec { client: self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityCeiling {
    Sd360,
    Hd720,
    Hd1080,
    Uhd2160,
}

impl QualityCeiling {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityCeiling::Sd360 => "sd-360p",
            QualityCeiling::Hd720 => "hd-720p",
            QualityCeiling::Hd1080 => "hd-1080p",
            QualityCeiling::Uhd2160 => "uhd-2160p",
        }
    }
}

/// One entry of a fallback plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSpec {
    pub client: PlayerClient,
}

impl ProfileSpec {
    pub fn name(&self) -> &'static str {
        self.client.name()
    }

    pub fn requires_credentials(&self) -> bool {
        self.client.requires_credentials()
    }

    pub fn quality_ceiling(&self) -> QualityCeiling {
        self.client.quality_ceiling()
    }
}

/// Configuration-driven view over the closed profile set.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    order: Vec<PlayerClient>,
    default_profile: PlayerClient,
    allow_credential_profile: bool,
}

impl ProfileRegistry {
    /// Resolves the configured order against the closed set. Unknown
    /// names are ignored with a warning; an empty resolved order is a
    /// fatal startup error.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut order = Vec::new();
        for name in &config.default_order {
            match PlayerClient::from_name(name) {
                Some(client) => {
                    if !order.contains(&client) {
                        order.push(client);
                    }
                }
                None => warn!("Ignoring unknown profile in DEFAULT_ORDER: {name}"),
            }
        }

        if !config.allow_credential_profile {
            order.retain(|c| !c.requires_credentials());
        }

        if order.is_empty() {
            return Err(AppError::Config(
                "DEFAULT_ORDER resolved to no usable profiles".to_string(),
            ));
        }

        let default_profile = match PlayerClient::from_name(&config.default_profile) {
            Some(client) => client,
            None => {
                warn!(
                    "Ignoring unknown DEFAULT_PROFILE: {}; using first of order",
                    config.default_profile
                );
                order[0]
            }
        };

        Ok(Self {
            order,
            default_profile,
            allow_credential_profile: config.allow_credential_profile,
        })
    }

    pub fn list(&self) -> Vec<ProfileSpec> {
        PlayerClient::ALL.into_iter().map(PlayerClient::spec).collect()
    }

    pub fn get(&self, name: &str) -> Option<ProfileSpec> {
        PlayerClient::from_name(name).map(PlayerClient::spec)
    }

    pub fn default_order(&self) -> &[PlayerClient] {
        &self.order
    }

    pub fn default_profile(&self) -> PlayerClient {
        self.default_profile
    }

    pub fn allow_credential_profile(&self) -> bool {
        self.allow_credential_profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_order(order: &[&str]) -> AppConfig {
        AppConfig {
            default_order: order.iter().map(|s| s.to_string()).collect(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn unknown_names_are_ignored() {
        let cfg = config_with_order(&["tv", "nonsense", "android"]);
        let registry = ProfileRegistry::from_config(&cfg).unwrap();
        assert_eq!(
            registry.default_order(),
            &[PlayerClient::Tv, PlayerClient::Android]
        );
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let cfg = config_with_order(&["ios", "tv", "ios"]);
        let registry = ProfileRegistry::from_config(&cfg).unwrap();
        assert_eq!(
            registry.default_order(),
            &[PlayerClient::Ios, PlayerClient::Tv]
        );
    }

    #[test]
    fn empty_resolved_order_is_fatal() {
        let cfg = config_with_order(&["nonsense", "bogus"]);
        assert!(ProfileRegistry::from_config(&cfg).is_err());
    }

    #[test]
    fn credential_gate_filters_cookies_profile() {
        let cfg = AppConfig {
            allow_credential_profile: false,
            ..config_with_order(&["tv", "cookies", "android"])
        };
        let registry = ProfileRegistry::from_config(&cfg).unwrap();
        assert_eq!(
            registry.default_order(),
            &[PlayerClient::Tv, PlayerClient::Android]
        );
    }

    #[test]
    fn only_cookies_requires_credentials() {
        for client in PlayerClient::ALL {
            assert_eq!(
                client.requires_credentials(),
                client == PlayerClient::Cookies
            );
        }
    }

    #[test]
    fn android_is_capped_at_360p() {
        assert_eq!(
            PlayerClient::Android.quality_ceiling(),
            QualityCeiling::Sd360
        );
        assert_eq!(PlayerClient::Ios.quality_ceiling(), QualityCeiling::Uhd2160);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let cfg = config_with_order(&["tv"]);
        let registry = ProfileRegistry::from_config(&cfg).unwrap();
        assert!(registry.get("IOS").is_some());
        assert!(registry.get("nonsense").is_none());
    }
}
