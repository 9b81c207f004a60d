//! Token issuance and validation configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How required scopes are matched against a token's scopes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMatch {
    /// The token must carry every required scope.
    #[default]
    All,
    /// The token must carry at least one required scope.
    Any,
}

impl ScopeMatch {
    /// Check `granted` against `required`. An empty requirement always passes.
    pub fn satisfied(&self, required: &[String], granted: impl Fn(&str) -> bool) -> bool {
        if required.is_empty() {
            return true;
        }
        match self {
            Self::All => required.iter().all(|s| granted(s)),
            Self::Any => required.iter().any(|s| granted(s)),
        }
    }
}

/// Configuration for the token service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Issuer written into newly issued tokens.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Lifetime of access and ID tokens.
    #[serde(default = "default_access_validity", with = "super::duration")]
    pub access_validity: Duration,

    /// Lifetime of refresh tokens.
    #[serde(default = "default_refresh_validity", with = "super::duration")]
    pub refresh_validity: Duration,

    /// Tolerance applied to `not_before` and `expires_at` checks.
    #[serde(default = "default_clock_skew", with = "super::duration")]
    pub clock_skew: Duration,

    /// How long token records are kept after they expire.
    #[serde(default = "default_retention", with = "super::duration")]
    pub retention: Duration,

    /// How often expired records are purged from the store.
    #[serde(default = "default_cleanup_interval", with = "super::duration")]
    pub cleanup_interval: Duration,

    /// Accepted issuers. Empty means any issuer.
    #[serde(default)]
    pub allowed_issuers: Vec<String>,

    /// Accepted audiences. Empty means any audience.
    #[serde(default)]
    pub allowed_audiences: Vec<String>,

    /// Scopes granted to tokens issued without any.
    #[serde(default)]
    pub default_scopes: Vec<String>,

    /// Default scope matching mode for validation requests.
    #[serde(default)]
    pub scope_match: ScopeMatch,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            access_validity: default_access_validity(),
            refresh_validity: default_refresh_validity(),
            clock_skew: default_clock_skew(),
            retention: default_retention(),
            cleanup_interval: default_cleanup_interval(),
            allowed_issuers: Vec::new(),
            allowed_audiences: Vec::new(),
            default_scopes: Vec::new(),
            scope_match: ScopeMatch::default(),
        }
    }
}

impl TokenConfig {
    /// The longest lifetime any issued token can have.
    pub fn max_token_lifetime(&self) -> Duration {
        self.access_validity.max(self.refresh_validity)
    }
}

fn default_issuer() -> String {
    "warden".to_string()
}

fn default_access_validity() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_refresh_validity() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_clock_skew() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
