//! Token data model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived credential presented to resource servers.
    Access,
    /// Long-lived credential exchanged for new access tokens.
    Refresh,
    /// OpenID identity token.
    Id,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
            Self::Id => write!(f, "id"),
        }
    }
}

/// Signature algorithm tag carried by a token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SigningAlgorithm {
    /// Ed25519 signatures.
    #[default]
    EdDSA,
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EdDSA => write!(f, "EdDSA"),
        }
    }
}

/// Revocation record attached to a token. Never cleared once set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevocationStatus {
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: Option<String>,
    pub reason: String,
}

/// A signed, time-bounded credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// Unique identifier (UUIDv4 when assigned by the service).
    pub id: String,

    #[serde(rename = "type")]
    pub token_type: TokenType,

    pub subject: String,
    pub issuer: String,

    #[serde(default)]
    pub audience: BTreeSet<String>,

    #[serde(default)]
    pub scopes: BTreeSet<String>,

    pub issued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    #[serde(default)]
    pub algorithm: SigningAlgorithm,

    /// Id of the key that signed this token.
    #[serde(default)]
    pub key_id: Option<String>,

    /// Signed envelope (base64 Biscuit).
    #[serde(default)]
    pub value: Option<String>,

    /// Opaque metadata. Not covered by the signature.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub revocation: Option<RevocationStatus>,
}

impl Token {
    /// Start an access token request for `subject`.
    pub fn access(subject: impl Into<String>) -> TokenRequest {
        TokenRequest::new(TokenType::Access, subject)
    }

    /// Start a refresh token request for `subject`.
    pub fn refresh(subject: impl Into<String>) -> TokenRequest {
        TokenRequest::new(TokenType::Refresh, subject)
    }

    /// Start an identity token request for `subject`.
    pub fn identity(subject: impl Into<String>) -> TokenRequest {
        TokenRequest::new(TokenType::Id, subject)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }

    /// Whether `at` is past `expires_at` (no skew applied).
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at > self.expires_at
    }

    /// Time left until expiry, zero when already expired.
    pub fn remaining_at(&self, at: DateTime<Utc>) -> Duration {
        (self.expires_at - at).max(Duration::zero())
    }
}

/// Claims for a token that has not been issued yet.
///
/// Unset fields are filled by [`TokenService::issue`](crate::TokenService::issue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub token_type: TokenType,

    pub subject: String,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub audience: BTreeSet<String>,

    #[serde(default)]
    pub scopes: BTreeSet<String>,

    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Lifetime from issuance. Ignored when `expires_at` is set.
    #[serde(skip)]
    pub validity: Option<Duration>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TokenRequest {
    pub fn new(token_type: TokenType, subject: impl Into<String>) -> Self {
        Self {
            id: None,
            token_type,
            subject: subject.into(),
            issuer: None,
            audience: BTreeSet::new(),
            scopes: BTreeSet::new(),
            not_before: None,
            expires_at: None,
            validity: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn issued_by(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn with_audience<I, S>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audience.extend(audience.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Expire `validity` after issuance.
    pub fn expires_in(mut self, validity: Duration) -> Self {
        self.validity = Some(validity);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }
}

/// Filter for listing and counting stored tokens. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    pub types: Vec<TokenType>,
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub expires_after: Option<DateTime<Utc>>,
    pub expires_before: Option<DateTime<Utc>>,
    pub issued_after: Option<DateTime<Utc>>,
    pub issued_before: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    /// Require every listed scope instead of any one of them.
    pub require_all_scopes: bool,
    /// Only tokens whose validity window contains this instant.
    pub active_at: Option<DateTime<Utc>>,
    pub include_revoked: bool,
}

impl TokenFilter {
    /// Filter matching every token of `subject`, revoked ones included.
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            include_revoked: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, token: &Token) -> bool {
        if !self.types.is_empty() && !self.types.contains(&token.token_type) {
            return false;
        }
        if self.subject.as_ref().is_some_and(|s| *s != token.subject) {
            return false;
        }
        if self.issuer.as_ref().is_some_and(|i| *i != token.issuer) {
            return false;
        }
        if self.expires_after.is_some_and(|t| token.expires_at <= t) {
            return false;
        }
        if self.expires_before.is_some_and(|t| token.expires_at >= t) {
            return false;
        }
        if self.issued_after.is_some_and(|t| token.issued_at <= t) {
            return false;
        }
        if self.issued_before.is_some_and(|t| token.issued_at >= t) {
            return false;
        }
        if !self.scopes.is_empty() {
            let ok = if self.require_all_scopes {
                self.scopes.iter().all(|s| token.has_scope(s))
            } else {
                self.scopes.iter().any(|s| token.has_scope(s))
            };
            if !ok {
                return false;
            }
        }
        if let Some(at) = self.active_at {
            if at < token.not_before || at > token.expires_at {
                return false;
            }
        }
        if !self.include_revoked && token.is_revoked() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> Token {
        Token {
            id: "t1".into(),
            token_type: TokenType::Access,
            subject: "alice".into(),
            issuer: "warden".into(),
            audience: BTreeSet::from(["api".to_string()]),
            scopes: BTreeSet::from(["read".to_string(), "write".to_string()]),
            issued_at: now,
            not_before: now,
            expires_at: now + Duration::hours(1),
            algorithm: SigningAlgorithm::EdDSA,
            key_id: None,
            value: None,
            metadata: BTreeMap::new(),
            revocation: None,
        }
    }

    #[test]
    fn test_filter_scopes_any_and_all() {
        let now = Utc::now();
        let token = sample(now);

        let any = TokenFilter {
            scopes: vec!["read".into(), "admin".into()],
            ..Default::default()
        };
        assert!(any.matches(&token));

        let all = TokenFilter {
            require_all_scopes: true,
            ..any
        };
        assert!(!all.matches(&token));
    }

    #[test]
    fn test_filter_excludes_revoked_by_default() {
        let now = Utc::now();
        let mut token = sample(now);
        token.revocation = Some(RevocationStatus {
            revoked_at: now,
            revoked_by: None,
            reason: "test".into(),
        });

        assert!(!TokenFilter::default().matches(&token));
        assert!(TokenFilter::for_subject("alice").matches(&token));
        assert!(!TokenFilter::for_subject("bob").matches(&token));
    }

    #[test]
    fn test_filter_active_at() {
        let now = Utc::now();
        let token = sample(now);

        let active = TokenFilter {
            active_at: Some(now + Duration::minutes(30)),
            ..Default::default()
        };
        assert!(active.matches(&token));

        let later = TokenFilter {
            active_at: Some(now + Duration::hours(2)),
            ..Default::default()
        };
        assert!(!later.matches(&token));
    }

    #[test]
    fn test_token_serializes_type_field() {
        let token = sample(Utc::now());
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["type"], "access");
        assert_eq!(json["algorithm"], "EdDSA");
    }
}
