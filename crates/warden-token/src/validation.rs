//! The ordered token validation chain.
//!
//! Checks run in a fixed order and stop at the first failure:
//! signature, time window, issuer and audience, scopes, revocation.

use crate::error::{StoreError, TokenError};
use crate::rotator::KeyRotator;
use crate::store::TokenStore;
use crate::token::Token;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use warden_core::config::{ScopeMatch, TokenConfig};
use warden_core::SharedClock;

/// Per-call validation requirements.
#[derive(Debug, Clone, Default)]
pub struct ValidationRequest {
    /// Scopes the caller needs. Empty means no scope check.
    pub required_scopes: Vec<String>,
    /// Overrides the configured scope matching mode.
    pub scope_match: Option<ScopeMatch>,
}

impl ValidationRequest {
    pub fn requiring<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_scopes: scopes.into_iter().map(Into::into).collect(),
            scope_match: None,
        }
    }

    pub fn any_of<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope_match: Some(ScopeMatch::Any),
            ..Self::requiring(scopes)
        }
    }
}

/// Runs the validation checks. Never mutates the store.
pub struct ValidationChain {
    keys: Arc<KeyRotator>,
    store: Arc<dyn TokenStore>,
    clock: SharedClock,
    clock_skew: Duration,
    allowed_issuers: Vec<String>,
    allowed_audiences: Vec<String>,
    scope_match: ScopeMatch,
}

impl ValidationChain {
    pub fn new(
        config: &TokenConfig,
        keys: Arc<KeyRotator>,
        store: Arc<dyn TokenStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            keys,
            store,
            clock,
            clock_skew: Duration::from_std(config.clock_skew).unwrap_or(Duration::MAX),
            allowed_issuers: config.allowed_issuers.clone(),
            allowed_audiences: config.allowed_audiences.clone(),
            scope_match: config.scope_match,
        }
    }

    /// Validate a token record. Returns the stored record on success.
    pub async fn validate(
        &self,
        token: &Token,
        request: &ValidationRequest,
    ) -> Result<Token, TokenError> {
        let now = self.clock.now();
        self.verify_signature(token, now)?;
        self.check_claims(token, request, now).await
    }

    /// Validate a bearer value alone, recovering the claims from the envelope.
    pub async fn validate_value(
        &self,
        value: &str,
        request: &ValidationRequest,
    ) -> Result<Token, TokenError> {
        let now = self.clock.now();
        let token = self.open(value, now)?;
        self.check_claims(&token, request, now).await
    }

    /// Step 1 for a token record: the signing key named by the token first,
    /// then every other retained key.
    fn verify_signature(&self, token: &Token, now: DateTime<Utc>) -> Result<(), TokenError> {
        let mut first_error = None;
        for signer in self.keys.verification_signers(token.key_id.as_deref()) {
            match signer.verify(token, now) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| {
            TokenError::InvalidSignature("no retained key verifies the token".into())
        }))
    }

    /// Step 1 for a bearer value.
    fn open(&self, value: &str, now: DateTime<Utc>) -> Result<Token, TokenError> {
        for signer in self.keys.verification_signers(None) {
            if let Ok(claims) = signer.open(value, now) {
                return claims.into_token(value.to_string());
            }
        }
        Err(TokenError::InvalidSignature(
            "no retained key verifies the token".into(),
        ))
    }

    /// Steps 2 to 5.
    async fn check_claims(
        &self,
        token: &Token,
        request: &ValidationRequest,
        now: DateTime<Utc>,
    ) -> Result<Token, TokenError> {
        self.check_time(token, now)?;
        self.check_issuer_and_audience(token)?;
        self.check_scopes(token, request)?;
        self.check_revocation(token).await
    }

    /// Skew widens the window up to the representable range.
    fn check_time(&self, token: &Token, now: DateTime<Utc>) -> Result<(), TokenError> {
        let earliest = token
            .not_before
            .checked_sub_signed(self.clock_skew)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let latest = token
            .expires_at
            .checked_add_signed(self.clock_skew)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if now < earliest {
            return Err(TokenError::TokenNotYetValid {
                not_before: token.not_before,
            });
        }
        if now > latest {
            return Err(TokenError::TokenExpired {
                expired_at: token.expires_at,
            });
        }
        Ok(())
    }

    fn check_issuer_and_audience(&self, token: &Token) -> Result<(), TokenError> {
        if !self.allowed_issuers.is_empty() && !self.allowed_issuers.contains(&token.issuer) {
            return Err(TokenError::InvalidIssuer {
                issuer: token.issuer.clone(),
            });
        }
        if !self.allowed_audiences.is_empty()
            && !token
                .audience
                .iter()
                .any(|a| self.allowed_audiences.contains(a))
        {
            return Err(TokenError::InvalidAudience {
                audience: token.audience.iter().cloned().collect(),
            });
        }
        Ok(())
    }

    fn check_scopes(&self, token: &Token, request: &ValidationRequest) -> Result<(), TokenError> {
        let mode = request.scope_match.unwrap_or(self.scope_match);
        if mode.satisfied(&request.required_scopes, |s| token.has_scope(s)) {
            Ok(())
        } else {
            Err(TokenError::InsufficientScope {
                required: request.required_scopes.clone(),
            })
        }
    }

    /// A token whose record is gone counts as revoked.
    async fn check_revocation(&self, token: &Token) -> Result<Token, TokenError> {
        let revoked = || TokenError::TokenRevoked {
            token_id: token.id.clone(),
        };

        if token.is_revoked() || self.store.is_revoked(&token.id).await? {
            return Err(revoked());
        }
        match self.store.get(&token.id).await {
            Ok(stored) if stored.is_revoked() => Err(revoked()),
            Ok(stored) => Ok(stored),
            Err(StoreError::NotFound(_)) => Err(revoked()),
            Err(e) => Err(e.into()),
        }
    }
}
