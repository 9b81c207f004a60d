//! Token issuance, validation, rotation and revocation.

use crate::error::{StoreError, TokenError};
use crate::rotator::KeyRotator;
use crate::store::{TokenStore, create_store};
use crate::token::{SigningAlgorithm, Token, TokenFilter, TokenRequest, TokenType};
use crate::validation::{ValidationChain, ValidationRequest};
use chrono::{Duration, SubsecRound};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use warden_core::config::{TokenConfig, WardenConfig};
use warden_core::{MaintenanceTask, SharedClock, SystemClock};

/// Metadata key listing the scopes a refresh token should hand out.
pub const ORIGINAL_SCOPES_KEY: &str = "original_scopes";

const ROTATED_REASON: &str = "rotated";

/// Per-token-id async locks so rotation and refresh of one token serialise
/// without blocking unrelated tokens.
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn get(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Drop the entry once nobody else holds or waits on it.
    fn release(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(id);
        }
    }
}

/// Issues and manages tokens.
pub struct TokenService {
    config: TokenConfig,
    keys: Arc<KeyRotator>,
    store: Arc<dyn TokenStore>,
    chain: ValidationChain,
    clock: SharedClock,
    locks: KeyedLocks,
}

impl TokenService {
    pub fn new(config: TokenConfig, keys: Arc<KeyRotator>, store: Arc<dyn TokenStore>) -> Self {
        Self::with_clock(config, keys, store, SystemClock::shared())
    }

    pub fn with_clock(
        config: TokenConfig,
        keys: Arc<KeyRotator>,
        store: Arc<dyn TokenStore>,
        clock: SharedClock,
    ) -> Self {
        keys.retain_at_least(
            config
                .max_token_lifetime()
                .saturating_add(config.clock_skew),
        );
        let chain = ValidationChain::new(
            &config,
            Arc::clone(&keys),
            Arc::clone(&store),
            Arc::clone(&clock),
        );
        Self {
            config,
            keys,
            store,
            chain,
            clock,
            locks: KeyedLocks::default(),
        }
    }

    /// Build the service, its key rotator and its store from configuration.
    pub fn from_config(
        config: &WardenConfig,
        external_store: Option<Arc<dyn TokenStore>>,
    ) -> Result<Self, TokenError> {
        let clock = SystemClock::shared();
        let keys = Arc::new(KeyRotator::from_config(&config.keys, Arc::clone(&clock))?);
        let store = create_store(&config.store, external_store)?;
        Ok(Self::with_clock(config.tokens.clone(), keys, store, clock))
    }

    pub fn keys(&self) -> &Arc<KeyRotator> {
        &self.keys
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Drop retired signing keys that can no longer have a valid token.
    pub fn prune_keys(&self) -> Vec<String> {
        self.keys.prune(self.config.max_token_lifetime())
    }

    /// Fill defaults, sign with the active key and store the token.
    pub async fn issue(&self, request: TokenRequest) -> Result<Token, TokenError> {
        let signer = self.keys.active_signer()?;
        let now = self.clock.now().trunc_subsecs(6);

        if request.subject.trim().is_empty() {
            return Err(TokenError::InvalidClaims("subject must not be empty".into()));
        }

        let id = request
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let validity = match request.validity {
            Some(v) => v,
            None => self.default_validity(request.token_type)?,
        };
        let expires_at = match request.expires_at {
            Some(at) => at.trunc_subsecs(6),
            None => now.checked_add_signed(validity).ok_or_else(|| {
                TokenError::InvalidClaims("expiry is beyond the representable range".into())
            })?,
        };
        let not_before = request.not_before.map_or(now, |at| at.trunc_subsecs(6));

        if not_before > expires_at {
            return Err(TokenError::InvalidClaims(
                "not_before must not be after expires_at".into(),
            ));
        }
        if now > expires_at {
            return Err(TokenError::InvalidClaims(
                "issued_at must not be after expires_at".into(),
            ));
        }

        let scopes = if request.scopes.is_empty() {
            self.config.default_scopes.iter().cloned().collect()
        } else {
            request.scopes
        };

        let mut token = Token {
            id,
            token_type: request.token_type,
            subject: request.subject,
            issuer: request.issuer.unwrap_or_else(|| self.config.issuer.clone()),
            audience: request.audience,
            scopes,
            issued_at: now,
            not_before,
            expires_at,
            algorithm: SigningAlgorithm::EdDSA,
            key_id: Some(signer.key_id().to_string()),
            value: None,
            metadata: request.metadata,
            revocation: None,
        };
        token.value = Some(signer.sign(&token)?);

        let ttl = (expires_at - now)
            .checked_add(&self.retention())
            .and_then(|ttl| ttl.to_std().ok())
            .unwrap_or(std::time::Duration::MAX);
        self.store
            .insert(token.clone(), ttl)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(id) => {
                    TokenError::InvalidClaims(format!("token id already in use: {id}"))
                }
                other => other.into(),
            })?;

        tracing::debug!(
            token_id = %token.id,
            subject = %token.subject,
            token_type = %token.token_type,
            key_id = %signer.key_id(),
            expires_at = %token.expires_at,
            "issued token"
        );
        Ok(token)
    }

    fn retention(&self) -> Duration {
        Duration::from_std(self.config.retention).unwrap_or(Duration::MAX)
    }

    fn default_validity(&self, token_type: TokenType) -> Result<Duration, TokenError> {
        let validity = match token_type {
            TokenType::Refresh => self.config.refresh_validity,
            TokenType::Access | TokenType::Id => self.config.access_validity,
        };
        Duration::from_std(validity)
            .map_err(|e| TokenError::InvalidClaims(format!("validity out of range: {e}")))
    }

    /// Validate with no scope requirement.
    pub async fn validate(&self, token: &Token) -> Result<Token, TokenError> {
        self.chain.validate(token, &ValidationRequest::default()).await
    }

    pub async fn validate_with(
        &self,
        token: &Token,
        request: &ValidationRequest,
    ) -> Result<Token, TokenError> {
        self.chain.validate(token, request).await
    }

    /// Validate a bearer value. Returns the stored record, metadata included.
    pub async fn authenticate(
        &self,
        value: &str,
        request: &ValidationRequest,
    ) -> Result<Token, TokenError> {
        self.chain.validate_value(value, request).await
    }

    /// Replace `old` with a token built from `new` that inherits the subject,
    /// issuer, audience and scopes of `old`, then revoke `old` as "rotated".
    pub async fn rotate(&self, old: &Token, new: TokenRequest) -> Result<Token, TokenError> {
        let lock = self.locks.get(&old.id);
        let result = {
            let _guard = lock.lock().await;
            self.rotate_locked(old, new).await
        };
        self.locks.release(&old.id, lock);
        result
    }

    async fn rotate_locked(&self, old: &Token, new: TokenRequest) -> Result<Token, TokenError> {
        match self.store.get(&old.id).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(TokenError::TokenNotFound {
                    token_id: old.id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let current = self
            .chain
            .validate(old, &ValidationRequest::default())
            .await
            .map_err(|e| TokenError::InvalidToken(Box::new(e)))?;

        let mut request = new;
        request.subject = current.subject.clone();
        request.issuer = Some(current.issuer.clone());
        request.audience = current.audience.clone();
        request.scopes = current.scopes.clone();
        request
            .metadata
            .insert("rotated_from".to_string(), current.id.clone());

        let issued = self.issue(request).await?;

        match self.store.revoke(&current.id, ROTATED_REASON, None).await {
            Ok(true) => {}
            Ok(false) => {
                // Revoked by someone else since validation.
                self.discard(&issued.id).await;
                return Err(TokenError::InvalidToken(Box::new(TokenError::TokenRevoked {
                    token_id: current.id,
                })));
            }
            Err(e) => {
                self.discard(&issued.id).await;
                return Err(e.into());
            }
        }

        tracing::info!(old_token = %current.id, new_token = %issued.id, "rotated token");
        Ok(issued)
    }

    /// Best-effort removal of a token issued by an operation that failed.
    /// A missing record already validates as revoked.
    async fn discard(&self, token_id: &str) {
        if let Err(e) = self.store.delete(token_id).await {
            tracing::warn!(token_id = %token_id, error = %e, "failed to discard token after aborted rotation");
        }
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &Token) -> Result<Token, TokenError> {
        let stored = self.validate(refresh_token).await?;
        if stored.token_type != TokenType::Refresh {
            return Err(TokenError::InvalidTokenType {
                expected: TokenType::Refresh,
                actual: stored.token_type,
            });
        }

        let scopes: Vec<String> = match stored.metadata.get(ORIGINAL_SCOPES_KEY) {
            Some(list) => list
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => stored.scopes.iter().cloned().collect(),
        };

        let request = Token::access(stored.subject.clone())
            .issued_by(stored.issuer.clone())
            .with_audience(stored.audience.iter().cloned())
            .with_scopes(scopes)
            .with_metadata("refreshed_from", stored.id.clone());
        let issued = self.issue(request).await?;

        tracing::debug!(refresh_token = %stored.id, token_id = %issued.id, "refreshed access token");
        Ok(issued)
    }

    /// Revoke a token. Revoking twice is not an error and keeps the first reason.
    pub async fn revoke(&self, token_id: &str, reason: &str) -> Result<bool, TokenError> {
        self.revoke_by(token_id, reason, None).await
    }

    pub async fn revoke_by(
        &self,
        token_id: &str,
        reason: &str,
        revoked_by: Option<&str>,
    ) -> Result<bool, TokenError> {
        match self.store.revoke(token_id, reason, revoked_by).await {
            Ok(true) => {
                tracing::info!(token_id = %token_id, reason = %reason, "revoked token");
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(StoreError::NotFound(_)) => Err(TokenError::TokenNotFound {
                token_id: token_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, token_id: &str) -> Result<Token, TokenError> {
        self.store.get(token_id).await.map_err(|e| match e {
            StoreError::NotFound(id) => TokenError::TokenNotFound { token_id: id },
            other => other.into(),
        })
    }

    pub async fn list(&self, filter: &TokenFilter) -> Result<Vec<Token>, TokenError> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn count(&self, filter: &TokenFilter) -> Result<usize, TokenError> {
        Ok(self.store.count(filter).await?)
    }

    /// Remove records that expired more than the retention period ago.
    pub async fn cleanup_expired(&self) -> Result<usize, TokenError> {
        let Some(before) = self.clock.now().checked_sub_signed(self.retention()) else {
            return Ok(0);
        };
        Ok(self.store.cleanup(before).await?)
    }

    /// Run [`TokenService::cleanup_expired`] on the configured interval.
    pub fn spawn_cleanup(self: &Arc<Self>) -> MaintenanceTask {
        let service = Arc::downgrade(self);
        MaintenanceTask::spawn("token-cleanup", self.config.cleanup_interval, move || {
            let service = service.clone();
            async move {
                let Some(service) = service.upgrade() else {
                    return;
                };
                match service.cleanup_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "token cleanup finished"),
                    Err(e) => tracing::warn!(error = %e, "token cleanup failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration as StdDuration;
    use warden_core::{Clock, ManualClock};

    fn service_with(config: TokenConfig) -> (TokenService, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let keys = Arc::new(KeyRotator::new(clock.clone()));
        keys.rotate_key().unwrap();
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let service = TokenService::with_clock(config, keys, store, clock.clone());
        (service, clock)
    }

    fn service() -> (TokenService, Arc<ManualClock>) {
        service_with(TokenConfig::default())
    }

    #[tokio::test]
    async fn test_issue_fills_defaults() {
        let config = TokenConfig {
            default_scopes: vec!["profile".into()],
            ..Default::default()
        };
        let (service, clock) = service_with(config);

        let token = service.issue(Token::access("alice")).await.unwrap();
        assert!(Uuid::parse_str(&token.id).is_ok());
        assert_eq!(token.issuer, "warden");
        assert_eq!(token.not_before, token.issued_at);
        assert_eq!(token.expires_at - token.issued_at, Duration::hours(1));
        assert!(token.issued_at <= clock.now());
        assert!(token.has_scope("profile"));
        assert_eq!(token.key_id, service.keys().active_key_id());
        assert!(token.value.is_some());

        let refresh = service.issue(Token::refresh("alice")).await.unwrap();
        assert_eq!(refresh.expires_at - refresh.issued_at, Duration::hours(24));
    }

    #[tokio::test]
    async fn test_issue_without_key_is_signing_error() {
        let clock = ManualClock::starting_now();
        let keys = Arc::new(KeyRotator::new(clock.clone()));
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let service = TokenService::with_clock(TokenConfig::default(), keys, store, clock);

        let err = service.issue(Token::access("alice")).await.unwrap_err();
        assert!(matches!(err, TokenError::SigningError(_)));
    }

    #[tokio::test]
    async fn test_issue_rejects_inverted_window() {
        let (service, clock) = service();
        let now = clock.now();
        let request = Token::access("alice")
            .not_before(now + Duration::hours(2))
            .expires_at(now + Duration::hours(1));

        let err = service.issue(request).await.unwrap_err();
        assert!(matches!(err, TokenError::InvalidClaims(_)));
    }

    #[tokio::test]
    async fn test_issue_rejects_duplicate_id() {
        let (service, _) = service();
        service
            .issue(Token::access("alice").with_id("fixed"))
            .await
            .unwrap();
        let err = service
            .issue(Token::access("bob").with_id("fixed"))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidClaims(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_with_same_id_has_one_winner() {
        let (service, _) = service();
        let service = Arc::new(service);

        for round in 0..20 {
            let id = format!("fixed-{round}");
            let handles: Vec<_> = (0..8)
                .map(|n| {
                    let service = Arc::clone(&service);
                    let request = Token::access(format!("user-{n}")).with_id(id.clone());
                    tokio::spawn(async move { service.issue(request).await })
                })
                .collect();

            let mut winners = Vec::new();
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(token) => winners.push(token),
                    Err(e) => assert!(matches!(e, TokenError::InvalidClaims(_))),
                }
            }
            assert_eq!(winners.len(), 1, "round {round}");
            assert_eq!(service.get(&id).await.unwrap().subject, winners[0].subject);
            service.validate(&winners[0]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_far_future_expiry_validates() {
        let (service, _) = service();
        let token = service
            .issue(Token::access("alice").expires_at(DateTime::<Utc>::MAX_UTC - Duration::seconds(1)))
            .await
            .unwrap();
        service.validate(&token).await.unwrap();
    }

    #[tokio::test]
    async fn test_unrepresentable_validity_is_rejected() {
        let (service, _) = service();
        let err = service
            .issue(Token::access("alice").expires_in(Duration::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidClaims(_)));
    }

    #[tokio::test]
    async fn test_huge_clock_skew_saturates() {
        let config = TokenConfig {
            clock_skew: StdDuration::MAX,
            ..Default::default()
        };
        let (service, clock) = service_with(config);
        let token = service
            .issue(Token::access("alice").expires_in(Duration::minutes(1)))
            .await
            .unwrap();

        clock.advance(Duration::days(365));
        service.validate(&token).await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_time_window_with_skew() {
        let (service, clock) = service();
        let token = service
            .issue(Token::access("alice").expires_in(Duration::minutes(10)))
            .await
            .unwrap();

        clock.advance(Duration::minutes(11));
        service.validate(&token).await.unwrap();

        clock.advance(Duration::minutes(2));
        assert!(matches!(
            service.validate(&token).await,
            Err(TokenError::TokenExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_not_yet_valid() {
        let (service, clock) = service();
        let token = service
            .issue(Token::access("alice").not_before(clock.now() + Duration::minutes(10)))
            .await
            .unwrap();

        assert!(matches!(
            service.validate(&token).await,
            Err(TokenError::TokenNotYetValid { .. })
        ));
        clock.advance(Duration::minutes(9));
        service.validate(&token).await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_issuer_and_audience_allow_lists() {
        let config = TokenConfig {
            allowed_issuers: vec!["warden".into()],
            allowed_audiences: vec!["api".into()],
            ..Default::default()
        };
        let (service, _) = service_with(config);

        let good = service
            .issue(Token::access("alice").with_audience(["api"]))
            .await
            .unwrap();
        service.validate(&good).await.unwrap();

        let wrong_audience = service
            .issue(Token::access("alice").with_audience(["billing"]))
            .await
            .unwrap();
        assert!(matches!(
            service.validate(&wrong_audience).await,
            Err(TokenError::InvalidAudience { .. })
        ));

        let wrong_issuer = service
            .issue(
                Token::access("alice")
                    .issued_by("elsewhere")
                    .with_audience(["api"]),
            )
            .await
            .unwrap();
        assert!(matches!(
            service.validate(&wrong_issuer).await,
            Err(TokenError::InvalidIssuer { .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_scopes_all_and_any() {
        let (service, _) = service();
        let token = service
            .issue(Token::access("alice").with_scopes(["read"]))
            .await
            .unwrap();

        let all = ValidationRequest::requiring(["read", "write"]);
        assert!(matches!(
            service.validate_with(&token, &all).await,
            Err(TokenError::InsufficientScope { .. })
        ));

        let any = ValidationRequest::any_of(["read", "write"]);
        service.validate_with(&token, &any).await.unwrap();
    }

    #[tokio::test]
    async fn test_checks_run_in_order() {
        let (service, clock) = service();
        let token = service
            .issue(Token::access("alice").expires_in(Duration::minutes(1)))
            .await
            .unwrap();
        service.revoke(&token.id, "test").await.unwrap();
        clock.advance(Duration::hours(1));

        // Expired and revoked: the time check comes first.
        let err = service
            .validate_with(&token, &ValidationRequest::requiring(["admin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::TokenExpired { .. }));
    }

    #[tokio::test]
    async fn test_deleted_record_counts_as_revoked() {
        let clock = ManualClock::starting_now();
        let keys = Arc::new(KeyRotator::new(clock.clone()));
        keys.rotate_key().unwrap();
        let store = Arc::new(MemoryTokenStore::new());
        let service =
            TokenService::with_clock(TokenConfig::default(), keys, store.clone(), clock);

        let token = service.issue(Token::access("alice")).await.unwrap();
        store.delete(&token.id).await.unwrap();

        assert!(matches!(
            service.validate(&token).await,
            Err(TokenError::TokenRevoked { .. })
        ));
    }

    #[tokio::test]
    async fn test_authenticate_bearer_value() {
        let (service, _) = service();
        let token = service
            .issue(
                Token::access("alice")
                    .with_scopes(["read"])
                    .with_metadata("roles", "admin"),
            )
            .await
            .unwrap();

        let value = token.value.clone().unwrap();
        let stored = service
            .authenticate(&value, &ValidationRequest::requiring(["read"]))
            .await
            .unwrap();
        assert_eq!(stored.id, token.id);
        assert_eq!(stored.metadata.get("roles").map(String::as_str), Some("admin"));

        assert!(matches!(
            service
                .authenticate("garbage", &ValidationRequest::default())
                .await,
            Err(TokenError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_rotate_unknown_token() {
        let (service, _) = service();
        let mut ghost = service.issue(Token::access("alice")).await.unwrap();
        ghost.id = "ghost".into();

        let err = service.rotate(&ghost, Token::access("x")).await.unwrap_err();
        assert!(matches!(err, TokenError::TokenNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rotate_invalid_token() {
        let (service, _) = service();
        let token = service.issue(Token::access("alice")).await.unwrap();
        service.revoke(&token.id, "gone").await.unwrap();

        let err = service.rotate(&token, Token::access("x")).await.unwrap_err();
        match err {
            TokenError::InvalidToken(inner) => {
                assert!(matches!(*inner, TokenError::TokenRevoked { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Memory store whose `revoke` can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryTokenStore,
        fail_revoke: AtomicBool,
    }

    #[async_trait]
    impl TokenStore for FlakyStore {
        async fn get(&self, id: &str) -> Result<Token, StoreError> {
            self.inner.get(id).await
        }

        async fn insert(&self, token: Token, ttl: StdDuration) -> Result<(), StoreError> {
            self.inner.insert(token, ttl).await
        }

        async fn save(&self, token: Token, ttl: StdDuration) -> Result<(), StoreError> {
            self.inner.save(token, ttl).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }

        async fn list(&self, filter: &TokenFilter) -> Result<Vec<Token>, StoreError> {
            self.inner.list(filter).await
        }

        async fn count(&self, filter: &TokenFilter) -> Result<usize, StoreError> {
            self.inner.count(filter).await
        }

        async fn revoke(
            &self,
            id: &str,
            reason: &str,
            revoked_by: Option<&str>,
        ) -> Result<bool, StoreError> {
            if self.fail_revoke.load(Ordering::SeqCst) {
                return Err(StoreError::Backend(anyhow::anyhow!("store unavailable")));
            }
            self.inner.revoke(id, reason, revoked_by).await
        }

        async fn is_revoked(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.is_revoked(id).await
        }

        async fn cleanup(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
            self.inner.cleanup(before).await
        }
    }

    #[tokio::test]
    async fn test_rotate_undoes_new_token_when_revoke_fails() {
        let clock = ManualClock::starting_now();
        let keys = Arc::new(KeyRotator::new(clock.clone()));
        keys.rotate_key().unwrap();
        let store = Arc::new(FlakyStore::default());
        let service =
            TokenService::with_clock(TokenConfig::default(), keys, store.clone(), clock);

        let old = service.issue(Token::access("alice")).await.unwrap();
        store.fail_revoke.store(true, Ordering::SeqCst);

        let err = service.rotate(&old, Token::access("alice")).await.unwrap_err();
        assert!(matches!(err, TokenError::Store(StoreError::Backend(_))));

        // Only the old token remains, and it is still valid.
        let left = service.list(&TokenFilter::for_subject("alice")).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, old.id);
        service.validate(&old).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_token_outlives_short_prune_horizon() {
        let (service, clock) = service();
        let refresh = service.issue(Token::refresh("alice")).await.unwrap();
        service.keys().rotate_key().unwrap();

        clock.advance(Duration::hours(2));
        let access_validity = service.config().access_validity;
        assert!(service.keys().prune(access_validity).is_empty());
        assert!(service.prune_keys().is_empty());
        service.refresh(&refresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let (service, _) = service();
        let access = service.issue(Token::access("alice")).await.unwrap();
        assert!(matches!(
            service.refresh(&access).await,
            Err(TokenError::InvalidTokenType {
                expected: TokenType::Refresh,
                actual: TokenType::Access
            })
        ));

        let refresh = service
            .issue(
                Token::refresh("alice")
                    .with_scopes(["offline"])
                    .with_metadata(ORIGINAL_SCOPES_KEY, "read write"),
            )
            .await
            .unwrap();
        let access = service.refresh(&refresh).await.unwrap();
        assert_eq!(access.token_type, TokenType::Access);
        assert_eq!(access.subject, "alice");
        assert!(access.has_scope("read") && access.has_scope("write"));
        assert!(!access.has_scope("offline"));
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_not_found() {
        let (service, _) = service();
        assert!(matches!(
            service.revoke("missing", "x").await,
            Err(TokenError::TokenNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let (service, clock) = service();
        let token = service
            .issue(Token::access("alice").expires_in(Duration::minutes(5)))
            .await
            .unwrap();

        clock.advance(Duration::hours(12));
        assert_eq!(service.cleanup_expired().await.unwrap(), 0);

        clock.advance(Duration::hours(13));
        assert_eq!(service.cleanup_expired().await.unwrap(), 1);
        assert!(matches!(
            service.get(&token.id).await,
            Err(TokenError::TokenNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_cleanup_runs_on_interval() {
        let config = TokenConfig {
            retention: StdDuration::ZERO,
            cleanup_interval: StdDuration::from_secs(60),
            ..Default::default()
        };
        let (service, clock) = service_with(config);
        let service = Arc::new(service);
        service
            .issue(Token::access("alice").expires_in(Duration::minutes(1)))
            .await
            .unwrap();
        clock.advance(Duration::minutes(2));

        let task = service.spawn_cleanup();
        tokio::time::sleep(StdDuration::from_secs(61)).await;
        task.shutdown().await;

        assert_eq!(service.count(&TokenFilter::for_subject("alice")).await.unwrap(), 0);
    }
}
