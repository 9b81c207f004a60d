//! The request pipeline.

use crate::error::{GatewayError, SetupError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use warden_core::{MaintenanceTask, RateLimitConfig, RequestContext, WardenConfig};
use warden_policy::{AccessRequest, Action, Attributes, Decision, PolicyAuthorizer, Resource, Subject};
use warden_resilience::{Bulkhead, CircuitBreakerRegistry, RateLimiter, Retry, create_limiter, spawn_cleanup};
use warden_token::{Token, TokenService, TokenStore, ValidationRequest};

/// Token metadata key holding the subject's roles, comma separated.
pub const ROLES_METADATA_KEY: &str = "roles";

/// One inbound call as the transport layer hands it over.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Rate-limit key, typically the client identity or address.
    pub caller: String,
    /// Bearer token value.
    pub token: String,
    pub validation: ValidationRequest,
    pub action: Action,
    pub resource: Resource,
    pub context: Attributes,
    pub subject_attributes: Attributes,
    /// Name of the backend; each name has its own circuit breaker.
    pub backend: String,
}

impl GatewayRequest {
    pub fn new(
        caller: impl Into<String>,
        token: impl Into<String>,
        action: impl Into<Action>,
        resource: Resource,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            caller: caller.into(),
            token: token.into(),
            validation: ValidationRequest::default(),
            action: action.into(),
            resource,
            context: Attributes::new(),
            subject_attributes: Attributes::new(),
            backend: backend.into(),
        }
    }

    pub fn requiring(mut self, validation: ValidationRequest) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_subject_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.subject_attributes.insert(key.into(), value.into());
        self
    }
}

/// An authenticated, authorized caller, passed to the backend.
#[derive(Debug, Clone)]
pub struct Principal {
    pub token: Token,
    pub subject: Subject,
    pub decision: Decision,
}

/// Build the authorization subject for a validated token.
pub fn subject_for(token: &Token, attributes: &Attributes) -> Subject {
    let roles: BTreeSet<String> = token
        .metadata
        .get(ROLES_METADATA_KEY)
        .map(|roles| {
            roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Subject {
        id: token.subject.clone(),
        roles,
        attributes: attributes.clone(),
    }
}

/// Composes every layer in front of a backend:
///
/// rate limit → authenticate → authorize → bulkhead → retry → circuit breaker → backend
///
/// Rejections in the first three steps never take a bulkhead permit and are
/// never seen by a circuit breaker.
pub struct Gateway {
    tokens: Arc<TokenService>,
    authorizer: Arc<PolicyAuthorizer>,
    limiter: Arc<dyn RateLimiter>,
    bulkhead: Bulkhead,
    retry: Retry,
    breakers: CircuitBreakerRegistry,
    rate_limit: RateLimitConfig,
    rotation_interval: Option<Duration>,
}

impl Gateway {
    /// A gateway with default resilience settings.
    pub fn new(
        tokens: Arc<TokenService>,
        authorizer: Arc<PolicyAuthorizer>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let defaults = WardenConfig::default();
        Self {
            tokens,
            authorizer,
            limiter,
            bulkhead: Bulkhead::new("gateway", &defaults.bulkhead),
            retry: Retry::new(defaults.retry),
            breakers: CircuitBreakerRegistry::new(defaults.circuit_breaker),
            rate_limit: defaults.rate_limit,
            rotation_interval: None,
        }
    }

    /// Assemble every component from configuration.
    pub fn from_config(
        config: &WardenConfig,
        external_store: Option<Arc<dyn TokenStore>>,
    ) -> Result<Self, SetupError> {
        let tokens = Arc::new(TokenService::from_config(config, external_store)?);
        let authorizer = Arc::new(PolicyAuthorizer::from_config(config)?);
        let limiter = create_limiter(&config.rate_limit);

        tracing::info!(
            policies = authorizer.len(),
            algorithm = ?config.rate_limit.algorithm,
            max_concurrent = config.bulkhead.max_concurrent,
            "gateway configured"
        );

        Ok(Self {
            tokens,
            authorizer,
            limiter,
            bulkhead: Bulkhead::new("gateway", &config.bulkhead),
            retry: Retry::new(config.retry.clone()),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            rate_limit: config.rate_limit.clone(),
            rotation_interval: config.keys.rotation_interval,
        })
    }

    pub fn with_bulkhead(mut self, bulkhead: Bulkhead) -> Self {
        self.bulkhead = bulkhead;
        self
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breakers(mut self, breakers: CircuitBreakerRegistry) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn authorizer(&self) -> &Arc<PolicyAuthorizer> {
        &self.authorizer
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Start the background timers: rate-limit key cleanup, expired token
    /// cleanup and, when configured, key rotation.
    ///
    /// Dropping the returned tasks stops them.
    pub fn start_maintenance(&self) -> Vec<MaintenanceTask> {
        let mut tasks = vec![
            spawn_cleanup(&self.limiter, &self.rate_limit),
            self.tokens.spawn_cleanup(),
        ];
        if let Some(interval) = self.rotation_interval {
            tasks.push(self.tokens.keys().spawn_rotation(interval));
        }
        tasks
    }

    /// Run `request` through the pipeline and, if admitted, call `backend`.
    ///
    /// `backend` is called once per attempt.
    pub async fn handle<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        request: &GatewayRequest,
        backend: F,
    ) -> Result<T, GatewayError<E>>
    where
        F: Fn(Arc<Principal>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(err) = ctx.err() {
            return Err(GatewayError::Context(err));
        }

        // 1. Rate limit by caller
        self.limiter
            .allow(&request.caller)
            .map_err(GatewayError::RateLimited)?;

        // 2. Authenticate the bearer token
        let token = tokio::select! {
            biased;
            err = ctx.done() => return Err(GatewayError::Context(err)),
            result = self.tokens.authenticate(&request.token, &request.validation) => {
                result.map_err(|e| {
                    tracing::debug!(caller = %request.caller, error = %e, "authentication failed");
                    GatewayError::Unauthenticated(e)
                })?
            }
        };

        // 3. Authorize
        let access = AccessRequest {
            subject: subject_for(&token, &request.subject_attributes),
            action: request.action.clone(),
            resource: request.resource.clone(),
            context: request.context.clone(),
        };
        let decision = self.authorizer.authorize(&access);
        if !decision.allowed {
            tracing::info!(
                subject = %access.subject.id,
                action = %access.action.name,
                resource = %access.resource.id,
                reason = %decision.reason,
                "request denied"
            );
            return Err(GatewayError::Forbidden(decision));
        }

        let principal = Arc::new(Principal {
            token,
            subject: access.subject,
            decision,
        });

        // 4. Bulkhead, retry and circuit breaker around the backend
        let breaker = self.breakers.get(&request.backend);
        let breaker = breaker.as_ref();
        let backend = &backend;
        let attempt = || {
            let principal = Arc::clone(&principal);
            breaker.execute(ctx, move || backend(principal))
        };

        self.bulkhead
            .execute(ctx, || self.retry.execute(ctx, attempt))
            .await
            .map_err(|e| {
                let err = GatewayError::from(e);
                tracing::debug!(backend = %request.backend, status = err.status_hint(), "backend call failed");
                err
            })
    }
}
