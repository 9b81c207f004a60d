//! # warden-core
//!
//! Shared building blocks for the Warden access-control core.
//!
//! This crate provides:
//! - Configuration types for every subsystem, loaded from YAML
//! - A [`Clock`] abstraction so token time checks can be driven by tests
//! - [`RequestContext`], the cancellation/deadline signal threaded through
//!   every blocking layer of the request pipeline
//! - [`MaintenanceTask`], an independent periodic timer used for cleanup
//!   and key-rotation bookkeeping
//! - A tracing subscriber helper for binaries embedding the core

pub mod clock;
pub mod config;
pub mod context;
pub mod maintenance;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    BulkheadConfig, CircuitBreakerConfig, ConfigError, KeyConfig, RateLimitAlgorithm,
    RateLimitConfig, RetryConfig, ScopeMatch, StoreBackend, StoreConfig, TokenConfig,
    WardenConfig,
};
pub use context::{CancelHandle, ContextError, RequestContext};
pub use maintenance::MaintenanceTask;
