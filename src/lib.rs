//! # authz-reload
//!
//! In-memory secret and policy cache for an authorization service, kept in
//! sync with an upstream source of truth.
//!
//! - [`cache`]: snapshot cache with fetch-then-swap reloads
//! - [`notification`]: change-notification codec
//! - [`loader`]: startup, push and periodic reload orchestration
//! - [`authz`]: deny-wins policy evaluation with audit records
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use authz_reload::{
//!     AccessRequest, Authorizer, Cache, LocalBus, Loader, LoaderConfig, MemoryUpstream,
//! };
//!
//! # async fn run() -> authz_reload::AuthzResult<()> {
//! let cache = Arc::new(Cache::new());
//! let bus = LocalBus::default();
//! let loader = Loader::new(cache.clone(), Arc::new(MemoryUpstream::new()), LoaderConfig::default());
//! let handle = loader.start(Box::new(bus.subscribe())).await?;
//!
//! let authorizer = Authorizer::new(cache);
//! let decision = authorizer.authorize(&AccessRequest::new("alice", "doc1", "read"));
//! assert!(decision.denied);
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod authz;
pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod notification;
pub mod pubsub;
pub mod types;
pub mod upstream;

pub use audit::{AuditConfig, AuditRecord, AuditRecorder, AuditSink, LogSink};
pub use authz::{Authorizer, PatternEvaluator, PolicyEvaluator};
pub use cache::{Cache, CacheSnapshot, PolicyGetter, SecretGetter};
pub use config::AuthzConfig;
pub use error::{AuthzError, AuthzResult};
pub use loader::{Loader, LoaderConfig, LoaderHandle, LoaderStats, ReloadRequest};
pub use notification::{Notification, NotificationCommand, SignatureAlgorithm};
pub use pubsub::{LocalBus, NatsBus, Publisher, Subscriber};
pub use types::{AccessPolicy, AccessRequest, Decision, Effect, Secret};
pub use upstream::{HttpUpstream, MemoryUpstream, UpstreamClient};
