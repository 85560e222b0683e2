//! In-memory snapshot of secrets and policies.
//!
//! Readers clone an `Arc` to the current snapshot under a shared lock.
//! [`Cache::reload`] fetches a complete replacement first and takes the
//! exclusive lock only for the pointer swap, so a slow upstream never
//! blocks authorization reads.

pub mod snapshot_file;
pub mod types;

pub use snapshot_file::SnapshotFile;
pub use types::{CacheSnapshot, ReloadStats};

use crate::error::{AuthzError, AuthzResult};
use crate::types::{now_ms, AccessPolicy, Secret};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of candidate policies for a subject.
pub trait PolicyGetter: Send + Sync {
    fn get_policies(&self, subject: &str) -> AuthzResult<Vec<AccessPolicy>>;
}

/// Source of secrets by ID.
pub trait SecretGetter: Send + Sync {
    fn get_secret(&self, id: &str) -> AuthzResult<Secret>;
}

/// Shared cache holding the current snapshot.
///
/// Constructed once at startup and handed to every component as
/// `Arc<Cache>`.
#[derive(Debug, Default)]
pub struct Cache {
    snapshot: RwLock<Arc<CacheSnapshot>>,
    /// Increments on every committed swap
    generation: AtomicU64,
}

impl Cache {
    /// Creates an empty cache. Every lookup reports not-found until the
    /// first successful reload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the secret with the given ID.
    pub fn get_secret(&self, id: &str) -> AuthzResult<Secret> {
        self.snapshot
            .read()
            .secrets
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::SecretNotFound { id: id.to_string() })
    }

    /// Returns all policies scoped to the given subject.
    pub fn get_policies(&self, subject: &str) -> AuthzResult<Vec<AccessPolicy>> {
        self.snapshot
            .read()
            .policies
            .get(subject)
            .cloned()
            .ok_or_else(|| AuthzError::PolicyNotFound {
                subject: subject.to_string(),
            })
    }

    /// Current snapshot. Holding the returned `Arc` pins that snapshot
    /// even if a reload swaps in a newer one.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replaces the snapshot wholesale and returns the new generation.
    pub fn replace(&self, mut snapshot: CacheSnapshot) -> u64 {
        if snapshot.loaded_at == 0 {
            snapshot.loaded_at = now_ms();
        }
        let next = Arc::new(snapshot);
        let previous = {
            let mut guard = self.snapshot.write();
            std::mem::replace(&mut *guard, next)
        };
        // Old maps are freed outside the lock
        drop(previous);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Fetches a complete replacement and swaps it in.
    ///
    /// On fetch failure the current snapshot is left untouched and the
    /// error is returned to the caller.
    pub async fn reload<F, Fut>(&self, fetch: F) -> AuthzResult<ReloadStats>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthzResult<CacheSnapshot>>,
    {
        self.reload_with(fetch, || true).await
    }

    /// Like [`reload`](Self::reload), but consults `should_commit` after the
    /// fetch and discards the result when it returns `false`.
    pub async fn reload_with<F, Fut, C>(&self, fetch: F, should_commit: C) -> AuthzResult<ReloadStats>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthzResult<CacheSnapshot>>,
        C: FnOnce() -> bool,
    {
        let start = now_ms();

        // No lock is held while the fetch is in flight
        let mut fresh = fetch().await?;

        if !should_commit() {
            return Err(AuthzError::Shutdown);
        }

        let secrets_loaded = fresh.secret_count();
        let policies_loaded = fresh.policy_count();
        fresh.loaded_at = now_ms();
        let generation = self.replace(fresh);

        Ok(ReloadStats {
            secrets_loaded,
            policies_loaded,
            duration_ms: now_ms().saturating_sub(start),
            timestamp: now_ms(),
            generation,
        })
    }
}

impl PolicyGetter for Cache {
    fn get_policies(&self, subject: &str) -> AuthzResult<Vec<AccessPolicy>> {
        Cache::get_policies(self, subject)
    }
}

impl SecretGetter for Cache {
    fn get_secret(&self, id: &str) -> AuthzResult<Secret> {
        Cache::get_secret(self, id)
    }
}
