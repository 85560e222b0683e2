//! In-memory upstream used for embedding and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::{PolicyRecord, UpstreamClient};
use crate::error::{AuthzError, AuthzResult};
use crate::types::{AccessPolicy, Secret};

/// Upstream backed by in-memory lists, with injectable failures.
#[derive(Debug, Default)]
pub struct MemoryUpstream {
    secrets: RwLock<Vec<Secret>>,
    policies: RwLock<Vec<PolicyRecord>>,
    /// Every call fails while set
    unavailable: AtomicBool,
    /// Number of upcoming calls that fail
    failures_remaining: AtomicU32,
    secret_calls: AtomicU64,
    policy_calls: AtomicU64,
}

impl MemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_secrets(&self, secrets: Vec<Secret>) {
        *self.secrets.write() = secrets;
    }

    pub fn set_policies(&self, records: Vec<PolicyRecord>) {
        *self.policies.write() = records;
    }

    pub fn push_policy_record(&self, record: PolicyRecord) {
        self.policies.write().push(record);
    }

    /// Stores `policy` for `username` in upstream wire form.
    pub fn add_policy(&self, username: &str, policy: &AccessPolicy) -> AuthzResult<()> {
        let record = PolicyRecord::from_policy(username, policy)?;
        self.push_policy_record(record);
        Ok(())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` list calls fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn secret_list_calls(&self) -> u64 {
        self.secret_calls.load(Ordering::SeqCst)
    }

    pub fn policy_list_calls(&self) -> u64 {
        self.policy_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> AuthzResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::Transport("upstream unavailable".into()));
        }
        let consumed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(AuthzError::Transport("injected failure".into()));
        }
        Ok(())
    }
}

fn page<T: Clone>(items: &[T], offset: i64, limit: i64) -> Vec<T> {
    let start = offset.max(0) as usize;
    if start >= items.len() {
        return Vec::new();
    }
    let rest = &items[start..];
    if limit < 0 {
        rest.to_vec()
    } else {
        rest.iter().take(limit as usize).cloned().collect()
    }
}

#[async_trait]
impl UpstreamClient for MemoryUpstream {
    async fn list_secrets(&self, offset: i64, limit: i64) -> AuthzResult<Vec<Secret>> {
        self.secret_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(page(self.secrets.read().as_slice(), offset, limit))
    }

    async fn list_policies(&self, offset: i64, limit: i64) -> AuthzResult<Vec<PolicyRecord>> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(page(self.policies.read().as_slice(), offset, limit))
    }
}
