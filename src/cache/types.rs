//! Snapshot data structures.
//!
//! Defines the wholesale-replaceable snapshot held by the cache and the
//! statistics reported by a reload.

use crate::types::{AccessPolicy, Secret};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One fully-formed copy of secrets and policies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Secrets keyed by secret ID
    pub secrets: HashMap<String, Secret>,

    /// Policies keyed by subject (username)
    pub policies: HashMap<String, Vec<AccessPolicy>>,

    /// When this snapshot was committed (Unix timestamp ms), 0 if never
    pub loaded_at: u64,
}

impl CacheSnapshot {
    pub fn new(
        secrets: HashMap<String, Secret>,
        policies: HashMap<String, Vec<AccessPolicy>>,
    ) -> Self {
        Self {
            secrets,
            policies,
            loaded_at: 0,
        }
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    /// Total policies across all subjects.
    pub fn policy_count(&self) -> usize {
        self.policies.values().map(Vec::len).sum()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at != 0
    }
}

/// Statistics from a reload operation.
#[derive(Clone, Debug)]
pub struct ReloadStats {
    /// Number of secrets in the new snapshot
    pub secrets_loaded: usize,
    /// Number of policies in the new snapshot
    pub policies_loaded: usize,
    /// Duration of fetch plus swap in milliseconds
    pub duration_ms: u64,
    /// Timestamp of the swap
    pub timestamp: u64,
    /// Cache generation after the swap
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Effect;

    #[test]
    fn test_snapshot_counts() {
        let mut policies = HashMap::new();
        policies.insert(
            "alice".to_string(),
            vec![
                AccessPolicy::new("P1", Effect::Allow, &["alice"], &["doc1"], &["read"]),
                AccessPolicy::new("P2", Effect::Deny, &["alice"], &["doc1"], &["read"]),
            ],
        );
        policies.insert(
            "bob".to_string(),
            vec![AccessPolicy::new("P3", Effect::Allow, &["bob"], &["doc2"], &["write"])],
        );

        let snapshot = CacheSnapshot::new(HashMap::new(), policies);
        assert_eq!(snapshot.secret_count(), 0);
        assert_eq!(snapshot.policy_count(), 3);
        assert!(!snapshot.is_loaded());
    }
}
