//! End-to-end authorization tests over a loaded cache.
//!
//! Tests verify:
//! - Allow and explicit-deny decisions after reloads
//! - Deny wins regardless of policy order
//! - Ladon-style patterns and conditions
//! - One audit record per decision

use authz_reload::audit::{AuditConfig, AuditRecorder, MemorySink};
use authz_reload::types::Condition;
use authz_reload::upstream::{MemoryUpstream, PolicyRecord, RetryPolicy};
use authz_reload::{
    AccessPolicy, AccessRequest, Authorizer, Cache, Effect, Loader, LoaderConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn loader_for(upstream: Arc<MemoryUpstream>) -> (Arc<Cache>, Loader) {
    let cache = Arc::new(Cache::new());
    let config = LoaderConfig {
        retry: RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        },
        ..LoaderConfig::default()
    };
    let loader = Loader::new(cache.clone(), upstream, config);
    (cache, loader)
}

fn read_doc1() -> AccessRequest {
    AccessRequest::new("alice", "doc1", "read")
}

// ============================================================================
// DECISIONS
// ============================================================================

#[tokio::test]
async fn test_allow_then_explicit_deny_after_reload() {
    let upstream = Arc::new(MemoryUpstream::new());
    upstream
        .add_policy(
            "alice",
            &AccessPolicy::new("P1", Effect::Allow, &["alice"], &["doc1"], &["read"]),
        )
        .unwrap();
    let (cache, loader) = loader_for(upstream.clone());
    loader.reload().await.unwrap();
    let authorizer = Authorizer::new(cache);

    let decision = authorizer.authorize(&read_doc1());
    assert!(decision.allowed);
    assert!(!decision.denied);
    assert!(decision.reason.is_none());

    upstream
        .add_policy(
            "alice",
            &AccessPolicy::new("P2", Effect::Deny, &["alice"], &["doc1"], &["read"]),
        )
        .unwrap();
    loader.reload().await.unwrap();

    let decision = authorizer.authorize(&read_doc1());
    assert!(!decision.allowed);
    assert!(decision.denied);
    let reason = decision.reason.unwrap();
    assert!(reason.contains("P2"));
    assert_eq!(
        reason,
        "policies P1 allow access, but policy P2 forcefully denied it"
    );
}

#[tokio::test]
async fn test_deny_wins_regardless_of_order() {
    let allow = AccessPolicy::new("A", Effect::Allow, &["alice"], &["doc<.*>"], &["read"]);
    let deny = AccessPolicy::new("D", Effect::Deny, &["alice"], &["doc1"], &["<read|write>"]);

    for policies in [vec![allow.clone(), deny.clone()], vec![deny.clone(), allow.clone()]] {
        let upstream = Arc::new(MemoryUpstream::new());
        upstream.set_policies(
            policies
                .iter()
                .map(|p| PolicyRecord::from_policy("alice", p).unwrap())
                .collect(),
        );
        let (cache, loader) = loader_for(upstream);
        loader.reload().await.unwrap();

        let decision = Authorizer::new(cache).authorize(&read_doc1());
        assert!(decision.denied, "order {:?}", policies.iter().map(|p| &p.id).collect::<Vec<_>>());
        assert!(decision.reason.unwrap().contains("policy D"));
    }
}

#[tokio::test]
async fn test_policies_are_scoped_to_their_username() {
    let upstream = Arc::new(MemoryUpstream::new());
    upstream
        .add_policy(
            "alice",
            &AccessPolicy::new("P1", Effect::Allow, &["<.*>"], &["doc1"], &["read"]),
        )
        .unwrap();
    let (cache, loader) = loader_for(upstream);
    loader.reload().await.unwrap();
    let authorizer = Authorizer::new(cache);

    assert!(authorizer.authorize(&read_doc1()).allowed);
    let bob = authorizer.authorize(&AccessRequest::new("bob", "doc1", "read"));
    assert!(bob.denied);
    assert_eq!(bob.reason.as_deref(), Some("no policy allowed access"));
}

#[tokio::test]
async fn test_conditions_gate_access() {
    let upstream = Arc::new(MemoryUpstream::new());
    upstream
        .add_policy(
            "alice",
            &AccessPolicy::new(
                "P1",
                Effect::Allow,
                &["alice"],
                &["resources:articles:<[0-9]+>"],
                &["delete"],
            )
            .with_condition("owner", Condition::EqualsSubject),
        )
        .unwrap();
    let (cache, loader) = loader_for(upstream);
    loader.reload().await.unwrap();
    let authorizer = Authorizer::new(cache);

    let owned = AccessRequest::new("alice", "resources:articles:12", "delete")
        .with_context("owner", json!("alice"));
    assert!(authorizer.authorize(&owned).allowed);

    let not_owned = AccessRequest::new("alice", "resources:articles:12", "delete")
        .with_context("owner", json!("bob"));
    assert!(authorizer.authorize(&not_owned).denied);

    let bad_id = AccessRequest::new("alice", "resources:articles:abc", "delete")
        .with_context("owner", json!("alice"));
    assert!(authorizer.authorize(&bad_id).denied);
}

// ============================================================================
// AUDIT
// ============================================================================

#[tokio::test]
async fn test_audit_records_every_decision() {
    let upstream = Arc::new(MemoryUpstream::new());
    upstream
        .add_policy(
            "alice",
            &AccessPolicy::new("P1", Effect::Allow, &["alice"], &["doc1"], &["read"]),
        )
        .unwrap();
    upstream
        .add_policy(
            "alice",
            &AccessPolicy::new("P2", Effect::Deny, &["alice"], &["doc2"], &["read"]),
        )
        .unwrap();
    let (cache, loader) = loader_for(upstream);
    loader.reload().await.unwrap();

    let sink = Arc::new(MemorySink::new());
    let (recorder, worker) = AuditRecorder::start(AuditConfig::default(), vec![sink.clone()]).unwrap();
    let authorizer = Authorizer::new(cache).with_audit(recorder.clone());

    authorizer.authorize(&read_doc1());
    authorizer.authorize(&AccessRequest::new("alice", "doc2", "read"));
    authorizer.authorize(&AccessRequest::new("alice", "doc3", "read"));

    let stats = recorder.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.allowed, 1);
    assert_eq!(stats.denied, 2);

    drop(authorizer);
    drop(recorder);
    worker.join();

    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].effect, Effect::Allow);
    assert_eq!(records[1].conclusion, "policy P2 forcefully denied the access");
    assert_eq!(records[2].conclusion, "no policy allowed access");

    let candidates: Vec<AccessPolicy> = serde_json::from_str(&records[1].policies).unwrap();
    assert_eq!(candidates.len(), 2);
    let deciders: Vec<AccessPolicy> = serde_json::from_str(&records[1].deciders).unwrap();
    assert_eq!(deciders.len(), 1);
    assert_eq!(deciders[0].id, "P2");
}
