//! Cache reload semantics under concurrency.
//!
//! Tests verify:
//! - Lookups on a never-loaded cache report not-found
//! - Content equals the last successful reload
//! - Readers are not blocked while a fetch is in flight
//! - Readers never observe a partially replaced snapshot

use authz_reload::cache::CacheSnapshot;
use authz_reload::{AccessPolicy, AuthzError, Cache, Effect, Secret};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

/// Snapshot with `n` secrets and `n` policy subjects.
fn snapshot(n: usize) -> CacheSnapshot {
    let mut secrets = HashMap::new();
    let mut policies = HashMap::new();
    for i in 0..n {
        let user = format!("user-{}", i);
        secrets.insert(
            format!("kid-{}", i),
            Secret {
                username: user.clone(),
                id: format!("kid-{}", i),
                key: "k".into(),
                expires_at: 0,
            },
        );
        policies.insert(
            user.clone(),
            vec![AccessPolicy::new(
                format!("P{}", i),
                Effect::Allow,
                &[user.as_str()],
                &["doc"],
                &["read"],
            )],
        );
    }
    CacheSnapshot::new(secrets, policies)
}

#[test]
fn test_never_loaded_cache_reports_not_found() {
    let cache = Cache::new();
    let err = cache.get_secret("abc").unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, AuthzError::SecretNotFound { ref id } if id == "abc"));
    assert!(cache.get_policies("alice").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_content_matches_last_successful_reload() {
    let cache = Cache::new();

    cache.reload(|| async { Ok(snapshot(3)) }).await.unwrap();
    cache.reload(|| async { Ok(snapshot(5)) }).await.unwrap();
    let failed = cache
        .reload(|| async { Err(AuthzError::Transport("connection reset".into())) })
        .await;
    assert!(failed.is_err());

    let current = cache.snapshot();
    assert_eq!(current.secret_count(), 5);
    assert_eq!(current.policy_count(), 5);
    assert_eq!(cache.generation(), 2);
    assert!(cache.get_secret("kid-4").is_ok());
}

#[tokio::test]
async fn test_readers_not_blocked_during_fetch() {
    let cache = Arc::new(Cache::new());
    cache.replace(snapshot(1));

    let (release, wait) = oneshot::channel::<()>();
    let reloading = cache.clone();
    let reload = tokio::spawn(async move {
        reloading
            .reload(move || async move {
                match wait.await {
                    Ok(()) => Ok(snapshot(2)),
                    Err(_) => Err(AuthzError::Shutdown),
                }
            })
            .await
    });
    tokio::task::yield_now().await;

    // The fetch is parked; reads still see the old snapshot
    assert!(cache.get_secret("kid-0").is_ok());
    assert!(cache.get_secret("kid-1").is_err());

    release.send(()).unwrap();
    let stats = reload.await.unwrap().unwrap();
    assert_eq!(stats.secrets_loaded, 2);
    assert!(cache.get_secret("kid-1").is_ok());
}

#[test]
fn test_readers_never_see_partial_snapshot() {
    let cache = Arc::new(Cache::new());
    cache.replace(snapshot(1));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut observed = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let current = cache.snapshot();
                    assert_eq!(current.secret_count(), current.policy_count());
                    let n = current.secret_count();
                    assert!(current.secrets.contains_key(&format!("kid-{}", n - 1)));
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for n in 1..200 {
        cache.replace(snapshot(n % 17 + 1));
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(cache.generation(), 200);
}
