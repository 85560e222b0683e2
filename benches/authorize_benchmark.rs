#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

use authz_reload::cache::CacheSnapshot;
use authz_reload::{AccessPolicy, AccessRequest, Authorizer, Cache, Effect};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Cache holding `per_user` policies for "alice". Only the last one allows
/// `read` on `doc<n>`, so every request walks the whole candidate set.
fn populated_cache(per_user: usize) -> Arc<Cache> {
    let mut policies = Vec::with_capacity(per_user);
    for i in 0..per_user.saturating_sub(1) {
        let resource = format!("other:{}:<.*>", i);
        policies.push(AccessPolicy::new(
            format!("P{}", i),
            Effect::Allow,
            &["alice"],
            &[resource.as_str()],
            &["write"],
        ));
    }
    policies.push(AccessPolicy::new(
        "allow-read",
        Effect::Allow,
        &["alice"],
        &["doc<[0-9]+>"],
        &["<read|list>"],
    ));

    let mut by_user = HashMap::new();
    by_user.insert("alice".to_string(), policies);
    let cache = Arc::new(Cache::new());
    cache.replace(CacheSnapshot::new(HashMap::new(), by_user));
    cache
}

// ---------------------------------------------------------------------------
// 1. authorize
// ---------------------------------------------------------------------------

fn authorize(c: &mut Criterion) {
    let mut group = c.benchmark_group("authorize");
    group.throughput(Throughput::Elements(1));

    for &per_user in &[1usize, 16, 128] {
        let authorizer = Authorizer::new(populated_cache(per_user));
        let request = AccessRequest::new("alice", "doc42", "read");
        // Warm the compiled pattern cache
        assert!(authorizer.authorize(&request).allowed);

        group.bench_with_input(BenchmarkId::new("granted", per_user), &per_user, |b, _| {
            b.iter(|| black_box(authorizer.authorize(black_box(&request))));
        });
    }

    {
        let authorizer = Authorizer::new(populated_cache(16));
        let request = AccessRequest::new("mallory", "doc42", "read");
        group.bench_function("unknown_subject", |b| {
            b.iter(|| black_box(authorizer.authorize(black_box(&request))));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. snapshot swap
// ---------------------------------------------------------------------------

fn snapshot_swap(c: &mut Criterion) {
    let cache = populated_cache(16);
    let snapshot = (*cache.snapshot()).clone();
    c.bench_function("snapshot_swap", |b| {
        b.iter(|| black_box(cache.replace(snapshot.clone())));
    });
}

criterion_group!(benches, authorize, snapshot_swap);
criterion_main!(benches);
