//! # Authorization Cache Server
//!
//! Loads configuration from `AUTHZ_*` variables, keeps the policy cache in
//! sync with the API server and records audit decisions until Ctrl-C.

use authz_reload::audit::{AuditLogConfig, AuditLogWriter};
use authz_reload::{
    AuditConfig, AuditRecorder, AuditSink, Authorizer, AuthzConfig, Cache, HttpUpstream, Loader,
    LoaderConfig, LogSink, NatsBus,
};
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authz_reload=info,authz_server=info".into()),
        )
        .init();

    let config = AuthzConfig::from_env()?;
    config.validate()?;

    info!("Starting authorization cache server");
    info!("  - Upstream: {}", config.upstream_url);
    info!("  - Notifications: {} on {}", config.pubsub_channel, config.pubsub_url);
    info!("  - Reload interval: {:?}", config.reload_interval);
    info!(
        "  - Notification signing: {}",
        if config.signing_key.is_some() { "hmac-sha256" } else { "disabled" }
    );

    let cache = Arc::new(Cache::new());
    let upstream = Arc::new(HttpUpstream::new(&config.upstream_url, config.upstream_timeout)?);
    let bus = NatsBus::connect(&config.pubsub_url, &config.pubsub_channel).await?;
    let subscriber = bus.subscribe().await?;

    let loader = Loader::new(cache.clone(), upstream, LoaderConfig::from(&config));
    let handle = loader.start(Box::new(subscriber)).await?;
    let snapshot = cache.snapshot();
    info!(
        "Cache ready: {} secrets, {} policies",
        snapshot.secret_count(),
        snapshot.policy_count()
    );

    let mut sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(LogSink)];
    if let Some(dir) = &config.audit_dir {
        sinks.push(Arc::new(AuditLogWriter::new(AuditLogConfig::in_dir(dir))?));
        info!("  - Audit log: {}", dir.display());
    }
    let (recorder, audit_worker) = AuditRecorder::start(AuditConfig::from(&config), sinks)?;
    let authorizer = Authorizer::new(cache).with_audit(recorder.clone());

    info!("Authorization cache server running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    handle.shutdown().await;

    let stats = recorder.stats();
    info!(
        "Audit: {} decisions ({} allowed, {} denied, {} dropped)",
        stats.total, stats.allowed, stats.denied, stats.dropped
    );
    drop(authorizer);
    drop(recorder);
    if let Err(e) = tokio::task::spawn_blocking(move || audit_worker.join()).await {
        error!("Audit worker join failed: {}", e);
    }

    let loader_stats = loader.stats();
    info!(
        "Authorization cache server stopped after {} reloads ({} failed)",
        loader_stats.reloads, loader_stats.failures
    );
    Ok(())
}
