//! Reload orchestration.
//!
//! Three triggers feed one cache:
//!
//! 1. **Startup** - [`Loader::start`] reloads once before any background
//!    task runs, so the first authorization never sees an empty cache
//!    because of a race.
//! 2. **Push** - the listener decodes change notifications and sends a
//!    [`ReloadRequest`] on an unbounded channel; the queue task folds them
//!    into [`PendingReloads`].
//! 3. **Tick** - every `reload_interval` the ticker takes the pending
//!    batch. An empty batch skips the cycle. Otherwise the cache is
//!    reloaded exactly once and the batch's callbacks run in arrival
//!    order.
//!
//! A failed reload leaves the previous snapshot in place.

pub mod queue;

pub use queue::{PendingReloads, ReloadCallback, ReloadRequest};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, ReloadStats, SnapshotFile};
use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::notification::{classify, NotificationOutcome};
use crate::pubsub::Subscriber;
use crate::upstream::{fetch_all, RetryPolicy, UpstreamClient};

/// Configuration for the loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Debounce window between reload cycles
    pub reload_interval: Duration,
    /// Retry budget for each upstream list call
    pub retry: RetryPolicy,
    /// Cap on callbacks waiting for the next cycle
    pub max_pending_callbacks: usize,
    /// Shared HMAC key; when set, unverifiable notifications are dropped
    pub signing_key: Option<Vec<u8>>,
    /// Where to persist the last good snapshot
    pub snapshot_path: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            max_pending_callbacks: 1024,
            signing_key: None,
            snapshot_path: None,
        }
    }
}

impl From<&AuthzConfig> for LoaderConfig {
    fn from(config: &AuthzConfig) -> Self {
        Self {
            reload_interval: config.reload_interval,
            retry: RetryPolicy {
                attempts: config.fetch_attempts,
                delay: config.retry_delay,
            },
            max_pending_callbacks: config.max_pending_callbacks,
            signing_key: config.signing_key_bytes(),
            snapshot_path: config.snapshot_path.clone(),
        }
    }
}

/// Counters describing loader activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Successful reloads, including the startup one
    pub reloads: u64,
    /// Reloads that failed and left the snapshot unchanged
    pub failures: u64,
    /// Reloads fetched but not committed because of shutdown
    pub discarded: u64,
    /// Notifications that requested a reload
    pub notifications: u64,
    /// Notifications dropped as malformed or unverifiable
    pub rejected_notifications: u64,
    /// Completion callbacks dropped at capacity
    pub dropped_callbacks: u64,
    /// Milliseconds since epoch of the last successful reload
    pub last_success_at: Option<u64>,
    /// Wall-clock duration of the last completed cycle
    pub last_cycle_ms: u64,
}

struct LoaderInner {
    cache: Arc<Cache>,
    upstream: Arc<dyn UpstreamClient>,
    config: LoaderConfig,
    snapshot_file: Option<SnapshotFile>,
    pending: PendingReloads,
    /// Held across fetch and commit so reloads apply in order
    reload_lock: Mutex<()>,
    stats: RwLock<LoaderStats>,
    cancel: CancellationToken,
    started: AtomicBool,
}

/// Keeps the cache synchronized with the upstream.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

impl Loader {
    pub fn new(cache: Arc<Cache>, upstream: Arc<dyn UpstreamClient>, config: LoaderConfig) -> Self {
        let snapshot_file = config.snapshot_path.clone().map(SnapshotFile::new);
        let pending = PendingReloads::new(config.max_pending_callbacks);
        Self {
            inner: Arc::new(LoaderInner {
                cache,
                upstream,
                config,
                snapshot_file,
                pending,
                reload_lock: Mutex::new(()),
                stats: RwLock::new(LoaderStats::default()),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.inner.cache
    }

    pub fn stats(&self) -> LoaderStats {
        let mut stats = self.inner.stats.read().clone();
        stats.dropped_callbacks = self.inner.pending.dropped();
        stats
    }

    /// Reloads immediately, bypassing the debounce queue.
    pub async fn reload(&self) -> AuthzResult<ReloadStats> {
        self.inner.do_reload().await
    }

    /// Performs the startup reload and spawns the listener, queue and
    /// ticker tasks.
    ///
    /// If the startup reload fails and a persisted snapshot exists, that
    /// snapshot is served until the next successful reload.
    pub async fn start(&self, subscriber: Box<dyn Subscriber>) -> AuthzResult<LoaderHandle> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(AuthzError::Config("loader already started".into()));
        }

        info!(
            "Starting loader with {}ms reload interval",
            self.inner.config.reload_interval.as_millis()
        );

        if let Err(e) = self.inner.do_reload().await {
            self.inner.restore_persisted(&e);
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(listener_loop(self.inner.clone(), subscriber, sender.clone())),
            tokio::spawn(queue_loop(self.inner.clone(), receiver)),
            tokio::spawn(ticker_loop(self.inner.clone())),
        ];

        Ok(LoaderHandle {
            loader: self.clone(),
            requests: sender,
            tasks,
        })
    }
}

impl LoaderInner {
    async fn do_reload(&self) -> AuthzResult<ReloadStats> {
        let _serial = self.reload_lock.lock().await;
        let upstream = self.upstream.clone();
        let retry = self.config.retry.clone();
        let cancel = self.cancel.clone();

        let result = self
            .cache
            .reload_with(
                || async move { fetch_all(upstream.as_ref(), &retry).await },
                || !cancel.is_cancelled(),
            )
            .await;

        match &result {
            Ok(stats) => {
                info!(
                    "Reloaded {} secrets and {} policies in {}ms (generation {})",
                    stats.secrets_loaded, stats.policies_loaded, stats.duration_ms, stats.generation
                );
                {
                    let mut loader_stats = self.stats.write();
                    loader_stats.reloads += 1;
                    loader_stats.last_success_at = Some(stats.timestamp);
                }
                self.persist().await;
            }
            Err(AuthzError::Shutdown) => {
                self.stats.write().discarded += 1;
                info!("Reload result discarded, loader is shutting down");
            }
            Err(e) => {
                self.stats.write().failures += 1;
                error!("Failed to reload secrets and policies: {}", e);
            }
        }

        result
    }

    async fn persist(&self) {
        let Some(file) = self.snapshot_file.clone() else {
            return;
        };
        let path = file.path().display().to_string();
        let snapshot = self.cache.snapshot();
        match tokio::task::spawn_blocking(move || file.save(&snapshot)).await {
            Ok(Ok(())) => debug!("Persisted snapshot to {}", path),
            Ok(Err(e)) => warn!("Failed to persist snapshot to {}: {}", path, e),
            Err(e) => warn!("Snapshot writer task failed for {}: {}", path, e),
        }
    }

    fn restore_persisted(&self, reload_error: &AuthzError) {
        let Some(file) = &self.snapshot_file else {
            return;
        };
        match file.load() {
            Ok(Some(snapshot)) => {
                warn!(
                    "Startup reload failed ({}), serving persisted snapshot from {}",
                    reload_error,
                    file.path().display()
                );
                self.cache.replace(snapshot);
            }
            Ok(None) => debug!("No persisted snapshot at {}", file.path().display()),
            Err(e) => error!("Failed to read persisted snapshot: {}", e),
        }
    }

    async fn run_cycle(&self) {
        let Some(callbacks) = self.pending.take() else {
            return;
        };

        let start = Instant::now();
        // Failure is logged and counted inside; callbacks still fire
        let _ = self.do_reload().await;
        for callback in callbacks {
            callback();
        }

        let elapsed = start.elapsed();
        self.stats.write().last_cycle_ms = elapsed.as_millis() as u64;
        info!("Reload: cycle completed in {:?}", elapsed);
    }

    fn handle_message(&self, raw: &str, requests: &mpsc::UnboundedSender<ReloadRequest>) {
        match classify(raw, self.config.signing_key.as_deref()) {
            Ok(NotificationOutcome::Reload(command)) => {
                info!("Reloading secrets and policies after {}", command);
                self.stats.write().notifications += 1;
                if requests.send(ReloadRequest::new()).is_err() {
                    debug!("Reload queue closed, notification ignored");
                }
            }
            Ok(NotificationOutcome::UnknownCommand(_)) => {}
            Err(AuthzError::InvalidSignature) => {
                self.stats.write().rejected_notifications += 1;
                warn!("Dropping notification with invalid signature");
            }
            Err(e) => {
                self.stats.write().rejected_notifications += 1;
                error!("Dropping malformed notification: {}", e);
            }
        }
    }
}

async fn listener_loop(
    inner: Arc<LoaderInner>,
    mut subscriber: Box<dyn Subscriber>,
    requests: mpsc::UnboundedSender<ReloadRequest>,
) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            message = subscriber.next_message() => match message {
                Some(Ok(raw)) => inner.handle_message(&raw, &requests),
                Some(Err(e)) => error!("Failed to receive notification: {}", e),
                None => {
                    warn!("Notification subscription ended");
                    break;
                }
            },
        }
    }

    if let Err(e) = subscriber.close().await {
        warn!("Failed to close notification subscription: {}", e);
    }
    debug!("Listener stopped");
}

async fn queue_loop(inner: Arc<LoaderInner>, mut requests: mpsc::UnboundedReceiver<ReloadRequest>) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => {
                    inner.pending.push(request);
                    info!("Reload queued");
                }
                None => break,
            },
        }
    }
    debug!("Reload queue stopped");
}

async fn ticker_loop(inner: Arc<LoaderInner>) {
    let mut ticker = interval(inner.config.reload_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = ticker.tick() => inner.run_cycle().await,
        }
    }
    debug!("Reload ticker stopped");
}

/// Running loader. Dropping it cancels the background tasks without
/// waiting for them; prefer [`LoaderHandle::shutdown`].
pub struct LoaderHandle {
    loader: Loader,
    requests: mpsc::UnboundedSender<ReloadRequest>,
    tasks: Vec<JoinHandle<()>>,
}

impl LoaderHandle {
    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn stats(&self) -> LoaderStats {
        self.loader.stats()
    }

    pub fn is_running(&self) -> bool {
        !self.loader.inner.cancel.is_cancelled()
    }

    /// Queues a reload for the next cycle, as a notification would.
    pub fn request_reload(&self, request: ReloadRequest) -> AuthzResult<()> {
        self.requests.send(request).map_err(|_| AuthzError::Shutdown)
    }

    /// Queues a reload and waits until the cycle serving it has finished.
    pub async fn reload_and_wait(&self) -> AuthzResult<()> {
        let (done, wait) = oneshot::channel();
        self.request_reload(ReloadRequest::with_waiter(move || {
            let _ = done.send(());
        }))?;
        wait.await.map_err(|_| AuthzError::Shutdown)
    }

    /// Stops all loops, closes the subscription and waits for the tasks.
    ///
    /// An in-flight fetch finishes, but its result is not committed.
    pub async fn shutdown(mut self) {
        info!("Stopping loader");
        self.loader.inner.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("Loader task failed: {}", e);
            }
        }
        info!("Loader stopped");
    }
}

impl Drop for LoaderHandle {
    fn drop(&mut self) {
        self.loader.inner.cancel.cancel();
    }
}
