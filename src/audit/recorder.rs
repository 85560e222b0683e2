//! # Audit Recorder
//!
//! Fire-and-forget hand-off of audit records to a background worker.

use log::{debug, warn};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{AuditRecord, AuditSink};
use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};

/// Configuration for audit recording
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Enable audit recording
    pub enabled: bool,

    /// Sample rate (0.0 - 1.0). 1.0 = record all
    pub sample_rate: f64,

    /// Records buffered between the authorizer and the worker
    pub buffer_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            enabled: true,
            sample_rate: 1.0,
            buffer_size: 1024,
        }
    }
}

impl From<&AuthzConfig> for AuditConfig {
    fn from(config: &AuthzConfig) -> Self {
        AuditConfig {
            enabled: true,
            sample_rate: config.audit_sample_rate,
            buffer_size: config.audit_buffer,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    sampled_out: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    sink_failures: AtomicU64,
}

/// Cloneable handle used by the authorizer.
#[derive(Clone)]
pub struct AuditRecorder {
    config: AuditConfig,
    sender: mpsc::Sender<AuditRecord>,
    counters: Arc<Counters>,
}

/// Background thread draining the recorder's channel.
///
/// It stops once every [`AuditRecorder`] clone has been dropped, after
/// flushing the sinks.
pub struct AuditWorker {
    handle: JoinHandle<()>,
}

impl AuditWorker {
    /// Waits for the worker to drain and flush.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("Audit worker panicked");
        }
    }
}

impl AuditRecorder {
    /// Spawns the worker thread and returns the recorder feeding it.
    pub fn start(
        config: AuditConfig,
        sinks: Vec<Arc<dyn AuditSink>>,
    ) -> AuthzResult<(Self, AuditWorker)> {
        let (sender, mut receiver) = mpsc::channel::<AuditRecord>(config.buffer_size.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();

        let handle = std::thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || {
                while let Some(record) = receiver.blocking_recv() {
                    for sink in &sinks {
                        match sink.write(&record) {
                            Ok(()) => {
                                worker_counters.written.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                worker_counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                                warn!("Audit sink failed: {}", e);
                            }
                        }
                    }
                }
                for sink in &sinks {
                    if let Err(e) = sink.flush() {
                        warn!("Audit sink flush failed: {}", e);
                    }
                }
                debug!("Audit worker stopped");
            })
            .map_err(|e| AuthzError::Audit(format!("Failed to spawn audit worker: {}", e)))?;

        Ok((
            AuditRecorder {
                config,
                sender,
                counters,
            },
            AuditWorker { handle },
        ))
    }

    /// Queues a record without waiting. Returns `false` if it was sampled
    /// out or dropped because the buffer was full.
    pub fn record(&self, record: AuditRecord) -> bool {
        if !self.config.enabled {
            return false;
        }

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if record.is_granted() {
            self.counters.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.denied.fetch_add(1, Ordering::Relaxed);
        }

        // Apply sampling
        if self.config.sample_rate < 1.0 {
            let mut rng = rand::thread_rng();
            if rng.gen::<f64>() >= self.config.sample_rate {
                self.counters.sampled_out.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        match self.sender.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit buffer full, dropping record");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit worker stopped, dropping record");
                false
            }
        }
    }

    /// Get audit statistics
    pub fn stats(&self) -> AuditStats {
        AuditStats {
            total: self.counters.total.load(Ordering::Relaxed),
            allowed: self.counters.allowed.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
            sampled_out: self.counters.sampled_out.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            sink_failures: self.counters.sink_failures.load(Ordering::Relaxed),
            sample_rate: self.config.sample_rate,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Audit statistics
#[derive(Debug, Clone)]
pub struct AuditStats {
    pub total: u64,
    pub allowed: u64,
    pub denied: u64,
    pub sampled_out: u64,
    pub dropped: u64,
    /// Successful sink writes, counted per sink
    pub written: u64,
    pub sink_failures: u64,
    pub sample_rate: f64,
}

impl AuditStats {
    pub fn deny_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.denied as f64 / self.total as f64
        }
    }

    pub fn allow_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.allowed as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::types::{AccessRequest, Effect};
    use std::sync::Barrier;

    fn record(effect: Effect) -> AuditRecord {
        AuditRecord::new(
            &AccessRequest::new("alice", "doc1", "read"),
            effect,
            "test".into(),
            &[],
            &[],
        )
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn write(&self, _record: &AuditRecord) -> AuthzResult<()> {
            Err(AuthzError::Audit("disk full".into()))
        }
    }

    /// Blocks the worker on its first record until released.
    struct GateSink {
        gate: Arc<Barrier>,
        entered: Arc<Barrier>,
    }

    impl AuditSink for GateSink {
        fn write(&self, _record: &AuditRecord) -> AuthzResult<()> {
            self.entered.wait();
            self.gate.wait();
            Ok(())
        }
    }

    #[test]
    fn test_records_reach_sinks_and_stats() {
        let sink = Arc::new(MemorySink::new());
        let (recorder, worker) =
            AuditRecorder::start(AuditConfig::default(), vec![sink.clone()]).unwrap();

        assert!(recorder.record(record(Effect::Allow)));
        assert!(recorder.record(record(Effect::Deny)));
        assert!(recorder.record(record(Effect::Deny)));

        let stats = recorder.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.allowed, 1);
        assert!((stats.deny_rate() - 2.0 / 3.0).abs() < 1e-9);

        let observer = recorder.clone();
        drop(recorder);
        drop(observer);
        worker.join();
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_sink_failure_does_not_stop_other_sinks() {
        let sink = Arc::new(MemorySink::new());
        let sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(FailingSink), sink.clone()];
        let (recorder, worker) = AuditRecorder::start(AuditConfig::default(), sinks).unwrap();
        let counters = recorder.counters.clone();

        recorder.record(record(Effect::Allow));
        drop(recorder);
        worker.join();

        assert_eq!(sink.len(), 1);
        assert_eq!(counters.sink_failures.load(Ordering::Relaxed), 1);
        assert_eq!(counters.written.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_full_buffer_drops_without_blocking() {
        let gate = Arc::new(Barrier::new(2));
        let entered = Arc::new(Barrier::new(2));
        let config = AuditConfig {
            buffer_size: 1,
            ..AuditConfig::default()
        };
        let (recorder, worker) = AuditRecorder::start(
            config,
            vec![Arc::new(GateSink {
                gate: gate.clone(),
                entered: entered.clone(),
            })],
        )
        .unwrap();

        // First record is taken by the worker, which then blocks in the sink
        assert!(recorder.record(record(Effect::Allow)));
        entered.wait();
        // Second fills the buffer, third is dropped
        assert!(recorder.record(record(Effect::Allow)));
        assert!(!recorder.record(record(Effect::Allow)));
        assert_eq!(recorder.stats().dropped, 1);

        gate.wait();
        // Second record reaches the sink
        entered.wait();
        gate.wait();
        drop(recorder);
        worker.join();
    }

    #[test]
    fn test_zero_sample_rate_records_nothing() {
        let sink = Arc::new(MemorySink::new());
        let config = AuditConfig {
            sample_rate: 0.0,
            ..AuditConfig::default()
        };
        let (recorder, worker) = AuditRecorder::start(config, vec![sink.clone()]).unwrap();

        for _ in 0..10 {
            assert!(!recorder.record(record(Effect::Allow)));
        }
        assert_eq!(recorder.stats().sampled_out, 10);
        assert_eq!(recorder.stats().total, 10);
        drop(recorder);
        worker.join();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_disabled_recorder_ignores_records() {
        let config = AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        };
        let (recorder, worker) = AuditRecorder::start(config, Vec::new()).unwrap();
        assert!(!recorder.is_enabled());
        assert!(!recorder.record(record(Effect::Deny)));
        assert_eq!(recorder.stats().total, 0);
        drop(recorder);
        worker.join();
    }
}
