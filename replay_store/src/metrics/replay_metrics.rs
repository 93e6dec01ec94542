//! Shared replay counters for the store, samplers and checkpoint worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Thread-safe replay counters.
#[derive(Debug, Default)]
pub struct ReplayMetrics {
    /// Episodes accepted by the store
    episodes_inserted: AtomicUsize,
    /// Transitions accepted by the store
    transitions_inserted: AtomicUsize,
    /// Episodes evicted to make room
    episodes_evicted: AtomicUsize,
    /// Episodes loaded from a checkpoint
    episodes_restored: AtomicUsize,
    /// Chunks handed to the learner
    chunks_sampled: AtomicUsize,
    /// `sample` calls that ended in NotReady / SampleExhausted
    sample_failures: AtomicUsize,
    /// Priority updates applied
    priority_updates: AtomicUsize,
    /// Priority updates dropped (unknown key or non-finite value)
    priority_updates_dropped: AtomicUsize,
    /// Checkpoints committed
    checkpoints_written: AtomicUsize,
    /// Checkpoint writes that failed
    checkpoint_failures: AtomicUsize,
}

impl ReplayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self, transitions: usize) {
        self.episodes_inserted.fetch_add(1, Ordering::Relaxed);
        self.transitions_inserted.fetch_add(transitions, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, episodes: usize) {
        self.episodes_evicted.fetch_add(episodes, Ordering::Relaxed);
    }

    pub fn record_restore(&self, episodes: usize) {
        self.episodes_restored.fetch_add(episodes, Ordering::Relaxed);
    }

    pub fn record_sampled(&self, chunks: usize) {
        self.chunks_sampled.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_sample_failure(&self) {
        self.sample_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_priority_updates(&self, applied: usize, dropped: usize) {
        self.priority_updates.fetch_add(applied, Ordering::Relaxed);
        self.priority_updates_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self, ok: bool) {
        if ok {
            self.checkpoints_written.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn episodes_inserted(&self) -> usize {
        self.episodes_inserted.load(Ordering::Relaxed)
    }

    pub fn episodes_evicted(&self) -> usize {
        self.episodes_evicted.load(Ordering::Relaxed)
    }

    pub fn checkpoints_written(&self) -> usize {
        self.checkpoints_written.load(Ordering::Relaxed)
    }

    pub fn checkpoint_failures(&self) -> usize {
        self.checkpoint_failures.load(Ordering::Relaxed)
    }

    /// Counter snapshot combined with the store's current gauges.
    pub fn snapshot(&self, episodes: usize, transitions: usize, capacity: usize) -> ReplayStats {
        ReplayStats {
            episodes,
            transitions,
            capacity,
            episodes_inserted: self.episodes_inserted.load(Ordering::Relaxed),
            transitions_inserted: self.transitions_inserted.load(Ordering::Relaxed),
            episodes_evicted: self.episodes_evicted.load(Ordering::Relaxed),
            episodes_restored: self.episodes_restored.load(Ordering::Relaxed),
            chunks_sampled: self.chunks_sampled.load(Ordering::Relaxed),
            sample_failures: self.sample_failures.load(Ordering::Relaxed),
            priority_updates: self.priority_updates.load(Ordering::Relaxed),
            priority_updates_dropped: self.priority_updates_dropped.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time replay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Episodes currently stored.
    pub episodes: usize,
    /// Transitions currently stored.
    pub transitions: usize,
    pub capacity: usize,
    pub episodes_inserted: usize,
    pub transitions_inserted: usize,
    pub episodes_evicted: usize,
    pub episodes_restored: usize,
    pub chunks_sampled: usize,
    pub sample_failures: usize,
    pub priority_updates: usize,
    pub priority_updates_dropped: usize,
    pub checkpoints_written: usize,
    pub checkpoint_failures: usize,
}

impl ReplayStats {
    /// Fill fraction (0.0 to 1.0).
    pub fn utilization(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.transitions as f32 / self.capacity as f32
    }
}

/// Shared replay metrics.
pub type SharedReplayMetrics = Arc<ReplayMetrics>;

/// Create new shared replay metrics.
pub fn replay_metrics() -> SharedReplayMetrics {
    Arc::new(ReplayMetrics::new())
}
