//! Replay metrics.
//!
//! - [`ReplayMetrics`]: thread-safe counters shared by the store, samplers
//!   and checkpoint worker
//! - [`ReplayStats`]: point-in-time snapshot for logging

pub mod replay_metrics;

pub use replay_metrics::{replay_metrics, ReplayMetrics, ReplayStats, SharedReplayMetrics};
