//! # Replay Store: Experience Replay for RL Training
//!
//! Capacity-bounded store of variable-length episodes, persisted across
//! restarts and served to learners as fixed-length chunks.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Actor threads                                                   │
//! │  ┌──────────────┐   ┌──────────────┐                             │
//! │  │ReplayWriter 0│   │ReplayWriter N│   append(step) ...          │
//! │  │EpisodeBuffer │   │EpisodeBuffer │   end_episode()             │
//! │  └──────┬───────┘   └──────┬───────┘                             │
//! │         └─────────┬────────┘                                     │
//! │                   ▼                                              │
//! │          ┌─────────────────┐  observer  ┌──────────────────┐     │
//! │          │  EpisodeStore   │───────────►│ Priority index   │     │
//! │          │ (RwLock index,  │            │ (sum tree)       │     │
//! │          │  Arc payloads)  │            └──────────────────┘     │
//! │          └───┬─────────┬───┘                                     │
//! │   snapshot   │         │  Arc<Episode>                           │
//! │              ▼         ▼                                         │
//! │  ┌──────────────────┐ ┌──────────────────┐                       │
//! │  │CheckpointWorker  │ │ Sampler          │──► Batch [B, T, ...]  │
//! │  │(manifest + eps)  │ │ Fixed/Consec/PER │     to learner        │
//! │  └──────────────────┘ └──────────────────┘                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replay_store::{CheckpointerConfig, Replay, ReplayConfig, SamplerConfig, PrioritizedConfig};
//!
//! let config = ReplayConfig::new(1_000_000, 64)
//!     .with_sampler(SamplerConfig::Prioritized(PrioritizedConfig::new().with_alpha(0.6)))
//!     .with_checkpoint(CheckpointerConfig::new("./replay").with_save_every_episodes(500))
//!     .with_seed(42);
//!
//! let replay = Replay::open(config)?;
//! ```

pub mod buffers;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
pub mod replay;
pub mod sampling;

// Re-export commonly used types
pub use crate::core::array::{Array, ArrayData, DType};
pub use crate::core::episode::{Episode, EpisodeId, IdSource};
pub use crate::core::episode_buffer::EpisodeBuffer;
pub use crate::core::step::{Schema, Step, IS_FIRST, IS_LAST, IS_TERMINAL};

pub use buffers::batch::Batch;
pub use buffers::chunker::{Chunk, ChunkKey, ChunkMode, Chunker, PaddingPolicy};
pub use buffers::store::{EpisodeStore, InsertOutcome, StoreObserver, StoreSnapshot};

pub use checkpoint::{CheckpointError, CheckpointedStore, Checkpointer, CheckpointerConfig};

pub use sampling::{
    ConsecutiveConfig, ConsecutiveSampler, FixedLengthConfig, FixedLengthSampler,
    PrioritizedConfig, PrioritizedSampler, SampledChunk, Sampler, SamplerConfig, SamplerKind,
};

pub use config::ReplayConfig;
pub use error::{ReplayError, Result};
pub use metrics::{replay_metrics, ReplayMetrics, ReplayStats, SharedReplayMetrics};
pub use replay::{Replay, ReplayWriter};
