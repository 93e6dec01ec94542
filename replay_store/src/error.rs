//! Error taxonomy for the replay store.
//!
//! Errors fall into three groups:
//! - **Fatal** configuration or producer-contract bugs (`SchemaMismatch`,
//!   `EmptyEpisode`, `MissingTerminalFlag`, `CapacityTooSmall`, ...). These
//!   should halt the training run.
//! - **Benign** races with concurrent eviction or an empty store (`NotFound`,
//!   `UnknownChunkKey`, `SampleExhausted`, `NotReady`). Callers retry or skip.
//! - **Recoverable** shape problems (`EpisodeTooShort`) that samplers absorb
//!   internally through bounded retries.

use thiserror::Error;

use crate::buffers::chunker::ChunkKey;
use crate::checkpoint::CheckpointError;
use crate::core::episode::EpisodeId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Errors raised by the replay store and its samplers.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A step does not match the schema established by the first write.
    #[error("schema mismatch on field `{field}`: {detail}")]
    SchemaMismatch { field: String, detail: String },

    /// `finalize` was called on a buffer without steps.
    #[error("cannot finalize an episode without steps")]
    EmptyEpisode,

    /// The last step of an episode did not carry `is_last=true`, or a step
    /// was appended after one that did.
    #[error("episode boundary violated: {0}")]
    MissingTerminalFlag(String),

    /// The episode is not in the store (possibly evicted concurrently).
    #[error("episode {0} not found")]
    NotFound(EpisodeId),

    /// The chunk key is not in the priority index (possibly evicted).
    #[error("unknown chunk key {0}")]
    UnknownChunkKey(ChunkKey),

    /// An episode (or the chunk length) can never fit into the store.
    #[error("capacity {capacity} is too small for {required} transitions")]
    CapacityTooSmall { required: usize, capacity: usize },

    /// The episode cannot supply the requested chunk(s).
    #[error("episode of length {episode_len} cannot supply {required} steps")]
    EpisodeTooShort { episode_len: usize, required: usize },

    /// The sampler ran out of its retry budget.
    #[error("sampling gave up after {attempts} attempts")]
    SampleExhausted { attempts: usize },

    /// The store holds nothing to sample from yet.
    #[error("replay store is not ready: {0}")]
    NotReady(String),

    /// `restore` was issued after the store had been used.
    #[error("restore is only valid on a fresh store")]
    RestoreAfterUse,

    /// An array's data does not match its declared shape.
    #[error("invalid array: {0}")]
    InvalidArray(String),

    /// A configuration value failed pre-flight validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Checkpoint persistence failure.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl ReplayError {
    /// Expected under concurrent eviction or a cold store; callers retry or skip.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            ReplayError::NotFound(_)
                | ReplayError::UnknownChunkKey(_)
                | ReplayError::SampleExhausted { .. }
                | ReplayError::NotReady(_)
        )
    }

    /// Misconfiguration or contract violation; the process should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplayError::SchemaMismatch { .. }
                | ReplayError::EmptyEpisode
                | ReplayError::MissingTerminalFlag(_)
                | ReplayError::CapacityTooSmall { .. }
                | ReplayError::InvalidConfig(_)
                | ReplayError::InvalidArray(_)
        )
    }

    pub(crate) fn schema(field: impl Into<String>, detail: impl Into<String>) -> Self {
        ReplayError::SchemaMismatch {
            field: field.into(),
            detail: detail.into(),
        }
    }
}
