//! Replay configuration.
//!
//! Mirrors the training config's `replay*` keys: capacity, chunk length,
//! sampler kind with its options, checkpointing and the parallel flag. All
//! types derive serde so an outer CLI or config-file layer can parse them.

use serde::{Deserialize, Serialize};

pub use crate::buffers::chunker::PaddingPolicy;
use crate::checkpoint::CheckpointerConfig;
use crate::error::{ReplayError, Result};
use crate::sampling::SamplerConfig;

/// Top-level replay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum transitions retained.
    pub capacity: usize,
    /// Steps per training chunk.
    pub chunk_length: usize,
    /// Handling of windows that run past an episode's end.
    pub padding: PaddingPolicy,
    /// Sampling policy and its options.
    pub sampler: SamplerConfig,
    /// Persist the store under this configuration (none = in-memory only).
    pub checkpoint: Option<CheckpointerConfig>,
    /// Run checkpoint writes on a background thread.
    pub parallel: bool,
    /// Seed for the sampler RNG (none = from entropy).
    pub seed: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            chunk_length: 64,
            padding: PaddingPolicy::Drop,
            sampler: SamplerConfig::default(),
            checkpoint: None,
            parallel: true,
            seed: None,
        }
    }
}

impl ReplayConfig {
    /// Create a config with the given capacity and chunk length.
    pub fn new(capacity: usize, chunk_length: usize) -> Self {
        Self {
            capacity,
            chunk_length,
            ..Default::default()
        }
    }

    /// Set the padding policy.
    pub fn with_padding(mut self, padding: PaddingPolicy) -> Self {
        self.padding = padding;
        self
    }

    /// Set the sampler.
    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    /// Enable checkpointing.
    pub fn with_checkpoint(mut self, checkpoint: CheckpointerConfig) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Enable or disable the background checkpoint thread.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Fix the sampler seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Pre-flight check, run before any store is built.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ReplayError::InvalidConfig("capacity must be positive".into()));
        }
        if self.chunk_length == 0 {
            return Err(ReplayError::InvalidConfig(
                "chunk_length must be positive".into(),
            ));
        }
        let required = self.chunk_length * self.sampler.chunks_per_item();
        if required > self.capacity {
            return Err(ReplayError::CapacityTooSmall {
                required,
                capacity: self.capacity,
            });
        }
        self.sampler.validate()?;
        if let Some(checkpoint) = &self.checkpoint {
            checkpoint.validate()?;
        }
        Ok(())
    }
}
