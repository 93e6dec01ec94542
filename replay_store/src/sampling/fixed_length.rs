//! Fixed-length chunk sampling.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::buffers::chunker::{ChunkMode, Chunker};
use crate::buffers::store::EpisodeStore;
use crate::error::{ReplayError, Result};

use super::{fork_rng, make_rng, SampledChunk, Sampler, SamplerKind};

/// Options for [`FixedLengthSampler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedLengthConfig {
    /// Pick episodes proportionally to their length.
    pub length_weighted: bool,
    /// Start chunks on the non-overlapping grid (`0, L, 2L, ...`).
    pub aligned: bool,
    /// Episodes tried per item before giving up.
    pub max_retries: usize,
}

impl Default for FixedLengthConfig {
    fn default() -> Self {
        Self {
            length_weighted: true,
            aligned: true,
            max_retries: 64,
        }
    }
}

impl FixedLengthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length_weighted(mut self, length_weighted: bool) -> Self {
        self.length_weighted = length_weighted;
        self
    }

    pub fn with_aligned(mut self, aligned: bool) -> Self {
        self.aligned = aligned;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(ReplayError::InvalidConfig(
                "fixed-length max_retries must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Draws independent chunks of one fixed length.
pub struct FixedLengthSampler {
    store: Arc<EpisodeStore>,
    chunker: Chunker,
    config: FixedLengthConfig,
    rng: Mutex<StdRng>,
}

impl FixedLengthSampler {
    pub fn new(
        store: Arc<EpisodeStore>,
        chunker: Chunker,
        config: FixedLengthConfig,
        seed: Option<u64>,
    ) -> Self {
        let mode = if config.aligned {
            ChunkMode::NonOverlapping
        } else {
            ChunkMode::Sliding
        };
        Self {
            store,
            chunker: chunker.with_mode(mode),
            config,
            rng: Mutex::new(make_rng(seed)),
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    fn sample_one(&self, rng: &mut StdRng) -> Result<SampledChunk> {
        for _ in 0..self.config.max_retries {
            let episode = self
                .store
                .random_episode(rng, self.config.length_weighted)
                .ok_or_else(|| ReplayError::NotReady("store is empty".into()))?;

            let count = self.chunker.num_chunks(episode.len());
            if count == 0 {
                continue;
            }
            let pick = rng.gen_range(0..count);
            let Some(offset) = self.chunker.offsets(episode.len()).nth(pick) else {
                continue;
            };
            match self.chunker.chunk_at(&episode, offset) {
                Ok(chunk) => return Ok(SampledChunk::new(chunk)),
                Err(e) if e.is_benign() || matches!(e, ReplayError::EpisodeTooShort { .. }) => {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
        Err(ReplayError::SampleExhausted {
            attempts: self.config.max_retries,
        })
    }
}

impl Sampler for FixedLengthSampler {
    fn sample(&self, batch_size: usize) -> Result<Vec<SampledChunk>> {
        if self.store.is_empty() {
            self.store.metrics().record_sample_failure();
            return Err(ReplayError::NotReady("store is empty".into()));
        }

        let mut rng = fork_rng(&self.rng);
        let mut out = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            match self.sample_one(&mut rng) {
                Ok(item) => out.push(item),
                Err(e) => {
                    self.store.metrics().record_sample_failure();
                    return Err(e);
                }
            }
        }
        self.store.metrics().record_sampled(out.len());
        Ok(out)
    }

    fn kind(&self) -> SamplerKind {
        SamplerKind::FixedLength
    }
}
