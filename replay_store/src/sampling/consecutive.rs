//! Consecutive-chunk sampling for recurrent learners.
//!
//! Each item is `k` adjacent chunks from one episode: chunk `j` starts at
//! `offset + j * length`. Without padding the whole span must fit inside
//! the episode; with padding only the last chunk may run past the end.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::buffers::chunker::{Chunk, Chunker};
use crate::buffers::store::EpisodeStore;
use crate::core::episode::Episode;
use crate::error::{ReplayError, Result};

use super::{fork_rng, make_rng, SampledChunk, Sampler, SamplerKind};

/// Options for [`ConsecutiveSampler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsecutiveConfig {
    /// Chunks per item (k).
    pub count: usize,
    /// Allow any start offset instead of multiples of the chunk length.
    pub randomize: bool,
    /// Episodes tried per item before giving up.
    pub max_retries: usize,
}

impl Default for ConsecutiveConfig {
    fn default() -> Self {
        Self {
            count: 2,
            randomize: false,
            max_retries: 64,
        }
    }
}

impl ConsecutiveConfig {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            ..Default::default()
        }
    }

    pub fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(ReplayError::InvalidConfig(
                "consecutive count must be at least 1".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ReplayError::InvalidConfig(
                "consecutive max_retries must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Draws groups of `count` adjacent chunks.
pub struct ConsecutiveSampler {
    store: Arc<EpisodeStore>,
    chunker: Chunker,
    config: ConsecutiveConfig,
    rng: Mutex<StdRng>,
}

impl ConsecutiveSampler {
    pub fn new(
        store: Arc<EpisodeStore>,
        chunker: Chunker,
        config: ConsecutiveConfig,
        seed: Option<u64>,
    ) -> Self {
        Self {
            store,
            chunker,
            config,
            rng: Mutex::new(make_rng(seed)),
        }
    }

    pub fn count(&self) -> usize {
        self.config.count
    }

    /// Largest start offset that still yields `count` chunks, if any.
    fn max_start(&self, episode_len: usize) -> Option<usize> {
        let length = self.chunker.length();
        let count = self.config.count.max(1);
        if self.chunker.padding().pads() {
            // The first step of the last chunk must be real.
            let lead = (count - 1) * length;
            (episode_len > lead).then(|| episode_len - 1 - lead)
        } else {
            let span = count * length;
            (episode_len >= span).then(|| episode_len - span)
        }
    }

    fn start_stride(&self) -> usize {
        if self.config.randomize {
            1
        } else {
            self.chunker.length()
        }
    }

    /// Number of valid starts; start `i` is at offset `i * stride`.
    fn start_count(&self, episode_len: usize) -> usize {
        self.max_start(episode_len)
            .map_or(0, |max| max / self.start_stride() + 1)
    }

    /// Start offsets from which `count` chunks can be taken.
    pub fn valid_starts(&self, episode_len: usize) -> Vec<usize> {
        let stride = self.start_stride();
        (0..self.start_count(episode_len))
            .map(|i| i * stride)
            .collect()
    }

    /// The `count` chunks starting at `offset`.
    ///
    /// Fails with `EpisodeTooShort` when the episode cannot supply them.
    pub fn sequence_at(&self, episode: &Arc<Episode>, offset: usize) -> Result<Vec<Chunk>> {
        let length = self.chunker.length();
        let fits = self.max_start(episode.len()).is_some_and(|max| offset <= max);
        if !fits {
            return Err(ReplayError::EpisodeTooShort {
                episode_len: episode.len(),
                required: offset.saturating_add(self.config.count * length),
            });
        }
        (0..self.config.count)
            .map(|j| self.chunker.chunk_at(episode, offset + j * length))
            .collect()
    }

    fn sample_group(&self, rng: &mut StdRng) -> Result<Vec<Chunk>> {
        for _ in 0..self.config.max_retries {
            let episode = self
                .store
                .random_episode(rng, true)
                .ok_or_else(|| ReplayError::NotReady("store is empty".into()))?;

            let starts = self.start_count(episode.len());
            if starts == 0 {
                continue;
            }
            let offset = rng.gen_range(0..starts) * self.start_stride();
            match self.sequence_at(&episode, offset) {
                Ok(group) => return Ok(group),
                Err(ReplayError::EpisodeTooShort { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ReplayError::SampleExhausted {
            attempts: self.config.max_retries,
        })
    }

    /// Draw `n` groups, each kept as its own vector.
    pub fn sample_sequences(&self, n: usize) -> Result<Vec<Vec<SampledChunk>>> {
        if self.store.is_empty() {
            self.store.metrics().record_sample_failure();
            return Err(ReplayError::NotReady("store is empty".into()));
        }

        let mut rng = fork_rng(&self.rng);
        let mut groups = Vec::with_capacity(n);
        for _ in 0..n {
            match self.sample_group(&mut rng) {
                Ok(group) => groups.push(group.into_iter().map(SampledChunk::new).collect()),
                Err(e) => {
                    self.store.metrics().record_sample_failure();
                    return Err(e);
                }
            }
        }
        self.store
            .metrics()
            .record_sampled(groups.len() * self.config.count);
        Ok(groups)
    }
}

impl Sampler for ConsecutiveSampler {
    fn sample(&self, batch_size: usize) -> Result<Vec<SampledChunk>> {
        Ok(self
            .sample_sequences(batch_size)?
            .into_iter()
            .flatten()
            .collect())
    }

    fn chunks_per_item(&self) -> usize {
        self.config.count
    }

    fn kind(&self) -> SamplerKind {
        SamplerKind::Consecutive
    }
}
