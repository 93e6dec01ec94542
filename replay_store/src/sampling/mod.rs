//! Chunk samplers over the episode store.
//!
//! Three policies sit behind one object-safe [`Sampler`] trait:
//!
//! - [`FixedLengthSampler`]: one chunk per item, episode picked uniformly or
//!   weighted by length
//! - [`ConsecutiveSampler`]: `k` adjacent chunks per item, kept together
//! - [`PrioritizedSampler`]: chunks drawn proportionally to learner feedback,
//!   with importance-sampling weights
//!
//! The policy is chosen once from [`SamplerConfig`] when the replay is built.

pub mod consecutive;
pub mod fixed_length;
pub mod prioritized;
pub mod sum_tree;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::buffers::chunker::{Chunk, ChunkKey, Chunker};
use crate::buffers::store::EpisodeStore;
use crate::error::Result;

pub use consecutive::{ConsecutiveConfig, ConsecutiveSampler};
pub use fixed_length::{FixedLengthConfig, FixedLengthSampler};
pub use prioritized::{PrioritizedConfig, PrioritizedSampler};
pub use sum_tree::SumTree;

/// One sampled chunk with its importance-sampling weight, if any.
#[derive(Debug, Clone)]
pub struct SampledChunk {
    pub chunk: Chunk,
    pub weight: Option<f32>,
}

impl SampledChunk {
    pub fn new(chunk: Chunk) -> Self {
        Self { chunk, weight: None }
    }

    pub fn key(&self) -> ChunkKey {
        self.chunk.key()
    }
}

/// Which sampling policy a sampler implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    FixedLength,
    Consecutive,
    Prioritized,
}

impl std::fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplerKind::FixedLength => write!(f, "fixed_length"),
            SamplerKind::Consecutive => write!(f, "consecutive"),
            SamplerKind::Prioritized => write!(f, "prioritized"),
        }
    }
}

/// Sampling capability shared by all policies.
///
/// Samplers only read the store; they never mutate episodes.
pub trait Sampler: Send + Sync {
    /// Draw `batch_size` items.
    ///
    /// Returns `NotReady` on an empty store and `SampleExhausted` when the
    /// retry budget runs out.
    fn sample(&self, batch_size: usize) -> Result<Vec<SampledChunk>>;

    /// Feed back new priorities for previously sampled chunks.
    ///
    /// Returns the number of updates applied.
    fn update_priorities(&self, _keys: &[ChunkKey], _priorities: &[f32]) -> usize {
        0
    }

    /// Set the annealing progress in `[0, 1]`.
    fn anneal_beta(&self, _progress: f32) {}

    /// Chunks returned per requested item.
    fn chunks_per_item(&self) -> usize {
        1
    }

    fn kind(&self) -> SamplerKind;
}

/// Sampler selection and options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplerConfig {
    Fixed(FixedLengthConfig),
    Consecutive(ConsecutiveConfig),
    Prioritized(PrioritizedConfig),
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::Fixed(FixedLengthConfig::default())
    }
}

impl SamplerConfig {
    pub fn kind(&self) -> SamplerKind {
        match self {
            SamplerConfig::Fixed(_) => SamplerKind::FixedLength,
            SamplerConfig::Consecutive(_) => SamplerKind::Consecutive,
            SamplerConfig::Prioritized(_) => SamplerKind::Prioritized,
        }
    }

    /// Chunks each sampled item spans.
    pub fn chunks_per_item(&self) -> usize {
        match self {
            SamplerConfig::Consecutive(c) => c.count.max(1),
            _ => 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            SamplerConfig::Fixed(c) => c.validate(),
            SamplerConfig::Consecutive(c) => c.validate(),
            SamplerConfig::Prioritized(c) => c.validate(),
        }
    }

    /// Build the configured sampler over `store`.
    pub fn build(
        &self,
        store: Arc<EpisodeStore>,
        chunker: Chunker,
        seed: Option<u64>,
    ) -> Box<dyn Sampler> {
        match self {
            SamplerConfig::Fixed(c) => {
                Box::new(FixedLengthSampler::new(store, chunker, c.clone(), seed))
            }
            SamplerConfig::Consecutive(c) => {
                Box::new(ConsecutiveSampler::new(store, chunker, c.clone(), seed))
            }
            SamplerConfig::Prioritized(c) => {
                Box::new(PrioritizedSampler::new(store, chunker, c.clone(), seed))
            }
        }
    }
}

/// Seeded RNG, or one from OS entropy when no seed is configured.
pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Per-call RNG seeded from the sampler's shared one.
///
/// The shared lock is held only for the seed, so concurrent calls draw in
/// parallel. A fixed seed still yields a fixed sequence of calls.
pub(crate) fn fork_rng(shared: &Mutex<StdRng>) -> StdRng {
    let seed = shared.lock().gen::<u64>();
    StdRng::seed_from_u64(seed)
}
