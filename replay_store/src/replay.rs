//! Producer and consumer interfaces over one replay instance.
//!
//! ```rust,ignore
//! let replay = Replay::open(config)?;
//!
//! // Actor side
//! let mut writer = replay.writer();
//! writer.append(step)?;
//! writer.end_episode()?;
//!
//! // Learner side
//! let batch = replay.sample(32)?;
//! replay.update_priorities(&batch.keys, &td_errors);
//!
//! replay.close();
//! ```

use std::sync::Arc;

use crate::buffers::batch::Batch;
use crate::buffers::chunker::{ChunkKey, ChunkMode, Chunker};
use crate::buffers::store::{EpisodeStore, InsertOutcome};
use crate::checkpoint::CheckpointedStore;
use crate::config::ReplayConfig;
use crate::core::episode::Episode;
use crate::core::episode_buffer::EpisodeBuffer;
use crate::core::step::Step;
use crate::error::{ReplayError, Result};
use crate::metrics::{replay_metrics, ReplayStats};
use crate::sampling::{SampledChunk, Sampler, SamplerKind};

/// A configured replay: checkpointed store plus sampler.
pub struct Replay {
    config: ReplayConfig,
    store: CheckpointedStore,
    sampler: Box<dyn Sampler>,
}

impl Replay {
    /// Validate `config`, recover any checkpoint, then build the sampler.
    pub fn open(config: ReplayConfig) -> Result<Self> {
        config.validate()?;
        let metrics = replay_metrics();

        // Restore must precede sampler construction: subscribing marks the
        // store as used.
        let store = CheckpointedStore::open(
            config.capacity,
            metrics,
            config.checkpoint.clone(),
            config.parallel,
        )?;

        let chunker = Chunker::new(config.chunk_length, ChunkMode::NonOverlapping, config.padding);
        let sampler = config
            .sampler
            .build(Arc::clone(store.store()), chunker, config.seed);

        log::info!(
            "replay opened: capacity {}, chunk length {}, {} sampler, {} episodes restored",
            config.capacity,
            config.chunk_length,
            sampler.kind(),
            store.store().len()
        );

        Ok(Self {
            config,
            store,
            sampler,
        })
    }

    /// New producer-side buffer sharing the store's id source and schema.
    pub fn writer(&self) -> ReplayWriter<'_> {
        let ids = self.store.store().id_source().clone();
        let buffer = match self.store.store().schema() {
            Some(schema) => EpisodeBuffer::with_schema(ids, schema),
            None => EpisodeBuffer::new(ids),
        };
        ReplayWriter {
            replay: self,
            buffer,
        }
    }

    /// Insert a finished episode directly.
    pub fn insert(&self, episode: Episode) -> Result<InsertOutcome> {
        self.store.insert(episode)
    }

    /// Sample a training batch stacked as `[batch, time, ...]`.
    ///
    /// Consecutive sampling yields `batch_size * count` rows. A zero
    /// `batch_size` is rejected as `InvalidConfig`.
    pub fn sample(&self, batch_size: usize) -> Result<Batch> {
        let items = self.sample_chunks(batch_size)?;
        let weights: Option<Vec<f32>> = items.iter().map(|s| s.weight).collect();
        let chunks: Vec<_> = items.into_iter().map(|s| s.chunk).collect();
        Batch::from_chunks(&chunks, weights)
    }

    /// Sample without stacking.
    pub fn sample_chunks(&self, batch_size: usize) -> Result<Vec<SampledChunk>> {
        if batch_size == 0 {
            return Err(ReplayError::InvalidConfig("batch_size must be positive".into()));
        }
        self.sampler.sample(batch_size)
    }

    /// Forward learner feedback to the sampler. Returns updates applied.
    pub fn update_priorities(&self, keys: &[ChunkKey], priorities: &[f32]) -> usize {
        self.sampler.update_priorities(keys, priorities)
    }

    /// Anneal the importance-sampling exponent (prioritized sampling only).
    pub fn anneal_beta(&self, progress: f32) {
        self.sampler.anneal_beta(progress);
    }

    pub fn sampler_kind(&self) -> SamplerKind {
        self.sampler.kind()
    }

    pub fn store(&self) -> &EpisodeStore {
        self.store.store()
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn stats(&self) -> ReplayStats {
        self.store.store().stats()
    }

    /// Request a checkpoint now.
    pub fn checkpoint(&self) {
        self.store.checkpoint_now();
    }

    /// Flush a final checkpoint and stop background work.
    pub fn close(&self) {
        self.store.close();
    }
}

/// Producer half: accumulates steps and commits whole episodes.
pub struct ReplayWriter<'a> {
    replay: &'a Replay,
    buffer: EpisodeBuffer,
}

impl ReplayWriter<'_> {
    pub fn append(&mut self, step: Step) -> Result<()> {
        self.buffer.append(step)
    }

    /// Finalize the current episode and insert it into the store.
    pub fn end_episode(&mut self) -> Result<InsertOutcome> {
        let episode = self.buffer.finalize()?;
        self.replay.store.insert(episode)
    }

    /// Discard the steps of the current episode.
    pub fn discard(&mut self) {
        self.buffer.clear();
    }

    /// Steps buffered for the current episode.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
