//! Prioritized chunk sampling.
//!
//! Chunks are drawn proportionally to `priority^alpha`, where priorities come
//! from learner feedback (e.g. TD error magnitude). New chunks enter with the
//! largest priority seen so far, so they are sampled at least once soon.
//!
//! # Importance Sampling
//!
//! Non-uniform sampling biases the learner, so each sample carries a weight:
//!
//! ```text
//! w_i = (1 / (N * P(i)))^β
//! ```
//!
//! Where:
//! - N is the number of indexed chunks
//! - P(i) is the probability of sampling chunk i
//! - β controls the amount of correction (0 = none, 1 = full)
//!
//! Weights are normalized by the batch maximum, so they lie in (0, 1].
//!
//! # Index consistency
//!
//! The index is a [`StoreObserver`]: the store updates it inside its own
//! write lock, so keys of evicted episodes are gone before any reader can see
//! the eviction. Lock order is store, then priority index.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::buffers::chunker::{ChunkKey, ChunkMode, Chunker};
use crate::buffers::store::{EpisodeStore, StoreObserver};
use crate::core::episode::Episode;
use crate::error::{ReplayError, Result};

use super::sum_tree::SumTree;
use super::{fork_rng, make_rng, SampledChunk, Sampler, SamplerKind};

/// Options for [`PrioritizedSampler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritizedConfig {
    /// Priority exponent (alpha).
    /// 0 = uniform sampling, 1 = fully prioritized.
    pub alpha: f32,
    /// Importance sampling exponent (beta) at the start of training.
    pub beta: f32,
    /// Beta reached when annealing completes.
    pub beta_final: f32,
    /// Added to |priority| so no chunk starves.
    pub epsilon: f32,
    /// Redraws allowed per batch for chunks whose episode was evicted.
    pub max_retries: usize,
}

impl Default for PrioritizedConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.4,
            beta_final: 1.0,
            epsilon: 1e-6,
            max_retries: 64,
        }
    }
}

impl PrioritizedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority exponent (alpha).
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the importance sampling exponent (beta).
    pub fn with_beta(mut self, beta: f32) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_beta_final(mut self, beta_final: f32) -> Self {
        self.beta_final = beta_final;
        self
    }

    /// Set epsilon for numerical stability.
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return Err(ReplayError::InvalidConfig(format!(
                "alpha must be >= 0, got {}",
                self.alpha
            )));
        }
        for (name, value) in [("beta", self.beta), ("beta_final", self.beta_final)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReplayError::InvalidConfig(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(self.epsilon >= 0.0 && self.epsilon.is_finite()) {
            return Err(ReplayError::InvalidConfig(format!(
                "epsilon must be >= 0, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Sum-tree index over chunk keys.
struct PriorityIndex {
    tree: SumTree,
    slots: HashMap<ChunkKey, usize>,
    keys: Vec<Option<ChunkKey>>,
    free: Vec<usize>,
    /// Largest raw priority seen (before the alpha exponent).
    max_priority: f64,
}

impl PriorityIndex {
    fn new() -> Self {
        Self {
            tree: SumTree::new(1024),
            slots: HashMap::new(),
            keys: Vec::new(),
            free: Vec::new(),
            max_priority: 1.0,
        }
    }

    fn insert(&mut self, key: ChunkKey, value: f64) {
        if let Some(&slot) = self.slots.get(&key) {
            self.tree.update(slot, value);
            return;
        }
        let slot = match self.free.pop() {
            Some(slot) => {
                self.keys[slot] = Some(key);
                slot
            }
            None => {
                self.keys.push(Some(key));
                self.keys.len() - 1
            }
        };
        self.slots.insert(key, slot);
        self.tree.update(slot, value);
    }

    fn remove(&mut self, key: &ChunkKey) {
        if let Some(slot) = self.slots.remove(key) {
            self.tree.update(slot, 0.0);
            self.keys[slot] = None;
            self.free.push(slot);
        }
    }
}

/// Store observer that keeps the priority index in step with the store.
struct PriorityTable {
    index: RwLock<PriorityIndex>,
    /// Non-overlapping chunker that defines the indexed keys.
    chunker: Chunker,
    alpha: f64,
}

impl PriorityTable {
    fn keys_of(&self, episode: &Episode) -> impl Iterator<Item = ChunkKey> {
        let id = episode.id();
        self.chunker
            .offsets(episode.len())
            .map(move |offset| ChunkKey::new(id, offset))
    }

    fn add_episode(&self, index: &mut PriorityIndex, episode: &Episode) {
        let value = index.max_priority.powf(self.alpha);
        for key in self.keys_of(episode) {
            index.insert(key, value);
        }
    }
}

impl StoreObserver for PriorityTable {
    fn on_attach(&self, episodes: &[Arc<Episode>]) {
        let mut index = self.index.write();
        for episode in episodes {
            self.add_episode(&mut index, episode);
        }
    }

    fn on_insert(&self, inserted: &Arc<Episode>, evicted: &[Arc<Episode>]) {
        let mut index = self.index.write();
        for episode in evicted {
            for key in self.keys_of(episode) {
                index.remove(&key);
            }
        }
        self.add_episode(&mut index, inserted);
    }
}

/// Prioritized sampler backed by a sum tree.
///
/// The sum tree allows O(log N) sampling and priority updates.
pub struct PrioritizedSampler {
    store: Arc<EpisodeStore>,
    table: Arc<PriorityTable>,
    config: PrioritizedConfig,
    /// Current beta value (can be annealed).
    current_beta: Mutex<f32>,
    rng: Mutex<StdRng>,
}

impl PrioritizedSampler {
    /// Create a sampler and attach its index to `store`.
    pub fn new(
        store: Arc<EpisodeStore>,
        chunker: Chunker,
        config: PrioritizedConfig,
        seed: Option<u64>,
    ) -> Self {
        let table = Arc::new(PriorityTable {
            index: RwLock::new(PriorityIndex::new()),
            chunker: chunker.with_mode(ChunkMode::NonOverlapping),
            alpha: f64::from(config.alpha),
        });
        store.subscribe(Arc::clone(&table) as Arc<dyn StoreObserver>);

        Self {
            store,
            table,
            current_beta: Mutex::new(config.beta),
            config,
            rng: Mutex::new(make_rng(seed)),
        }
    }

    /// Get current beta value.
    pub fn beta(&self) -> f32 {
        *self.current_beta.lock()
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.table.index.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest priority seen so far; new chunks enter with it.
    pub fn max_priority(&self) -> f32 {
        self.table.index.read().max_priority as f32
    }

    /// Stored priority of `key`, after the alpha exponent.
    pub fn priority(&self, key: &ChunkKey) -> Result<f32> {
        let index = self.table.index.read();
        index
            .slots
            .get(key)
            .map(|&slot| index.tree.leaf(slot) as f32)
            .ok_or(ReplayError::UnknownChunkKey(*key))
    }

    pub fn config(&self) -> &PrioritizedConfig {
        &self.config
    }

    /// Stratified draw of `count` keys with their probability; `None` if the
    /// index is empty.
    fn draw(&self, rng: &mut StdRng, count: usize) -> Option<(Vec<(ChunkKey, f64)>, usize)> {
        let index = self.table.index.read();
        let total = index.tree.total();
        if index.slots.is_empty() || total <= 0.0 {
            return None;
        }

        let segment_size = total / count as f64;
        let mut picks = Vec::with_capacity(count);
        for i in 0..count {
            let low = segment_size * i as f64;
            let high = (segment_size * (i + 1) as f64).min(total);
            let value = if low < high {
                rng.gen_range(low..high)
            } else {
                low
            };
            let (slot, priority) = index.tree.get(value);
            if let Some(Some(key)) = index.keys.get(slot) {
                picks.push((*key, priority / total));
            }
        }
        Some((picks, index.slots.len()))
    }
}

impl Sampler for PrioritizedSampler {
    fn sample(&self, batch_size: usize) -> Result<Vec<SampledChunk>> {
        if self.store.is_empty() {
            self.store.metrics().record_sample_failure();
            return Err(ReplayError::NotReady("store is empty".into()));
        }

        let beta = f64::from(self.beta());
        let mut rng = fork_rng(&self.rng);
        let mut out = Vec::with_capacity(batch_size);
        let mut raw_weights = Vec::with_capacity(batch_size);
        let mut retries = 0;

        while out.len() < batch_size {
            let wanted = batch_size - out.len();
            let Some((picks, n)) = self.draw(&mut rng, wanted) else {
                self.store.metrics().record_sample_failure();
                return Err(ReplayError::SampleExhausted { attempts: retries });
            };

            retries += wanted - picks.len();

            // Priority lock is released; episodes may vanish before `get`.
            for (key, prob) in picks {
                let chunk = self
                    .store
                    .get(key.episode)
                    .and_then(|episode| self.table.chunker.chunk_at(&episode, key.offset));
                match chunk {
                    Ok(chunk) => {
                        out.push(SampledChunk::new(chunk));
                        raw_weights.push((n as f64 * prob).powf(-beta));
                    }
                    Err(e) => {
                        log::debug!("prioritized pick {} skipped: {}", key, e);
                        retries += 1;
                    }
                }
            }
            if retries > self.config.max_retries && out.len() < batch_size {
                self.store.metrics().record_sample_failure();
                return Err(ReplayError::SampleExhausted { attempts: retries });
            }
        }

        let max_weight = raw_weights.iter().cloned().fold(0.0_f64, f64::max);
        for (item, w) in out.iter_mut().zip(raw_weights) {
            let weight = if max_weight > 0.0 && max_weight.is_finite() {
                w / max_weight
            } else {
                1.0
            };
            item.weight = Some(weight as f32);
        }
        self.store.metrics().record_sampled(out.len());
        Ok(out)
    }

    fn update_priorities(&self, keys: &[ChunkKey], priorities: &[f32]) -> usize {
        let epsilon = f64::from(self.config.epsilon);
        let mut applied = 0;
        let mut dropped = keys.len().abs_diff(priorities.len());

        let mut index = self.table.index.write();
        for (key, &priority) in keys.iter().zip(priorities) {
            let Some(&slot) = index.slots.get(key) else {
                log::debug!("priority update for unknown chunk {}", key);
                dropped += 1;
                continue;
            };
            if !priority.is_finite() {
                log::debug!("non-finite priority {} for chunk {}", priority, key);
                dropped += 1;
                continue;
            }
            let p = f64::from(priority).abs() + epsilon;
            index.tree.update(slot, p.powf(self.table.alpha));
            index.max_priority = index.max_priority.max(p);
            applied += 1;
        }
        drop(index);

        self.store.metrics().record_priority_updates(applied, dropped);
        applied
    }

    /// Linear interpolation from initial beta to `beta_final`.
    fn anneal_beta(&self, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        *self.current_beta.lock() =
            self.config.beta + (self.config.beta_final - self.config.beta) * progress;
    }

    fn kind(&self) -> SamplerKind {
        SamplerKind::Prioritized
    }
}
