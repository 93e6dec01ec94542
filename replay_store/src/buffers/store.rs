//! Capacity-bounded episode store.
//!
//! Key characteristics:
//! - Capacity counts transitions (steps), not episodes
//! - Whole episodes are evicted oldest-first until a new one fits
//! - One writer, many readers: the index sits behind a `RwLock` and every
//!   critical section is bounded by index work; payloads are `Arc`-shared
//! - Observers (the prioritized sampler) are told about inserts and
//!   evictions inside the same critical section

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rand::Rng;

use crate::core::episode::{Episode, EpisodeId, IdSource};
use crate::core::step::Schema;
use crate::error::{ReplayError, Result};
use crate::metrics::{ReplayMetrics, ReplayStats};

/// Receives store mutations synchronously, under the store's write lock.
///
/// Implementations must not call back into the store's mutating methods.
pub trait StoreObserver: Send + Sync {
    /// Called once on subscription with the current contents, oldest first.
    fn on_attach(&self, episodes: &[Arc<Episode>]);

    /// Called after `inserted` was added and `evicted` removed.
    fn on_insert(&self, inserted: &Arc<Episode>, evicted: &[Arc<Episode>]);
}

/// Result of a successful insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Id of the inserted episode.
    pub id: EpisodeId,
    /// Evicted episodes, oldest first.
    pub evicted: Vec<EpisodeId>,
    /// Transitions stored after the insert.
    pub running_total: usize,
}

/// Point-in-time copy of the store's contents and metadata.
///
/// Cloning an episode is an `Arc` clone, so taking a snapshot copies no payload.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub capacity: usize,
    pub schema: Option<Schema>,
    /// Episodes in insertion order, oldest first.
    pub episodes: Vec<Arc<Episode>>,
    pub running_total: usize,
    /// Mutation counter at snapshot time.
    pub generation: u64,
}

impl StoreSnapshot {
    pub fn episode_ids(&self) -> Vec<EpisodeId> {
        self.episodes.iter().map(|e| e.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

struct Entry {
    episode: Arc<Episode>,
    /// Cumulative transition count before this episode (for weighted picks).
    start: u64,
}

#[derive(Default)]
struct StoreIndex {
    /// Insertion order, oldest at the front.
    entries: VecDeque<Entry>,
    by_id: HashMap<EpisodeId, Arc<Episode>>,
    total: usize,
    schema: Option<Schema>,
    next_start: u64,
    generation: u64,
    /// Set by the first mutation or subscription; forbids `restore`.
    used: bool,
    observers: Vec<Weak<dyn StoreObserver>>,
}

impl StoreIndex {
    fn push(&mut self, episode: Arc<Episode>) {
        let len = episode.len();
        self.by_id.insert(episode.id(), Arc::clone(&episode));
        self.entries.push_back(Entry {
            episode,
            start: self.next_start,
        });
        self.next_start += len as u64;
        self.total += len;
    }

    fn pop_oldest(&mut self) -> Option<Arc<Episode>> {
        let entry = self.entries.pop_front()?;
        self.by_id.remove(&entry.episode.id());
        self.total -= entry.episode.len();
        Some(entry.episode)
    }

    fn live_observers(&mut self) -> Vec<Arc<dyn StoreObserver>> {
        self.observers.retain(|o| o.strong_count() > 0);
        self.observers.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Thread-safe replay store of completed episodes.
pub struct EpisodeStore {
    capacity: usize,
    index: RwLock<StoreIndex>,
    ids: IdSource,
    metrics: Arc<ReplayMetrics>,
}

impl EpisodeStore {
    /// Create an empty store holding at most `capacity` transitions.
    pub fn new(capacity: usize) -> Self {
        Self::with_metrics(capacity, Arc::new(ReplayMetrics::new()))
    }

    pub fn with_metrics(capacity: usize, metrics: Arc<ReplayMetrics>) -> Self {
        Self {
            capacity,
            index: RwLock::new(StoreIndex::default()),
            ids: IdSource::new(),
            metrics,
        }
    }

    /// Add a completed episode, evicting the oldest ones until it fits.
    pub fn insert(&self, episode: Episode) -> Result<InsertOutcome> {
        let len = episode.len();
        if len > self.capacity {
            return Err(ReplayError::CapacityTooSmall {
                required: len,
                capacity: self.capacity,
            });
        }

        let episode = Arc::new(episode);
        let mut index = self.index.write();

        match &index.schema {
            Some(schema) => schema.check_schema(&episode.schema())?,
            None => index.schema = Some(episode.schema()),
        }
        if index.by_id.contains_key(&episode.id()) {
            return Err(ReplayError::InvalidConfig(format!(
                "episode {} inserted twice",
                episode.id()
            )));
        }

        let mut evicted = Vec::new();
        while index.total + len > self.capacity {
            match index.pop_oldest() {
                Some(old) => evicted.push(old),
                None => break,
            }
        }

        index.push(Arc::clone(&episode));
        index.generation += 1;
        index.used = true;
        self.ids.advance_past(episode.id());

        for observer in index.live_observers() {
            observer.on_insert(&episode, &evicted);
        }

        let running_total = index.total;
        drop(index);

        self.metrics.record_insert(len);
        self.metrics.record_evictions(evicted.len());
        if !evicted.is_empty() {
            log::debug!(
                "evicted {} episode(s) to fit {} ({} / {} transitions)",
                evicted.len(),
                episode.id(),
                running_total,
                self.capacity
            );
        }

        Ok(InsertOutcome {
            id: episode.id(),
            evicted: evicted.iter().map(|e| e.id()).collect(),
            running_total,
        })
    }

    /// Look up an episode. `NotFound` is benign (it may have been evicted).
    pub fn get(&self, id: EpisodeId) -> Result<Arc<Episode>> {
        self.index
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(ReplayError::NotFound(id))
    }

    pub fn contains(&self, id: EpisodeId) -> bool {
        self.index.read().by_id.contains_key(&id)
    }

    /// Pick a stored episode at random.
    ///
    /// With `by_length`, the pick is proportional to episode length, so every
    /// stored step is equally likely. Returns `None` when the store is empty.
    pub fn random_episode<R: Rng>(&self, rng: &mut R, by_length: bool) -> Option<Arc<Episode>> {
        let index = self.index.read();
        let front = index.entries.front()?;
        let slot = if by_length {
            let target = front.start + rng.gen_range(0..index.total as u64);
            index.entries.partition_point(|e| e.start <= target) - 1
        } else {
            rng.gen_range(0..index.entries.len())
        };
        Some(Arc::clone(&index.entries[slot].episode))
    }

    /// Consistent view of all episodes and metadata.
    pub fn snapshot_for_checkpoint(&self) -> StoreSnapshot {
        let index = self.index.read();
        StoreSnapshot {
            capacity: self.capacity,
            schema: index.schema.clone(),
            episodes: index.entries.iter().map(|e| Arc::clone(&e.episode)).collect(),
            running_total: index.total,
            generation: index.generation,
        }
    }

    /// Replace the contents wholesale. Only valid on a fresh store.
    ///
    /// Snapshots taken from a larger store are trimmed oldest-first.
    pub fn restore(&self, snapshot: StoreSnapshot) -> Result<usize> {
        let mut index = self.index.write();
        if index.used {
            return Err(ReplayError::RestoreAfterUse);
        }

        let mut schema = snapshot.schema;
        let mut restored = StoreIndex::default();
        for episode in snapshot.episodes {
            let episode_schema = episode.schema();
            match &schema {
                Some(s) => s.check_schema(&episode_schema)?,
                None => schema = Some(episode_schema),
            }
            if restored.by_id.contains_key(&episode.id()) {
                log::warn!("skipping duplicate episode {} in snapshot", episode.id());
                continue;
            }
            self.ids.advance_past(episode.id());
            restored.push(episode);
        }

        let mut trimmed = 0;
        while restored.total > self.capacity {
            restored.pop_oldest();
            trimmed += 1;
        }
        if trimmed > 0 {
            log::warn!(
                "restored snapshot exceeded capacity {}; dropped {} oldest episode(s)",
                self.capacity,
                trimmed
            );
        }

        restored.schema = schema;
        restored.generation = snapshot.generation;
        restored.used = true;
        let count = restored.entries.len();
        *index = restored;
        drop(index);

        self.metrics.record_restore(count);
        Ok(count)
    }

    /// Register an observer and hand it the current contents atomically.
    ///
    /// The store keeps only a weak reference.
    pub fn subscribe(&self, observer: Arc<dyn StoreObserver>) {
        let mut index = self.index.write();
        let current: Vec<_> = index.entries.iter().map(|e| Arc::clone(&e.episode)).collect();
        observer.on_attach(&current);
        index.observers.push(Arc::downgrade(&observer));
        index.used = true;
    }

    /// Transitions currently stored.
    pub fn num_transitions(&self) -> usize {
        self.index.read().total
    }

    /// Episodes currently stored.
    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn schema(&self) -> Option<Schema> {
        self.index.read().schema.clone()
    }

    /// Ids in insertion order, oldest first.
    pub fn episode_ids(&self) -> Vec<EpisodeId> {
        self.index.read().entries.iter().map(|e| e.episode.id()).collect()
    }

    /// Mutation counter; changes on every insert and restore.
    pub fn generation(&self) -> u64 {
        self.index.read().generation
    }

    /// Id generator whose ids never collide with stored episodes.
    pub fn id_source(&self) -> &IdSource {
        &self.ids
    }

    pub fn metrics(&self) -> &Arc<ReplayMetrics> {
        &self.metrics
    }

    /// Counters plus current occupancy.
    pub fn stats(&self) -> ReplayStats {
        let (episodes, transitions) = {
            let index = self.index.read();
            (index.entries.len(), index.total)
        };
        self.metrics.snapshot(episodes, transitions, self.capacity)
    }
}
