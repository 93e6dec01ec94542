//! Episode store with checkpointing tied to its lifetime.
//!
//! `open` recovers the newest valid checkpoint before anything else touches
//! the store, `insert` triggers periodic saves, and `close` (or drop)
//! flushes a final checkpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffers::store::{EpisodeStore, InsertOutcome};
use crate::core::episode::Episode;
use crate::error::Result;
use crate::metrics::ReplayMetrics;

use super::checkpointer::{Checkpointer, CheckpointerConfig};
use super::worker::{save_if_changed, CheckpointWorker};

struct InlineState {
    checkpointer: Checkpointer,
    last_saved: Option<u64>,
    /// Zero disables time-based saves.
    interval: Duration,
    last_attempt: Instant,
}

impl InlineState {
    fn interval_elapsed(&self) -> bool {
        !self.interval.is_zero() && self.last_attempt.elapsed() >= self.interval
    }

    fn save(&mut self, store: &EpisodeStore) {
        save_if_changed(store, &mut self.checkpointer, &mut self.last_saved);
        self.last_attempt = Instant::now();
    }
}

enum Persistence {
    /// In-memory only.
    Disabled,
    /// Checkpoints run on the inserting thread.
    Inline(Mutex<InlineState>),
    /// Checkpoints run on a background worker.
    Background(Mutex<CheckpointWorker>),
}

/// An [`EpisodeStore`] that persists itself.
pub struct CheckpointedStore {
    store: Arc<EpisodeStore>,
    persistence: Persistence,
    save_every: usize,
    inserted: AtomicUsize,
}

impl CheckpointedStore {
    /// Open a store, restoring from `checkpoint` if a valid one exists.
    ///
    /// Unreadable checkpoints are logged and the store starts empty.
    pub fn open(
        capacity: usize,
        metrics: Arc<ReplayMetrics>,
        checkpoint: Option<CheckpointerConfig>,
        parallel: bool,
    ) -> Result<Self> {
        let store = Arc::new(EpisodeStore::with_metrics(capacity, metrics));
        let Some(config) = checkpoint else {
            return Ok(Self {
                store,
                persistence: Persistence::Disabled,
                save_every: 0,
                inserted: AtomicUsize::new(0),
            });
        };

        let save_every = config.save_every_episodes;
        let interval = config.save_interval;
        let mut checkpointer = Checkpointer::new(config)?;
        match checkpointer.load_latest() {
            Ok(Some(snapshot)) => {
                let adopted = snapshot.clone();
                match store.restore(snapshot) {
                    Ok(count) => {
                        checkpointer.adopt(&adopted);
                        log::info!("replay restored {} episodes", count);
                    }
                    Err(e) => log::warn!("replay checkpoint rejected, starting empty: {}", e),
                }
            }
            Ok(None) => log::info!("no replay checkpoint found, starting empty"),
            Err(e) => log::warn!("replay recovery failed, starting empty: {}", e),
        }

        // Ids of episodes from any lineage left on disk are never reused,
        // even when the checkpoint that held them could not be recovered.
        match checkpointer.highest_episode_id() {
            Ok(Some(id)) => store.id_source().advance_past(id),
            Ok(None) => {}
            Err(e) => log::warn!("could not scan checkpoint directory for episode ids: {}", e),
        }

        // What was just restored is already on disk.
        let last_saved = Some(store.generation());
        let persistence = if parallel {
            let worker = CheckpointWorker::spawn(Arc::clone(&store), checkpointer, last_saved)?;
            Persistence::Background(Mutex::new(worker))
        } else {
            Persistence::Inline(Mutex::new(InlineState {
                checkpointer,
                last_saved,
                interval,
                last_attempt: Instant::now(),
            }))
        };

        Ok(Self {
            store,
            persistence,
            save_every,
            inserted: AtomicUsize::new(0),
        })
    }

    /// Insert an episode and trigger a checkpoint every `save_every_episodes`.
    ///
    /// Inline mode also saves here once `save_interval` has passed since the
    /// last attempt; background mode keeps time on the worker.
    pub fn insert(&self, episode: Episode) -> Result<InsertOutcome> {
        let outcome = self.store.insert(episode)?;
        let inserted = self.inserted.fetch_add(1, Ordering::Relaxed) + 1;
        let by_count = self.save_every > 0 && inserted % self.save_every == 0;
        if by_count || self.inline_interval_elapsed() {
            self.checkpoint_now();
        }
        Ok(outcome)
    }

    fn inline_interval_elapsed(&self) -> bool {
        match &self.persistence {
            Persistence::Inline(state) => state.lock().interval_elapsed(),
            _ => false,
        }
    }

    /// Request a checkpoint of the current contents.
    ///
    /// Inline mode saves before returning; background mode only signals.
    pub fn checkpoint_now(&self) {
        match &self.persistence {
            Persistence::Disabled => {}
            Persistence::Inline(state) => state.lock().save(&self.store),
            Persistence::Background(worker) => {
                worker.lock().trigger();
            }
        }
    }

    /// Flush a final checkpoint and stop the worker. Idempotent.
    pub fn close(&self) {
        match &self.persistence {
            Persistence::Disabled => {}
            Persistence::Inline(_) => self.checkpoint_now(),
            Persistence::Background(worker) => worker.lock().stop(),
        }
    }

    pub fn store(&self) -> &Arc<EpisodeStore> {
        &self.store
    }

    pub fn is_persistent(&self) -> bool {
        !matches!(self.persistence, Persistence::Disabled)
    }
}

impl Drop for CheckpointedStore {
    fn drop(&mut self) {
        self.close();
    }
}
