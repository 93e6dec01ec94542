//! Finalized, immutable episodes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::step::{Schema, Step};
use crate::error::{ReplayError, Result};

/// Episode identifier. Monotonically increasing within one id source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpisodeId(pub u64);

impl std::fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared generator of episode ids.
///
/// Cloning shares the counter, so several writers never hand out the same id.
#[derive(Debug, Clone, Default)]
pub struct IdSource {
    next: Arc<AtomicU64>,
}

impl IdSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> EpisodeId {
        EpisodeId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Ensure future ids are strictly greater than `id`.
    pub fn advance_past(&self, id: EpisodeId) {
        self.next.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }

    /// The id the next call to [`next_id`](Self::next_id) would return.
    pub fn peek(&self) -> EpisodeId {
        EpisodeId(self.next.load(Ordering::Relaxed))
    }
}

/// A complete episode. Steps are shared, never copied.
#[derive(Debug, Clone)]
pub struct Episode {
    id: EpisodeId,
    steps: Arc<[Step]>,
}

impl Episode {
    /// Build an episode, checking boundary flags.
    ///
    /// Requires at least one step, `is_first` on step 0 and `is_last` on the
    /// final step only.
    pub fn new(id: EpisodeId, steps: Vec<Step>) -> Result<Self> {
        let last = steps.len().checked_sub(1).ok_or(ReplayError::EmptyEpisode)?;
        if !steps[0].is_first() {
            return Err(ReplayError::MissingTerminalFlag(format!(
                "episode {} does not start with is_first",
                id
            )));
        }
        if !steps[last].is_last() {
            return Err(ReplayError::MissingTerminalFlag(format!(
                "episode {} does not end with is_last",
                id
            )));
        }
        if let Some(i) = steps[..last].iter().position(Step::is_last) {
            return Err(ReplayError::MissingTerminalFlag(format!(
                "episode {} has is_last at step {} of {}",
                id,
                i,
                steps.len()
            )));
        }
        let schema = steps[0].schema();
        for step in &steps[1..] {
            schema.check(step)?;
        }
        Ok(Self {
            id,
            steps: steps.into(),
        })
    }

    pub fn id(&self) -> EpisodeId {
        self.id
    }

    /// Number of steps (transitions).
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a constructed episode.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn last_step(&self) -> &Step {
        &self.steps[self.steps.len() - 1]
    }

    pub fn schema(&self) -> Schema {
        self.steps[0].schema()
    }

    /// Whether the episode ended in an absorbing state.
    pub fn is_terminal(&self) -> bool {
        self.last_step().is_terminal()
    }
}
