//! In-progress episode owned by a single writer.
//!
//! Steps accumulate until `finalize`, which checks the boundary flags and
//! hands the sequence over as an immutable [`Episode`]. The buffer keeps its
//! schema and id source and is reused for the next episode.

use super::episode::{Episode, IdSource};
use super::step::{Schema, Step, IS_FIRST};
use crate::error::{ReplayError, Result};

/// Append-only step buffer for one episode at a time.
#[derive(Debug)]
pub struct EpisodeBuffer {
    steps: Vec<Step>,
    /// Established by the first step ever appended.
    schema: Option<Schema>,
    ids: IdSource,
}

impl EpisodeBuffer {
    /// Create a buffer drawing ids from `ids`.
    pub fn new(ids: IdSource) -> Self {
        Self {
            steps: Vec::new(),
            schema: None,
            ids,
        }
    }

    /// Create a buffer whose schema is already fixed (e.g. from a restored store).
    pub fn with_schema(ids: IdSource, schema: Schema) -> Self {
        Self {
            steps: Vec::new(),
            schema: Some(schema),
            ids,
        }
    }

    /// Append one step.
    ///
    /// Missing boundary flags are filled with `false`, and the first step of
    /// an episode is always marked `is_first`.
    pub fn append(&mut self, mut step: Step) -> Result<()> {
        if self.steps.last().is_some_and(Step::is_last) {
            return Err(ReplayError::MissingTerminalFlag(
                "step appended after is_last; call finalize first".into(),
            ));
        }

        step.normalize_flags()?;
        if self.steps.is_empty() {
            step = step.with_flag(IS_FIRST, true);
        } else if step.is_first() {
            return Err(ReplayError::MissingTerminalFlag(format!(
                "is_first at step {} before the previous episode ended",
                self.steps.len()
            )));
        }

        match &self.schema {
            Some(schema) => schema.check(&step)?,
            None => self.schema = Some(step.schema()),
        }

        self.steps.push(step);
        Ok(())
    }

    /// Close the episode and take ownership of its steps.
    ///
    /// On error the steps stay in the buffer.
    pub fn finalize(&mut self) -> Result<Episode> {
        match self.steps.last() {
            None => return Err(ReplayError::EmptyEpisode),
            Some(last) if !last.is_last() => {
                return Err(ReplayError::MissingTerminalFlag(format!(
                    "last of {} steps does not carry is_last",
                    self.steps.len()
                )))
            }
            Some(_) => {}
        }

        let steps = std::mem::take(&mut self.steps);
        Episode::new(self.ids.next_id(), steps)
    }

    /// Drop any in-progress steps. The schema is kept.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn id_source(&self) -> &IdSource {
        &self.ids
    }
}
