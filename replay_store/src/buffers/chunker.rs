//! Fixed-length windows over stored episodes.
//!
//! A [`Chunk`] is a view: it holds the episode by `Arc` and borrows its steps.
//! Only zero-fill padding builds a step of its own, once per chunk.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::episode::{Episode, EpisodeId};
use crate::core::step::Step;
use crate::error::{ReplayError, Result};

/// Identity of a chunk: episode plus starting step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub episode: EpisodeId,
    pub offset: usize,
}

impl ChunkKey {
    pub fn new(episode: EpisodeId, offset: usize) -> Self {
        Self { episode, offset }
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.episode, self.offset)
    }
}

/// What to do with a window that runs past the end of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingPolicy {
    /// Discard short windows (no synthetic data).
    #[default]
    Drop,
    /// Repeat the episode's final step.
    RepeatLast,
    /// Fill with a zeroed step of the same schema.
    ZeroFill,
}

impl PaddingPolicy {
    pub fn pads(self) -> bool {
        !matches!(self, PaddingPolicy::Drop)
    }
}

/// Offset layout of the windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    /// Offsets `0, L, 2L, ...`.
    #[default]
    NonOverlapping,
    /// Every offset `0..=len-L`.
    Sliding,
}

/// A fixed-length slice of one episode.
#[derive(Debug, Clone)]
pub struct Chunk {
    key: ChunkKey,
    episode: Arc<Episode>,
    length: usize,
    valid: usize,
    padding: PaddingPolicy,
    zero: Option<Step>,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    pub fn episode(&self) -> &Arc<Episode> {
        &self.episode
    }

    pub fn offset(&self) -> usize {
        self.key.offset
    }

    /// Length including padding.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of real (non-padded) steps.
    pub fn n_valid(&self) -> usize {
        self.valid
    }

    pub fn is_padded(&self) -> bool {
        self.valid < self.length
    }

    pub fn padding(&self) -> PaddingPolicy {
        self.padding
    }

    /// `true` for real steps, `false` for padding.
    pub fn valid_mask(&self) -> Vec<bool> {
        let mut mask = vec![true; self.valid];
        mask.resize(self.length, false);
        mask
    }

    /// Step `index` of the window (`index < len()`).
    pub fn step(&self, index: usize) -> &Step {
        debug_assert!(index < self.length, "chunk index {} >= {}", index, self.length);
        if index < self.valid {
            return &self.episode.steps()[self.key.offset + index];
        }
        match &self.zero {
            Some(zero) => zero,
            None => self.episode.last_step(),
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> + '_ {
        (0..self.length).map(move |i| self.step(i))
    }
}

/// Carves episodes into windows of a fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    length: usize,
    mode: ChunkMode,
    padding: PaddingPolicy,
}

impl Chunker {
    pub fn new(length: usize, mode: ChunkMode, padding: PaddingPolicy) -> Self {
        assert!(length > 0, "chunk length must be positive");
        Self {
            length,
            mode,
            padding,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn mode(&self) -> ChunkMode {
        self.mode
    }

    pub fn padding(&self) -> PaddingPolicy {
        self.padding
    }

    /// Same length and padding, different mode.
    pub fn with_mode(self, mode: ChunkMode) -> Self {
        Self { mode, ..self }
    }

    fn stride(&self) -> usize {
        match self.mode {
            ChunkMode::NonOverlapping => self.length,
            ChunkMode::Sliding => 1,
        }
    }

    /// Number of windows an episode of `episode_len` steps yields.
    pub fn num_chunks(&self, episode_len: usize) -> usize {
        if episode_len == 0 {
            return 0;
        }
        if episode_len < self.length {
            return usize::from(self.padding.pads());
        }
        match (self.mode, self.padding.pads()) {
            (ChunkMode::NonOverlapping, false) => episode_len / self.length,
            (ChunkMode::NonOverlapping, true) => episode_len.div_ceil(self.length),
            (ChunkMode::Sliding, _) => episode_len - self.length + 1,
        }
    }

    /// Window start offsets for an episode of `episode_len` steps.
    pub fn offsets(&self, episode_len: usize) -> impl Iterator<Item = usize> {
        let stride = self.stride();
        (0..self.num_chunks(episode_len)).map(move |i| i * stride)
    }

    /// Build the window starting at `offset`.
    pub fn chunk_at(&self, episode: &Arc<Episode>, offset: usize) -> Result<Chunk> {
        let len = episode.len();
        let too_short = ReplayError::EpisodeTooShort {
            episode_len: len,
            required: offset.saturating_add(self.length),
        };
        if offset >= len {
            return Err(too_short);
        }

        let valid = self.length.min(len - offset);
        if valid < self.length && !self.padding.pads() {
            return Err(too_short);
        }

        let zero = (valid < self.length && self.padding == PaddingPolicy::ZeroFill)
            .then(|| episode.last_step().zeros_like());

        Ok(Chunk {
            key: ChunkKey::new(episode.id(), offset),
            episode: Arc::clone(episode),
            length: self.length,
            valid,
            padding: self.padding,
            zero,
        })
    }

    /// Lazily yield every `(offset, chunk)` of an episode.
    pub fn chunks_of(&self, episode: &Arc<Episode>) -> Result<ChunkIter> {
        if self.length > episode.len() && !self.padding.pads() {
            return Err(ReplayError::EpisodeTooShort {
                episode_len: episode.len(),
                required: self.length,
            });
        }
        Ok(ChunkIter {
            chunker: *self,
            episode: Arc::clone(episode),
            index: 0,
            count: self.num_chunks(episode.len()),
        })
    }
}

/// Iterator returned by [`Chunker::chunks_of`].
pub struct ChunkIter {
    chunker: Chunker,
    episode: Arc<Episode>,
    index: usize,
    count: usize,
}

impl Iterator for ChunkIter {
    type Item = (usize, Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let offset = self.index * self.chunker.stride();
        self.index += 1;
        // Offsets come from num_chunks, so chunk_at cannot fail here.
        self.chunker
            .chunk_at(&self.episode, offset)
            .ok()
            .map(|chunk| (offset, chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}
