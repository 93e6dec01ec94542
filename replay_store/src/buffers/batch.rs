//! Training batches assembled from sampled chunks.

use std::collections::BTreeMap;

use crate::core::array::Array;
use crate::error::{ReplayError, Result};

use super::chunker::{Chunk, ChunkKey};

/// Batch of equal-length chunks with fields stacked as `[batch, time, ...]`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// One stacked array per step field.
    pub fields: BTreeMap<String, Array>,
    /// Chunk identity per batch row (for priority feedback).
    pub keys: Vec<ChunkKey>,
    /// Importance-sampling weights per row (prioritized sampling only).
    pub weights: Option<Vec<f32>>,
    /// Validity per `(row, t)`, flattened row-major; `false` marks padding.
    pub mask: Vec<bool>,
    batch_size: usize,
    length: usize,
}

impl Batch {
    /// Stack `chunks` into a batch.
    pub fn from_chunks(chunks: &[Chunk], weights: Option<Vec<f32>>) -> Result<Self> {
        let first = chunks
            .first()
            .ok_or_else(|| ReplayError::NotReady("no chunks to batch".into()))?;
        let length = first.len();
        if let Some(bad) = chunks.iter().find(|c| c.len() != length) {
            return Err(ReplayError::InvalidArray(format!(
                "chunk {} has length {}, expected {}",
                bad.key(),
                bad.len(),
                length
            )));
        }
        if let Some(w) = &weights {
            if w.len() != chunks.len() {
                return Err(ReplayError::InvalidArray(format!(
                    "{} weights for {} chunks",
                    w.len(),
                    chunks.len()
                )));
            }
        }

        let outer = [chunks.len(), length];
        let mut fields = BTreeMap::new();
        for name in first.step(0).fields().keys() {
            let mut parts = Vec::with_capacity(chunks.len() * length);
            for chunk in chunks {
                for step in chunk.steps() {
                    let value = step.get(name).ok_or_else(|| {
                        ReplayError::schema(name.as_str(), "field missing in batch row")
                    })?;
                    parts.push(value);
                }
            }
            fields.insert(name.clone(), Array::stack(&parts, &outer)?);
        }

        Ok(Self {
            fields,
            keys: chunks.iter().map(Chunk::key).collect(),
            weights,
            mask: chunks.iter().flat_map(Chunk::valid_mask).collect(),
            batch_size: chunks.len(),
            length,
        })
    }

    /// `(batch_size, chunk_length)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.batch_size, self.length)
    }

    pub fn len(&self) -> usize {
        self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.batch_size == 0
    }

    pub fn field(&self, name: &str) -> Option<&Array> {
        self.fields.get(name)
    }

    /// Number of real (non-padded) steps in the batch.
    pub fn n_valid(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }
}
