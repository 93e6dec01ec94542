//! Episode storage and the chunk views served to learners.
//!
//! - `EpisodeStore`: capacity-bounded store of finished episodes, evicting
//!   the oldest first
//! - `Chunker`: fixed-length windows over stored episodes
//! - `Batch`: chunks stacked into `[batch, time, ...]` arrays

pub mod batch;
pub mod chunker;
pub mod store;

pub use batch::Batch;
pub use chunker::{Chunk, ChunkIter, ChunkKey, ChunkMode, Chunker, PaddingPolicy};
pub use store::{EpisodeStore, InsertOutcome, StoreObserver, StoreSnapshot};
