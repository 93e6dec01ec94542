//! Core data types: typed arrays, step records, episodes and the writer-side
//! episode buffer.

pub mod array;
pub mod episode;
pub mod episode_buffer;
pub mod step;

pub use array::{Array, ArrayData, DType};
pub use episode::{Episode, EpisodeId, IdSource};
pub use episode_buffer::EpisodeBuffer;
pub use step::{FieldSpec, Schema, Step, BOUNDARY_FLAGS, IS_FIRST, IS_LAST, IS_TERMINAL};
