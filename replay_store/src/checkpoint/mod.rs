//! Replay checkpointing module.
//!
//! Persists the store so a restarted process resumes with the same contents.
//!
//! ## Features
//!
//! - Atomic commit: staged manifest renamed into place
//! - Incremental saves: each immutable episode is written once
//! - Automatic cleanup of old checkpoints and unreferenced episode files
//! - Recovery from the newest checkpoint that fully decodes
//! - Background or inline saving, tied to the store's lifetime
//!
//! ## Example
//!
//! ```rust,ignore
//! use replay_store::checkpoint::{CheckpointedStore, CheckpointerConfig};
//!
//! let config = CheckpointerConfig::new("./replay_ckpts")
//!     .with_save_every_episodes(500)
//!     .with_keep_last_n(3);
//!
//! let store = CheckpointedStore::open(1_000_000, metrics, Some(config), true)?;
//!
//! // In the actor loop:
//! store.insert(episode)?;
//!
//! // On shutdown (also runs on drop):
//! store.close();
//! ```

pub mod checkpointed_store;
pub mod checkpointer;
pub mod worker;

pub use checkpointed_store::CheckpointedStore;
pub use checkpointer::{CheckpointError, CheckpointInfo, Checkpointer, CheckpointerConfig};
pub use worker::{CheckpointMsg, CheckpointWorker};
