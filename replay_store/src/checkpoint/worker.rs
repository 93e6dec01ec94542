//! Background checkpoint thread.
//!
//! The worker wakes on a [`CheckpointMsg::Trigger`] or when `save_interval`
//! elapses, snapshots the store and saves it if anything changed since the
//! last successful save. `Stop` flushes a final checkpoint and exits.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::buffers::store::EpisodeStore;
use crate::error::Result;

use super::checkpointer::Checkpointer;

/// Commands accepted by the checkpoint worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMsg {
    /// Save now if the store changed.
    Trigger,
    /// Save a final checkpoint and exit.
    Stop,
}

/// Snapshot `store` and save it unless its generation matches `last_saved`.
///
/// Failures are logged and counted; the next call retries.
pub(crate) fn save_if_changed(
    store: &EpisodeStore,
    checkpointer: &mut Checkpointer,
    last_saved: &mut Option<u64>,
) -> bool {
    let snapshot = store.snapshot_for_checkpoint();
    if *last_saved == Some(snapshot.generation) {
        return false;
    }
    match checkpointer.save(&snapshot) {
        Ok(_) => {
            *last_saved = Some(snapshot.generation);
            store.metrics().record_checkpoint(true);
            true
        }
        Err(e) => {
            log::warn!("replay checkpoint failed, will retry on next trigger: {}", e);
            store.metrics().record_checkpoint(false);
            false
        }
    }
}

/// Handle to the background checkpoint thread.
pub struct CheckpointWorker {
    /// Channel to send commands to the worker
    cmd_tx: Sender<CheckpointMsg>,
    /// Thread handle
    thread: Option<JoinHandle<()>>,
}

impl CheckpointWorker {
    /// Spawn the worker. `last_saved` is the store generation already on disk.
    pub fn spawn(
        store: Arc<EpisodeStore>,
        mut checkpointer: Checkpointer,
        last_saved: Option<u64>,
    ) -> Result<Self> {
        // Capacity 1: triggers issued while one is pending merge into it.
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(1);
        let interval = checkpointer.config().save_interval;

        let thread = std::thread::Builder::new()
            .name("replay-checkpoint".into())
            .spawn(move || {
                let mut last_saved = last_saved;
                loop {
                    match next_command(&cmd_rx, interval) {
                        CheckpointMsg::Trigger => {
                            save_if_changed(&store, &mut checkpointer, &mut last_saved);
                        }
                        CheckpointMsg::Stop => {
                            save_if_changed(&store, &mut checkpointer, &mut last_saved);
                            break;
                        }
                    }
                }
                log::debug!("replay checkpoint worker stopped");
            })
            .map_err(super::CheckpointError::from)?;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    /// Request a checkpoint. Returns `false` if one was already pending.
    pub fn trigger(&self) -> bool {
        match self.cmd_tx.try_send(CheckpointMsg::Trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("replay checkpoint worker is gone; trigger ignored");
                false
            }
        }
    }

    /// Flush a final checkpoint and wait for the thread to finish.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Blocks only until a pending trigger is taken.
        let _ = self.cmd_tx.send(CheckpointMsg::Stop);
        if thread.join().is_err() {
            log::error!("replay checkpoint worker panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for CheckpointWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn next_command(rx: &Receiver<CheckpointMsg>, interval: Duration) -> CheckpointMsg {
    if interval.is_zero() {
        return rx.recv().unwrap_or(CheckpointMsg::Stop);
    }
    match rx.recv_timeout(interval) {
        Ok(msg) => msg,
        Err(RecvTimeoutError::Timeout) => CheckpointMsg::Trigger,
        Err(RecvTimeoutError::Disconnected) => CheckpointMsg::Stop,
    }
}
