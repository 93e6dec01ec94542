//! On-disk replay checkpoints.
//!
//! Layout under `checkpoint_dir`:
//!
//! ```text
//! episodes/ep-{id:016x}.bin     one bincode-encoded episode, written once
//! ckpt-{seq:010}.json           committed manifest (serde_json)
//! .staging-ckpt-{seq:010}.json  manifest being written
//! ```
//!
//! A checkpoint is committed by renaming its staged manifest, so a crash at
//! any point leaves either the old or the new checkpoint fully readable.
//! Episodes are immutable, so later checkpoints only write episodes this
//! checkpointer has not already persisted. A file left by an abandoned
//! lineage (for example the newer half of a checkpoint that failed to load)
//! is overwritten rather than trusted.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffers::store::StoreSnapshot;
use crate::core::episode::{Episode, EpisodeId};
use crate::core::step::{Schema, Step};
use crate::error::{ReplayError, Result as ReplayResult};

const FORMAT_VERSION: u32 = 1;
const MANIFEST_PREFIX: &str = "ckpt-";
const MANIFEST_SUFFIX: &str = ".json";
const STAGING_PREFIX: &str = ".staging-";
const TMP_SUFFIX: &str = ".tmp";
const EPISODE_DIR: &str = "episodes";

/// Configuration for the checkpointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointerConfig {
    /// Directory to store checkpoints.
    pub checkpoint_dir: PathBuf,
    /// Episodes inserted between checkpoint saves (0 = never by count).
    pub save_every_episodes: usize,
    /// Wall-clock time between checkpoint saves (zero = never by time).
    pub save_interval: Duration,
    /// Number of recent checkpoints to keep (0 = keep all).
    pub keep_last_n: usize,
}

impl Default for CheckpointerConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./replay_checkpoints"),
            save_every_episodes: 1_000,
            save_interval: Duration::from_secs(300),
            keep_last_n: 3,
        }
    }
}

impl CheckpointerConfig {
    /// Create a new config with specified checkpoint directory.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    /// Set the episode-count trigger.
    pub fn with_save_every_episodes(mut self, episodes: usize) -> Self {
        self.save_every_episodes = episodes;
        self
    }

    /// Set the wall-clock trigger.
    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    /// Set the number of checkpoints to keep.
    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }

    pub fn validate(&self) -> ReplayResult<()> {
        if self.checkpoint_dir.as_os_str().is_empty() {
            return Err(ReplayError::InvalidConfig(
                "checkpoint_dir must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Error type for checkpointing operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// IO error during save/load.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Episode payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// Episode payload is unreadable or inconsistent with its manifest.
    #[error("decode error in {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    /// Manifest is unreadable or from an unsupported format.
    #[error("bad manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
    /// No checkpoints found.
    #[error("no checkpoints found")]
    NoCheckpoints,
}

/// Checkpoint metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Path to the committed manifest.
    pub path: PathBuf,
    /// Monotonic checkpoint number.
    pub sequence: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    id: EpisodeId,
    len: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    sequence: u64,
    capacity: usize,
    schema: Option<Schema>,
    running_total: usize,
    generation: u64,
    /// Insertion order, oldest first.
    entries: Vec<ManifestEntry>,
}

#[derive(Serialize)]
struct EpisodeRecordRef<'a> {
    id: EpisodeId,
    steps: &'a [Step],
}

#[derive(Deserialize)]
struct EpisodeRecord {
    id: EpisodeId,
    steps: Vec<Step>,
}

/// Replay checkpointer.
///
/// Handles writing store snapshots, recovering the newest valid one, and
/// cleaning up superseded checkpoints.
#[derive(Debug)]
pub struct Checkpointer {
    config: CheckpointerConfig,
    next_sequence: u64,
    /// Episode files known to hold the current lineage's contents.
    persisted: HashSet<EpisodeId>,
}

impl Checkpointer {
    /// Create a new checkpointer.
    ///
    /// Creates the checkpoint directory if it doesn't exist and removes
    /// leftovers of interrupted writes.
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(config.checkpoint_dir.join(EPISODE_DIR))?;

        let mut checkpointer = Self {
            config,
            next_sequence: 0,
            persisted: HashSet::new(),
        };
        checkpointer.remove_partial_writes()?;
        checkpointer.next_sequence = checkpointer
            .list_checkpoints()?
            .last()
            .map_or(0, |c| c.sequence + 1);
        Ok(checkpointer)
    }

    /// Get the configuration.
    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    /// Check if `episodes` inserted so far calls for a save.
    pub fn should_save(&self, episodes: usize) -> bool {
        let every = self.config.save_every_episodes;
        every > 0 && episodes > 0 && episodes % every == 0
    }

    fn episode_dir(&self) -> PathBuf {
        self.config.checkpoint_dir.join(EPISODE_DIR)
    }

    fn episode_path(&self, id: EpisodeId) -> PathBuf {
        self.episode_dir().join(format!("ep-{:016x}.bin", id.0))
    }

    fn manifest_name(sequence: u64) -> String {
        format!("{}{:010}{}", MANIFEST_PREFIX, sequence, MANIFEST_SUFFIX)
    }

    /// Write `snapshot` as a new committed checkpoint.
    pub fn save(&mut self, snapshot: &StoreSnapshot) -> Result<CheckpointInfo, CheckpointError> {
        let mut written = 0;
        for episode in &snapshot.episodes {
            if self.persisted.contains(&episode.id()) {
                continue;
            }
            let path = self.episode_path(episode.id());
            let record = EpisodeRecordRef {
                id: episode.id(),
                steps: episode.steps(),
            };
            let bytes = bincode::serde::encode_to_vec(&record, bincode::config::standard())?;
            write_atomically(&path, &tmp_path(&path), &bytes)?;
            written += 1;
        }

        let sequence = self.next_sequence;
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            sequence,
            capacity: snapshot.capacity,
            schema: snapshot.schema.clone(),
            running_total: snapshot.running_total,
            generation: snapshot.generation,
            entries: snapshot
                .episodes
                .iter()
                .map(|e| ManifestEntry {
                    id: e.id(),
                    len: e.len(),
                })
                .collect(),
        };
        let name = Self::manifest_name(sequence);
        let path = self.config.checkpoint_dir.join(&name);
        let staging = self
            .config
            .checkpoint_dir
            .join(format!("{}{}", STAGING_PREFIX, name));
        let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| CheckpointError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomically(&path, &staging, &bytes)?;
        self.next_sequence += 1;
        self.persisted = snapshot.episodes.iter().map(|e| e.id()).collect();

        log::info!(
            "checkpoint {} committed: {} episodes ({} new), {} transitions",
            sequence,
            snapshot.episodes.len(),
            written,
            snapshot.running_total
        );

        if let Err(e) = self.cleanup_old_checkpoints() {
            log::warn!("checkpoint cleanup failed: {}", e);
        }

        Ok(CheckpointInfo { path, sequence })
    }

    /// Load the newest checkpoint that fully decodes.
    ///
    /// Corrupt checkpoints are logged and skipped; `Ok(None)` means no
    /// valid checkpoint exists.
    pub fn load_latest(&self) -> Result<Option<StoreSnapshot>, CheckpointError> {
        for info in self.list_checkpoints()?.iter().rev() {
            match self.load(info) {
                Ok(snapshot) => {
                    log::info!(
                        "recovered checkpoint {}: {} episodes, {} transitions",
                        info.sequence,
                        snapshot.episodes.len(),
                        snapshot.running_total
                    );
                    return Ok(Some(snapshot));
                }
                Err(e) => log::warn!("skipping unreadable checkpoint {}: {}", info.sequence, e),
            }
        }
        Ok(None)
    }

    /// Record that the episode files of a loaded `snapshot` can be reused by
    /// later saves instead of being rewritten.
    pub fn adopt(&mut self, snapshot: &StoreSnapshot) {
        self.persisted = snapshot.episodes.iter().map(|e| e.id()).collect();
    }

    /// Highest episode id named by any episode file or readable manifest.
    ///
    /// New episodes must be numbered above this, whichever checkpoint was
    /// actually recovered.
    pub fn highest_episode_id(&self) -> Result<Option<EpisodeId>, CheckpointError> {
        let mut highest = fs::read_dir(self.episode_dir())?
            .filter_map(|e| e.ok())
            .filter_map(|e| episode_id_from_path(&e.path()))
            .max();
        for info in self.list_checkpoints()? {
            if let Ok(manifest) = self.read_manifest(&info.path) {
                let newest = manifest.entries.iter().map(|e| e.id).max();
                highest = highest.max(newest);
            }
        }
        Ok(highest)
    }

    /// Load one checkpoint.
    pub fn load(&self, info: &CheckpointInfo) -> Result<StoreSnapshot, CheckpointError> {
        let manifest = self.read_manifest(&info.path)?;

        let mut episodes = Vec::with_capacity(manifest.entries.len());
        let mut running_total = 0;
        for entry in &manifest.entries {
            let episode = self.read_episode(entry)?;
            running_total += episode.len();
            episodes.push(Arc::new(episode));
        }
        if running_total != manifest.running_total {
            return Err(CheckpointError::Manifest {
                path: info.path.clone(),
                reason: format!(
                    "running total {} does not match episodes ({})",
                    manifest.running_total, running_total
                ),
            });
        }

        Ok(StoreSnapshot {
            capacity: manifest.capacity,
            schema: manifest.schema,
            episodes,
            running_total,
            generation: manifest.generation,
        })
    }

    fn read_manifest(&self, path: &Path) -> Result<Manifest, CheckpointError> {
        let bytes = fs::read(path)?;
        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Manifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(CheckpointError::Manifest {
                path: path.to_path_buf(),
                reason: format!("unsupported format version {}", manifest.format_version),
            });
        }
        Ok(manifest)
    }

    fn read_episode(&self, entry: &ManifestEntry) -> Result<Episode, CheckpointError> {
        let path = self.episode_path(entry.id);
        let decode_err = |reason: String| CheckpointError::Decode {
            path: path.clone(),
            reason,
        };

        let bytes = fs::read(&path)?;
        let (record, _): (EpisodeRecord, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| decode_err(e.to_string()))?;
        if record.id != entry.id || record.steps.len() != entry.len {
            return Err(decode_err(format!(
                "expected episode {} with {} steps, found {} with {}",
                entry.id,
                entry.len,
                record.id,
                record.steps.len()
            )));
        }
        Episode::new(record.id, record.steps).map_err(|e| decode_err(e.to_string()))
    }

    /// Find the latest checkpoint in the checkpoint directory.
    pub fn find_latest_checkpoint(&self) -> Result<CheckpointInfo, CheckpointError> {
        self.list_checkpoints()?
            .pop()
            .ok_or(CheckpointError::NoCheckpoints)
    }

    /// List all committed checkpoints, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut checkpoints: Vec<CheckpointInfo> = fs::read_dir(&self.config.checkpoint_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let filename = path.file_name()?.to_str()?;
                let sequence = filename
                    .strip_prefix(MANIFEST_PREFIX)?
                    .strip_suffix(MANIFEST_SUFFIX)?
                    .parse()
                    .ok()?;
                Some(CheckpointInfo { path, sequence })
            })
            .collect();

        checkpoints.sort_by_key(|c| c.sequence);
        Ok(checkpoints)
    }

    /// Remove staged manifests and temporary episode files.
    fn remove_partial_writes(&self) -> Result<(), CheckpointError> {
        for dir in [self.config.checkpoint_dir.clone(), self.episode_dir()] {
            for entry in fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
                let path = entry.path();
                let garbage = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(STAGING_PREFIX) || n.ends_with(TMP_SUFFIX))
                    .unwrap_or(false);
                if garbage {
                    log::debug!("removing partial checkpoint file {}", path.display());
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Cleanup old checkpoints, keeping only the last N, then drop episode
    /// files no kept checkpoint references.
    fn cleanup_old_checkpoints(&self) -> Result<(), CheckpointError> {
        if self.config.keep_last_n == 0 {
            return Ok(()); // Keep all
        }

        let mut checkpoints = self.list_checkpoints()?;
        let excess = checkpoints.len().saturating_sub(self.config.keep_last_n);
        for old in checkpoints.drain(..excess) {
            fs::remove_file(&old.path)?;
        }

        let mut referenced = HashSet::new();
        for kept in &checkpoints {
            match self.read_manifest(&kept.path) {
                Ok(manifest) => referenced.extend(manifest.entries.iter().map(|e| e.id)),
                // Unknown references; keep every episode file.
                Err(_) => return Ok(()),
            }
        }

        for entry in fs::read_dir(self.episode_dir())?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if let Some(id) = episode_id_from_path(&path) {
                if !referenced.contains(&id) {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }
}

fn episode_id_from_path(path: &Path) -> Option<EpisodeId> {
    let hex = path
        .file_name()?
        .to_str()?
        .strip_prefix("ep-")?
        .strip_suffix(".bin")?;
    u64::from_str_radix(hex, 16).ok().map(EpisodeId)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Write `bytes` to `staging`, sync, then rename onto `path`.
fn write_atomically(path: &Path, staging: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(staging)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(staging, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::store::EpisodeStore;
    use crate::core::array::Array;
    use crate::core::step::{IS_FIRST, IS_LAST};
    use tempfile::tempdir;

    fn make_episode(id: u64, len: usize) -> Episode {
        let steps = (0..len)
            .map(|i| {
                Step::new()
                    .with("obs", Array::from_f32(vec![id as f32, i as f32]))
                    .with_flag(IS_FIRST, i == 0)
                    .with_flag(IS_LAST, i == len - 1)
            })
            .collect();
        Episode::new(EpisodeId(id), steps).unwrap()
    }

    fn filled_store(capacity: usize, episodes: std::ops::Range<u64>) -> EpisodeStore {
        let store = EpisodeStore::new(capacity);
        for id in episodes {
            store.insert(make_episode(id, 5)).unwrap();
        }
        store
    }

    #[test]
    fn test_checkpointer_config() {
        let config = CheckpointerConfig::new("./test_ckpts")
            .with_save_every_episodes(50)
            .with_save_interval(Duration::from_secs(30))
            .with_keep_last_n(2);

        assert_eq!(config.checkpoint_dir, PathBuf::from("./test_ckpts"));
        assert_eq!(config.save_every_episodes, 50);
        assert_eq!(config.save_interval, Duration::from_secs(30));
        assert_eq!(config.keep_last_n, 2);
        assert!(config.validate().is_ok());
        assert!(CheckpointerConfig::new("").validate().is_err());
    }

    #[test]
    fn test_should_save() {
        let dir = tempdir().unwrap();
        let config = CheckpointerConfig::new(dir.path()).with_save_every_episodes(100);
        let checkpointer = Checkpointer::new(config).unwrap();

        assert!(!checkpointer.should_save(0));
        assert!(!checkpointer.should_save(50));
        assert!(checkpointer.should_save(100));
        assert!(!checkpointer.should_save(150));
        assert!(checkpointer.should_save(200));
    }

    #[test]
    fn test_checkpoint_dir_creation() {
        let dir = tempdir().unwrap();
        let subdir = dir.path().join("nested/checkpoints");

        let _checkpointer = Checkpointer::new(CheckpointerConfig::new(&subdir)).unwrap();
        assert!(subdir.join(EPISODE_DIR).exists());
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        assert!(checkpointer.load_latest().unwrap().is_none());
        assert!(matches!(
            checkpointer.find_latest_checkpoint(),
            Err(CheckpointError::NoCheckpoints)
        ));

        let store = filled_store(100, 0..4);
        let snapshot = store.snapshot_for_checkpoint();
        let info = checkpointer.save(&snapshot).unwrap();
        assert_eq!(info.sequence, 0);
        assert!(info.path.ends_with("ckpt-0000000000.json"));

        let loaded = checkpointer.load_latest().unwrap().unwrap();
        assert_eq!(loaded.episode_ids(), snapshot.episode_ids());
        assert_eq!(loaded.running_total, 20);
        assert_eq!(loaded.schema, snapshot.schema);
        assert_eq!(loaded.generation, snapshot.generation);
        assert_eq!(loaded.episodes[2].steps(), snapshot.episodes[2].steps());
    }

    #[test]
    fn test_episodes_written_once() {
        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        let store = filled_store(100, 0..2);
        checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();

        let first = checkpointer.episode_path(EpisodeId(0));
        let modified = fs::metadata(&first).unwrap().modified().unwrap();

        store.insert(make_episode(2, 5)).unwrap();
        checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        assert_eq!(fs::metadata(&first).unwrap().modified().unwrap(), modified);
        assert!(checkpointer.episode_path(EpisodeId(2)).exists());
    }

    #[test]
    fn test_keep_last_n_and_episode_gc() {
        let dir = tempdir().unwrap();
        let config = CheckpointerConfig::new(dir.path()).with_keep_last_n(2);
        let mut checkpointer = Checkpointer::new(config).unwrap();

        // Capacity of two episodes: every insert evicts the oldest.
        let store = EpisodeStore::new(10);
        for id in 0..5 {
            store.insert(make_episode(id, 5)).unwrap();
            checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        }

        let sequences: Vec<_> = checkpointer
            .list_checkpoints()
            .unwrap()
            .iter()
            .map(|c| c.sequence)
            .collect();
        assert_eq!(sequences, vec![3, 4]);

        // Checkpoint 3 holds {2, 3}, checkpoint 4 holds {3, 4}.
        for id in 0..2 {
            assert!(!checkpointer.episode_path(EpisodeId(id)).exists());
        }
        for id in 2..5 {
            assert!(checkpointer.episode_path(EpisodeId(id)).exists());
        }
    }

    #[test]
    fn test_staging_leftover_is_ignored() {
        let dir = tempdir().unwrap();
        let store = filled_store(100, 0..3);
        {
            let mut checkpointer =
                Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
            checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        }

        // Simulate a crash halfway through the next save.
        let staging = dir.path().join(".staging-ckpt-0000000001.json");
        fs::write(&staging, b"{\"format_version\": 1, \"seq").unwrap();
        let tmp = dir.path().join(EPISODE_DIR).join("ep-0000000000000009.bin.tmp");
        fs::write(&tmp, b"partial").unwrap();

        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        assert!(!staging.exists());
        assert!(!tmp.exists());

        let loaded = checkpointer.load_latest().unwrap().unwrap();
        assert_eq!(loaded.episode_ids(), store.episode_ids());

        let info = checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        assert_eq!(info.sequence, 1);
    }

    #[test]
    fn test_corrupt_newest_falls_back() {
        let dir = tempdir().unwrap();
        let config = CheckpointerConfig::new(dir.path()).with_keep_last_n(0);
        let mut checkpointer = Checkpointer::new(config).unwrap();

        let store = filled_store(100, 0..2);
        checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        store.insert(make_episode(2, 5)).unwrap();
        let newest = checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();

        fs::write(&newest.path, b"not json").unwrap();
        let loaded = checkpointer.load_latest().unwrap().unwrap();
        assert_eq!(loaded.episode_ids(), vec![EpisodeId(0), EpisodeId(1)]);

        // A truncated episode file invalidates every checkpoint using it.
        fs::write(checkpointer.episode_path(EpisodeId(1)), b"\x01").unwrap();
        assert!(checkpointer.load_latest().unwrap().is_none());
    }

    #[test]
    fn test_array_not_filling_shape_is_rejected() {
        use crate::core::array::ArrayData;
        use std::collections::BTreeMap;

        // Same field order as the real records, without shape checking.
        #[derive(Serialize)]
        struct LooseArray {
            data: ArrayData,
            shape: Vec<usize>,
        }
        #[derive(Serialize)]
        struct LooseStep {
            fields: BTreeMap<String, LooseArray>,
        }
        #[derive(Serialize)]
        struct LooseRecord {
            id: EpisodeId,
            steps: Vec<LooseStep>,
        }

        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        let store = filled_store(100, 0..0);
        store.insert(make_episode(0, 1)).unwrap();
        let info = checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        assert!(checkpointer.load(&info).is_ok());

        let flag = |v: bool| LooseArray {
            data: ArrayData::Bool(vec![v]),
            shape: vec![],
        };
        let mut fields = BTreeMap::new();
        fields.insert(IS_FIRST.to_string(), flag(true));
        fields.insert(IS_LAST.to_string(), flag(true));
        fields.insert(
            "obs".to_string(),
            LooseArray {
                data: ArrayData::F32(vec![1.0]),
                shape: vec![3],
            },
        );
        let record = LooseRecord {
            id: EpisodeId(0),
            steps: vec![LooseStep { fields }],
        };
        let bytes = bincode::serde::encode_to_vec(&record, bincode::config::standard()).unwrap();
        fs::write(checkpointer.episode_path(EpisodeId(0)), bytes).unwrap();

        assert!(matches!(
            checkpointer.load(&info),
            Err(CheckpointError::Decode { .. })
        ));
        assert!(checkpointer.load_latest().unwrap().is_none());
    }

    #[test]
    fn test_stale_episode_file_is_rewritten() {
        let dir = tempdir().unwrap();
        let store = filled_store(100, 0..1);
        let stale = {
            let mut writer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
            writer.save(&store.snapshot_for_checkpoint()).unwrap();
            writer.episode_path(EpisodeId(0))
        };
        fs::write(&stale, b"left behind by an abandoned checkpoint").unwrap();

        // A fresh checkpointer trusts nothing it has not written or adopted.
        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        let info = checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        let loaded = checkpointer.load(&info).unwrap();
        assert_eq!(loaded.episodes[0].steps(), store.get(EpisodeId(0)).unwrap().steps());
    }

    #[test]
    fn test_highest_episode_id_covers_unrecovered_files() {
        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        assert_eq!(checkpointer.highest_episode_id().unwrap(), None);

        let store = filled_store(100, 0..3);
        let info = checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();
        fs::write(&info.path, b"not json").unwrap();
        assert!(checkpointer.load_latest().unwrap().is_none());
        assert_eq!(checkpointer.highest_episode_id().unwrap(), Some(EpisodeId(2)));
    }

    #[test]
    fn test_manifest_length_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        let store = filled_store(100, 0..1);
        let info = checkpointer.save(&store.snapshot_for_checkpoint()).unwrap();

        let text = fs::read_to_string(&info.path).unwrap();
        let mut manifest: serde_json::Value = serde_json::from_str(&text).unwrap();
        manifest["entries"][0]["len"] = serde_json::json!(7);
        fs::write(&info.path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        assert!(matches!(
            checkpointer.load(&info),
            Err(CheckpointError::Decode { .. })
        ));
    }
}
