//! Persisted sync state: per-entity records and the two source checkpoints.
//!
//! Layout under the state directory:
//!
//! ```text
//! <dir>/records.json       one document, entity key -> SyncRecord
//! <dir>/checkpoints.json   wiki + git cursors
//! ```
//!
//! Writes use the atomic `.tmp` + rename pattern. Per-key read-modify-write
//! goes through [`StateStore::update`], which holds the write lock for the
//! whole closure-plus-persist unit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use wikibridge_core::types::{Checkpoint, ContentHash, EntityKey, RevisionId, SyncRecord};

use crate::error::{io_err, StoreError};

/// Both change-source cursors, advanced together at the end of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoints {
    pub wiki: Checkpoint,
    pub git: Checkpoint,
}

/// On-disk records payload.
#[derive(Debug, Serialize, Deserialize)]
struct RecordsFile {
    saved_at: DateTime<Utc>,
    records: BTreeMap<String, SyncRecord>,
}

/// File-backed keyed store of [`SyncRecord`]s plus the two checkpoints.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    records: RwLock<BTreeMap<EntityKey, SyncRecord>>,
    checkpoints: RwLock<Checkpoints>,
}

impl StateStore {
    /// Open (or initialize) the store rooted at `dir`.
    ///
    /// Missing files load as empty state; the directory is created on the
    /// first save.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let records = load_records(&records_path(&dir))?;
        let checkpoints = load_checkpoints(&checkpoints_path(&dir))?;
        Ok(Self {
            dir,
            records: RwLock::new(records),
            checkpoints: RwLock::new(checkpoints),
        })
    }

    /// Snapshot of one record, if the key has ever been observed.
    pub fn get(&self, key: &EntityKey) -> Option<SyncRecord> {
        self.records.read().get(key).cloned()
    }

    /// All records, in key order.
    pub fn records(&self) -> Vec<SyncRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Atomic per-key read-modify-write.
    ///
    /// Creates the record on first touch, applies `mutate`, persists the
    /// records file, and returns the updated record. The write lock is held
    /// across mutation and persistence so concurrent workers on different
    /// keys never interleave half-written state.
    pub fn update<F>(&self, key: &EntityKey, mutate: F) -> Result<SyncRecord, StoreError>
    where
        F: FnOnce(&mut SyncRecord),
    {
        let mut records = self.records.write();
        let record = records
            .entry(key.clone())
            .or_insert_with(|| SyncRecord::new(key.clone()));
        mutate(record);
        record.updated_at = Utc::now();
        let updated = record.clone();
        persist_records(&self.dir, &records)?;
        Ok(updated)
    }

    /// Manual conflict resolution: reset a held record to `Idle` with the
    /// externally agreed state. This is the only path out of `Conflict` or
    /// `Blocked`; the engine never calls it on its own.
    pub fn resolve(
        &self,
        key: &EntityKey,
        agreed_hash: ContentHash,
        wiki_revision: RevisionId,
        git_commit: RevisionId,
    ) -> Result<SyncRecord, StoreError> {
        let mut records = self.records.write();
        let record = records.get_mut(key).ok_or_else(|| StoreError::UnknownEntity {
            key: key.clone(),
        })?;
        record.complete_sync(agreed_hash, wiki_revision, git_commit);
        let updated = record.clone();
        persist_records(&self.dir, &records)?;
        tracing::info!(key = %updated.key, "conflict manually resolved");
        Ok(updated)
    }

    /// Current checkpoints snapshot.
    pub fn checkpoints(&self) -> Checkpoints {
        self.checkpoints.read().clone()
    }

    /// Advance both cursors; called only after a batch was fully applied.
    pub fn advance_checkpoints(&self, next: Checkpoints) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write();
        *checkpoints = next;
        persist_checkpoints(&self.dir, &checkpoints)
    }

    /// Count of records currently held in `Conflict` or `Blocked`.
    pub fn held_count(&self) -> usize {
        self.records
            .read()
            .values()
            .filter(|r| r.state.is_held())
            .count()
    }
}

fn records_path(dir: &Path) -> PathBuf {
    dir.join("records.json")
}

fn checkpoints_path(dir: &Path) -> PathBuf {
    dir.join("checkpoints.json")
}

fn load_records(path: &Path) -> Result<BTreeMap<EntityKey, SyncRecord>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let file: RecordsFile = serde_json::from_str(&contents)?;
    Ok(file
        .records
        .into_iter()
        .map(|(k, v)| (EntityKey(k), v))
        .collect())
}

fn load_checkpoints(path: &Path) -> Result<Checkpoints, StoreError> {
    if !path.exists() {
        return Ok(Checkpoints::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

fn persist_records(
    dir: &Path,
    records: &BTreeMap<EntityKey, SyncRecord>,
) -> Result<(), StoreError> {
    let file = RecordsFile {
        saved_at: Utc::now(),
        records: records
            .iter()
            .map(|(k, v)| (k.0.clone(), v.clone()))
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    atomic_write(&records_path(dir), &json)
}

fn persist_checkpoints(dir: &Path, checkpoints: &Checkpoints) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(checkpoints)?;
    atomic_write(&checkpoints_path(dir), &json)
}

/// Write to `<path>.tmp` then rename to `<path>` (atomic on POSIX).
fn atomic_write(path: &Path, contents: &str) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid store path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
