//! Domain types shared by the mapping registry and the sync engine.
//!
//! Everything here is a plain value: serializable via serde, cheap to clone,
//! and free of I/O. The engine owns all mutation of [`SyncRecord`]s.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Canonical identifier for one tracked entity — the repository-relative
/// path form shared by both representations. Wiki titles are normalized to
/// this by the mapping registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(pub String);

impl EntityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A wiki page title including its namespace, e.g. `MediaWiki:Common.js`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WikiTitle(pub String);

impl fmt::Display for WikiTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for WikiTitle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WikiTitle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// An opaque per-side revision marker: a wiki revision id or a git commit id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RevisionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RevisionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Sides
// ---------------------------------------------------------------------------

/// Which representation of an entity a change was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Wiki,
    Git,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Wiki => Side::Git,
            Side::Git => Side::Wiki,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Wiki => write!(f, "wiki"),
            Side::Git => write!(f, "git"),
        }
    }
}

// ---------------------------------------------------------------------------
// Content hash
// ---------------------------------------------------------------------------

/// Hex SHA-256 digest of an entity's content.
///
/// Line endings are normalized to LF before hashing so the same logical
/// content hashes identically regardless of which side produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn of(content: &str) -> Self {
        let normalized = content.replace("\r\n", "\n");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Change events & checkpoints
// ---------------------------------------------------------------------------

/// One observed change on one side, normalized by the change-source adapter.
///
/// Immutable and consumed once; `summary` carries the human edit summary or
/// commit message subject when the source exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: EntityKey,
    pub side: Side,
    pub revision: RevisionId,
    pub content_hash: ContentHash,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Cursor marking how far a change source's history has been consumed.
/// `None` means the source has never been polled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint(pub Option<String>);

impl Checkpoint {
    pub fn at(cursor: impl Into<String>) -> Self {
        Self(Some(cursor.into()))
    }
}

// ---------------------------------------------------------------------------
// Sync records
// ---------------------------------------------------------------------------

/// Where a record sits in the conflict lifecycle.
///
/// `Conflict` and `Blocked` both require manual resolution; the engine never
/// returns a record to `Idle` on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RecordState {
    Idle,
    Conflict {
        #[serde(skip_serializing_if = "Option::is_none")]
        wiki_revision: Option<RevisionId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        git_commit: Option<RevisionId>,
    },
    Blocked {
        reason: String,
    },
}

impl RecordState {
    /// True for `Conflict` and `Blocked`: the record is held pending a
    /// manual resolution and the engine must not overwrite either side.
    pub fn is_held(&self) -> bool {
        !matches!(self, RecordState::Idle)
    }
}

/// Persisted per-entity record of the last mutually-agreed state.
///
/// While `state` is `Idle` and `last_synced_hash` is `Some`, that hash equals
/// the content hash on *both* sides as of the recorded revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub key: EntityKey,
    pub last_wiki_revision: Option<RevisionId>,
    pub last_git_commit: Option<RevisionId>,
    pub last_synced_hash: Option<ContentHash>,
    #[serde(flatten)]
    pub state: RecordState,
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Fresh record for a key observed for the first time.
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            last_wiki_revision: None,
            last_git_commit: None,
            last_synced_hash: None,
            state: RecordState::Idle,
            updated_at: Utc::now(),
        }
    }

    /// Record a completed sync: both sides agree on `hash` as of the given
    /// revisions. Clears any held state.
    pub fn complete_sync(
        &mut self,
        hash: ContentHash,
        wiki_revision: RevisionId,
        git_commit: RevisionId,
    ) {
        self.last_wiki_revision = Some(wiki_revision);
        self.last_git_commit = Some(git_commit);
        self.last_synced_hash = Some(hash);
        self.state = RecordState::Idle;
        self.updated_at = Utc::now();
    }

    /// True until the first sync for this key has completed.
    pub fn never_synced(&self) -> bool {
        self.last_synced_hash.is_none()
    }
}

/// Git author identity used when mirroring a wiki edit into a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(EntityKey::from("Common.js").to_string(), "Common.js");
        assert_eq!(WikiTitle::from("MediaWiki:Common.js").to_string(), "MediaWiki:Common.js");
        assert_eq!(RevisionId::from("abc123").to_string(), "abc123");
    }

    #[test]
    fn entity_keys_order_lexically() {
        let mut keys = vec![
            EntityKey::from("b.js"),
            EntityKey::from("a.css"),
            EntityKey::from("a.js"),
        ];
        keys.sort();
        assert_eq!(keys[0], EntityKey::from("a.css"));
        assert_eq!(keys[2], EntityKey::from("b.js"));
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Wiki.opposite(), Side::Git);
        assert_eq!(Side::Git.opposite(), Side::Wiki);
    }

    #[test]
    fn crlf_and_lf_content_share_the_same_hash() {
        let a = ContentHash::of("line1\r\nline2\r\n");
        let b = ContentHash::of("line1\nline2\n");
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_hashes_differ() {
        assert_ne!(ContentHash::of("a"), ContentHash::of("b"));
    }

    #[test]
    fn trailing_newline_is_significant() {
        assert_ne!(ContentHash::of("a\n"), ContentHash::of("a"));
    }

    #[test]
    fn record_state_serde_roundtrip() {
        let states = [
            RecordState::Idle,
            RecordState::Conflict {
                wiki_revision: Some(RevisionId::from("101")),
                git_commit: None,
            },
            RecordState::Blocked {
                reason: "page protected".to_string(),
            },
        ];
        for state in states {
            assert_eq!(roundtrip(&state), state);
        }
    }

    fn roundtrip(state: &RecordState) -> RecordState {
        let yaml = serde_yaml::to_string(state).expect("serialize");
        serde_yaml::from_str(&yaml).expect("deserialize")
    }

    #[test]
    fn complete_sync_clears_held_state() {
        let mut record = SyncRecord::new(EntityKey::from("Common.js"));
        record.state = RecordState::Conflict {
            wiki_revision: Some(RevisionId::from("7")),
            git_commit: Some(RevisionId::from("deadbeef")),
        };
        assert!(record.state.is_held());

        record.complete_sync(
            ContentHash::of("agreed"),
            RevisionId::from("8"),
            RevisionId::from("cafebabe"),
        );
        assert_eq!(record.state, RecordState::Idle);
        assert!(!record.never_synced());
        assert_eq!(record.last_wiki_revision, Some(RevisionId::from("8")));
        assert_eq!(record.last_git_commit, Some(RevisionId::from("cafebabe")));
    }

    #[test]
    fn new_record_is_idle_and_never_synced() {
        let record = SyncRecord::new(EntityKey::from("Common.js"));
        assert_eq!(record.state, RecordState::Idle);
        assert!(record.never_synced());
    }

    #[test]
    fn sync_record_serde_roundtrip_keeps_flattened_state() {
        let mut record = SyncRecord::new(EntityKey::from("Modules/foo.lua"));
        record.state = RecordState::Blocked {
            reason: "path outside mapping".to_string(),
        };
        let yaml = serde_yaml::to_string(&record).expect("serialize");
        let back: SyncRecord = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, record);
    }
}
