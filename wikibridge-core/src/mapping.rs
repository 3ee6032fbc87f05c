//! Load-once mapping registry: wiki title ⇄ git path.
//!
//! # File format
//!
//! ```yaml
//! entries:
//!   - wiki: "MediaWiki:Common.js"
//!     path: "Common.js"
//!   - wiki: "Module:String"
//!     path: "modules/String.lua"
//! usermap:
//!   "Some Wiki User":
//!     name: "swuser"
//!     email: "swuser@example.org"
//! ```
//!
//! The registry is an immutable value, loaded once at process start and
//! passed explicitly into the engine — never accessed as ambient state.
//! Lookups for keys with no configured counterpart return `None`; the
//! engine treats that as a filter, not an error.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MappingError;
use crate::types::{CommitAuthor, EntityKey, WikiTitle};

/// One configured wiki-page ⇄ git-file pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub wiki: WikiTitle,
    pub path: EntityKey,
}

#[derive(Debug, Default, Deserialize)]
struct MappingFile {
    #[serde(default)]
    entries: Vec<MappingEntry>,
    #[serde(default)]
    usermap: HashMap<String, CommitAuthor>,
}

/// Immutable bidirectional lookup table over the configured entries.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    by_title: HashMap<WikiTitle, EntityKey>,
    by_key: HashMap<EntityKey, WikiTitle>,
    usermap: HashMap<String, CommitAuthor>,
}

impl Mapping {
    /// Load the mapping from a YAML file.
    ///
    /// Returns `MappingError::NotFound` if absent, `MappingError::Parse`
    /// (with path and line context) if malformed, and a duplicate error if
    /// two entries claim the same title or path.
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        if !path.exists() {
            return Err(MappingError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        let file: MappingFile = serde_yaml::from_str(&contents).map_err(|e| MappingError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_parts(file.entries, file.usermap)
    }

    /// Build a mapping from in-memory entries. Used by tests and by callers
    /// that assemble configuration elsewhere.
    pub fn from_entries(entries: Vec<MappingEntry>) -> Result<Self, MappingError> {
        Self::from_parts(entries, HashMap::new())
    }

    fn from_parts(
        entries: Vec<MappingEntry>,
        usermap: HashMap<String, CommitAuthor>,
    ) -> Result<Self, MappingError> {
        let mut by_title = HashMap::with_capacity(entries.len());
        let mut by_key = HashMap::with_capacity(entries.len());
        for entry in entries {
            if by_title.contains_key(&entry.wiki) {
                return Err(MappingError::DuplicateWikiTitle { title: entry.wiki });
            }
            if by_key.contains_key(&entry.path) {
                return Err(MappingError::DuplicateGitPath { key: entry.path });
            }
            by_title.insert(entry.wiki.clone(), entry.path.clone());
            by_key.insert(entry.path, entry.wiki);
        }
        Ok(Self {
            by_title,
            by_key,
            usermap,
        })
    }

    /// Canonical key for a wiki title, or `None` if the title is unmapped.
    pub fn key_for_title(&self, title: &WikiTitle) -> Option<&EntityKey> {
        self.by_title.get(title)
    }

    /// Wiki title for a canonical key, or `None` if the path is unmapped.
    pub fn title_for_key(&self, key: &EntityKey) -> Option<&WikiTitle> {
        self.by_key.get(key)
    }

    /// Whether a key has a configured counterpart on both sides.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Git author identity for a wiki username.
    ///
    /// Falls back to the username itself (spaces replaced with underscores)
    /// with an empty email when the user has no usermap entry.
    pub fn author_for(&self, wiki_user: &str) -> CommitAuthor {
        match self.usermap.get(wiki_user) {
            Some(author) => author.clone(),
            None => CommitAuthor {
                name: wiki_user.replace(' ', "_"),
                email: String::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
