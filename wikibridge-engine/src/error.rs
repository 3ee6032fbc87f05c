//! Error types for wikibridge-engine.
//!
//! The taxonomy follows how failures propagate:
//! - [`SourceError`] — a change source could not be read; the affected
//!   entity is deferred (classification) or the cycle retried (polling).
//! - [`ApplyError`] — an external write failed; `Transient` is retried with
//!   backoff, `Permanent` escalates immediately. Exhaustion of either marks
//!   the record blocked without touching its last-synced fields.
//! - [`StoreError`] — the sync state store itself failed; fatal to the
//!   cycle, no checkpoint advance.

use std::path::PathBuf;

use thiserror::Error;

use wikibridge_core::types::{EntityKey, Side};

/// A change source's poll or read capability failed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("change source unavailable: {0}")]
    Unavailable(String),

    #[error("entity {key} not found on {side}")]
    NotFound { key: EntityKey, side: Side },
}

/// An external write (wiki edit or git commit) failed.
///
/// The collaborator performing the write classifies the failure; the
/// executor only decides whether to retry.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Network hiccup, rate limit, lock contention — worth retrying.
    #[error("transient apply failure: {0}")]
    Transient(String),

    /// Page protected, path rejected, permission denied — retrying cannot help.
    #[error("permanent apply failure: {0}")]
    Permanent(String),
}

/// The sync state store could not be read or written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no sync record for entity {key}")]
    UnknownEntity { key: EntityKey },
}

/// A full cycle failed before completing.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
