//! Wikibridge core library — domain types, mapping registry, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes, change events, sync records
//! - [`error`] — [`MappingError`]
//! - [`mapping`] — load-once wiki ⇄ git mapping registry

pub mod error;
pub mod mapping;
pub mod types;

pub use error::MappingError;
pub use mapping::{Mapping, MappingEntry};
pub use types::{
    ChangeEvent, Checkpoint, CommitAuthor, ContentHash, EntityKey, RecordState, RevisionId,
    Side, SyncRecord, WikiTitle,
};
