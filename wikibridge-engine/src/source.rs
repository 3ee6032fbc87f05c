//! Collaborator seams: change sources, write collaborators, conflict notifier.
//!
//! The engine never talks to network APIs directly. Everything upstream of a
//! decision — polling recent changes, reading current revisions, fetching
//! content, posting an edit, making a commit — happens behind these traits.

use async_trait::async_trait;

use wikibridge_core::types::{
    ChangeEvent, Checkpoint, CommitAuthor, ContentHash, EntityKey, RevisionId, Side,
};

use crate::error::{ApplyError, SourceError};

/// Events observed since a checkpoint, plus the cursor to resume from.
#[derive(Debug, Clone)]
pub struct PollBatch {
    pub events: Vec<ChangeEvent>,
    pub next: Checkpoint,
}

/// Current head state of one entity on one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideSnapshot {
    pub revision: RevisionId,
    pub content_hash: ContentHash,
}

/// Content of one entity at its current revision on one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideContent {
    pub revision: RevisionId,
    pub content: String,
}

/// One side's history and read capability.
///
/// `read_current` returns `None` when the entity does not exist on that
/// side (page deleted, file absent) — distinct from a read failure.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    fn side(&self) -> Side;

    /// Changes observed since `since`, oldest first, with the new cursor.
    async fn poll(&self, since: &Checkpoint) -> Result<PollBatch, SourceError>;

    /// Current revision and content hash, or `None` if absent.
    async fn read_current(&self, key: &EntityKey) -> Result<Option<SideSnapshot>, SourceError>;

    /// Content at the current revision. Fails if the entity is absent.
    async fn fetch(&self, key: &EntityKey) -> Result<SideContent, SourceError>;
}

/// Posts page content to the wiki.
///
/// Must be idempotent for identical content: a second call with the same
/// text returns the current revision without creating a new edit.
#[async_trait]
pub trait WikiWriter: Send + Sync {
    async fn write_page(
        &self,
        key: &EntityKey,
        content: &str,
        summary: &str,
    ) -> Result<RevisionId, ApplyError>;
}

/// Commits file content to the git repository.
///
/// Must be idempotent for identical content: a second call with the same
/// bytes returns the current commit without creating a new one.
#[async_trait]
pub trait GitWriter: Send + Sync {
    async fn commit_file(
        &self,
        key: &EntityKey,
        content: &str,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<RevisionId, ApplyError>;
}

/// Informed of conflict and blocked transitions. Fire-and-forget: the
/// executor logs delivery problems and moves on.
#[async_trait]
pub trait ConflictNotifier: Send + Sync {
    async fn notify(
        &self,
        key: &EntityKey,
        wiki_revision: Option<&RevisionId>,
        git_commit: Option<&RevisionId>,
    );
}
