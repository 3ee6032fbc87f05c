//! The apply executor: decisions in, external writes + record updates out.
//!
//! Writes for different entities run concurrently on a bounded pool;
//! operations for the same entity are serialized through a per-key lock
//! arena, so a record is never mutated by two workers at once. The record
//! update happens strictly after the external write is confirmed — a crash
//! in between costs at most one duplicated idempotent write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use wikibridge_core::mapping::Mapping;
use wikibridge_core::types::{ContentHash, EntityKey, RecordState, RevisionId};

use crate::attribution::{self, Attribution};
use crate::error::{ApplyError, StoreError};
use crate::reconcile::Decision;
use crate::source::{ConflictNotifier, GitWriter, WikiWriter};
use crate::store::StateStore;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, observed *between* entity applies: an
/// in-flight write-plus-record-update unit always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded, capped, jittered exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

/// Aggregate outcome of applying one decision batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub conflicts: usize,
    pub noops: usize,
    pub blocked: usize,
    /// Decisions skipped because cancellation was requested.
    pub skipped: usize,
}

impl BatchReport {
    /// True when every decision ran to a terminal outcome. Checkpoints may
    /// only advance on a completed batch.
    pub fn completed(&self) -> bool {
        self.skipped == 0
    }

    pub fn total(&self) -> usize {
        self.applied + self.conflicts + self.noops + self.blocked + self.skipped
    }
}

#[derive(Debug)]
enum EntityOutcome {
    Applied,
    NoOp,
    Conflict,
    Blocked,
    Skipped,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Applies decisions through the write collaborators and owns the resulting
/// sync-record updates.
pub struct ApplyExecutor {
    store: Arc<StateStore>,
    mapping: Arc<Mapping>,
    wiki: Arc<dyn WikiWriter>,
    git: Arc<dyn GitWriter>,
    notifier: Arc<dyn ConflictNotifier>,
    locks: DashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>,
    retry: RetryPolicy,
    max_in_flight: usize,
}

impl ApplyExecutor {
    pub fn new(
        store: Arc<StateStore>,
        mapping: Arc<Mapping>,
        wiki: Arc<dyn WikiWriter>,
        git: Arc<dyn GitWriter>,
        notifier: Arc<dyn ConflictNotifier>,
    ) -> Self {
        Self {
            store,
            mapping,
            wiki,
            git,
            notifier,
            locks: DashMap::new(),
            retry: RetryPolicy::default(),
            max_in_flight: 8,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Apply a full decision batch.
    ///
    /// Entity-level failures are absorbed into the report (blocked records,
    /// notifications); only store-level failures propagate, and they abort
    /// the cycle without a checkpoint advance.
    pub async fn apply_batch(
        &self,
        decisions: Vec<Decision>,
        cancel: &CancelToken,
    ) -> Result<BatchReport, StoreError> {
        let outcomes: Vec<Result<EntityOutcome, StoreError>> = stream::iter(decisions)
            .map(|decision| self.apply_one(decision, cancel))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome? {
                EntityOutcome::Applied => report.applied += 1,
                EntityOutcome::NoOp => report.noops += 1,
                EntityOutcome::Conflict => report.conflicts += 1,
                EntityOutcome::Blocked => report.blocked += 1,
                EntityOutcome::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    async fn apply_one(
        &self,
        decision: Decision,
        cancel: &CancelToken,
    ) -> Result<EntityOutcome, StoreError> {
        if cancel.is_cancelled() {
            tracing::debug!(key = %decision.key(), "skipping apply: cancellation requested");
            return Ok(EntityOutcome::Skipped);
        }

        let lock = self.entity_lock(decision.key());
        let _guard = lock.lock().await;

        match decision {
            Decision::NoOp { key, reason } => {
                tracing::debug!(key = %key, reason = %reason, "no-op");
                Ok(EntityOutcome::NoOp)
            }
            Decision::Conflict {
                key,
                wiki_revision,
                git_commit,
            } => self.hold_conflict(key, wiki_revision, git_commit).await,
            Decision::ApplyToWiki {
                key,
                content,
                source_revision,
                attribution,
            } => {
                self.mirror_to_wiki(key, content, source_revision, attribution)
                    .await
            }
            Decision::ApplyToGit {
                key,
                content,
                source_revision,
                attribution,
            } => {
                self.mirror_to_git(key, content, source_revision, attribution)
                    .await
            }
        }
    }

    /// Record (or refresh) a conflict. The notifier fires once per
    /// Idle→Conflict transition, never on re-emission, and an existing
    /// `Blocked` state stays sticky.
    async fn hold_conflict(
        &self,
        key: EntityKey,
        wiki_revision: Option<RevisionId>,
        git_commit: Option<RevisionId>,
    ) -> Result<EntityOutcome, StoreError> {
        let prior_held = self
            .store
            .get(&key)
            .map(|r| r.state.is_held())
            .unwrap_or(false);

        let wiki_for_record = wiki_revision.clone();
        let git_for_record = git_commit.clone();
        self.store.update(&key, move |record| {
            if matches!(record.state, RecordState::Blocked { .. }) {
                return;
            }
            record.state = RecordState::Conflict {
                wiki_revision: wiki_for_record,
                git_commit: git_for_record,
            };
        })?;

        if prior_held {
            tracing::debug!(key = %key, "conflict refreshed, already awaiting resolution");
        } else {
            tracing::warn!(key = %key, "conflict detected, manual resolution required");
            self.notifier
                .notify(&key, wiki_revision.as_ref(), git_commit.as_ref())
                .await;
        }
        Ok(EntityOutcome::Conflict)
    }

    async fn mirror_to_wiki(
        &self,
        key: EntityKey,
        content: String,
        source_revision: RevisionId,
        attribution: Attribution,
    ) -> Result<EntityOutcome, StoreError> {
        let summary = attribution::edit_summary(
            &attribution.author,
            &source_revision,
            attribution.summary.as_deref(),
        );
        let written = self
            .with_retries(&key, || self.wiki.write_page(&key, &content, &summary))
            .await;

        match written {
            Ok(new_revision) => {
                let hash = ContentHash::of(&content);
                tracing::info!(key = %key, revision = %new_revision, "mirrored git commit onto wiki");
                self.store.update(&key, move |record| {
                    record.complete_sync(hash, new_revision, source_revision);
                })?;
                Ok(EntityOutcome::Applied)
            }
            Err(reason) => {
                self.block(key, reason, None, Some(source_revision)).await
            }
        }
    }

    async fn mirror_to_git(
        &self,
        key: EntityKey,
        content: String,
        source_revision: RevisionId,
        attribution: Attribution,
    ) -> Result<EntityOutcome, StoreError> {
        let author = self.mapping.author_for(&attribution.author);
        let message = attribution::commit_message(attribution.summary.as_deref());
        let written = self
            .with_retries(&key, || {
                self.git.commit_file(&key, &content, &message, &author)
            })
            .await;

        match written {
            Ok(new_commit) => {
                let hash = ContentHash::of(&content);
                tracing::info!(key = %key, commit = %new_commit, "mirrored wiki edit into git");
                self.store.update(&key, move |record| {
                    record.complete_sync(hash, source_revision, new_commit);
                })?;
                Ok(EntityOutcome::Applied)
            }
            Err(reason) => {
                self.block(key, reason, Some(source_revision), None).await
            }
        }
    }

    /// Escalate an entity whose apply cannot succeed. The record keeps its
    /// last-synced fields untouched; only the state changes.
    async fn block(
        &self,
        key: EntityKey,
        reason: String,
        wiki_revision: Option<RevisionId>,
        git_commit: Option<RevisionId>,
    ) -> Result<EntityOutcome, StoreError> {
        let prior_held = self
            .store
            .get(&key)
            .map(|r| r.state.is_held())
            .unwrap_or(false);

        let reason_for_record = reason.clone();
        self.store.update(&key, move |record| {
            record.state = RecordState::Blocked {
                reason: reason_for_record,
            };
        })?;
        tracing::error!(key = %key, reason = %reason, "entity blocked after apply failure");

        if !prior_held {
            self.notifier
                .notify(&key, wiki_revision.as_ref(), git_commit.as_ref())
                .await;
        }
        Ok(EntityOutcome::Blocked)
    }

    /// Run a write, retrying transient failures with capped jittered
    /// exponential backoff. Returns the blocking reason on exhaustion or a
    /// permanent failure.
    async fn with_retries<F, Fut>(&self, key: &EntityKey, op: F) -> Result<RevisionId, String>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<RevisionId, ApplyError>>,
    {
        let mut delays = ExponentialBackoff::from_millis(self.retry.initial_delay.as_millis() as u64)
            .map(|delay| jitter(delay.min(self.retry.max_delay)));
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(revision) => return Ok(revision),
                Err(ApplyError::Permanent(reason)) => {
                    return Err(format!("permanent failure: {reason}"));
                }
                Err(ApplyError::Transient(reason)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(format!(
                            "transient failure persisted after {attempt} attempts: {reason}"
                        ));
                    }
                    let delay = delays.next().unwrap_or(self.retry.max_delay);
                    tracing::warn!(
                        key = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "transient apply failure, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn entity_lock(&self, key: &EntityKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
