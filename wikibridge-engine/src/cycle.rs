//! One full sync cycle: poll → reconcile → apply → advance checkpoints.
//!
//! A cycle is triggered externally (timer, operator command). Reconciliation
//! computes the complete decision batch before any apply begins, so a slow
//! external write never stalls classification. Checkpoints advance only
//! after the batch has fully applied; a crash or cancellation mid-cycle
//! causes re-observation, which echo suppression classifies away.

use std::sync::Arc;
use std::time::Instant;

use wikibridge_core::mapping::Mapping;

use crate::apply::{ApplyExecutor, BatchReport, CancelToken};
use crate::error::CycleError;
use crate::reconcile;
use crate::source::ChangeSource;
use crate::store::{Checkpoints, StateStore};

/// Everything one cycle needs, wired together once at startup. The mapping
/// is an immutable value passed in explicitly — never ambient state.
pub struct SyncCycle {
    mapping: Arc<Mapping>,
    store: Arc<StateStore>,
    wiki_source: Arc<dyn ChangeSource>,
    git_source: Arc<dyn ChangeSource>,
    executor: ApplyExecutor,
}

/// Summary of one completed (or deferred) cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub events_seen: usize,
    pub decisions: usize,
    pub report: BatchReport,
    pub checkpoints_advanced: bool,
}

impl SyncCycle {
    pub fn new(
        mapping: Arc<Mapping>,
        store: Arc<StateStore>,
        wiki_source: Arc<dyn ChangeSource>,
        git_source: Arc<dyn ChangeSource>,
        executor: ApplyExecutor,
    ) -> Self {
        Self {
            mapping,
            store,
            wiki_source,
            git_source,
            executor,
        }
    }

    /// Run one cycle.
    ///
    /// Source poll failures and store failures abort the cycle without a
    /// checkpoint advance; the next scheduled run retries the whole cycle.
    pub async fn run(&self, cancel: &CancelToken) -> Result<CycleOutcome, CycleError> {
        let started = Instant::now();
        let checkpoints = self.store.checkpoints();

        let wiki_batch = self.wiki_source.poll(&checkpoints.wiki).await?;
        let git_batch = self.git_source.poll(&checkpoints.git).await?;

        let mut events = wiki_batch.events;
        events.extend(git_batch.events);
        let events_seen = events.len();

        let decisions = reconcile::reconcile(
            &events,
            self.store.as_ref(),
            self.mapping.as_ref(),
            self.wiki_source.as_ref(),
            self.git_source.as_ref(),
        )
        .await;
        let decision_count = decisions.len();

        let report = self.executor.apply_batch(decisions, cancel).await?;

        // Advance only when every decision reached a terminal outcome; a
        // cancelled batch leaves the cursors put so skipped events are
        // re-observed next run.
        let checkpoints_advanced = report.completed();
        if checkpoints_advanced {
            self.store.advance_checkpoints(Checkpoints {
                wiki: wiki_batch.next,
                git: git_batch.next,
            })?;
        } else {
            tracing::info!("cycle deferred, checkpoints left unadvanced");
        }

        tracing::info!(
            events = events_seen,
            decisions = decision_count,
            applied = report.applied,
            conflicts = report.conflicts,
            blocked = report.blocked,
            noops = report.noops,
            skipped = report.skipped,
            duration_ms = started.elapsed().as_millis() as u64,
            "sync cycle finished",
        );

        Ok(CycleOutcome {
            events_seen,
            decisions: decision_count,
            report,
            checkpoints_advanced,
        })
    }
}
