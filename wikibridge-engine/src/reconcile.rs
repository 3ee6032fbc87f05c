//! The reconciliation engine: change events in, decisions out.
//!
//! Classification order per entity:
//! 1. do-not-sync marker (marked events are dropped)
//! 2. held conflict/blocked record (fold and re-emit, never overwrite)
//! 3. echo suppression against the last mutually-agreed hash
//! 4. initial sync (no agreed hash yet; first observed side is authoritative)
//! 5. steady state, decided against *current* hashes read from both sides
//!
//! Reconciliation performs no writes against external systems: it reads the
//! sync state, the in-memory batch, and the change sources' read capability.
//! Multiple revisions of one entity in a batch collapse to the newest per
//! side — the engine synchronizes head state, not history.

use std::collections::BTreeMap;
use std::fmt;

use wikibridge_core::mapping::Mapping;
use wikibridge_core::types::{ChangeEvent, ContentHash, EntityKey, RecordState, RevisionId, Side};

use crate::attribution::{self, Attribution};
use crate::error::SourceError;
use crate::source::ChangeSource;
use crate::store::StateStore;

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why an entity produced no work this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoOpReason {
    /// The observed change is our own prior write bouncing back.
    Echo,
    /// Both sides already match the recorded state.
    UpToDate,
    /// Every usable event carried the do-not-sync marker.
    DoNotSync,
    /// A change source read failed; the entity is re-observed next cycle.
    Deferred { detail: String },
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoOpReason::Echo => write!(f, "echo"),
            NoOpReason::UpToDate => write!(f, "up-to-date"),
            NoOpReason::DoNotSync => write!(f, "do-not-sync"),
            NoOpReason::Deferred { detail } => write!(f, "deferred: {detail}"),
        }
    }
}

/// Outcome of classifying one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Mirror git content onto the wiki page.
    ApplyToWiki {
        key: EntityKey,
        content: String,
        source_revision: RevisionId,
        attribution: Attribution,
    },
    /// Mirror wiki content into the git file.
    ApplyToGit {
        key: EntityKey,
        content: String,
        source_revision: RevisionId,
        attribution: Attribution,
    },
    /// Both sides changed independently; hold for manual resolution.
    Conflict {
        key: EntityKey,
        wiki_revision: Option<RevisionId>,
        git_commit: Option<RevisionId>,
    },
    NoOp {
        key: EntityKey,
        reason: NoOpReason,
    },
}

impl Decision {
    pub fn key(&self) -> &EntityKey {
        match self {
            Decision::ApplyToWiki { key, .. }
            | Decision::ApplyToGit { key, .. }
            | Decision::Conflict { key, .. }
            | Decision::NoOp { key, .. } => key,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

/// Classify a batch of change events into one decision per affected entity.
///
/// Malformed events are skipped and logged; events for keys with no mapping
/// counterpart are dropped silently (a filter, not an error). Entities are
/// processed in lexical key order so the output is deterministic.
pub async fn reconcile(
    events: &[ChangeEvent],
    store: &StateStore,
    mapping: &Mapping,
    wiki: &dyn ChangeSource,
    git: &dyn ChangeSource,
) -> Vec<Decision> {
    let mut per_entity: BTreeMap<EntityKey, Vec<&ChangeEvent>> = BTreeMap::new();
    for event in events {
        if let Some(problem) = event_problem(event) {
            tracing::warn!(
                key = %event.key,
                side = %event.side,
                problem,
                "skipping malformed change event",
            );
            continue;
        }
        if !mapping.contains(&event.key) {
            tracing::debug!(key = %event.key, side = %event.side, "dropping unmapped entity");
            continue;
        }
        per_entity.entry(event.key.clone()).or_default().push(event);
    }

    let mut decisions = Vec::with_capacity(per_entity.len());
    for (key, entity_events) in per_entity {
        decisions.push(classify(key, &entity_events, store, wiki, git).await);
    }
    decisions
}

async fn classify(
    key: EntityKey,
    events: &[&ChangeEvent],
    store: &StateStore,
    wiki: &dyn ChangeSource,
    git: &dyn ChangeSource,
) -> Decision {
    let usable: Vec<&ChangeEvent> = events
        .iter()
        .copied()
        .filter(|event| {
            let marked = event
                .summary
                .as_deref()
                .map(attribution::is_do_not_sync)
                .unwrap_or(false);
            if marked {
                tracing::info!(
                    key = %event.key,
                    revision = %event.revision,
                    "skipping change marked do-not-sync",
                );
            }
            !marked
        })
        .collect();
    if usable.is_empty() {
        return Decision::NoOp {
            key,
            reason: NoOpReason::DoNotSync,
        };
    }

    let latest_wiki = latest_for_side(&usable, Side::Wiki);
    let latest_git = latest_for_side(&usable, Side::Git);
    let record = store.get(&key);

    // A held record is never silently overwritten: fold the newly observed
    // revisions into the conflict and re-emit it.
    if let Some(record) = &record {
        match &record.state {
            RecordState::Conflict {
                wiki_revision,
                git_commit,
            } => {
                return Decision::Conflict {
                    key,
                    wiki_revision: latest_wiki
                        .map(|e| e.revision.clone())
                        .or_else(|| wiki_revision.clone()),
                    git_commit: latest_git
                        .map(|e| e.revision.clone())
                        .or_else(|| git_commit.clone()),
                };
            }
            RecordState::Blocked { .. } => {
                return Decision::Conflict {
                    key,
                    wiki_revision: latest_wiki.map(|e| e.revision.clone()),
                    git_commit: latest_git.map(|e| e.revision.clone()),
                };
            }
            RecordState::Idle => {}
        }
    }

    let Some(last) = record.as_ref().and_then(|r| r.last_synced_hash.clone()) else {
        return initial_sync(key, latest_wiki, latest_git, wiki, git).await;
    };

    // Echo suppression: a write we made ourselves comes back with the hash
    // we recorded when making it. Hash comparison (not timers) keeps this
    // robust to out-of-order and delayed delivery.
    if usable.iter().all(|e| e.content_hash == last) {
        return Decision::NoOp {
            key,
            reason: NoOpReason::Echo,
        };
    }

    steady_state(key, &last, latest_wiki, latest_git, wiki, git).await
}

async fn steady_state(
    key: EntityKey,
    last: &ContentHash,
    latest_wiki: Option<&ChangeEvent>,
    latest_git: Option<&ChangeEvent>,
    wiki: &dyn ChangeSource,
    git: &dyn ChangeSource,
) -> Decision {
    // Never trust stale state: both sides' current heads are read at
    // decision time.
    let wiki_cur = match wiki.read_current(&key).await {
        Ok(snapshot) => snapshot,
        Err(err) => return deferred(key, Side::Wiki, &err),
    };
    let git_cur = match git.read_current(&key).await {
        Ok(snapshot) => snapshot,
        Err(err) => return deferred(key, Side::Git, &err),
    };

    let (wiki_cur, git_cur) = match (wiki_cur, git_cur) {
        (Some(wiki_cur), Some(git_cur)) => (wiki_cur, git_cur),
        (wiki_cur, git_cur) => {
            // A tracked entity vanished on one side. Propagating a deletion
            // by heuristic risks data loss, so escalate instead.
            tracing::warn!(key = %key, "tracked entity missing on one side, escalating");
            return Decision::Conflict {
                key,
                wiki_revision: wiki_cur.map(|s| s.revision),
                git_commit: git_cur.map(|s| s.revision),
            };
        }
    };

    let wiki_changed = wiki_cur.content_hash != *last;
    let git_changed = git_cur.content_hash != *last;

    match (wiki_changed, git_changed) {
        (false, false) => Decision::NoOp {
            key,
            reason: NoOpReason::UpToDate,
        },
        (true, false) => mirror(key, Side::Wiki, wiki, latest_wiki).await,
        (false, true) => mirror(key, Side::Git, git, latest_git).await,
        (true, true) if wiki_cur.content_hash == git_cur.content_hash => {
            // Both sides moved to the same content without us. The write is
            // idempotent; applying brings the record back in agreement.
            mirror(key, Side::Wiki, wiki, latest_wiki).await
        }
        (true, true) => Decision::Conflict {
            key,
            wiki_revision: Some(wiki_cur.revision.clone()),
            git_commit: Some(git_cur.revision.clone()),
        },
    }
}

/// First observed side is authoritative for the initial copy. When both
/// sides appear in one batch, the earlier timestamp wins; wiki wins a tie.
async fn initial_sync(
    key: EntityKey,
    latest_wiki: Option<&ChangeEvent>,
    latest_git: Option<&ChangeEvent>,
    wiki: &dyn ChangeSource,
    git: &dyn ChangeSource,
) -> Decision {
    match (latest_wiki, latest_git) {
        (Some(w), Some(g)) if g.timestamp < w.timestamp => {
            mirror(key, Side::Git, git, latest_git).await
        }
        (Some(_), _) => mirror(key, Side::Wiki, wiki, latest_wiki).await,
        (None, Some(_)) => mirror(key, Side::Git, git, latest_git).await,
        (None, None) => Decision::NoOp {
            key,
            reason: NoOpReason::UpToDate,
        },
    }
}

/// Build the apply decision that mirrors `origin`'s current content onto
/// the opposite side.
async fn mirror(
    key: EntityKey,
    origin: Side,
    origin_source: &dyn ChangeSource,
    origin_event: Option<&ChangeEvent>,
) -> Decision {
    let current = match origin_source.fetch(&key).await {
        Ok(content) => content,
        Err(err) => return deferred(key, origin, &err),
    };
    let attribution = origin_event
        .map(|e| Attribution {
            author: e.author.clone(),
            summary: e.summary.clone(),
        })
        .unwrap_or_else(Attribution::unattributed);
    match origin {
        Side::Wiki => Decision::ApplyToGit {
            key,
            content: current.content,
            source_revision: current.revision,
            attribution,
        },
        Side::Git => Decision::ApplyToWiki {
            key,
            content: current.content,
            source_revision: current.revision,
            attribution,
        },
    }
}

fn deferred(key: EntityKey, side: Side, err: &SourceError) -> Decision {
    tracing::warn!(key = %key, side = %side, error = %err, "deferring entity: source read failed");
    Decision::NoOp {
        key,
        reason: NoOpReason::Deferred {
            detail: err.to_string(),
        },
    }
}

fn latest_for_side<'a>(events: &[&'a ChangeEvent], side: Side) -> Option<&'a ChangeEvent> {
    events
        .iter()
        .copied()
        .filter(|e| e.side == side)
        .max_by_key(|e| e.timestamp)
}

/// Malformed events are skipped (logged), never fatal to the batch.
fn event_problem(event: &ChangeEvent) -> Option<&'static str> {
    if event.key.as_str().is_empty() {
        return Some("empty entity key");
    }
    if event.revision.0.is_empty() {
        return Some("empty revision id");
    }
    if event.content_hash.as_str().is_empty() {
        return Some("empty content hash");
    }
    if event.author.is_empty() {
        return Some("empty author");
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
