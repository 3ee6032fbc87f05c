//! # wikibridge-engine
//!
//! Reconciliation core keeping wiki pages and git files continuously
//! equivalent without echo loops or silently lost updates.
//!
//! Call [`SyncCycle::run`] for one externally-triggered cycle, or drive the
//! pieces directly: [`reconcile::reconcile`] classifies change events into
//! decisions, [`ApplyExecutor::apply_batch`] performs the resulting writes
//! and record updates.

pub mod apply;
pub mod attribution;
pub mod cycle;
pub mod error;
pub mod reconcile;
pub mod source;
pub mod store;

pub use apply::{ApplyExecutor, BatchReport, CancelToken, RetryPolicy};
pub use attribution::Attribution;
pub use cycle::{CycleOutcome, SyncCycle};
pub use error::{ApplyError, CycleError, SourceError, StoreError};
pub use reconcile::{Decision, NoOpReason};
pub use source::{
    ChangeSource, ConflictNotifier, GitWriter, PollBatch, SideContent, SideSnapshot, WikiWriter,
};
pub use store::{Checkpoints, StateStore};
