//! Shared in-memory collaborator doubles for engine scenario tests.
//!
//! Each side keeps entities, a change log, and a revision counter behind a
//! mutex. Writes made through the writer traits append bot-authored events
//! to the log — exactly how a real sync write comes back around as an
//! observable change on the next poll.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;

use wikibridge_core::mapping::Mapping;
use wikibridge_core::types::{
    ChangeEvent, Checkpoint, CommitAuthor, ContentHash, EntityKey, RevisionId, Side,
};
use wikibridge_engine::apply::{ApplyExecutor, CancelToken, RetryPolicy};
use wikibridge_engine::cycle::{CycleOutcome, SyncCycle};
use wikibridge_engine::error::{ApplyError, SourceError};
use wikibridge_engine::source::{
    ChangeSource, ConflictNotifier, GitWriter, PollBatch, SideContent, SideSnapshot, WikiWriter,
};
use wikibridge_engine::store::StateStore;

pub const BOT_AUTHOR: &str = "bridgebot";

#[derive(Default)]
struct SideInner {
    entities: BTreeMap<EntityKey, (RevisionId, String)>,
    log: Vec<ChangeEvent>,
    counter: u64,
    last_commit_author: Option<CommitAuthor>,
    last_message: Option<String>,
    poll_failure: bool,
}

/// One side of the world: change source + write collaborator in one.
pub struct InMemorySide {
    side: Side,
    inner: Mutex<SideInner>,
}

impl InMemorySide {
    pub fn new(side: Side) -> Arc<Self> {
        Arc::new(Self {
            side,
            inner: Mutex::new(SideInner::default()),
        })
    }

    /// Simulate a human edit: bump the revision, store the content, and
    /// append a change event at an explicit timestamp.
    pub fn edit_at(
        &self,
        key: &str,
        content: &str,
        author: &str,
        summary: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> RevisionId {
        let mut inner = self.inner.lock();
        let revision = next_revision(self.side, &mut inner);
        inner
            .entities
            .insert(EntityKey::from(key), (revision.clone(), content.to_string()));
        let event = ChangeEvent {
            key: EntityKey::from(key),
            side: self.side,
            revision: revision.clone(),
            content_hash: ContentHash::of(content),
            timestamp,
            author: author.to_string(),
            summary: summary.map(String::from),
        };
        inner.log.push(event);
        revision
    }

    pub fn edit(&self, key: &str, content: &str, author: &str, summary: Option<&str>) -> RevisionId {
        self.edit_at(key, content, author, summary, Utc::now())
    }

    /// Simulate a human deletion: the entity disappears and the log carries
    /// an event hashing empty content.
    pub fn delete(&self, key: &str, author: &str) -> RevisionId {
        let mut inner = self.inner.lock();
        let revision = next_revision(self.side, &mut inner);
        inner.entities.remove(&EntityKey::from(key));
        let event = ChangeEvent {
            key: EntityKey::from(key),
            side: self.side,
            revision: revision.clone(),
            content_hash: ContentHash::of(""),
            timestamp: Utc::now(),
            author: author.to_string(),
            summary: None,
        };
        inner.log.push(event);
        revision
    }

    pub fn content(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .entities
            .get(&EntityKey::from(key))
            .map(|(_, content)| content.clone())
    }

    pub fn revision(&self, key: &str) -> Option<RevisionId> {
        self.inner
            .lock()
            .entities
            .get(&EntityKey::from(key))
            .map(|(revision, _)| revision.clone())
    }

    pub fn last_commit_author(&self) -> Option<CommitAuthor> {
        self.inner.lock().last_commit_author.clone()
    }

    pub fn last_message(&self) -> Option<String> {
        self.inner.lock().last_message.clone()
    }

    /// Make the next polls fail until cleared.
    pub fn set_poll_failure(&self, failing: bool) {
        self.inner.lock().poll_failure = failing;
    }

    /// Idempotent write used by both writer traits: identical content
    /// returns the current revision without a new log entry.
    fn write(&self, key: &EntityKey, content: &str, message: &str) -> RevisionId {
        let mut inner = self.inner.lock();
        if let Some((revision, existing)) = inner.entities.get(key) {
            if existing == content {
                return revision.clone();
            }
        }
        let revision = next_revision(self.side, &mut inner);
        inner
            .entities
            .insert(key.clone(), (revision.clone(), content.to_string()));
        let event = ChangeEvent {
            key: key.clone(),
            side: self.side,
            revision: revision.clone(),
            content_hash: ContentHash::of(content),
            timestamp: Utc::now(),
            author: BOT_AUTHOR.to_string(),
            summary: Some(message.to_string()),
        };
        inner.log.push(event);
        revision
    }
}

fn next_revision(side: Side, inner: &mut SideInner) -> RevisionId {
    inner.counter += 1;
    match side {
        Side::Wiki => RevisionId(format!("{}", 100 + inner.counter)),
        Side::Git => RevisionId(format!("c{:06}", inner.counter)),
    }
}

#[async_trait]
impl ChangeSource for InMemorySide {
    fn side(&self) -> Side {
        self.side
    }

    async fn poll(&self, since: &Checkpoint) -> Result<PollBatch, SourceError> {
        let inner = self.inner.lock();
        if inner.poll_failure {
            return Err(SourceError::Unavailable(format!(
                "{} feed unreachable",
                self.side
            )));
        }
        let from = since
            .0
            .as_deref()
            .and_then(|cursor| cursor.parse::<usize>().ok())
            .unwrap_or(0);
        let events = inner.log.get(from..).unwrap_or(&[]).to_vec();
        Ok(PollBatch {
            events,
            next: Checkpoint::at(inner.log.len().to_string()),
        })
    }

    async fn read_current(&self, key: &EntityKey) -> Result<Option<SideSnapshot>, SourceError> {
        let inner = self.inner.lock();
        Ok(inner.entities.get(key).map(|(revision, content)| SideSnapshot {
            revision: revision.clone(),
            content_hash: ContentHash::of(content),
        }))
    }

    async fn fetch(&self, key: &EntityKey) -> Result<SideContent, SourceError> {
        let inner = self.inner.lock();
        match inner.entities.get(key) {
            Some((revision, content)) => Ok(SideContent {
                revision: revision.clone(),
                content: content.clone(),
            }),
            None => Err(SourceError::NotFound {
                key: key.clone(),
                side: self.side,
            }),
        }
    }
}

#[async_trait]
impl WikiWriter for InMemorySide {
    async fn write_page(
        &self,
        key: &EntityKey,
        content: &str,
        summary: &str,
    ) -> Result<RevisionId, ApplyError> {
        self.inner.lock().last_message = Some(summary.to_string());
        Ok(self.write(key, content, summary))
    }
}

#[async_trait]
impl GitWriter for InMemorySide {
    async fn commit_file(
        &self,
        key: &EntityKey,
        content: &str,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<RevisionId, ApplyError> {
        {
            let mut inner = self.inner.lock();
            inner.last_commit_author = Some(author.clone());
            inner.last_message = Some(message.to_string());
        }
        Ok(self.write(key, content, message))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(EntityKey, Option<RevisionId>, Option<RevisionId>)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(EntityKey, Option<RevisionId>, Option<RevisionId>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ConflictNotifier for RecordingNotifier {
    async fn notify(
        &self,
        key: &EntityKey,
        wiki_revision: Option<&RevisionId>,
        git_commit: Option<&RevisionId>,
    ) {
        self.calls
            .lock()
            .push((key.clone(), wiki_revision.cloned(), git_commit.cloned()));
    }
}

/// A fully wired world: two in-memory sides, a temp-dir state store, and
/// the cycle runner.
pub struct World {
    pub _state_dir: TempDir,
    pub state_path: std::path::PathBuf,
    pub store: Arc<StateStore>,
    pub wiki: Arc<InMemorySide>,
    pub git: Arc<InMemorySide>,
    pub notifier: Arc<RecordingNotifier>,
    pub cycle: SyncCycle,
}

impl World {
    pub async fn run(&self) -> CycleOutcome {
        self.cycle
            .run(&CancelToken::new())
            .await
            .expect("cycle run")
    }

    pub async fn run_with(&self, cancel: &CancelToken) -> CycleOutcome {
        self.cycle.run(cancel).await.expect("cycle run")
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Build a world with the given `(wiki title, git path)` mapping entries.
pub fn world(entries: &[(&str, &str)]) -> World {
    world_with_usermap(entries, &[])
}

pub fn world_with_usermap(
    entries: &[(&str, &str)],
    usermap: &[(&str, &str, &str)],
) -> World {
    init_tracing();
    let mut yaml = String::from("entries:\n");
    for (wiki, path) in entries {
        yaml.push_str(&format!("  - wiki: \"{wiki}\"\n    path: \"{path}\"\n"));
    }
    if !usermap.is_empty() {
        yaml.push_str("usermap:\n");
        for (user, name, email) in usermap {
            yaml.push_str(&format!(
                "  \"{user}\":\n    name: \"{name}\"\n    email: \"{email}\"\n"
            ));
        }
    }

    let state_dir = TempDir::new().expect("state dir");
    let mapping_path = state_dir.path().join("mapping.yaml");
    std::fs::write(&mapping_path, yaml).expect("write mapping");
    let mapping = Arc::new(Mapping::load(&mapping_path).expect("load mapping"));

    let state_path = state_dir.path().join("state");
    let store = Arc::new(StateStore::open(&state_path).expect("open store"));
    let wiki = InMemorySide::new(Side::Wiki);
    let git = InMemorySide::new(Side::Git);
    let notifier = Arc::new(RecordingNotifier::default());

    let executor = ApplyExecutor::new(
        store.clone(),
        mapping.clone(),
        wiki.clone(),
        git.clone(),
        notifier.clone(),
    )
    .with_retry_policy(RetryPolicy {
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(5),
        max_attempts: 2,
    });

    let cycle = SyncCycle::new(
        mapping,
        store.clone(),
        wiki.clone(),
        git.clone(),
        executor,
    );

    World {
        _state_dir: state_dir,
        state_path,
        store,
        wiki,
        git,
        notifier,
        cycle,
    }
}

/// Timestamp helper for deterministic tie-break scenarios.
pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("valid timestamp")
}
