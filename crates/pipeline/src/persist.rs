//! Persist stage: write the game row, then link its entities concurrently.
//!
//! Each record gets its own [`JoinSet`] with one task per linkable entity.
//! All tasks are joined before the record is considered done, so no task
//! outlives the record that spawned it. Link failures are collected rather
//! than short-circuiting; the game row is never rolled back.

use extract::{EntityLabel, EntitySpan};
use std::collections::HashMap;
use std::sync::Arc;
use store::{EntityKind, GameId, GameStore};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::{FailureReport, LinkCause, LinkError, PersistError};
use crate::record::AnnotatedRecord;
use crate::stats::{PipelineStats, TimedOperation};

/// Store table for a label; `None` for labels that are not persisted.
pub fn kind_for(label: EntityLabel) -> Option<EntityKind> {
    match label {
        EntityLabel::Developer => Some(EntityKind::Developer),
        EntityLabel::Platform => Some(EntityKind::Platform),
        EntityLabel::Genre => Some(EntityKind::Genre),
        EntityLabel::Other => None,
    }
}

/// What happened to a record whose game row was written and whose links all
/// succeeded (or were skipped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub game_id: GameId,
    pub linked: usize,
    /// Spans whose label has no table.
    pub ignored: usize,
    /// Tasks that saw the cancellation before doing any work.
    pub cancelled: usize,
}

enum LinkOutcome {
    Linked,
    Cancelled,
}

/// Writes annotated records to a [`GameStore`].
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn GameStore>,
}

impl Persister {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self { store }
    }

    /// Insert the game and link every entity, with no cancellation.
    pub async fn persist(&self, record: &AnnotatedRecord) -> Result<PersistOutcome, PersistError> {
        self.persist_cancellable(record, &CancellationToken::new()).await
    }

    /// Insert the game and link every entity.
    ///
    /// Entity tasks check `cancel` once before touching the store; a task
    /// that sees it cancelled exits without a store call and without an
    /// error. Tasks already past the check run to completion.
    #[instrument(skip_all, fields(title = %record.title, entities = record.entities.len()))]
    pub async fn persist_cancellable(
        &self,
        record: &AnnotatedRecord,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome, PersistError> {
        let game_id = self
            .store
            .insert_game(&record.new_game())
            .await
            .map_err(|source| PersistError::GameInsert {
                title: record.title.clone(),
                source,
            })?;

        debug!(game_id = %game_id, "Inserted game");

        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::new();
        let mut ignored = 0;

        for span in &record.entities {
            let Some(kind) = kind_for(span.label) else {
                ignored += 1;
                continue;
            };

            let handle = tasks.spawn(link_task(
                self.store.clone(),
                cancel.clone(),
                game_id,
                kind,
                span.clone(),
            ));
            spawned.insert(handle.id(), (span.text.clone(), kind));
        }

        let mut linked = 0;
        let mut cancelled = 0;
        let mut errors = Vec::new();

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(LinkOutcome::Linked))) => linked += 1,
                Ok((_, Ok(LinkOutcome::Cancelled))) => cancelled += 1,
                Ok((_, Err(e))) => errors.push(e),
                Err(e) => match spawned.remove(&e.id()) {
                    Some((entity, kind)) => errors.push(join_failure(entity, kind, e)),
                    None => warn!(game_id = %game_id, error = %e, "Unknown link task failed"),
                },
            }
        }

        if !errors.is_empty() {
            return Err(PersistError::Links {
                game_id,
                linked,
                ignored,
                cancelled,
                errors,
            });
        }

        Ok(PersistOutcome {
            game_id,
            linked,
            ignored,
            cancelled,
        })
    }

    /// Consume records until `rx` closes.
    ///
    /// Record-level failures never stop the loop; they are logged and
    /// returned. Every record still gets its game row after `cancel` fires;
    /// only the entity tasks observe it.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<AnnotatedRecord>,
        cancel: CancellationToken,
        stats: Arc<PipelineStats>,
    ) -> Vec<FailureReport> {
        let mut failures = Vec::new();

        while let Some(record) = rx.recv().await {
            let timer = TimedOperation::start();
            let result = self.persist_cancellable(&record, &cancel).await;
            stats.record_persist_time(timer.elapsed());

            match result {
                Ok(outcome) => {
                    stats.record_game(true);
                    stats.record_links(outcome.linked, 0, outcome.ignored, outcome.cancelled);
                    debug!(
                        title = %record.title,
                        game_id = %outcome.game_id,
                        linked = outcome.linked,
                        "Persisted record"
                    );
                }
                Err(e) => {
                    match &e {
                        PersistError::GameInsert { .. } => stats.record_game(false),
                        PersistError::Links {
                            linked,
                            ignored,
                            cancelled,
                            errors,
                            ..
                        } => {
                            stats.record_game(true);
                            stats.record_links(*linked, errors.len(), *ignored, *cancelled);
                        }
                    }
                    warn!(title = %record.title, error = %e, "Failed to persist record");
                    failures.push(FailureReport::persist(&record.title, &e));
                }
            }
        }

        info!(
            failures = failures.len(),
            cancelled = cancel.is_cancelled(),
            "Persist stage finished"
        );
        failures
    }
}

async fn link_task(
    store: Arc<dyn GameStore>,
    cancel: CancellationToken,
    game_id: GameId,
    kind: EntityKind,
    span: EntitySpan,
) -> Result<LinkOutcome, LinkError> {
    if cancel.is_cancelled() {
        return Ok(LinkOutcome::Cancelled);
    }

    let linked = async {
        let entity_id = store.find_or_create(kind, &span.text).await?;
        store.insert_link(game_id, entity_id, kind).await
    };

    match linked.await {
        Ok(()) => Ok(LinkOutcome::Linked),
        Err(e) => Err(LinkError {
            entity: span.text,
            kind,
            cause: LinkCause::Store(e),
        }),
    }
}

/// Turn a task that panicked or was aborted into a failure for its entity.
fn join_failure(entity: String, kind: EntityKind, error: JoinError) -> LinkError {
    let cause = if error.is_panic() {
        LinkCause::Panicked(panic_message(error.into_panic()))
    } else {
        LinkCause::Aborted(error.to_string())
    };

    LinkError { entity, kind, cause }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use store::memory::StoreCall;
    use store::{EntityId, MemoryStore, NewGame, StoreCounts, StoreError};
    use std::time::Duration;

    fn record(title: &str, entities: &[(&str, EntityLabel)]) -> AnnotatedRecord {
        AnnotatedRecord {
            title: title.to_string(),
            body: format!("{} is a video game.", title),
            release_date: None,
            entities: entities
                .iter()
                .map(|(text, label)| EntitySpan::new(*text, *label))
                .collect(),
        }
    }

    fn persister(store: &Arc<MemoryStore>) -> Persister {
        Persister::new(store.clone())
    }

    #[tokio::test]
    async fn test_every_entity_attempted_exactly_once() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(2)));
        let rec = record(
            "Super Mario Bros.",
            &[
                ("Nintendo", EntityLabel::Developer),
                ("NES", EntityLabel::Platform),
                ("Platformer", EntityLabel::Genre),
                ("Mario", EntityLabel::Other),
                ("Famicom", EntityLabel::Platform),
            ],
        );

        let outcome = persister(&store).persist(&rec).await.unwrap();
        assert_eq!(outcome.linked, 4);
        assert_eq!(outcome.ignored, 1);

        let mut attempts: HashMap<String, usize> = HashMap::new();
        for call in store.calls() {
            if let StoreCall::FindOrCreate(_, name) = call {
                *attempts.entry(name).or_default() += 1;
            }
        }
        assert_eq!(attempts.len(), 4);
        assert!(attempts.values().all(|n| *n == 1));
        assert!(!attempts.contains_key("Mario"));
    }

    #[tokio::test]
    async fn test_game_insert_failure_starts_no_tasks() {
        let store = Arc::new(MemoryStore::new().failing_title("Doom"));
        let rec = record("Doom", &[("id Software", EntityLabel::Developer)]);

        let result = persister(&store).persist(&rec).await;

        assert!(matches!(result, Err(PersistError::GameInsert { .. })));
        assert_eq!(store.calls(), vec![StoreCall::InsertGame("Doom".to_string())]);
    }

    #[tokio::test]
    async fn test_aggregate_error_has_one_message_per_failure() {
        let store = Arc::new(
            MemoryStore::new()
                .failing_entity("Flaky Dev")
                .failing_entity("Flaky Platform")
                .failing_entity("Flaky Genre"),
        );
        let rec = record(
            "Chaos",
            &[
                ("Flaky Dev", EntityLabel::Developer),
                ("Flaky Platform", EntityLabel::Platform),
                ("Good Dev", EntityLabel::Developer),
                ("Flaky Genre", EntityLabel::Genre),
            ],
        );

        let err = persister(&store).persist(&rec).await.unwrap_err();

        let PersistError::Links { game_id, linked, ref errors, .. } = err else {
            panic!("expected link errors, got {:?}", err);
        };
        assert_eq!(linked, 1);
        assert_eq!(errors.len(), 3);

        let mut messages = err.messages();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), 3);
        for name in ["Flaky Dev", "Flaky Platform", "Flaky Genre"] {
            assert!(err.to_string().contains(&format!("({})", name)));
        }

        // the game row and the good link stay committed
        assert!(store.game(game_id).is_some());
        let good = store.entity_id(EntityKind::Developer, "Good Dev").unwrap();
        assert!(store.has_link(game_id, good, EntityKind::Developer));
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_all_entity_work() {
        let store = Arc::new(MemoryStore::new());
        let rec = record(
            "Halo",
            &[("Bungie", EntityLabel::Developer), ("Xbox", EntityLabel::Platform)],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = persister(&store).persist_cancellable(&rec, &cancel).await.unwrap();

        assert_eq!(outcome.linked, 0);
        assert_eq!(outcome.cancelled, 2);
        assert_eq!(store.calls(), vec![StoreCall::InsertGame("Halo".to_string())]);
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.developers, counts.platforms, counts.links), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_identical_developers_in_one_record_share_a_row() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(5)));
        let rec = record(
            "Metroid",
            &[
                ("Nintendo", EntityLabel::Developer),
                ("Nintendo", EntityLabel::Developer),
                ("Nintendo", EntityLabel::Developer),
            ],
        );

        let outcome = persister(&store).persist(&rec).await.unwrap();

        assert_eq!(outcome.linked, 3);
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.developers, 1);
        assert_eq!(counts.links, 1);
    }

    #[tokio::test]
    async fn test_empty_entity_list() {
        let store = Arc::new(MemoryStore::new());
        let outcome = persister(&store).persist(&record("Tetris", &[])).await.unwrap();

        assert_eq!(outcome.linked + outcome.ignored + outcome.cancelled, 0);
        assert_eq!(store.counts().await.unwrap().games, 1);
    }

    #[tokio::test]
    async fn test_run_continues_after_record_failure() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(4);
        let stats = PipelineStats::new();

        tx.send(record("", &[("Nobody", EntityLabel::Developer)])).await.unwrap();
        tx.send(record("Zelda", &[("Nintendo", EntityLabel::Developer)])).await.unwrap();
        drop(tx);

        let failures = persister(&store).run(rx, CancellationToken::new(), stats.clone()).await;

        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("failed to insert game"));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.games_persisted, 1);
        assert_eq!(snapshot.game_failures, 1);
        assert_eq!(snapshot.entities_linked, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_inserts_every_game() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(4);
        let stats = PipelineStats::new();
        let cancel = CancellationToken::new();

        tx.send(record("Halo", &[("Bungie", EntityLabel::Developer)])).await.unwrap();
        tx.send(record("Myst", &[("Cyan", EntityLabel::Developer)])).await.unwrap();
        cancel.cancel();
        drop(tx);

        let failures = persister(&store).run(rx, cancel, stats.clone()).await;

        assert!(failures.is_empty());
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.games, counts.developers, counts.links), (2, 0, 0));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.games_persisted, 2);
        assert_eq!(snapshot.entities_cancelled, 2);
    }

    #[tokio::test]
    async fn test_cancel_does_not_interrupt_started_links() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(20)));
        let rec = record(
            "Portal",
            &[
                ("Valve", EntityLabel::Developer),
                ("PC", EntityLabel::Platform),
                ("Puzzle", EntityLabel::Genre),
            ],
        );
        let cancel = CancellationToken::new();

        let running = {
            let persister = persister(&store);
            let cancel = cancel.clone();
            tokio::spawn(async move { persister.persist_cancellable(&rec, &cancel).await })
        };

        while !store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::FindOrCreate(..)))
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.linked, 3);
        assert_eq!(outcome.cancelled, 0);
        for (kind, name) in [
            (EntityKind::Developer, "Valve"),
            (EntityKind::Platform, "PC"),
            (EntityKind::Genre, "Puzzle"),
        ] {
            let id = store.entity_id(kind, name).unwrap();
            assert!(store.has_link(outcome.game_id, id, kind));
        }
    }

    /// Delegates to a [`MemoryStore`] but panics on one developer name.
    struct PanicsOn {
        inner: MemoryStore,
        developer: &'static str,
    }

    #[async_trait]
    impl GameStore for PanicsOn {
        async fn insert_game(&self, game: &NewGame) -> Result<GameId, StoreError> {
            self.inner.insert_game(game).await
        }

        async fn find_or_create_developer(&self, name: &str) -> Result<EntityId, StoreError> {
            if name == self.developer {
                panic!("developer lookup blew up");
            }
            self.inner.find_or_create_developer(name).await
        }

        async fn find_or_create_platform(&self, name: &str) -> Result<EntityId, StoreError> {
            self.inner.find_or_create_platform(name).await
        }

        async fn find_or_create_genre(&self, name: &str) -> Result<EntityId, StoreError> {
            self.inner.find_or_create_genre(name).await
        }

        async fn insert_link(
            &self,
            game_id: GameId,
            entity_id: EntityId,
            kind: EntityKind,
        ) -> Result<(), StoreError> {
            self.inner.insert_link(game_id, entity_id, kind).await
        }

        async fn counts(&self) -> Result<StoreCounts, StoreError> {
            self.inner.counts().await
        }
    }

    #[tokio::test]
    async fn test_panicking_link_task_is_reported_for_its_entity() {
        let store = Arc::new(PanicsOn {
            inner: MemoryStore::new(),
            developer: "Crash Team",
        });
        let rec = record(
            "Spyro",
            &[
                ("Crash Team", EntityLabel::Developer),
                ("Insomniac", EntityLabel::Developer),
            ],
        );

        let err = Persister::new(store.clone()).persist(&rec).await.unwrap_err();

        let PersistError::Links { linked, ref errors, .. } = err else {
            panic!("expected link errors, got {:?}", err);
        };
        assert_eq!(linked, 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].entity, "Crash Team");
        assert_eq!(errors[0].kind, EntityKind::Developer);
        assert!(matches!(&errors[0].cause, LinkCause::Panicked(msg) if msg.contains("blew up")));
        assert_eq!(store.inner.counts().await.unwrap().links, 1);
    }

    #[tokio::test]
    async fn test_aborted_task_maps_to_its_entity() {
        let mut tasks = JoinSet::new();
        let handle = tasks.spawn(std::future::pending::<()>());
        handle.abort();

        let error = tasks.join_next().await.unwrap().unwrap_err();
        let failure = join_failure("Bungie".to_string(), EntityKind::Developer, error);

        assert_eq!(failure.entity, "Bungie");
        assert!(matches!(failure.cause, LinkCause::Aborted(_)));
    }

    #[tokio::test]
    async fn test_run_counts_partial_records_accurately() {
        let store = Arc::new(MemoryStore::new().failing_entity("Flaky"));
        let (tx, rx) = mpsc::channel(4);
        let stats = PipelineStats::new();

        tx.send(record(
            "Quake",
            &[
                ("id Software", EntityLabel::Developer),
                ("Flaky", EntityLabel::Platform),
                ("Ranger", EntityLabel::Other),
            ],
        ))
        .await
        .unwrap();
        drop(tx);

        let failures = persister(&store).run(rx, CancellationToken::new(), stats.clone()).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failed_entities, vec!["Flaky"]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.games_persisted, 1);
        assert_eq!(snapshot.entities_linked, 1);
        assert_eq!(snapshot.entity_failures, 1);
        assert_eq!(snapshot.entities_ignored, 1);
    }
}
