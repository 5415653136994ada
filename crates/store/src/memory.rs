use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::{
    EntityId, EntityKind, GameId, GameStore, NewGame, PersistedGame, StoreCounts, StoreError,
};

/// A call made against a [`MemoryStore`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    InsertGame(String),
    FindOrCreate(EntityKind, String),
    InsertLink(GameId, EntityId, EntityKind),
}

/// In-process [`GameStore`] used for dry runs and tests.
///
/// Mirrors the Postgres constraints: titles and names must be non-empty,
/// entity names are unique per kind, link pairs are unique. Failures can be
/// injected by title or entity name.
pub struct MemoryStore {
    next_id: AtomicI64,
    games: DashMap<GameId, PersistedGame>,
    entities: [DashMap<String, EntityId>; 3],
    links: DashSet<(GameId, EntityId, EntityKind)>,
    failing_titles: DashSet<String>,
    failing_names: DashSet<String>,
    latency: Option<Duration>,
    writes: AtomicUsize,
    calls: Mutex<Vec<StoreCall>>,
}

fn slot(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Developer => 0,
        EntityKind::Platform => 1,
        EntityKind::Genre => 2,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            games: DashMap::new(),
            entities: [DashMap::new(), DashMap::new(), DashMap::new()],
            links: DashSet::new(),
            failing_titles: DashSet::new(),
            failing_names: DashSet::new(),
            latency: None,
            writes: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every operation so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `insert_game` fail for this title.
    pub fn failing_title(self, title: impl Into<String>) -> Self {
        self.failing_titles.insert(title.into());
        self
    }

    /// Make `find_or_create_*` fail for this entity name.
    pub fn failing_entity(self, name: impl Into<String>) -> Self {
        self.failing_names.insert(name.into());
        self
    }

    pub fn game(&self, id: GameId) -> Option<PersistedGame> {
        self.games.get(&id).map(|g| g.value().clone())
    }

    /// All game rows, ordered by id.
    pub fn games(&self) -> Vec<PersistedGame> {
        let mut games: Vec<_> = self.games.iter().map(|g| g.value().clone()).collect();
        games.sort_by_key(|g| g.id);
        games
    }

    pub fn entity_id(&self, kind: EntityKind, name: &str) -> Option<EntityId> {
        self.entities[slot(kind)].get(name).map(|id| *id.value())
    }

    pub fn has_link(&self, game_id: GameId, entity_id: EntityId, kind: EntityKind) -> bool {
        self.links.contains(&(game_id, entity_id, kind))
    }

    /// Number of store calls made so far, including failed ones.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    async fn enter(&self, call: StoreCall) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    async fn upsert(&self, kind: EntityKind, name: &str) -> Result<EntityId, StoreError> {
        self.enter(StoreCall::FindOrCreate(kind, name.to_string())).await;

        if self.failing_names.contains(name) {
            return Err(StoreError::Unavailable(format!(
                "connection reset while upserting {} {:?}",
                kind, name
            )));
        }
        if name.is_empty() {
            return Err(StoreError::Constraint(format!("{} name must not be empty", kind)));
        }

        // entry() holds the shard lock, so check and insert happen as one step
        let id = *self.entities[slot(kind)]
            .entry(name.to_string())
            .or_insert_with(|| EntityId(self.next_id.fetch_add(1, Ordering::SeqCst)));
        Ok(id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn insert_game(&self, game: &NewGame) -> Result<GameId, StoreError> {
        self.enter(StoreCall::InsertGame(game.title.clone())).await;

        if self.failing_titles.contains(&game.title) {
            return Err(StoreError::Unavailable(format!(
                "connection reset while inserting game {:?}",
                game.title
            )));
        }
        if game.title.is_empty() {
            return Err(StoreError::Constraint("game title must not be empty".to_string()));
        }

        let id = GameId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.games.insert(
            id,
            PersistedGame {
                id,
                title: game.title.clone(),
                summary: game.summary.clone(),
                release_date: game.release_date.clone(),
            },
        );
        Ok(id)
    }

    async fn find_or_create_developer(&self, name: &str) -> Result<EntityId, StoreError> {
        self.upsert(EntityKind::Developer, name).await
    }

    async fn find_or_create_platform(&self, name: &str) -> Result<EntityId, StoreError> {
        self.upsert(EntityKind::Platform, name).await
    }

    async fn find_or_create_genre(&self, name: &str) -> Result<EntityId, StoreError> {
        self.upsert(EntityKind::Genre, name).await
    }

    async fn insert_link(
        &self,
        game_id: GameId,
        entity_id: EntityId,
        kind: EntityKind,
    ) -> Result<(), StoreError> {
        self.enter(StoreCall::InsertLink(game_id, entity_id, kind)).await;

        if !self.games.contains_key(&game_id) {
            return Err(StoreError::Constraint(format!("game {} does not exist", game_id)));
        }
        self.links.insert((game_id, entity_id, kind));
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            games: self.games.len() as u64,
            developers: self.entities[slot(EntityKind::Developer)].len() as u64,
            platforms: self.entities[slot(EntityKind::Platform)].len() as u64,
            genres: self.entities[slot(EntityKind::Genre)].len() as u64,
            links: self.links.len() as u64,
        })
    }
}
