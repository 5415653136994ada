//! Relational store for games and the developers, platforms and genres
//! linked to them.
//!
//! Child entities are keyed by exact name. `find_or_create_*` is a single
//! atomic operation in every backend, so concurrent callers asking for the
//! same new name all receive the same id.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, PoolSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub i64);

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Child entity tables a game can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Developer,
    Platform,
    Genre,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Developer, EntityKind::Platform, EntityKind::Genre];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Developer => "developer",
            EntityKind::Platform => "platform",
            EntityKind::Genre => "genre",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values for a new game row. Every insert creates a new row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGame {
    pub title: String,
    pub summary: String,
    pub release_date: Option<String>,
}

/// A game row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedGame {
    pub id: GameId,
    pub title: String,
    pub summary: String,
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub games: u64,
    pub developers: u64,
    pub platforms: u64,
    pub genres: u64,
    pub links: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the same call could succeed if repeated later: connection
    /// and pool problems, as opposed to bad SQL, bad credentials or
    /// constraint violations.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            StoreError::Unavailable(_) => true,
            StoreError::Constraint(_) => false,
        }
    }
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn insert_game(&self, game: &NewGame) -> Result<GameId, StoreError>;

    async fn find_or_create_developer(&self, name: &str) -> Result<EntityId, StoreError>;

    async fn find_or_create_platform(&self, name: &str) -> Result<EntityId, StoreError>;

    async fn find_or_create_genre(&self, name: &str) -> Result<EntityId, StoreError>;

    /// Link a game to a child entity. Linking the same pair twice is a no-op.
    async fn insert_link(
        &self,
        game_id: GameId,
        entity_id: EntityId,
        kind: EntityKind,
    ) -> Result<(), StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;

    async fn find_or_create(&self, kind: EntityKind, name: &str) -> Result<EntityId, StoreError> {
        match kind {
            EntityKind::Developer => self.find_or_create_developer(name).await,
            EntityKind::Platform => self.find_or_create_platform(name).await,
            EntityKind::Genre => self.find_or_create_genre(name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(StoreError::Unavailable("connection reset".to_string()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::Constraint("game title must not be empty".to_string()).is_transient());
    }

    #[test]
    fn test_entity_kind_names() {
        let names: Vec<_> = EntityKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["developer", "platform", "genre"]);
    }
}
