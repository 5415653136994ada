use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::{EntityId, EntityKind, GameId, GameStore, NewGame, StoreCounts, StoreError};

/// Pool limits. The pool is the only thing bounding how many entity writes
/// run against Postgres at once.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 25,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            max_lifetime: Duration::from_secs(30 * 60),
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS games (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL CHECK (title <> ''),
        summary TEXT NOT NULL,
        release_date TEXT
    )",
    "CREATE TABLE IF NOT EXISTS developers (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL UNIQUE CHECK (name <> ''))",
    "CREATE TABLE IF NOT EXISTS platforms (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL UNIQUE CHECK (name <> ''))",
    "CREATE TABLE IF NOT EXISTS genres (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL UNIQUE CHECK (name <> ''))",
    "CREATE TABLE IF NOT EXISTS game_developers (
        game_id BIGINT NOT NULL REFERENCES games (id),
        developer_id BIGINT NOT NULL REFERENCES developers (id),
        PRIMARY KEY (game_id, developer_id)
    )",
    "CREATE TABLE IF NOT EXISTS game_platforms (
        game_id BIGINT NOT NULL REFERENCES games (id),
        platform_id BIGINT NOT NULL REFERENCES platforms (id),
        PRIMARY KEY (game_id, platform_id)
    )",
    "CREATE TABLE IF NOT EXISTS game_genres (
        game_id BIGINT NOT NULL REFERENCES games (id),
        genre_id BIGINT NOT NULL REFERENCES genres (id),
        PRIMARY KEY (game_id, genre_id)
    )",
];

// The no-op update makes RETURNING yield the existing id on conflict.
fn upsert_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Developer => {
            "INSERT INTO developers (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id"
        }
        EntityKind::Platform => {
            "INSERT INTO platforms (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id"
        }
        EntityKind::Genre => {
            "INSERT INTO genres (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id"
        }
    }
}

fn link_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Developer => {
            "INSERT INTO game_developers (game_id, developer_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        }
        EntityKind::Platform => {
            "INSERT INTO game_platforms (game_id, platform_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        }
        EntityKind::Genre => {
            "INSERT INTO game_genres (game_id, genre_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        }
    }
}

/// Postgres-backed [`GameStore`]. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(settings.idle_timeout)
            .max_lifetime(settings.max_lifetime)
            .connect(database_url)
            .await?;

        let store = Self::new(pool);
        store.ping().await?;

        tracing::info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Connected to Postgres"
        );
        Ok(store)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create the tables if they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        tracing::info!("Postgres schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn count(&self, sql: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(n as u64)
    }

    async fn upsert(&self, kind: EntityKind, name: &str) -> Result<EntityId, StoreError> {
        let id: i64 = sqlx::query_scalar(upsert_sql(kind))
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(EntityId(id))
    }
}

#[async_trait]
impl GameStore for PgStore {
    async fn insert_game(&self, game: &NewGame) -> Result<GameId, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO games (title, summary, release_date) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&game.title)
        .bind(&game.summary)
        .bind(game.release_date.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(GameId(id))
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
        sqlx::query(link_sql(kind))
            .bind(game_id.0)
            .bind(entity_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            games: self.count("SELECT count(*) FROM games").await?,
            developers: self.count("SELECT count(*) FROM developers").await?,
            platforms: self.count("SELECT count(*) FROM platforms").await?,
            genres: self.count("SELECT count(*) FROM genres").await?,
            links: self
                .count(
                    "SELECT (SELECT count(*) FROM game_developers)
                          + (SELECT count(*) FROM game_platforms)
                          + (SELECT count(*) FROM game_genres)",
                )
                .await?,
        })
    }
}
