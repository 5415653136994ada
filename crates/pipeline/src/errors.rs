//! Error types for the pipeline.
//!
//! Failures come in three sizes: [`PipelineError`] ends the run,
//! [`PersistError`] (and extraction errors) drop one record, and
//! [`LinkError`] loses one entity link of a record.

use serde::Serialize;
use store::{EntityKind, GameId, StoreError};
use thiserror::Error;

/// A single entity of a record that could not be linked.
#[derive(Debug, Error)]
#[error("failed to insert entity ({entity}): {cause}")]
pub struct LinkError {
    pub entity: String,
    pub kind: EntityKind,
    pub cause: LinkCause,
}

#[derive(Debug, Error)]
pub enum LinkCause {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("link task panicked: {0}")]
    Panicked(String),

    #[error("link task did not complete: {0}")]
    Aborted(String),
}

/// Record-level failure returned by the persist stage.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The game row itself was not written; no entity was attempted.
    #[error("failed to insert game {title:?}: {source}")]
    GameInsert {
        title: String,
        #[source]
        source: StoreError,
    },

    /// The game row exists but some of its links failed.
    #[error("multiple errors occurred for game {game_id}: [{}]", join_messages(.errors))]
    Links {
        game_id: GameId,
        linked: usize,
        ignored: usize,
        cancelled: usize,
        errors: Vec<LinkError>,
    },
}

fn join_messages(errors: &[LinkError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PersistError {
    /// One message per failed entity, or the single insert failure.
    pub fn messages(&self) -> Vec<String> {
        match self {
            PersistError::GameInsert { .. } => vec![self.to_string()],
            PersistError::Links { errors, .. } => errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn failed_entities(&self) -> Vec<String> {
        match self {
            PersistError::GameInsert { .. } => Vec::new(),
            PersistError::Links { errors, .. } => errors.iter().map(|e| e.entity.clone()).collect(),
        }
    }
}

/// Errors that stop a whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ingest::FetchError),

    #[error("{stage} stage did not complete: {message}")]
    StageAborted { stage: Stage, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Annotate,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Annotate => "annotate",
            Stage::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// An item- or subtask-level failure, as listed in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub stage: Stage,
    pub title: String,
    pub game_id: Option<GameId>,
    pub failed_entities: Vec<String>,
    pub message: String,
}

impl FailureReport {
    pub fn extraction(title: &str, error: &extract::ExtractError) -> Self {
        Self {
            stage: Stage::Annotate,
            title: title.to_string(),
            game_id: None,
            failed_entities: Vec::new(),
            message: error.to_string(),
        }
    }

    pub fn persist(title: &str, error: &PersistError) -> Self {
        let game_id = match error {
            PersistError::Links { game_id, .. } => Some(*game_id),
            PersistError::GameInsert { .. } => None,
        };

        Self {
            stage: Stage::Persist,
            title: title.to_string(),
            game_id,
            failed_entities: error.failed_entities(),
            message: error.to_string(),
        }
    }
}
