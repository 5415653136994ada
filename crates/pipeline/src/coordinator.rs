use ingest::TextSource;
use extract::EntityExtractor;
use serde::Serialize;
use std::sync::Arc;
use store::GameStore;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::annotate::Annotator;
use crate::errors::{FailureReport, PipelineError, Stage};
use crate::fetch;
use crate::persist::Persister;
use crate::stats::{PipelineStats, StatsSnapshot};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of the Fetch -> Annotate channel.
    pub fetch_buffer: usize,
    /// Capacity of the Annotate -> Persist channel.
    pub annotate_buffer: usize,
    pub max_concurrent_extractions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_buffer: 64,
            annotate_buffer: 64,
            max_concurrent_extractions: 4,
        }
    }
}

/// Outcome of a run that was not aborted by a fetch failure.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub topic: String,
    pub stats: StatsSnapshot,
    pub failures: Vec<FailureReport>,
    pub cancelled: bool,
}

impl PipelineReport {
    /// No item or subtask failed and nothing was skipped by cancellation.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Wires Fetch, Annotate and Persist together for one topic.
pub struct Pipeline {
    source: Arc<dyn TextSource>,
    extractor: Arc<dyn EntityExtractor>,
    store: Arc<dyn GameStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn TextSource>,
        extractor: Arc<dyn EntityExtractor>,
        store: Arc<dyn GameStore>,
    ) -> Self {
        Self::with_config(source, extractor, store, PipelineConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn TextSource>,
        extractor: Arc<dyn EntityExtractor>,
        store: Arc<dyn GameStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            extractor,
            store,
            config,
        }
    }

    /// Run one batch: a single fetch, then every document through to the store.
    ///
    /// All three stages are joined before returning, whatever the outcome.
    /// `cancel` only reaches the entity tasks of the persist stage; game rows
    /// are still written. A fetch failure closes the document channel, the
    /// later stages drain, and the failure is returned as the run's error.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn run(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<PipelineReport, PipelineError> {
        let stats = PipelineStats::new();

        let (doc_tx, doc_rx) = mpsc::channel(self.config.fetch_buffer.max(1));
        let (rec_tx, rec_rx) = mpsc::channel(self.config.annotate_buffer.max(1));

        let fetch_handle = tokio::spawn(fetch::run(
            self.source.clone(),
            topic.to_string(),
            doc_tx,
            stats.clone(),
        ));

        let annotator = Annotator::new(self.extractor.clone(), self.config.max_concurrent_extractions);
        let annotate_stats = stats.clone();
        let annotate_handle =
            tokio::spawn(async move { annotator.run(doc_rx, rec_tx, annotate_stats).await });

        let persister = Persister::new(self.store.clone());
        let persist_stats = stats.clone();
        let persist_token = cancel.clone();
        let persist_handle =
            tokio::spawn(async move { persister.run(rec_rx, persist_token, persist_stats).await });

        let fetched = fetch_handle.await;
        let annotated = annotate_handle.await;
        let persisted = persist_handle.await;

        let fetched = fetched.map_err(|e| aborted(Stage::Fetch, e))?;
        if let Err(e) = fetched {
            error!(error = %e, "Fetch failed; run aborted");
            return Err(PipelineError::Fetch(e));
        }

        let mut failures = annotated.map_err(|e| aborted(Stage::Annotate, e))?;
        failures.extend(persisted.map_err(|e| aborted(Stage::Persist, e))?);

        let report = PipelineReport {
            topic: topic.to_string(),
            stats: stats.snapshot(),
            failures,
            cancelled: cancel.is_cancelled(),
        };

        info!(
            documents = report.stats.documents_fetched,
            games = report.stats.games_persisted,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "Pipeline finished"
        );

        Ok(report)
    }
}

fn aborted(stage: Stage, e: JoinError) -> PipelineError {
    error!(stage = %stage, error = %e, "Stage task did not complete");
    PipelineError::StageAborted {
        stage,
        message: e.to_string(),
    }
}
