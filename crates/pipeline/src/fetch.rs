//! Fetch stage: one source call, fanned out as individual documents.

use ingest::{FetchError, RawDocument, TextSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::stats::PipelineStats;

/// Fetch `topic` once and send every document downstream.
///
/// The sender is dropped on return, which closes the handoff. Returns the
/// number of documents sent. A fetch error is returned as-is and is meant to
/// end the run.
#[instrument(skip(source, tx, stats))]
pub async fn run(
    source: Arc<dyn TextSource>,
    topic: String,
    tx: mpsc::Sender<RawDocument>,
    stats: Arc<PipelineStats>,
) -> Result<usize, FetchError> {
    let batch = source.fetch(&topic).await?;
    let documents = batch.into_documents();

    info!(documents = documents.len(), "Fetched source documents");

    let mut sent = 0;
    for doc in documents {
        if tx.send(doc).await.is_err() {
            debug!("Annotate stage stopped receiving; dropping remaining documents");
            break;
        }
        sent += 1;
    }

    stats.record_fetch(sent);
    Ok(sent)
}
