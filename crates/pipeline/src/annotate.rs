//! Annotate stage: entity extraction for each fetched document.

use extract::{EntityExtractor, ExtractError};
use futures::StreamExt;
use ingest::RawDocument;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::errors::FailureReport;
use crate::record::AnnotatedRecord;
use crate::stats::{PipelineStats, TimedOperation};

/// Runs the extractor over incoming documents.
///
/// Up to `max_concurrent` extractions are in flight at once; records leave
/// in the order their documents arrived.
pub struct Annotator {
    extractor: Arc<dyn EntityExtractor>,
    max_concurrent: usize,
}

impl Annotator {
    pub fn new(extractor: Arc<dyn EntityExtractor>, max_concurrent: usize) -> Self {
        Self {
            extractor,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Extract entities from one document.
    pub async fn annotate(&self, doc: RawDocument) -> Result<AnnotatedRecord, ExtractError> {
        annotate_with(self.extractor.clone(), doc).await
    }

    /// Consume documents until `rx` closes, forwarding records to `tx`.
    ///
    /// Extraction failures are logged, reported and skipped. `tx` is dropped
    /// only after every in-flight extraction has finished.
    #[instrument(skip_all, fields(max_concurrent = self.max_concurrent))]
    pub async fn run(
        &self,
        rx: mpsc::Receiver<RawDocument>,
        tx: mpsc::Sender<AnnotatedRecord>,
        stats: Arc<PipelineStats>,
    ) -> Vec<FailureReport> {
        let mut failures = Vec::new();

        let extractor = self.extractor.clone();
        let mut results = ReceiverStream::new(rx)
            .map(move |doc| {
                let extractor = extractor.clone();
                async move {
                    let title = doc.title.clone();
                    let timer = TimedOperation::start();
                    let result = annotate_with(extractor, doc).await;
                    (title, timer.elapsed(), result)
                }
            })
            .buffered(self.max_concurrent);

        while let Some((title, elapsed, result)) = results.next().await {
            match result {
                Ok(record) => {
                    stats.record_extract(elapsed, Some(record.entities.len()));
                    debug!(title = %record.title, entities = record.entities.len(), "Annotated document");

                    if tx.send(record).await.is_err() {
                        debug!("Persist stage stopped receiving; ending annotation");
                        break;
                    }
                }
                Err(e) => {
                    stats.record_extract(elapsed, None);
                    warn!(title = %title, error = %e, "Entity extraction failed; skipping document");
                    failures.push(FailureReport::extraction(&title, &e));
                }
            }
        }

        info!(failures = failures.len(), "Annotate stage finished");
        failures
    }
}

async fn annotate_with(
    extractor: Arc<dyn EntityExtractor>,
    doc: RawDocument,
) -> Result<AnnotatedRecord, ExtractError> {
    let entities = extractor.extract(&doc.body).await?;
    Ok(AnnotatedRecord::new(doc, entities))
}
