//! # Game ingestion pipeline
//!
//! Moves articles from a [`ingest::TextSource`] into a [`store::GameStore`]:
//!
//! 1. **Fetch**: one source call, split into raw documents
//! 2. **Annotate**: entity extraction per document, failures skipped
//! 3. **Persist**: game row, then one concurrent link task per entity
//! 4. **Coordinator**: wires the stages with channels and joins them

pub mod annotate;
pub mod coordinator;
pub mod errors;
pub mod fetch;
pub mod persist;
pub mod record;
pub mod stats;

pub use annotate::Annotator;
pub use coordinator::{Pipeline, PipelineConfig, PipelineReport};
pub use errors::{FailureReport, LinkError, PersistError, PipelineError, Stage};
pub use persist::{PersistOutcome, Persister};
pub use record::AnnotatedRecord;
pub use stats::{PipelineStats, StatsSnapshot};

pub use tokio_util::sync::CancellationToken;
