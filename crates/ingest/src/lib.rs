pub mod document;
pub mod reader;
pub mod wikipedia;

pub use document::{RawDocument, SourceBatch, SourcePage};
pub use reader::FileReader;
pub use wikipedia::WikipediaClient;

use async_trait::async_trait;

/// Errors raised while fetching source text. Any of these aborts a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("source returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("malformed source response: {0}")]
    Malformed(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Producer of raw (title, body) pairs for a topic.
///
/// One call yields one logical unit; the fetch stage decomposes it into
/// individual documents.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn fetch(&self, topic: &str) -> Result<SourceBatch, FetchError>;
}
