pub mod schema;
pub mod normalizer;
pub mod llm;
pub mod prompt;
pub mod release;
pub mod script;

pub use schema::{EntityLabel, EntitySpan, ExtractionResult};
pub use normalizer::EntityNormalizer;
pub use llm::OllamaClient;
pub use release::find_release_year;
pub use script::ScriptExtractor;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Failure of a single extraction call. Callers treat it as fatal for that
/// document only.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extractor exited with status {status:?}: {stderr}")]
    Exit { status: Option<i32>, stderr: String },

    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed extractor output: {0}")]
    Malformed(String),

    #[error("extraction backend failed: {0}")]
    Backend(String),
}

/// Text in, labeled spans out. An empty result is not an error.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, ExtractError>;
}

/// Extractor backed by a local Ollama model.
pub struct LlmExtractor {
    llm_client: OllamaClient,
    normalizer: EntityNormalizer,
    max_retries: usize,
}

impl LlmExtractor {
    pub fn new(llm_client: OllamaClient) -> Self {
        Self {
            llm_client,
            normalizer: EntityNormalizer::new(),
            max_retries: 3,
        }
    }

    pub fn default() -> Self {
        Self::new(OllamaClient::default())
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn parse(&self, json_str: &str) -> Result<Vec<EntitySpan>, ExtractError> {
        let result: ExtractionResult = serde_json::from_str(json_str)
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;

        Ok(self.normalizer.normalize_spans(result.entities))
    }
}

#[async_trait]
impl EntityExtractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, ExtractError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let prompt = prompt::build_extraction_prompt(text);

        let json_str = self.llm_client
            .generate_json_with_retry(&prompt, self.max_retries)
            .await
            .map_err(|e| ExtractError::Backend(format!("{:#}", e)))?;

        self.parse(&json_str)
    }
}

/// Applies span cleanup to whatever another extractor returns.
pub struct Normalized<E> {
    inner: E,
    normalizer: EntityNormalizer,
}

impl<E: EntityExtractor> Normalized<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            normalizer: EntityNormalizer::new(),
        }
    }
}

#[async_trait]
impl<E: EntityExtractor> EntityExtractor for Normalized<E> {
    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, ExtractError> {
        let spans = self.inner.extract(text).await?;
        Ok(self.normalizer.normalize_spans(spans))
    }
}

/// Adapts a synchronous extraction function. Calls run on the blocking pool
/// so a slow model never stalls the async workers.
pub struct BlockingExtractor<F> {
    func: Arc<F>,
}

impl<F> BlockingExtractor<F>
where
    F: Fn(&str) -> Result<Vec<EntitySpan>, ExtractError> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func: Arc::new(func) }
    }
}

#[async_trait]
impl<F> EntityExtractor for BlockingExtractor<F>
where
    F: Fn(&str) -> Result<Vec<EntitySpan>, ExtractError> + Send + Sync + 'static,
{
    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, ExtractError> {
        let func = self.func.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || func(&text))
            .await
            .map_err(|e| ExtractError::Backend(format!("extraction task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_output_parsing() {
        let extractor = LlmExtractor::default();

        let spans = extractor
            .parse(r#"{"entities": [{"text": " Bungie ", "label": "Developer"}, {"text": "shooter", "label": "genre"}]}"#)
            .unwrap();
        assert_eq!(
            spans,
            vec![
                EntitySpan::new("Bungie", EntityLabel::Developer),
                EntitySpan::new("shooter", EntityLabel::Genre),
            ]
        );
    }

    #[test]
    fn test_llm_output_wrong_shape() {
        let extractor = LlmExtractor::default();
        let result = extractor.parse(r#"[{"text": "Bungie", "label": "Developer"}]"#);
        assert!(matches!(result, Err(ExtractError::Malformed(_))));
    }

    struct Fixed(Vec<EntitySpan>);

    #[async_trait]
    impl EntityExtractor for Fixed {
        async fn extract(&self, _text: &str) -> Result<Vec<EntitySpan>, ExtractError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_blocking_extractor() {
        let extractor = BlockingExtractor::new(|text: &str| {
            if text.contains("Nintendo") {
                Ok(vec![EntitySpan::new("Nintendo", EntityLabel::Developer)])
            } else {
                Err(ExtractError::Malformed("no output".to_string()))
            }
        });

        let spans = extractor.extract("Developed by Nintendo").await.unwrap();
        assert_eq!(spans.len(), 1);
        assert!(extractor.extract("nothing").await.is_err());
    }

    #[tokio::test]
    async fn test_normalized_wrapper() {
        let extractor = Normalized::new(Fixed(vec![
            EntitySpan::new("  Valve\nCorporation ", EntityLabel::Developer),
            EntitySpan::new("", EntityLabel::Platform),
        ]));

        let spans = extractor.extract("Half-Life").await.unwrap();
        assert_eq!(spans, vec![EntitySpan::new("Valve Corporation", EntityLabel::Developer)]);
    }
}
