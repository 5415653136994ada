use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::prompt;

/// Minimal client for Ollama's `/api/generate` endpoint in JSON mode.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

fn is_json(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text).is_ok()
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new("http://localhost:11434".to_string(), "llama3".to_string())
    }

    /// Bound every generate call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Ollama HTTP client")?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&self.request(prompt))
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {} for model {}: {}", status, self.model, body.trim());
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(generated.response)
    }

    /// Generate, asking the model to repair its own output when it is not JSON.
    pub async fn generate_json_with_retry(&self, prompt: &str, max_retries: usize) -> Result<String> {
        let mut output = self.generate(prompt).await?;

        for attempt in 1..=max_retries {
            if is_json(&output) {
                return Ok(output);
            }

            tracing::debug!(attempt, model = %self.model, "Model returned invalid JSON, asking for a fix");
            output = self.generate(&prompt::build_retry_prompt(&output)).await?;
        }

        if is_json(&output) {
            return Ok(output);
        }

        anyhow::bail!("No valid JSON from {} after {} repair attempts", self.model, max_retries)
    }
}
