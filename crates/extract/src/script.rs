use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::{EntityExtractor, ExtractError, schema::EntitySpan};

/// Runs an external NER program once per document.
///
/// The document text is passed as the last argument; the program must print a
/// JSON array of `{"text": ..., "label": ...}` objects on stdout.
#[derive(Debug, Clone)]
pub struct ScriptExtractor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ScriptExtractor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// `python3 <script> <text>`, the layout of the bundled `ner.py`.
    pub fn python(python: impl Into<PathBuf>, script: impl Into<String>) -> Self {
        Self::new(python, vec![script.into()])
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run(&self, text: &str) -> Result<Vec<u8>, ExtractError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child)
                .await
                .map_err(|_| ExtractError::Timeout(limit))?,
            None => child.await,
        }
        .map_err(|source| ExtractError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(ExtractError::Exit {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl EntityExtractor for ScriptExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<EntitySpan>, ExtractError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let stdout = self.run(text).await?;
        serde_json::from_slice(&stdout).map_err(|e| ExtractError::Malformed(e.to_string()))
    }
}
