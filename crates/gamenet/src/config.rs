use anyhow::{Context, Result, bail};
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use store::PoolSettings;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub postgres: PostgresConfig,
    pub source: SourceConfig,
    pub extractor: ExtractorConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorMode {
    Script, // spaCy subprocess
    Ollama, // local LLM over HTTP
}

impl FromStr for ExtractorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script" => Ok(ExtractorMode::Script),
            "ollama" => Ok(ExtractorMode::Ollama),
            other => bail!("unknown extractor mode {:?} (expected script or ollama)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection string; takes precedence over the individual parts.
    pub url: Option<String>,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub wiki_api_url: String,
    pub user_agent: String,
    pub intro_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub mode: ExtractorMode,
    pub python: String,
    pub script: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub timeout_secs: u64,
    /// Re-prompts when the model returns invalid JSON.
    pub max_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_extractions: usize,
    pub fetch_buffer: usize,
    pub annotate_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            postgres: PostgresConfig {
                url: None,
                user: "postgres".to_string(),
                password: String::new(),
                host: "localhost".to_string(),
                port: 5432,
                database: "gamenet".to_string(),
                max_connections: 25,
                min_connections: 5,
                acquire_timeout_secs: 30,
                idle_timeout_secs: 600,
                max_lifetime_secs: 1800,
            },
            source: SourceConfig {
                wiki_api_url: "https://en.wikipedia.org/w/api.php".to_string(),
                user_agent: ingest::wikipedia::DEFAULT_USER_AGENT.to_string(),
                intro_only: false,
            },
            extractor: ExtractorConfig {
                mode: ExtractorMode::Script,
                python: "python3".to_string(),
                script: "scripts/ner.py".to_string(),
                ollama_url: "http://localhost:11434".to_string(),
                ollama_model: "llama3".to_string(),
                timeout_secs: 60,
                max_retries: 3,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 4,
                fetch_buffer: 64,
                annotate_buffer: 64,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
        }
    }
}

impl AppConfig {
    /// Larger pool and more extraction workers, for multi-page topics.
    pub fn bulk() -> Self {
        let mut config = Self::default();
        config.postgres.max_connections = 50;
        config.postgres.min_connections = 10;
        config.source.intro_only = true;
        config.concurrency = ConcurrencyConfig {
            max_concurrent_extractions: 16,
            fetch_buffer: 256,
            annotate_buffer: 256,
        };
        config.retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 20000,
        };
        config
    }

    /// Overlay process environment variables on `base`. The caller loads
    /// `.env` first.
    pub fn from_env(base: Self) -> Result<Self> {
        let mut config = base;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values found through `lookup`. Unset keys keep their current value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pg = &mut self.postgres;
        if let Some(url) = lookup("DATABASE_URL") {
            pg.url = Some(url);
        }
        set(&lookup, "POSTGRES_USER", &mut pg.user)?;
        set(&lookup, "POSTGRES_PASS", &mut pg.password)?;
        set(&lookup, "POSTGRES_HOST", &mut pg.host)?;
        set(&lookup, "POSTGRES_PORT", &mut pg.port)?;
        set(&lookup, "GAMENET_DB", &mut pg.database)?;
        set(&lookup, "PG_MAX_CONNECTIONS", &mut pg.max_connections)?;
        set(&lookup, "PG_MIN_CONNECTIONS", &mut pg.min_connections)?;

        set(&lookup, "WIKI_API_URL", &mut self.source.wiki_api_url)?;
        set(&lookup, "WIKI_USER_AGENT", &mut self.source.user_agent)?;

        let ex = &mut self.extractor;
        set(&lookup, "EXTRACTOR", &mut ex.mode)?;
        set(&lookup, "NER_PYTHON", &mut ex.python)?;
        set(&lookup, "NER_SCRIPT", &mut ex.script)?;
        set(&lookup, "OLLAMA_URL", &mut ex.ollama_url)?;
        set(&lookup, "OLLAMA_MODEL", &mut ex.ollama_model)?;
        set(&lookup, "EXTRACTOR_TIMEOUT_SECS", &mut ex.timeout_secs)?;

        set(
            &lookup,
            "MAX_CONCURRENT_EXTRACTIONS",
            &mut self.concurrency.max_concurrent_extractions,
        )?;

        if self.postgres.min_connections > self.postgres.max_connections {
            bail!(
                "PG_MIN_CONNECTIONS ({}) exceeds PG_MAX_CONNECTIONS ({})",
                self.postgres.min_connections,
                self.postgres.max_connections
            );
        }

        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            fetch_buffer: self.concurrency.fetch_buffer,
            annotate_buffer: self.concurrency.annotate_buffer,
            max_concurrent_extractions: self.concurrency.max_concurrent_extractions,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }
}

impl PostgresConfig {
    pub fn database_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgresql://{}:{}@{}:{}/{}?sslmode=disable",
                self.user, self.password, self.host, self.port, self.database
            ),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
        }
    }
}

fn set<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_url_from_parts() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("POSTGRES_USER", "gamer"),
                ("POSTGRES_PASS", "hunter2"),
                ("POSTGRES_HOST", "db"),
                ("POSTGRES_PORT", "5433"),
                ("GAMENET_DB", "games"),
            ]))
            .unwrap();

        assert_eq!(
            config.postgres.database_url(),
            "postgresql://gamer:hunter2@db:5433/games?sslmode=disable"
        );
    }

    #[test]
    fn test_database_url_wins() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("DATABASE_URL", "postgres://localhost/other"),
                ("POSTGRES_HOST", "ignored"),
            ]))
            .unwrap();

        assert_eq!(config.postgres.database_url(), "postgres://localhost/other");
    }

    #[test]
    fn test_unset_keys_keep_base_values() {
        let mut config = AppConfig::bulk();
        config.apply_env(env(&[("OLLAMA_MODEL", "mistral")])).unwrap();

        assert_eq!(config.extractor.ollama_model, "mistral");
        assert_eq!(config.concurrency.max_concurrent_extractions, 16);
        assert_eq!(config.pipeline_config().fetch_buffer, 256);
        assert_eq!(config.postgres.pool_settings().max_connections, 50);
    }

    #[test]
    fn test_invalid_number_names_the_key() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("POSTGRES_PORT", "fivefourthreetwo")]))
            .unwrap_err();

        assert!(format!("{:#}", err).contains("POSTGRES_PORT"));
    }

    #[test]
    fn test_extractor_mode_from_env() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("EXTRACTOR", "Ollama")])).unwrap();
        assert_eq!(config.extractor.mode, ExtractorMode::Ollama);

        assert!(config.apply_env(env(&[("EXTRACTOR", "regex")])).is_err());
    }

    #[test]
    fn test_wiki_user_agent() {
        let mut config = AppConfig::default();
        assert!(config.source.user_agent.starts_with("gamenet/"));

        config
            .apply_env(env(&[("WIKI_USER_AGENT", "gamenet/0.1 (ops@example.org)")]))
            .unwrap();
        assert_eq!(config.source.user_agent, "gamenet/0.1 (ops@example.org)");
    }

    #[test]
    fn test_pool_bounds_checked() {
        let mut config = AppConfig::default();
        let result = config.apply_env(env(&[
            ("PG_MAX_CONNECTIONS", "2"),
            ("PG_MIN_CONNECTIONS", "8"),
        ]));
        assert!(result.is_err());
    }
}
