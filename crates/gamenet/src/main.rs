mod config;
mod retry;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use extract::{EntityExtractor, LlmExtractor, Normalized, OllamaClient, ScriptExtractor};
use ingest::{FileReader, TextSource, WikipediaClient};
use pipeline::{CancellationToken, Pipeline, PipelineReport};
use std::sync::Arc;
use std::time::Duration;
use store::{GameStore, MemoryStore, PgStore, StoreError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{AppConfig, ExtractorConfig, ExtractorMode};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceKind {
    /// MediaWiki extracts API
    Wiki,
    /// Local .txt/.md files
    Files,
}

#[derive(Parser)]
#[command(name = "gamenet", about = "Fetch game articles, extract entities and store them")]
struct Cli {
    /// Article title(s), `|`-separated, or a file/directory with --source files
    #[arg(long)]
    topic: String,

    #[arg(long, value_enum, default_value_t = SourceKind::Wiki)]
    source: SourceKind,

    /// Overrides EXTRACTOR from the environment
    #[arg(long, value_enum)]
    extractor: Option<ExtractorMode>,

    /// Use the in-memory store instead of Postgres
    #[arg(long)]
    dry_run: bool,

    /// Create missing tables before the run
    #[arg(long)]
    init_schema: bool,

    /// Start from the bulk preset instead of the defaults
    #[arg(long)]
    bulk: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn build_source(kind: SourceKind, config: &AppConfig) -> Arc<dyn TextSource> {
    match kind {
        SourceKind::Wiki => Arc::new(
            WikipediaClient::new(config.source.wiki_api_url.clone())
                .with_user_agent(config.source.user_agent.clone())
                .with_intro_only(config.source.intro_only),
        ),
        SourceKind::Files => Arc::new(FileReader),
    }
}

fn build_extractor(config: &ExtractorConfig) -> Result<Arc<dyn EntityExtractor>> {
    let timeout = Duration::from_secs(config.timeout_secs);

    let extractor: Arc<dyn EntityExtractor> = match config.mode {
        ExtractorMode::Script => Arc::new(Normalized::new(
            ScriptExtractor::python(&config.python, config.script.clone()).with_timeout(timeout),
        )),
        ExtractorMode::Ollama => {
            let client = OllamaClient::new(config.ollama_url.clone(), config.ollama_model.clone())
                .with_timeout(timeout)?;
            Arc::new(LlmExtractor::new(client).with_max_retries(config.max_retries))
        }
    };

    info!(mode = ?config.mode, "Extractor ready");
    Ok(extractor)
}

async fn connect_store(config: &AppConfig, init_schema: bool) -> Result<PgStore> {
    let url = config.postgres.database_url();
    let url = url.as_str();
    let settings = config.postgres.pool_settings();
    let settings = &settings;

    let store = config
        .retry_policy()
        .retry_when(
            "postgres_connect",
            move || PgStore::connect(url, settings),
            StoreError::is_transient,
        )
        .await
        .with_context(|| {
            format!(
                "Failed to connect to Postgres at {}:{}/{}",
                config.postgres.host, config.postgres.port, config.postgres.database
            )
        })?;

    if init_schema {
        store.init_schema().await.context("Failed to create schema")?;
    }

    Ok(store)
}

fn log_report(report: &PipelineReport) {
    for failure in &report.failures {
        warn!(
            stage = %failure.stage,
            title = %failure.title,
            failed_entities = ?failure.failed_entities,
            message = %failure.message,
            "Record did not complete"
        );
    }

    info!(
        fetched = report.stats.documents_fetched,
        annotated = report.stats.documents_annotated,
        games = report.stats.games_persisted,
        linked = report.stats.entities_linked,
        ignored = report.stats.entities_ignored,
        failures = report.failures.len(),
        cancelled = report.cancelled,
        avg_extract_ms = report.stats.avg_extract_time_ms,
        avg_persist_ms = report.stats.avg_persist_time_ms,
        "Run summary"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // before tracing, so RUST_LOG and LOG_FORMAT can come from .env
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let base = if cli.bulk { AppConfig::bulk() } else { AppConfig::default() };
    let mut config = AppConfig::from_env(base).context("Failed to load configuration")?;
    if let Some(mode) = cli.extractor {
        config.extractor.mode = mode;
    }

    let source = build_source(cli.source, &config);
    let extractor = build_extractor(&config.extractor)?;

    let store: Arc<dyn GameStore> = if cli.dry_run {
        info!("Dry run: writing to the in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(connect_store(&config, cli.init_schema).await?)
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; skipping entity links not yet started");
            interrupt.cancel();
        }
    });

    let pipeline = Pipeline::with_config(source, extractor, store.clone(), config.pipeline_config());
    let report = pipeline
        .run(&cli.topic, cancel)
        .await
        .with_context(|| format!("Run for {:?} aborted", cli.topic))?;

    log_report(&report);

    match store.counts().await {
        Ok(counts) => info!(
            games = counts.games,
            developers = counts.developers,
            platforms = counts.platforms,
            genres = counts.genres,
            links = counts.links,
            "Store totals"
        ),
        Err(e) => warn!(error = %e, "Could not read store totals"),
    }

    if cli.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
