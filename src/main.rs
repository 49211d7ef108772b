//! # Test Taxonomy CLI (`taxo`)
//!
//! The `taxo` binary runs the classification pipeline over a JSON list of
//! test files and prints the resulting taxonomy.
//!
//! ## Usage
//!
//! ```bash
//! taxo --config ./config/taxo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `taxo init` | Create the SQLite checkpoint database and schema |
//! | `taxo plan <tests.json>` | Show how the input would be chunked |
//! | `taxo classify <tests.json> --language <lang>` | Classify and print taxonomy JSON |
//!
//! ## Examples
//!
//! ```bash
//! # Preview chunking for a large suite
//! taxo plan ./tests.json --config ./config/taxo.toml
//!
//! # Classify, resuming a previous interrupted run of the same analysis
//! taxo classify ./tests.json --language java --analysis-id repo-42
//!
//! # Machine-readable progress on stderr
//! taxo --progress json classify ./tests.json --language go > taxonomy.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use test_taxonomy::checkpoint::{InMemoryProgressStore, ProgressStore};
use test_taxonomy::chunk::{self, TokenBudget};
use test_taxonomy::classify::Classifier;
use test_taxonomy::config::{self, Config};
use test_taxonomy::models::FileGroup;
use test_taxonomy::progress::ProgressMode;
use test_taxonomy::provider::create_provider;
use test_taxonomy::reliability::ReliableClient;
use test_taxonomy::sqlite_store::SqliteProgressStore;

/// Test Taxonomy CLI: classify a test suite into business domains and
/// features.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Every section is optional.
#[derive(Parser)]
#[command(
    name = "taxo",
    about = "Classify a test suite into a domain/feature taxonomy",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/taxo.toml")]
    config: PathBuf,

    /// Progress output on stderr: off, human, json.
    ///
    /// Defaults to human on a terminal, off otherwise.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite checkpoint database.
    ///
    /// Idempotent. Only needed when `checkpoint.backend = "sqlite"`.
    Init,

    /// Partition the input and print chunk statistics. Makes no AI calls.
    Plan {
        /// JSON file with an array of test files.
        input: PathBuf,
    },

    /// Classify all tests and print the taxonomy JSON on stdout.
    Classify {
        /// JSON file with an array of test files.
        input: PathBuf,

        /// Language of the test suite, used in the prompt.
        #[arg(long)]
        language: String,

        /// Identifier keying the resumable checkpoint.
        ///
        /// Defaults to a hash of the input content.
        #[arg(long, default_value = "")]
        analysis_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TAXO_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Missing config falls back to defaults; a present but invalid one is an error.
    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };

    match cli.command {
        Commands::Init => {
            SqliteProgressStore::open(&cfg.checkpoint.path).await?;
            println!(
                "Checkpoint store initialized at {}",
                cfg.checkpoint.path.display()
            );
        }
        Commands::Plan { input } => {
            let files = read_input(&input)?;
            let budget = TokenBudget::from(&cfg.chunking);
            let plan = chunk::plan(&files, cfg.chunking.max_tests, &budget);
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Classify {
            input,
            language,
            analysis_id,
        } => {
            let mode = match cli.progress.as_deref() {
                Some(s) => ProgressMode::parse(s)
                    .with_context(|| format!("unknown progress mode: {} (off|human|json)", s))?,
                None => ProgressMode::default_for_tty(),
            };
            run_classify(&cfg, &input, &language, &analysis_id, mode).await?;
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<FileGroup>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input file: {}", path.display()))
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn ProgressStore>> {
    match cfg.checkpoint.backend.as_str() {
        "sqlite" => Ok(Arc::new(
            SqliteProgressStore::open(&cfg.checkpoint.path).await?,
        )),
        _ => Ok(Arc::new(InMemoryProgressStore::new())),
    }
}

async fn run_classify(
    cfg: &Config,
    input: &Path,
    language: &str,
    analysis_id: &str,
    mode: ProgressMode,
) -> Result<()> {
    let files = read_input(input)?;
    let provider = create_provider(&cfg.provider)?;
    let client = ReliableClient::from_config(Arc::from(provider), &cfg.reliability);
    let store = open_store(cfg).await?;

    let classifier =
        Classifier::new(cfg.clone(), client, store).with_reporter(mode.reporter());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match classifier.classify(&files, language, analysis_id, &cancel).await {
        Ok(outcome) => {
            tracing::info!(
                prompt_tokens = outcome.usage.prompt_tokens,
                candidates_tokens = outcome.usage.candidates_tokens,
                total_tokens = outcome.usage.total_tokens,
                resumed_from = outcome.resumed_from,
                "usage"
            );
            println!("{}", serde_json::to_string_pretty(&outcome.taxonomy)?);
            Ok(())
        }
        Err(failure) => {
            eprintln!("hint: {}", failure.source.action_hint());
            if failure.checkpointed && cfg.checkpoint.backend != "sqlite" {
                eprintln!("hint: the in-memory checkpoint is lost on exit; set checkpoint.backend = \"sqlite\" to resume across runs");
            }
            Err(failure.into())
        }
    }
}
