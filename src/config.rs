use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub kind: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_seed")]
    pub seed: i64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            seed: default_seed(),
        }
    }
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind != "disabled"
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_output_tokens() -> u32 {
    65_536
}
fn default_seed() -> i64 {
    42
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tests")]
    pub max_tests: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_base_prompt_tokens")]
    pub base_prompt_tokens: usize,
    #[serde(default = "default_per_file_tokens")]
    pub per_file_tokens: usize,
    #[serde(default = "default_per_test_tokens")]
    pub per_test_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tests: default_max_tests(),
            max_tokens: default_max_tokens(),
            base_prompt_tokens: default_base_prompt_tokens(),
            per_file_tokens: default_per_file_tokens(),
            per_test_tokens: default_per_test_tokens(),
        }
    }
}

fn default_max_tests() -> usize {
    250
}
fn default_max_tokens() -> usize {
    60_000
}
fn default_base_prompt_tokens() -> usize {
    2_000
}
fn default_per_file_tokens() -> usize {
    20
}
fn default_per_test_tokens() -> usize {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    #[serde(default = "default_wave_concurrency")]
    pub wave_concurrency: usize,
    #[serde(default)]
    pub chunk_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            wave_concurrency: default_wave_concurrency(),
            chunk_delay_ms: 0,
        }
    }
}

impl OrchestratorConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

fn default_wave_concurrency() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReliabilityConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    60
}
fn default_burst() -> u32 {
    5
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    /// Fraction of missing indices above which a chunk is logged at error level.
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            missing_threshold: default_missing_threshold(),
        }
    }
}

fn default_missing_threshold() -> f64 {
    0.05
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_backend")]
    pub backend: String,
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: default_checkpoint_backend(),
            path: default_checkpoint_path(),
        }
    }
}

fn default_checkpoint_backend() -> String {
    "memory".to_string()
}
fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./data/taxo.sqlite")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tests == 0 {
        anyhow::bail!("chunking.max_tests must be > 0");
    }
    if config.chunking.max_tokens <= config.chunking.base_prompt_tokens {
        anyhow::bail!("chunking.max_tokens must exceed chunking.base_prompt_tokens");
    }

    // Validate orchestrator
    if config.orchestrator.wave_concurrency == 0 {
        anyhow::bail!("orchestrator.wave_concurrency must be >= 1");
    }

    // Validate reliability
    if config.reliability.max_attempts == 0 {
        anyhow::bail!("reliability.max_attempts must be >= 1");
    }
    if config.reliability.requests_per_minute == 0 || config.reliability.burst == 0 {
        anyhow::bail!("reliability.requests_per_minute and reliability.burst must be > 0");
    }
    if config.reliability.failure_threshold == 0 {
        anyhow::bail!("reliability.failure_threshold must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.validation.missing_threshold) {
        anyhow::bail!("validation.missing_threshold must be in [0.0, 1.0]");
    }

    match config.provider.kind.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    match config.checkpoint.backend.as_str() {
        "memory" | "sqlite" => {}
        other => anyhow::bail!(
            "Unknown checkpoint backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }

    Ok(())
}
