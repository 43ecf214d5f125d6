//! Configuration loading
//!
//! # Sources, highest priority first
//! 1. `--config <path>` on the command line
//! 2. `SONGPOLL_CONFIG` environment variable
//! 3. `<config_dir>/songpoll/config.toml` (e.g. `~/.config/songpoll/config.toml`)
//! 4. Compiled defaults
//!
//! A configured path that does not exist is not fatal: a warning is logged
//! and defaults are used. A file that exists but does not parse is an error.
//!
//! After the file is read, a handful of environment variables override
//! secrets and cache sizing (see `apply_env_overrides`). Loading is the only
//! place configuration touches the environment; the computation modules take
//! plain values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::comparison::{ComparisonOptions, DEFAULT_IDENTITY_COLUMN};
use crate::insights::{InsightSettings, ModelRole};
use crate::scoring::ScoreBounds;
use crate::sheet::SheetLayout;
use crate::{Error, Result};

pub const CONFIG_ENV_VAR: &str = "SONGPOLL_CONFIG";
pub const LLM_API_KEY_ENV_VAR: &str = "SONGPOLL_LLM_API_KEY";
pub const FEEDBACK_WEBHOOK_ENV_VAR: &str = "SONGPOLL_FEEDBACK_WEBHOOK";
pub const CACHE_TTL_ENV_VAR: &str = "SONGPOLL_CACHE_TTL_SECONDS";
pub const CACHE_MAX_SIZE_ENV_VAR: &str = "SONGPOLL_CACHE_MAX_SIZE";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongpollConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub insights: InsightSettings,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Supported survey years, in presentation order
    #[serde(default = "default_partitions")]
    pub partitions: Vec<PartitionConfig>,

    #[serde(default = "default_year")]
    pub default_year: u16,
}

impl Default for SongpollConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            cache: CacheConfig::default(),
            scoring: ScoringConfig::default(),
            insights: InsightSettings::default(),
            llm: LlmConfig::default(),
            feedback: FeedbackConfig::default(),
            partitions: default_partitions(),
            default_year: default_year(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            max_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub min_score: f64,
    pub max_score: f64,
    pub identity_column: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let bounds = ScoreBounds::default();
        Self {
            min_score: bounds.min,
            max_score: bounds.max,
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
        }
    }
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Text generation is disabled without a key
    pub api_key: Option<String>,
    pub model_blurb: String,
    pub model_analysis: String,
    pub model_json: String,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            model_blurb: "llama-3.1-8b-instant".to_string(),
            model_analysis: "openai/gpt-oss-120b".to_string(),
            model_json: "moonshotai/kimi-k2-instruct".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl LlmConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Blurb => &self.model_blurb,
            ModelRole::Analysis => &self.model_analysis,
            ModelRole::Json => &self.model_json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub webhook_url: Option<String>,
    /// Append-only fallback log
    pub log_path: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            log_path: PathBuf::from("feedback_log.txt"),
            timeout_seconds: 10,
        }
    }
}

/// One survey year and where its sheet comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub year: u16,

    #[serde(default)]
    pub layout: SheetLayout,

    /// CSV file path, or an `http(s)://` URL of a published CSV export
    pub source: String,
}

impl PartitionConfig {
    pub fn is_remote(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_year() -> u16 {
    2024
}

fn default_partitions() -> Vec<PartitionConfig> {
    vec![
        PartitionConfig {
            year: 2024,
            layout: SheetLayout::Canonical,
            source: "data/2024.csv".to_string(),
        },
        PartitionConfig {
            year: 2023,
            layout: SheetLayout::Legacy,
            source: "data/2023.csv".to_string(),
        },
        PartitionConfig {
            year: 2019,
            layout: SheetLayout::Legacy,
            source: "data/2019.csv".to_string(),
        },
    ]
}

impl SongpollConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Parse(format!("Invalid config TOML: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn score_bounds(&self) -> ScoreBounds {
        ScoreBounds {
            min: self.scoring.min_score,
            max: self.scoring.max_score,
        }
    }

    pub fn comparison_options(&self) -> ComparisonOptions {
        ComparisonOptions {
            bounds: self.score_bounds(),
            identity_column: self.scoring.identity_column.clone(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn partition(&self, year: u16) -> Option<&PartitionConfig> {
        self.partitions.iter().find(|p| p.year == year)
    }

    pub fn supported_years(&self) -> Vec<u16> {
        self.partitions.iter().map(|p| p.year).collect()
    }

    /// Apply `SONGPOLL_*` environment overrides
    ///
    /// Empty values are ignored; numbers that do not parse are a config error.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(key) = env_value(LLM_API_KEY_ENV_VAR) {
            debug!("LLM API key taken from environment");
            self.llm.api_key = Some(key);
        }
        if let Some(url) = env_value(FEEDBACK_WEBHOOK_ENV_VAR) {
            self.feedback.webhook_url = Some(url);
        }
        if let Some(ttl) = env_value(CACHE_TTL_ENV_VAR) {
            self.cache.ttl_seconds = parse_env(CACHE_TTL_ENV_VAR, &ttl)?;
        }
        if let Some(size) = env_value(CACHE_MAX_SIZE_ENV_VAR) {
            self.cache.max_size = parse_env(CACHE_MAX_SIZE_ENV_VAR, &size)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(Error::Config("cache.max_size must be at least 1".to_string()));
        }
        let bounds = self.score_bounds();
        if !bounds.min.is_finite() || !bounds.max.is_finite() || bounds.min > bounds.max {
            return Err(Error::Config(format!(
                "scoring bounds invalid: min {} > max {}",
                bounds.min, bounds.max
            )));
        }
        if self.scoring.identity_column.trim().is_empty() {
            return Err(Error::Config("scoring.identity_column must not be empty".to_string()));
        }
        if self.partitions.is_empty() {
            return Err(Error::Config("at least one [[partitions]] entry is required".to_string()));
        }
        if self.partition(self.default_year).is_none() {
            return Err(Error::Config(format!(
                "default_year {} has no matching partition",
                self.default_year
            )));
        }
        if !(1..=60).contains(&self.feedback.timeout_seconds) {
            return Err(Error::Config(format!(
                "feedback.timeout_seconds must be within 1..=60, got {}",
                self.feedback.timeout_seconds
            )));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} is not a valid number: `{}`", name, value)))
}

/// Default config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("songpoll").join("config.toml"))
}

/// Resolve the config file path by priority
///
/// Explicit paths (CLI, environment) are returned even if missing so the
/// caller can report them; the platform default only when it exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_value(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    default_config_path().filter(|p| p.exists())
}

/// Load, override from the environment, and validate
pub fn load_config(cli_arg: Option<&Path>) -> Result<SongpollConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            info!("Loading config from {}", path.display());
            SongpollConfig::from_file(&path)?
        }
        Some(path) => {
            warn!("Config file not found: {}, using defaults", path.display());
            SongpollConfig::default()
        }
        None => {
            debug!("No config file, using defaults");
            SongpollConfig::default()
        }
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}
