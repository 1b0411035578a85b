/// Configuration system for code-steward
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::error::{ConfigError, StewardError};
use crate::oracle::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub coverage: CoverageConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub repair: RepairConfig,

    #[serde(default)]
    pub oracle: OracleConfig,
}

/// Entity store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; relative paths are resolved against the project root
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// Source scanning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Name (or file-name) prefix that marks a unit as a test
    #[serde(default = "default_test_prefix")]
    pub test_prefix: String,

    /// Maximum file size to scan (in bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,

    /// Glob patterns; when non-empty only matching files are scanned
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Path substrings that exclude a file
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

/// Coverage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Commands run in order before reading the report
    #[serde(default = "default_coverage_commands")]
    pub commands: Vec<String>,

    /// JSON report path, relative to the project root
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
}

/// Test runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_program")]
    pub program: String,

    /// Arguments placed before the test identifier
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,
}

/// Repair loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Oracle revisions allowed per failing test
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Directory generated tests are written to, relative to the project root
    #[serde(default = "default_tests_dir")]
    pub tests_dir: PathBuf,
}

/// Revision oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_oracle_url")]
    pub base_url: String,

    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// Environment variable holding the API key; unset for servers without auth
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per oracle call, including the first
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,

    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

impl OracleConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_tries: self.max_tries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_min: Duration::from_millis(self.jitter_min_ms),
            jitter_max: Duration::from_millis(self.jitter_max_ms),
        }
    }
}

// Default value functions
fn default_db_path() -> PathBuf {
    PathBuf::from("code.db")
}

fn default_test_prefix() -> String {
    "test_".to_string()
}

fn default_max_file_size() -> usize {
    1_048_576 // 1 MB
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".venv/".to_string(),
        "venv/".to_string(),
        "__pycache__/".to_string(),
        ".tox/".to_string(),
        "site-packages/".to_string(),
        "build/".to_string(),
        "dist/".to_string(),
    ]
}

fn default_coverage_commands() -> Vec<String> {
    vec![
        "coverage run -m pytest".to_string(),
        "coverage json".to_string(),
    ]
}

fn default_report_path() -> PathBuf {
    PathBuf::from("coverage.json")
}

fn default_runner_program() -> String {
    "python".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["-m".to_string(), "pytest".to_string(), "-q".to_string()]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_tests_dir() -> PathBuf {
    PathBuf::from("tests")
}

fn default_oracle_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_oracle_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_tries() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    16_000
}

fn default_jitter_min_ms() -> u64 {
    1_000
}

fn default_jitter_max_ms() -> u64 {
    3_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            test_prefix: default_test_prefix(),
            max_file_size: default_max_file_size(),
            include_patterns: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            commands: default_coverage_commands(),
            report_path: default_report_path(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_runner_program(),
            args: default_runner_args(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            tests_dir: default_tests_dir(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_url(),
            model: default_oracle_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout(),
            max_tries: default_max_tries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, StewardError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location or fall back to defaults
    pub fn load_or_default() -> Result<Self, StewardError> {
        let config_path = crate::paths::PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), StewardError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), StewardError> {
        if self.scan.test_prefix.is_empty() {
            return Err(invalid("scan.test_prefix", "must not be empty"));
        }

        if self.scan.max_file_size == 0 {
            return Err(invalid("scan.max_file_size", "must be greater than 0"));
        }

        if self.repair.max_attempts == 0 {
            return Err(invalid("repair.max_attempts", "must be greater than 0"));
        }

        if self.oracle.max_tries == 0 {
            return Err(invalid("oracle.max_tries", "must be greater than 0"));
        }

        if self.oracle.initial_delay_ms > self.oracle.max_delay_ms {
            return Err(invalid(
                "oracle.initial_delay_ms",
                &format!(
                    "must not exceed oracle.max_delay_ms ({})",
                    self.oracle.max_delay_ms
                ),
            ));
        }

        if self.oracle.jitter_min_ms > self.oracle.jitter_max_ms {
            return Err(invalid(
                "oracle.jitter_min_ms",
                &format!(
                    "must not exceed oracle.jitter_max_ms ({})",
                    self.oracle.jitter_max_ms
                ),
            ));
        }

        if self.oracle.backoff_factor < 1.0 {
            return Err(invalid(
                "oracle.backoff_factor",
                &format!("must be at least 1.0, got {}", self.oracle.backoff_factor),
            ));
        }

        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            return Err(invalid(
                "oracle.temperature",
                &format!(
                    "must be between 0.0 and 2.0, got {}",
                    self.oracle.temperature
                ),
            ));
        }

        if self.runner.program.trim().is_empty() {
            return Err(invalid("runner.program", "must not be empty"));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CODE_STEWARD_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }

        if let Ok(prefix) = std::env::var("CODE_STEWARD_TEST_PREFIX") {
            self.scan.test_prefix = prefix;
        }

        if let Ok(attempts) = std::env::var("CODE_STEWARD_MAX_ATTEMPTS")
            && let Ok(attempts) = attempts.parse()
        {
            self.repair.max_attempts = attempts;
        }

        if let Ok(url) = std::env::var("CODE_STEWARD_ORACLE_URL") {
            self.oracle.base_url = url;
        }

        if let Ok(model) = std::env::var("CODE_STEWARD_MODEL") {
            self.oracle.model = model;
        }
    }

    /// Load from `path` (or the default location), then apply environment
    /// overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, StewardError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::load_or_default()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Database path, resolved against `root` when relative
    pub fn resolved_db_path(&self, root: &Path) -> PathBuf {
        resolve(root, &self.store.db_path)
    }

    /// Coverage report path, resolved against `root` when relative
    pub fn resolved_report_path(&self, root: &Path) -> PathBuf {
        resolve(root, &self.coverage.report_path)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn invalid(key: &str, reason: &str) -> StewardError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
