//! Configuration for stagewright.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STAGEWRIGHT_HOME, STAGEWRIGHT_LOG_FILE, STAGEWRIGHT_MAX_ATTEMPTS)
//! 2. Config file (.stagewright/config.yaml)
//! 3. Defaults (~/.stagewright)
//!
//! Config file discovery:
//! - Searches current directory and parents for .stagewright/config.yaml
//! - `paths.home` is relative to the .stagewright/ directory
//! - `paths.log_file` is relative to the project root (parent of .stagewright/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_HOME: &str = "STAGEWRIGHT_HOME";
pub const ENV_LOG_FILE: &str = "STAGEWRIGHT_LOG_FILE";
pub const ENV_MAX_ATTEMPTS: &str = "STAGEWRIGHT_MAX_ATTEMPTS";

const CONFIG_DIR: &str = ".stagewright";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .stagewright/)
    pub home: Option<String>,
    /// Trace log file (relative to the project root)
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
    pub api_key_env: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to the state directory
    pub home: PathBuf,
    /// Trace log file
    pub log_file: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub pipeline: PipelineSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 0,
        }
    }
}

impl PipelineSettings {
    /// Retry policy for stages without their own override
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: self.retry_delay_ms,
            ..RetryPolicy::with_max_attempts(self.max_attempts)
        }
    }
}

/// Text-generation service settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "qwen/qwq-32b:free".to_string(),
            temperature: 0.7,
            timeout_seconds: 120,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl LlmSettings {
    fn overlay(mut self, file: &LlmConfig) -> Self {
        if let Some(base_url) = &file.base_url {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = &file.model {
            self.model = model.clone();
        }
        if let Some(temperature) = file.temperature {
            self.temperature = temperature;
        }
        if let Some(timeout) = file.timeout_seconds {
            self.timeout_seconds = timeout;
        }
        if let Some(env) = &file.api_key_env {
            self.api_key_env = env.clone();
        }
        self
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Resolve configuration from an optional config file and an environment lookup
fn resolve_config<F>(
    config_path: Option<&Path>,
    env: F,
    default_home: PathBuf,
) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let file = match config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // .stagewright/ and the project root above it
    let config_dir = config_path.and_then(Path::parent).unwrap_or(Path::new("."));
    let base_dir = config_dir.parent().unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env(ENV_HOME) {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(_)) = (&file.paths.home, config_path) {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let log_file = if let Some(env_log) = env(ENV_LOG_FILE) {
        PathBuf::from(env_log)
    } else if let (Some(log_path), Some(_)) = (&file.paths.log_file, config_path) {
        resolve_path(base_dir, log_path)
    } else {
        home.join("logs").join("agent_logs.jsonl")
    };

    let mut pipeline = PipelineSettings::default();
    if let Some(section) = &file.pipeline {
        if let Some(max_attempts) = section.max_attempts {
            pipeline.max_attempts = max_attempts;
        }
        if let Some(delay) = section.retry_delay_ms {
            pipeline.retry_delay_ms = delay;
        }
    }
    if let Some(raw) = env(ENV_MAX_ATTEMPTS) {
        pipeline.max_attempts = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {}", ENV_MAX_ATTEMPTS, raw))?;
    }

    let llm = match &file.llm {
        Some(section) => LlmSettings::default().overlay(section),
        None => LlmSettings::default(),
    };

    Ok(ResolvedConfig {
        home,
        log_file,
        config_file: config_path.map(Path::to_path_buf),
        pipeline,
        llm,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let config_file = find_config_file(&cwd);

    resolve_config(
        config_file.as_deref(),
        |key| std::env::var(key).ok(),
        default_home,
    )
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the trace log path
pub fn log_file() -> Result<PathBuf> {
    Ok(config()?.log_file.clone())
}
