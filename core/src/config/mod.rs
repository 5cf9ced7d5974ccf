use crate::agent::loop_::{DEFAULT_MAX_ITERATIONS, DEFAULT_OBSERVATION_MAX_CHARS};
use crate::session::store::DEFAULT_MAX_HISTORY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const TABULA_DIR: &str = ".tabula";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_iterations: usize,
    pub max_history: usize,
    pub observation_max_chars: usize,
    pub reasoning_retry_backoff_ms: u64,
    /// CSV or JSON-records file the analysis tools read.
    pub dataset: Option<PathBuf>,
    #[serde(skip)]
    pub workspace_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_history: DEFAULT_MAX_HISTORY,
            observation_max_chars: DEFAULT_OBSERVATION_MAX_CHARS,
            reasoning_retry_backoff_ms: 500,
            dataset: None,
            workspace_dir: get_tabula_dir().join("workspace"),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        if config_exists() {
            load_config()
        } else {
            Ok(Config::default())
        }
    }

    pub fn reasoning_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.reasoning_retry_backoff_ms)
    }

    /// `None` when `max_history` is zero, meaning unbounded.
    pub fn history_limit(&self) -> Option<usize> {
        (self.max_history > 0).then_some(self.max_history)
    }

    pub fn charts_dir(&self) -> PathBuf {
        self.workspace_dir.join("charts")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.workspace_dir.join("reports")
    }
}

pub fn get_tabula_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(TABULA_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_tabula_dir().join("config.toml")
}

pub fn ensure_tabula_dir() -> Result<PathBuf> {
    let tabula_dir = get_tabula_dir();

    if !tabula_dir.exists() {
        std::fs::create_dir_all(&tabula_dir).with_context(|| {
            format!(
                "Failed to create tabula directory at {}",
                tabula_dir.display()
            )
        })?;
    }

    Ok(tabula_dir)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config TOML")?;
    config.workspace_dir = get_tabula_dir().join("workspace");
    Ok(config)
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path();

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!(
                "Config file not found. Run 'tabula onboard' to set up your configuration."
            )
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", config_path.display(), e)
        }
    })?;

    parse_config(&content)
        .with_context(|| format!("Invalid config at {}", config_path.display()))
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_tabula_dir()?;

    let config_path = get_config_path();
    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}
