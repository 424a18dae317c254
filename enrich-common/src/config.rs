//! Bootstrap configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Explicit path passed by the caller (highest priority)
//! 2. `ENRICH_CONFIG` environment variable
//! 3. User config directory (`~/.config/enrich/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is never fatal: a warning is logged and defaults are used.
//! A file that exists but cannot be parsed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "ENRICH_CONFIG";

/// Environment variable overriding `research.mode`
pub const MODE_ENV_VAR: &str = "ENRICH_RESEARCH_MODE";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Research loop tuning
    #[serde(default)]
    pub research: ResearchSettings,

    /// SQLite database used by the persistent research store (optional)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Research effort mode
///
/// Selects the budget and iteration presets for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    Fast,
    #[default]
    Balanced,
    Thorough,
}

impl ResearchMode {
    /// Default monetary budget for this mode
    pub fn default_max_cost(self) -> f64 {
        match self {
            Self::Fast => 0.05,
            Self::Balanced => 0.15,
            Self::Thorough => 0.50,
        }
    }

    /// Default adaptive-loop iteration cap for this mode
    pub fn default_max_iterations(self) -> u32 {
        match self {
            Self::Fast => 3,
            Self::Balanced => 6,
            Self::Thorough => 12,
        }
    }

    /// Multiplier applied to the latency penalty when scoring tools
    ///
    /// Fast runs care most about wall-clock time, thorough runs least.
    pub fn latency_weight(self) -> f64 {
        match self {
            Self::Fast => 2.0,
            Self::Balanced => 1.0,
            Self::Thorough => 0.5,
        }
    }
}

impl fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Thorough => "thorough",
        };
        f.write_str(s)
    }
}

impl FromStr for ResearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "thorough" => Ok(Self::Thorough),
            other => Err(Error::Config(format!("Unknown research mode: {}", other))),
        }
    }
}

/// Research loop settings (`[research]` table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSettings {
    #[serde(default)]
    pub mode: ResearchMode,

    /// Overrides the mode's budget when set
    #[serde(default)]
    pub max_cost: Option<f64>,

    /// Overrides the mode's iteration cap when set
    #[serde(default)]
    pub max_iterations: Option<u32>,

    #[serde(default = "default_required_threshold")]
    pub required_threshold: f64,

    #[serde(default = "default_recommended_threshold")]
    pub recommended_threshold: f64,

    /// Consecutive no-progress evaluations before the run is declared stuck
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: u32,

    /// Evidence entries below which a salvage is reported as low confidence
    #[serde(default = "default_min_salvage_evidence")]
    pub min_salvage_evidence: usize,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            mode: ResearchMode::default(),
            max_cost: None,
            max_iterations: None,
            required_threshold: default_required_threshold(),
            recommended_threshold: default_recommended_threshold(),
            stuck_threshold: default_stuck_threshold(),
            min_salvage_evidence: default_min_salvage_evidence(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_required_threshold() -> f64 {
    0.70
}

fn default_recommended_threshold() -> f64 {
    0.50
}

fn default_stuck_threshold() -> u32 {
    3
}

fn default_min_salvage_evidence() -> usize {
    3
}

/// Retry policy applied at the task executor boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    4000
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Resolve and load configuration using the documented priority order
    ///
    /// Applies the `ENRICH_RESEARCH_MODE` override last.
    pub fn resolve(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(explicit_path) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration");
                Self::load(&path)?
            }
            Some(path) => {
                warn!(
                    path = %path.display(),
                    "Configuration file not found, using defaults"
                );
                Self::default()
            }
            None => Self::default(),
        };

        if let Ok(mode) = std::env::var(MODE_ENV_VAR) {
            config.research.mode = mode.parse()?;
            info!(mode = %config.research.mode, "Research mode overridden by environment");
        }

        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let r = &self.research;
        for (name, value) in [
            ("required_threshold", r.required_threshold),
            ("recommended_threshold", r.recommended_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "research.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if let Some(cost) = r.max_cost {
            if cost < 0.0 {
                return Err(Error::Config(format!(
                    "research.max_cost must not be negative, got {}",
                    cost
                )));
            }
        }
        if r.retry.max_attempts == 0 {
            return Err(Error::Config(
                "research.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pick the configuration file path by priority
///
/// Returns `None` when no candidate location can be determined.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: explicit argument
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user config directory
    dirs::config_dir().map(|d| d.join("enrich").join("config.toml"))
}
