use crate::rewrite::OverheadProfile;
use crate::simulator::SimulationMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main configuration structure for rehost.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub rewrite: RewriteConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file is missing.
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Failed to load config from {:?}: {}. Using defaults.",
                    path.as_ref(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Get the default configuration as a TOML string.
    pub fn default_toml() -> Result<String> {
        let config = Self::default();
        toml::to_string_pretty(&config).context("Failed to serialize default config")
    }

    /// Validate the configuration for obvious misconfiguration.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_parallel_traces == 0 {
            anyhow::bail!("max_parallel_traces must be greater than 0");
        }

        self.logging.max_level()?;

        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse config")?;
        Ok(config)
    }
}

/// Replay settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SimulationConfig {
    #[serde(default)]
    pub mode: SimulationMode,
}

/// Fan-out settings for the change analyses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_parallel_traces")]
    pub max_parallel_traces: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_parallel_traces: default_max_parallel_traces(),
        }
    }
}

/// Costs charged by the overhead rewriter for remote calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    #[serde(default = "default_remote_invocation_overhead")]
    pub remote_invocation_overhead: u64,

    #[serde(default = "default_remote_return_overhead")]
    pub remote_return_overhead: u64,
}

impl RewriteConfig {
    pub fn overhead_profile(&self) -> OverheadProfile {
        OverheadProfile {
            remote_invocation: self.remote_invocation_overhead,
            remote_return: self.remote_return_overhead,
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            remote_invocation_overhead: default_remote_invocation_overhead(),
            remote_return_overhead: default_remote_return_overhead(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub include_modules: bool,
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level> {
        match self.level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            other => anyhow::bail!("Invalid log level: {}", other),
        }
    }

    /// Install the global fmt subscriber. A subscriber that is already
    /// installed is left in place.
    pub fn init(&self) -> Result<()> {
        let level = self.max_level()?;
        let installed = tracing_subscriber::fmt()
            .with_target(self.include_modules)
            .with_max_level(level)
            .compact()
            .try_init();
        if installed.is_err() {
            tracing::debug!("Global subscriber already installed");
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            include_modules: false,
        }
    }
}

// Default providers ---------------------------------------------------------

fn default_max_parallel_traces() -> usize {
    8
}

fn default_remote_invocation_overhead() -> u64 {
    1
}

fn default_remote_return_overhead() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

// Tests ---------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.simulation.mode, SimulationMode::WithEntityAccess);
        assert_eq!(config.analysis.max_parallel_traces, 8);
        assert_eq!(config.rewrite.remote_invocation_overhead, 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_parallelism() {
        let mut config = Config::default();
        config.analysis.max_parallel_traces = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [simulation]
            mode = "basic"

            [analysis]
            max_parallel_traces = 2

            [rewrite]
            remote_invocation_overhead = 15
            remote_return_overhead = 10

            [logging]
            level = "debug"
        "#;

        let config = Config::from_str(toml_str).unwrap();
        assert_eq!(config.simulation.mode, SimulationMode::Basic);
        assert_eq!(config.analysis.max_parallel_traces, 2);
        assert_eq!(
            config.rewrite.overhead_profile(),
            OverheadProfile {
                remote_invocation: 15,
                remote_return: 10,
            }
        );
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.include_modules);
    }

    #[test]
    fn test_default_toml_parses_back() {
        let toml = Config::default_toml().unwrap();
        let config = Config::from_str(&toml).unwrap();
        assert_eq!(config.analysis.max_parallel_traces, 8);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::from_file_or_default("/nonexistent/rehost.toml");
        assert_eq!(config.analysis.max_parallel_traces, 8);
    }
}
