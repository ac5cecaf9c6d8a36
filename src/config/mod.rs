//! Configuration module
//!
//! Settings come from defaults, then a config file, then `HWTEST_*`
//! environment variables; CLI flags are applied last by the caller.

pub mod env;
pub mod file;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::utils::logger::LogLevel;
use env::EnvConfig;
use file::ConfigFile;

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory receiving per-unit workbooks and full logs
    pub results_dir: PathBuf,

    /// Directory receiving captured and imported images
    pub images_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Operator name used when a run does not supply one
    pub operator: String,

    /// Simulated instrument latency of the built-in scripts
    pub step_delay_ms: u64,

    /// Capacity of the live event channel
    pub event_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("./results"),
            images_dir: PathBuf::from("./images"),
            log_level: "info".to_string(),
            operator: String::new(),
            step_delay_ms: 200,
            event_buffer: 1024,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from an explicit file, `HWTEST_CONFIG`, or the
    /// standard locations, then apply environment overrides
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env = EnvConfig::load();
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env.config_file.clone().map(PathBuf::from))
            .or_else(ConfigFile::find);

        let mut config = match &path {
            Some(p) => {
                debug!("Loading config from {}", p.display());
                ConfigFile::load(p)?.app
            }
            None => Self::default(),
        };

        env.apply(&mut config);
        config.validate()?;
        Ok((config, path))
    }

    pub fn validate(&self) -> Result<()> {
        if LogLevel::from_str(&self.log_level).is_none() {
            bail!("Invalid log level: {}", self.log_level);
        }
        if self.event_buffer == 0 {
            bail!("event_buffer must be at least 1");
        }
        Ok(())
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_str(&self.log_level).unwrap_or(LogLevel::Info)
    }
}
