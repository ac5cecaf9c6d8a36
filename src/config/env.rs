//! Environment variable configuration
//!
//! Provides `HWTEST_*` overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::AppConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "HWTEST";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Results directory from HWTEST_RESULTS_DIR
    pub results_dir: Option<String>,
    /// Images directory from HWTEST_IMAGES_DIR
    pub images_dir: Option<String>,
    /// Log level from HWTEST_LOG_LEVEL
    pub log_level: Option<String>,
    /// Operator name from HWTEST_OPERATOR
    pub operator: Option<String>,
    /// Step delay from HWTEST_STEP_DELAY_MS
    pub step_delay_ms: Option<u64>,
    /// Channel capacity from HWTEST_EVENT_BUFFER
    pub event_buffer: Option<usize>,
    /// Config file from HWTEST_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            results_dir: get_env("RESULTS_DIR"),
            images_dir: get_env("IMAGES_DIR"),
            log_level: get_env("LOG_LEVEL"),
            operator: get_env("OPERATOR"),
            step_delay_ms: get_env_parse("STEP_DELAY_MS"),
            event_buffer: get_env_parse("EVENT_BUFFER"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.results_dir.is_some()
            || self.images_dir.is_some()
            || self.log_level.is_some()
            || self.operator.is_some()
            || self.step_delay_ms.is_some()
            || self.event_buffer.is_some()
            || self.config_file.is_some()
    }

    /// Override the fields that are set
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.results_dir {
            config.results_dir = PathBuf::from(dir);
        }
        if let Some(dir) = &self.images_dir {
            config.images_dir = PathBuf::from(dir);
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(operator) = &self.operator {
            config.operator = operator.clone();
        }
        if let Some(delay) = self.step_delay_ms {
            config.step_delay_ms = delay;
        }
        if let Some(buffer) = self.event_buffer {
            config.event_buffer = buffer;
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Builder for setting environment variables (useful for testing)
#[derive(Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images_dir(mut self, dir: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_IMAGES_DIR"), dir.into()));
        self
    }

    pub fn event_buffer(mut self, buffer: usize) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_EVENT_BUFFER"), buffer.to_string()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all HWTEST environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_RESULTS_DIR    Directory for workbooks and full logs");
    println!("  {ENV_PREFIX}_IMAGES_DIR     Directory for captured and imported images");
    println!("  {ENV_PREFIX}_LOG_LEVEL      Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_OPERATOR       Default operator name");
    println!("  {ENV_PREFIX}_STEP_DELAY_MS  Simulated instrument latency in milliseconds");
    println!("  {ENV_PREFIX}_EVENT_BUFFER   Live event channel capacity");
    println!("  {ENV_PREFIX}_CONFIG         Path to configuration file");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides_set_fields_only() {
        let env = EnvConfig {
            operator: Some("erin".to_string()),
            step_delay_ms: Some(0),
            ..Default::default()
        };
        assert!(env.has_any());

        let mut config = AppConfig::default();
        env.apply(&mut config);
        assert_eq!(config.operator, "erin");
        assert_eq!(config.step_delay_ms, 0);
        assert_eq!(config.log_level, "info");
        assert!(!EnvConfig::default().has_any());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .images_dir("/tmp/hwtest-images")
            .event_buffer(64)
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.images_dir, Some("/tmp/hwtest-images".to_string()));
        assert_eq!(config.event_buffer, Some(64));
    }
}
