//! Configuration for step runs.
//!
//! Uses a key=value file, `.sewing-kit/config` under the workspace root.
//! Precedence: CLI flags > `--config` file > `.sewing-kit/config` > defaults.

use crate::inclusion::{parse_patterns, StepInclusion};
use crate::types::{InteractiveMode, LogLevel};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Directory under the workspace root that holds the config file.
pub const CONFIG_DIR: &str = ".sewing-kit";
/// File name of the workspace config.
pub const CONFIG_FILE: &str = "config";
/// Default manifest file name, relative to the workspace root.
pub const DEFAULT_MANIFEST: &str = "sewing-kit.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Run configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of step queue slots. `0` means one per logical CPU.
    pub concurrency: usize,
    pub log_level: LogLevel,
    pub interactive: InteractiveMode,
    /// Emit ANSI styling when drawing to a terminal.
    pub color: bool,
    pub redraw_interval_ms: u64,
    pub spinner_interval_ms: u64,
    pub manifest: PathBuf,
    #[serde(flatten)]
    pub inclusion: StepInclusion,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 0,
            log_level: LogLevel::Info,
            interactive: InteractiveMode::Auto,
            color: true,
            redraw_interval_ms: 16,
            spinner_interval_ms: 60,
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            inclusion: StepInclusion::default(),
        }
    }
}

impl Config {
    /// Load the workspace config (if present) and then `explicit` on top.
    pub fn load(workspace_root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let workspace_config = workspace_root.join(CONFIG_DIR).join(CONFIG_FILE);
        if workspace_config.is_file() {
            debug!(path = %workspace_config.display(), "loading workspace config");
            config.load_file(&workspace_config)?;
        }

        if let Some(path) = explicit {
            debug!(path = %path.display(), "loading config override");
            config.load_file(path)?;
        }

        config.resolve_paths(workspace_root);
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content, &path.display().to_string())
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str, source: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value, source)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str, source: &str) -> Result<(), ConfigError> {
        match key {
            "concurrency" => self.concurrency = Self::parse_int(key, value)?,
            "log_level" => {
                self.log_level = LogLevel::parse(value).ok_or_else(|| {
                    ConfigError::InvalidLine(format!(
                        "log_level must be 'errors', 'warnings', 'info', or 'debug', got '{value}'"
                    ))
                })?;
            }
            "interactive" => {
                self.interactive = match value {
                    "auto" => InteractiveMode::Auto,
                    "always" => InteractiveMode::Always,
                    "never" => InteractiveMode::Never,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "interactive must be 'auto', 'always', or 'never', got '{value}'"
                        )))
                    }
                }
            }
            "color" => self.color = Self::parse_bool(key, value)?,
            "redraw_interval_ms" => self.redraw_interval_ms = Self::parse_int(key, value)?,
            "spinner_interval_ms" => self.spinner_interval_ms = Self::parse_int(key, value)?,
            "manifest" => self.manifest = PathBuf::from(value),
            "skip_pre_steps" => self.inclusion.skip_pre_steps = parse_patterns(&[value]),
            "isolate_pre_steps" => self.inclusion.isolate_pre_steps = parse_patterns(&[value]),
            "skip_steps" => self.inclusion.skip_steps = parse_patterns(&[value]),
            "isolate_steps" => self.inclusion.isolate_steps = parse_patterns(&[value]),
            "skip_post_steps" => self.inclusion.skip_post_steps = parse_patterns(&[value]),
            "isolate_post_steps" => self.inclusion.isolate_post_steps = parse_patterns(&[value]),
            _ => {
                warn!(key, source, "unknown config key");
            }
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Resolve relative paths against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.manifest.is_relative() {
            self.manifest = workspace_root.join(&self.manifest);
        }
    }

    /// Slot count for the step queue.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            num_cpus::get().max(1)
        } else {
            self.concurrency
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.concurrency, 0);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.interactive, InteractiveMode::Auto);
        assert!(config.color);
        assert_eq!(config.redraw_interval_ms, 16);
        assert_eq!(config.spinner_interval_ms, 60);
        assert_eq!(config.manifest, PathBuf::from("sewing-kit.toml"));
        assert!(config.inclusion.skip_steps.is_empty());
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
# comment
concurrency=4
log_level="debug"
interactive=never
color=off
"#;
        config.parse_content(content, "test").unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.interactive, InteractiveMode::Never);
        assert!(!config.color);
    }

    #[test]
    fn parse_pattern_lists() {
        let mut config = Config::default();
        let content = r#"
skip_steps="Jest.Run, TypeScript.*"
isolate_pre_steps=Web.Clean
"#;
        config.parse_content(content, "test").unwrap();
        assert_eq!(config.inclusion.skip_steps, vec!["Jest.Run", "TypeScript.*"]);
        assert_eq!(config.inclusion.isolate_pre_steps, vec!["Web.Clean"]);
    }

    #[test]
    fn invalid_values_are_errors() {
        let mut config = Config::default();
        assert!(config.parse_content("concurrency=lots", "test").is_err());
        assert!(config.parse_content("interactive=maybe", "test").is_err());
        assert!(config.parse_content("log_level=loud", "test").is_err());
        assert!(config.parse_content("color=perhaps", "test").is_err());
        assert!(config.parse_content("no equals sign", "test").is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut config = Config::default();
        config.parse_content("flavour=vanilla", "test").unwrap();
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn effective_concurrency_falls_back_to_cpus() {
        let mut config = Config::default();
        assert!(config.effective_concurrency() >= 1);
        config.concurrency = 3;
        assert_eq!(config.effective_concurrency(), 3);
    }

    #[test]
    fn explicit_config_overrides_workspace_config() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "concurrency=2\nlog_level=debug\n",
        )
        .unwrap();
        let explicit = dir.path().join("ci.config");
        fs::write(&explicit, "concurrency=8\n").unwrap();

        let config = Config::load(dir.path(), Some(&explicit)).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.manifest, dir.path().join("sewing-kit.toml"));
    }

    #[test]
    fn missing_workspace_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path(), None).unwrap();
        assert_eq!(config.concurrency, 0);
    }
}
