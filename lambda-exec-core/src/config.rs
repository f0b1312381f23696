// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Environment configuration with strict validation.
//!
//! Read once at process start. Invalid values are a `ConfigError` and
//! prevent the runtime from accepting invocations. The source locator is
//! kept verbatim and only parsed per invocation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source locator of the artifact to fetch.
pub const ENV_SRC: &str = "CONTAINER_EXEC_SRC";
/// Local base directory for extraction.
pub const ENV_CODE_DIR: &str = "CONTAINER_EXEC_CODE_DIR";
/// Variable carrying the serialized event into the entry point.
pub const ENV_EVENT: &str = "CONTAINER_EXEC_EVENT";
/// Minimum log severity.
pub const ENV_LOG_LEVEL: &str = "CONTAINER_EXEC_LOG_LEVEL";
/// `spawn` or `replace`.
pub const ENV_LAUNCH_MODE: &str = "CONTAINER_EXEC_LAUNCH_MODE";

pub const DEFAULT_CODE_DIR: &str = "/tmp/lambda";

/// Minimum severity of diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// No filter, every level passes.
    #[default]
    All,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name; unknown or empty names pass all levels.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" => Self::Error,
            _ => Self::All,
        }
    }

    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn directive(&self) -> &'static str {
        match self {
            Self::All => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// How the entry point is handed control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationMode {
    /// Start a child, relay its stderr and return its stdout.
    #[default]
    Spawn,
    /// Replace the current process image with the entry point.
    Replace,
}

impl InvocationMode {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for InvocationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "spawn" => Ok(Self::Spawn),
            "replace" | "exec" => Ok(Self::Replace),
            other => Err(ConfigError::InvalidValue {
                variable: ENV_LAUNCH_MODE,
                value: other.to_string(),
                reason: "Must be 'spawn' or 'replace'".to_string(),
            }),
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Raw source locator; empty when unset.
    pub source: String,
    pub code_dir: PathBuf,
    pub log_level: LogLevel,
    pub mode: InvocationMode,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            code_dir: PathBuf::from(DEFAULT_CODE_DIR),
            log_level: LogLevel::All,
            mode: InvocationMode::Spawn,
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<ExecConfig, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<ExecConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = lookup(ENV_SRC).unwrap_or_default();

        let code_dir = match lookup(ENV_CODE_DIR) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(DEFAULT_CODE_DIR),
        };

        let log_level = lookup(ENV_LOG_LEVEL)
            .as_deref()
            .map(LogLevel::parse_lenient)
            .unwrap_or_default();

        let mode = match lookup(ENV_LAUNCH_MODE) {
            Some(raw) => raw.parse()?,
            None => InvocationMode::default(),
        };

        Ok(ExecConfig {
            source,
            code_dir,
            log_level,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ExecConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigLoader::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_applied() {
        let config = load(&[]).unwrap();
        assert_eq!(config.source, "");
        assert_eq!(config.code_dir, PathBuf::from("/tmp/lambda"));
        assert_eq!(config.log_level, LogLevel::All);
        assert_eq!(config.mode, InvocationMode::Spawn);
    }

    #[test]
    fn test_valid_config() {
        let config = load(&[
            (ENV_SRC, "s3://bucket1/fn/v1"),
            (ENV_CODE_DIR, "/var/task/code"),
            (ENV_LOG_LEVEL, "WARN"),
            (ENV_LAUNCH_MODE, "replace"),
        ])
        .unwrap();
        assert_eq!(config.source, "s3://bucket1/fn/v1");
        assert_eq!(config.code_dir, PathBuf::from("/var/task/code"));
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.mode, InvocationMode::Replace);
    }

    #[test]
    fn test_empty_code_dir_uses_default() {
        let config = load(&[(ENV_CODE_DIR, "")]).unwrap();
        assert_eq!(config.code_dir, PathBuf::from(DEFAULT_CODE_DIR));
    }

    #[test]
    fn test_invalid_launch_mode() {
        let result = load(&[(ENV_LAUNCH_MODE, "fork")]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                variable: ENV_LAUNCH_MODE,
                ..
            })
        ));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse_lenient("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse_lenient("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse_lenient("ERROR"), LogLevel::Error);
        // Unknown levels filter nothing
        assert_eq!(LogLevel::parse_lenient("LOUD"), LogLevel::All);
        assert_eq!(LogLevel::parse_lenient(""), LogLevel::All);
        assert_eq!(LogLevel::All.directive(), "trace");
    }
}
