// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message queue configuration.
//!
//! Supports both programmatic and file-based configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default time a message may wait for its endpoint.
pub const DEFAULT_MSG_TIMEOUT_SECS: u64 = 10;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Message queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqConfig {
    /// Queue name (for identification in logs).
    #[serde(default = "default_name")]
    pub name: String,

    /// Seconds a message waits for its destination endpoint before it is
    /// dropped. Applies to every destination.
    #[serde(default = "default_msg_timeout")]
    pub msg_timeout_secs: u64,

    /// Worker threads for the built-in executor.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_name() -> String {
    "hdds-mq".to_string()
}

fn default_msg_timeout() -> u64 {
    DEFAULT_MSG_TIMEOUT_SECS
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            msg_timeout_secs: DEFAULT_MSG_TIMEOUT_SECS,
            worker_threads: default_worker_threads(),
            log_level: default_log_level(),
        }
    }
}

impl MqConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the pending-message timeout.
    pub fn msg_timeout_secs(mut self, secs: u64) -> Self {
        self.msg_timeout_secs = secs;
        self
    }

    /// Set the worker thread count.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Pending-message timeout as a `Duration`.
    pub fn msg_timeout(&self) -> Duration {
        Duration::from_secs(self.msg_timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.msg_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "msg_timeout_secs must be at least 1".into(),
            ));
        }

        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".into(),
            ));
        }

        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("Queue name is empty".into()));
        }

        Ok(())
    }
}
