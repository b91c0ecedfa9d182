// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. [`init`] installs the `tracing_subscriber` formatter
//! used by the `protected-settings` binary, in plain text or JSON.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! level = "info"
//! json_format = false
//! ```
//!
//! Thumbprints and store paths are logged. Decrypted settings never are.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettingsError};

/// Log level for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose - all messages.
    Trace = 0,
    /// Debug information.
    Debug = 1,
    /// Informational messages.
    #[default]
    Info = 2,
    /// Warnings.
    #[serde(alias = "warning")]
    Warn = 3,
    /// Errors only.
    Error = 4,
}

impl LogLevel {
    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Get the level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    /// The equivalent `tracing` level.
    pub fn to_tracing(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Minimum log level to output.
    pub level: LogLevel,
    /// Use JSON format for log entries.
    pub json_format: bool,
}

impl LogConfig {
    /// Set the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enable JSON format.
    pub fn with_json(mut self) -> Self {
        self.json_format = true;
        self
    }
}

/// Install a global `tracing` subscriber writing to stderr.
///
/// # Errors
///
/// [`SettingsError::Platform`] if a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(config.level.to_tracing())
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| SettingsError::platform(format!("Failed to initialize logging: {}", e)))
}
