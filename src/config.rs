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

//! Configuration for the protected settings decryptor.
//!
//! The defaults match how protected settings are always provisioned: the
//! certificate lives in `LocalMachine\MY`. A TOML file can override them:
//!
//! ```toml
//! store_location = "LocalMachine"
//! store_name = "MY"
//! thumbprint_policy = "lenient"
//! trim_trailing_nul = true
//!
//! [logging]
//! level = "debug"
//! json_format = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SettingsError};
use crate::logging::LogConfig;
use crate::store::{parse_store_path, StoreLocation, PERSONAL_STORE};
use crate::thumbprint::ThumbprintPolicy;

/// Configuration for a [`ProtectedSettingsDecryptor`](crate::ProtectedSettingsDecryptor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecryptorConfig {
    /// Store location holding the certificate.
    pub store_location: StoreLocation,

    /// Store name within the location.
    pub store_name: String,

    /// How thumbprint strings are decoded.
    pub thumbprint_policy: ThumbprintPolicy,

    /// Drop trailing NUL bytes from the plaintext before parsing it as JSON.
    ///
    /// Some producers encrypt a C string including its terminator.
    pub trim_trailing_nul: bool,

    /// Logging configuration, used by the binary.
    pub logging: LogConfig,
}

impl Default for DecryptorConfig {
    fn default() -> Self {
        Self {
            store_location: StoreLocation::LocalMachine,
            store_name: PERSONAL_STORE.to_string(),
            thumbprint_policy: ThumbprintPolicy::Lenient,
            trim_trailing_nul: true,
            logging: LogConfig::default(),
        }
    }
}

impl DecryptorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> DecryptorConfigBuilder {
        DecryptorConfigBuilder::new()
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, has unknown keys, or fails
    /// [`validate`](Self::validate).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| SettingsError::config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml(&toml_content)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SettingsError::config(format!("TOML serialize: {e}")))
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.store_name.trim().is_empty() {
            return Err(SettingsError::config("store_name must not be empty"));
        }
        if self.store_name.contains(['\\', '/']) {
            return Err(SettingsError::config(format!(
                "store_name '{}' must not contain a path separator",
                self.store_name
            )));
        }
        Ok(())
    }

    /// `Location\Name` of the configured store.
    pub fn store_path(&self) -> String {
        format!("{}\\{}", self.store_location, self.store_name)
    }
}

/// Builder for [`DecryptorConfig`].
#[derive(Debug, Default)]
pub struct DecryptorConfigBuilder {
    config: DecryptorConfig,
}

impl DecryptorConfigBuilder {
    /// Create a builder starting from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store location.
    pub fn store_location(mut self, location: StoreLocation) -> Self {
        self.config.store_location = location;
        self
    }

    /// Set the store name.
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.config.store_name = name.into();
        self
    }

    /// Set location and name from a path like `CurrentUser\MY`.
    pub fn store_path(mut self, path: &str) -> Result<Self> {
        let (location, name) = parse_store_path(path)?;
        self.config.store_location = location;
        self.config.store_name = name;
        Ok(self)
    }

    /// Set the thumbprint decoding policy.
    pub fn thumbprint_policy(mut self, policy: ThumbprintPolicy) -> Self {
        self.config.thumbprint_policy = policy;
        self
    }

    /// Enable or disable trailing NUL trimming.
    pub fn trim_trailing_nul(mut self, trim: bool) -> Self {
        self.config.trim_trailing_nul = trim;
        self
    }

    /// Set the logging configuration.
    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn build(self) -> Result<DecryptorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
