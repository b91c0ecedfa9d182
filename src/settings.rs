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

//! Handler settings files.
//!
//! The configuration folder holds one `<n>.settings` file per configuration
//! sequence number. Each file is JSON of the form:
//!
//! ```json
//! {
//!   "runtimeSettings": [{
//!     "handlerSettings": {
//!       "protectedSettingsCertThumbprint": "F8D51EC7...",
//!       "protectedSettings": "MIIBzQYJKoZIhvcNAQcDoIIBvjCCAboCAQAx...",
//!       "publicSettings": { "applicationName": "agent" }
//!     }
//!   }]
//! }
//! ```
//!
//! `protectedSettings` is the base64 of a PKCS#7 enveloped message.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SettingsError};

const SETTINGS_EXTENSION: &str = "settings";

/// Contents of a `<n>.settings` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerSettingsFile {
    /// One entry per handler; only the first is used.
    #[serde(default)]
    pub runtime_settings: Vec<RuntimeSettings>,
}

/// Entry of `runtimeSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// Settings for the handler.
    pub handler_settings: HandlerSettings,
}

/// Settings delivered to one handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerSettings {
    /// Hex thumbprint of the certificate the protected settings target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_settings_cert_thumbprint: Option<String>,

    /// Base64 PKCS#7 enveloped message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_settings: Option<String>,

    /// Settings delivered in the clear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_settings: Option<Map<String, Value>>,
}

impl HandlerSettings {
    /// The certificate thumbprint, if the handler has protected settings.
    pub fn thumbprint(&self) -> Option<&str> {
        self.protected_settings_cert_thumbprint
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    /// Decode `protectedSettings` from base64.
    ///
    /// Returns `None` when the field is absent or empty. Embedded whitespace
    /// is ignored.
    pub fn protected_ciphertext(&self) -> Result<Option<Vec<u8>>> {
        let Some(encoded) = self.protected_settings.as_deref() else {
            return Ok(None);
        };

        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Ok(None);
        }

        Ok(Some(base64::engine::general_purpose::STANDARD.decode(compact)?))
    }
}

impl HandlerSettingsFile {
    /// Parse a settings document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SettingsError::config(format!("Invalid handler settings: {e}")))
    }

    /// Load `<config_folder>/<sequence>.settings`.
    pub fn load(config_folder: impl AsRef<Path>, sequence: u32) -> Result<Self> {
        let path = settings_path(config_folder, sequence);
        debug!("Loading handler settings from {}", path.display());

        let json = std::fs::read_to_string(&path)
            .map_err(|e| SettingsError::config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Load the settings file with the highest sequence number.
    pub fn load_latest(config_folder: impl AsRef<Path>) -> Result<(u32, Self)> {
        let folder = config_folder.as_ref();
        let sequence = latest_sequence_number(folder)?.ok_or_else(|| {
            SettingsError::config(format!("No .settings files in {}", folder.display()))
        })?;
        Ok((sequence, Self::load(folder, sequence)?))
    }

    /// The first handler's settings.
    pub fn handler_settings(&self) -> Result<&HandlerSettings> {
        self.runtime_settings
            .first()
            .map(|r| &r.handler_settings)
            .ok_or_else(|| SettingsError::config("runtimeSettings is empty"))
    }
}

/// Path of the settings file for a sequence number.
pub fn settings_path(config_folder: impl AsRef<Path>, sequence: u32) -> PathBuf {
    config_folder
        .as_ref()
        .join(format!("{}.{}", sequence, SETTINGS_EXTENSION))
}

/// Highest `<n>` among `<n>.settings` files in the folder.
///
/// Entries that do not parse as a sequence number are ignored.
pub fn latest_sequence_number(config_folder: impl AsRef<Path>) -> Result<Option<u32>> {
    let mut latest = None;

    for entry in std::fs::read_dir(config_folder)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SETTINGS_EXTENSION) {
            continue;
        }
        let sequence = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok());

        if let Some(n) = sequence {
            latest = latest.max(Some(n));
        }
    }

    Ok(latest)
}
