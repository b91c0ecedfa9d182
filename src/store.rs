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

//! Scoped trust store handles.
//!
//! Certificate stores are organized by location:
//!
//! - **LocalMachine**: System-wide certificates; protected settings are
//!   always encrypted against a certificate installed here
//! - **CurrentUser**: Per-user certificates, no elevation required
//!
//! The personal store is named `MY`.
//!
//! A [`StoreHandle`] closes its native store when dropped, and a
//! [`CertificateEntry`] releases its certificate context when dropped, so
//! every exit path of the pipeline gives both back to the provider.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "software-store")]
//! # fn example() -> usg_protected_settings::Result<()> {
//! use usg_protected_settings::software::SoftwareTrustStore;
//! use usg_protected_settings::store::{StoreHandle, StoreLocation};
//!
//! let provider = SoftwareTrustStore::new();
//! let store = StoreHandle::open(&provider, StoreLocation::LocalMachine, "MY")?;
//! println!("Opened {}", store.path());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, SettingsError};
use crate::provider::TrustStoreProvider;
use crate::thumbprint::Thumbprint;

/// Name of the personal certificate store.
pub const PERSONAL_STORE: &str = "MY";

/// Location of a certificate store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum StoreLocation {
    /// Local machine store - system-wide, requires admin for private keys.
    #[default]
    LocalMachine,
    /// Current user store - per-user, no elevation required.
    CurrentUser,
}

impl FromStr for StoreLocation {
    type Err = SettingsError;

    /// Parse a store location from a string like "LocalMachine" or "CurrentUser".
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "localmachine" | "local_machine" | "machine" => Ok(Self::LocalMachine),
            "currentuser" | "current_user" | "user" => Ok(Self::CurrentUser),
            _ => Err(SettingsError::config(format!(
                "Invalid store location '{}': expected LocalMachine or CurrentUser",
                s
            ))),
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalMachine => write!(f, "LocalMachine"),
            Self::CurrentUser => write!(f, "CurrentUser"),
        }
    }
}

/// Parse a full store path like "LocalMachine\MY" into location and name.
pub fn parse_store_path(path: &str) -> Result<(StoreLocation, String)> {
    let parts: Vec<&str> = path.split(['\\', '/']).collect();
    if parts.len() != 2 || parts[1].is_empty() {
        return Err(SettingsError::config(format!(
            "Invalid store path '{}': expected 'Location\\Name' format",
            path
        )));
    }

    let location = parts[0].parse()?;
    Ok((location, parts[1].to_string()))
}

/// An open, read-only session onto a certificate store.
pub struct StoreHandle<'p, P: TrustStoreProvider> {
    provider: &'p P,
    location: StoreLocation,
    name: String,
    raw: P::Store,
}

impl<'p, P: TrustStoreProvider> StoreHandle<'p, P> {
    /// Open a certificate store for reading.
    ///
    /// # Errors
    ///
    /// - [`SettingsError::StoreAccessDenied`] if the provider fails to open the store
    /// - [`SettingsError::PermissionRequired`] if the provider returns a null handle
    pub fn open(provider: &'p P, location: StoreLocation, name: &str) -> Result<Self> {
        let path = format!("{}\\{}", location, name);

        match provider.open_store(location, name) {
            Ok(Some(raw)) => {
                debug!("Opened certificate store {}", path);
                Ok(Self {
                    provider,
                    location,
                    name: name.to_string(),
                    raw,
                })
            }
            Ok(None) => Err(SettingsError::permission_required(path)),
            Err(e) => Err(SettingsError::store_access_denied(path, e)),
        }
    }

    /// Open the LocalMachine personal store.
    pub fn open_local_machine_personal(provider: &'p P) -> Result<Self> {
        Self::open(provider, StoreLocation::LocalMachine, PERSONAL_STORE)
    }

    /// Get the store location.
    pub fn location(&self) -> StoreLocation {
        self.location
    }

    /// Get the store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store path in `Location\Name` form.
    pub fn path(&self) -> String {
        format!("{}\\{}", self.location, self.name)
    }

    /// The provider that owns this store.
    pub fn provider(&self) -> &'p P {
        self.provider
    }

    /// The native store handle.
    pub fn raw(&self) -> &P::Store {
        &self.raw
    }
}

impl<P: TrustStoreProvider> Drop for StoreHandle<'_, P> {
    fn drop(&mut self) {
        debug!("Closing certificate store {}\\{}", self.location, self.name);
        self.provider.close_store(&mut self.raw);
    }
}

impl<P: TrustStoreProvider> fmt::Debug for StoreHandle<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("location", &self.location)
            .field("name", &self.name)
            .finish()
    }
}

/// A certificate retained from enumeration.
///
/// Borrows the store it was enumerated from, so it can never outlive the
/// store handle, and decryption always searches that same store.
pub struct CertificateEntry<'s, 'p, P: TrustStoreProvider> {
    store: &'s StoreHandle<'p, P>,
    cert: P::Cert,
    thumbprint: Thumbprint,
}

impl<'s, 'p, P: TrustStoreProvider> CertificateEntry<'s, 'p, P> {
    pub(crate) fn new(store: &'s StoreHandle<'p, P>, cert: P::Cert, thumbprint: Thumbprint) -> Self {
        Self {
            store,
            cert,
            thumbprint,
        }
    }

    /// The store this certificate was enumerated from.
    pub fn store(&self) -> &'s StoreHandle<'p, P> {
        self.store
    }

    /// The native certificate context.
    pub fn raw(&self) -> &P::Cert {
        &self.cert
    }

    /// The thumbprint computed during resolution.
    pub fn thumbprint(&self) -> &Thumbprint {
        &self.thumbprint
    }
}

impl<P: TrustStoreProvider> Drop for CertificateEntry<'_, '_, P> {
    fn drop(&mut self) {
        self.store.provider.release_certificate(&mut self.cert);
    }
}

impl<P: TrustStoreProvider> fmt::Debug for CertificateEntry<'_, '_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("store", &self.store.path())
            .field("thumbprint", &self.thumbprint.to_string())
            .finish()
    }
}
