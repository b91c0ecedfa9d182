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

//! # usg-protected-settings
//!
//! Decrypts protected settings: a PKCS#7 enveloped JSON document encrypted
//! for a certificate installed in the machine trust store (`LocalMachine\MY`).
//! The certificate is found by thumbprint and the store performs the
//! decryption, so the private key never leaves its custody.
//!
//! ## Pipeline
//!
//! 1. [`thumbprint`]: hex thumbprint string to bytes
//! 2. [`resolver`]: open the store, enumerate, compare SHA-1 thumbprints
//! 3. [`decryptor`]: two-phase size-then-fetch message decryption
//! 4. Parse the plaintext as a JSON object ([`SettingsMap`])
//!
//! The store is reached through the [`TrustStoreProvider`] trait:
//! [`windows::Crypt32Provider`] on Windows, and the in-memory
//! [`software::SoftwareTrustStore`] everywhere.
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn example(ciphertext: &[u8]) -> usg_protected_settings::Result<()> {
//! use usg_protected_settings::windows::Crypt32Provider;
//! use usg_protected_settings::ProtectedSettingsDecryptor;
//!
//! let provider = Crypt32Provider::new();
//! let decryptor = ProtectedSettingsDecryptor::new(&provider);
//!
//! let settings = decryptor.decrypt("F8D51EC7F8596F01D58711061A19D4A78CE42CA4", ciphertext)?;
//! for (key, value) in &settings {
//!     println!("{key} = {value}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Cargo Features
//!
//! - `software-store` (default): in-memory trust store and CMS decryption
//!   using RustCrypto, for tests and non-Windows hosts

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod decryptor;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod thumbprint;

#[cfg(feature = "software-store")]
pub mod enveloped;

#[cfg(feature = "software-store")]
pub mod software;

#[cfg(windows)]
pub mod windows;

#[cfg(test)]
mod testing;

// Re-export main types at crate root for convenience
pub use config::{DecryptorConfig, DecryptorConfigBuilder};
pub use error::{Result, SettingsError};
pub use pipeline::{decrypt_protected_settings, ProtectedSettingsDecryptor, SettingsMap};
pub use provider::{NativeError, TrustStoreProvider};
pub use store::{CertificateEntry, StoreHandle, StoreLocation};
pub use thumbprint::{Thumbprint, ThumbprintPolicy};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
