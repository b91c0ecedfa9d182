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

//! End-to-end protected settings decryption.
//!
//! Ties the thumbprint codec, the certificate resolver and the envelope
//! decryptor together: open the configured store, find the certificate,
//! decrypt, and parse the plaintext as a JSON object.

use std::path::Path;

use base64::Engine;
use tracing::{debug, info};

use crate::config::DecryptorConfig;
use crate::decryptor;
use crate::error::{Result, SettingsError};
use crate::provider::TrustStoreProvider;
use crate::resolver;
use crate::settings::HandlerSettings;
use crate::store::StoreHandle;

/// Decrypted settings: a JSON object.
pub type SettingsMap = serde_json::Map<String, serde_json::Value>;

/// Decrypts protected settings through a trust store provider.
///
/// Each call opens the configured store, resolves the certificate, decrypts
/// and closes the store again; nothing is cached between calls.
#[derive(Debug)]
pub struct ProtectedSettingsDecryptor<'p, P: TrustStoreProvider> {
    provider: &'p P,
    config: DecryptorConfig,
}

impl<'p, P: TrustStoreProvider> ProtectedSettingsDecryptor<'p, P> {
    /// Create a decryptor with the default configuration.
    pub fn new(provider: &'p P) -> Self {
        Self::with_config(provider, DecryptorConfig::default())
    }

    /// Create a decryptor with an explicit configuration.
    pub fn with_config(provider: &'p P, config: DecryptorConfig) -> Self {
        Self { provider, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &DecryptorConfig {
        &self.config
    }

    /// Decrypt to raw plaintext bytes.
    ///
    /// Trailing NUL bytes are removed when the configuration asks for it.
    pub fn decrypt_to_bytes(&self, thumbprint: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let target = self.config.thumbprint_policy.decode(thumbprint)?;

        let store = StoreHandle::open(
            self.provider,
            self.config.store_location,
            &self.config.store_name,
        )?;
        let certificate = resolver::resolve(&store, &target)?;
        let mut plaintext = decryptor::decrypt(ciphertext, &certificate)?;

        if self.config.trim_trailing_nul {
            let trimmed = plaintext.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            if trimmed < plaintext.len() {
                debug!("Dropping {} trailing NUL byte(s)", plaintext.len() - trimmed);
                plaintext.truncate(trimmed);
            }
        }

        Ok(plaintext)
    }

    /// Decrypt and parse as a JSON object.
    ///
    /// An empty plaintext yields an empty map. Handing the same empty
    /// buffer to a JSON parser would fail with an end-of-input error; use
    /// [`decrypt_to_bytes`](Self::decrypt_to_bytes) to see the raw result.
    ///
    /// # Errors
    ///
    /// Any error of the resolver or decryptor, or
    /// [`SettingsError::Deserialization`] if the plaintext is not a JSON object.
    pub fn decrypt(&self, thumbprint: &str, ciphertext: &[u8]) -> Result<SettingsMap> {
        let plaintext = self.decrypt_to_bytes(thumbprint, ciphertext)?;

        let settings = if plaintext.is_empty() {
            SettingsMap::new()
        } else {
            serde_json::from_slice(&plaintext)?
        };

        info!(
            "Decrypted protected settings for thumbprint {} ({} keys)",
            thumbprint,
            settings.len()
        );
        Ok(settings)
    }

    /// Decrypt base64-encoded ciphertext.
    pub fn decrypt_base64(&self, thumbprint: &str, encoded: &str) -> Result<SettingsMap> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let ciphertext = base64::engine::general_purpose::STANDARD.decode(compact)?;
        self.decrypt(thumbprint, &ciphertext)
    }

    /// Decrypt the protected settings of a handler settings entry.
    ///
    /// A handler without protected settings yields an empty map.
    pub fn decrypt_handler_settings(&self, handler: &HandlerSettings) -> Result<SettingsMap> {
        let Some(ciphertext) = handler.protected_ciphertext()? else {
            debug!("Handler has no protected settings");
            return Ok(SettingsMap::new());
        };

        let thumbprint = handler.thumbprint().ok_or_else(|| {
            SettingsError::config("protectedSettings present without protectedSettingsCertThumbprint")
        })?;

        self.decrypt(thumbprint, &ciphertext)
    }
}

/// Decrypt protected settings with the default configuration.
///
/// `config_folder` identifies the handler configuration the ciphertext came
/// from and is only used for logging.
pub fn decrypt_protected_settings<P: TrustStoreProvider>(
    provider: &P,
    config_folder: impl AsRef<Path>,
    thumbprint: &str,
    ciphertext: &[u8],
) -> Result<SettingsMap> {
    debug!(
        "Decrypting protected settings from {}",
        config_folder.as_ref().display()
    );
    ProtectedSettingsDecryptor::new(provider).decrypt(thumbprint, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NativeError;
    use crate::testing::{DecryptBehavior, FakeProvider, OpenBehavior};
    use crate::thumbprint::ThumbprintPolicy;

    const THUMB: &str = "AB12CD";
    const THUMB_BYTES: [u8; 3] = [0xAB, 0x12, 0xCD];

    fn provider_with(plaintext: &[u8]) -> FakeProvider {
        FakeProvider::new()
            .with_cert(&[0x01])
            .with_cert(&THUMB_BYTES)
            .with_decrypt(DecryptBehavior::Plaintext {
                estimate: plaintext.len() as u32 + 8,
                plaintext: plaintext.to_vec(),
            })
    }

    #[test]
    fn test_decrypt_parses_json_object() {
        let provider = provider_with(br#"{"key":"value"}"#);
        let settings = decrypt_protected_settings(&provider, "/var/lib/config", THUMB, b"x").unwrap();

        assert_eq!(settings.len(), 1);
        assert_eq!(settings["key"], "value");
        assert_eq!(provider.opened(), provider.closed());
    }

    #[test]
    fn test_lowercase_thumbprint() {
        let provider = provider_with(br#"{"key":"value"}"#);
        let decryptor = ProtectedSettingsDecryptor::new(&provider);
        assert!(decryptor.decrypt("ab12cd", b"x").is_ok());
    }

    #[test]
    fn test_empty_plaintext_is_empty_map() {
        let provider = provider_with(b"");
        let settings = ProtectedSettingsDecryptor::new(&provider)
            .decrypt(THUMB, b"x")
            .unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_trailing_nul_trimming() {
        let provider = provider_with(b"{\"key\":\"value\"}\0\0");
        let decryptor = ProtectedSettingsDecryptor::new(&provider);
        assert_eq!(decryptor.decrypt(THUMB, b"x").unwrap()["key"], "value");

        let config = DecryptorConfig::builder().trim_trailing_nul(false).build().unwrap();
        let decryptor = ProtectedSettingsDecryptor::with_config(&provider, config);
        assert_eq!(decryptor.decrypt_to_bytes(THUMB, b"x").unwrap().len(), 17);
        assert!(matches!(
            decryptor.decrypt(THUMB, b"x"),
            Err(SettingsError::Deserialization(_))
        ));
    }

    #[test]
    fn test_non_object_json_is_deserialization_error() {
        let provider = provider_with(b"[1,2,3]");
        let err = ProtectedSettingsDecryptor::new(&provider)
            .decrypt(THUMB, b"x")
            .unwrap_err();
        assert!(matches!(err, SettingsError::Deserialization(_)));
    }

    #[test]
    fn test_strict_policy_rejects_before_opening_store() {
        let provider = provider_with(b"{}");
        let config = DecryptorConfig::builder()
            .thumbprint_policy(ThumbprintPolicy::Strict)
            .build()
            .unwrap();
        let decryptor = ProtectedSettingsDecryptor::with_config(&provider, config);

        let err = decryptor.decrypt("zz12cd", b"x").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidThumbprint(_)));
        assert_eq!(provider.opened(), 0);
    }

    #[test]
    fn test_error_propagation() {
        let provider = FakeProvider::new().with_open(OpenBehavior::NullHandle);
        let err = decrypt_protected_settings(&provider, "", THUMB, b"x").unwrap_err();
        assert!(matches!(err, SettingsError::PermissionRequired { .. }));

        let provider = FakeProvider::new().with_open(OpenBehavior::Fail(NativeError::ERROR_ACCESS_DENIED));
        let err = decrypt_protected_settings(&provider, "", THUMB, b"x").unwrap_err();
        assert!(matches!(err, SettingsError::StoreAccessDenied { .. }));

        let provider = FakeProvider::new().with_cert(&[0x01]);
        let err = decrypt_protected_settings(&provider, "", THUMB, b"x").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(provider.closed(), 1);
    }

    #[test]
    fn test_decrypt_base64() {
        let provider = provider_with(br#"{"a":1}"#);
        let decryptor = ProtectedSettingsDecryptor::new(&provider);
        assert_eq!(decryptor.decrypt_base64(THUMB, "eA==\n").unwrap()["a"], 1);
        assert!(matches!(
            decryptor.decrypt_base64(THUMB, "!!!"),
            Err(SettingsError::Base64(_))
        ));
    }

    #[test]
    fn test_decrypt_handler_settings() {
        let provider = provider_with(br#"{"a":1}"#);
        let decryptor = ProtectedSettingsDecryptor::new(&provider);

        let handler = HandlerSettings {
            protected_settings_cert_thumbprint: Some(THUMB.into()),
            protected_settings: Some("eA==".into()),
            public_settings: None,
        };
        assert_eq!(decryptor.decrypt_handler_settings(&handler).unwrap()["a"], 1);

        let public_only = HandlerSettings::default();
        assert!(decryptor.decrypt_handler_settings(&public_only).unwrap().is_empty());

        let no_thumbprint = HandlerSettings {
            protected_settings: Some("eA==".into()),
            ..Default::default()
        };
        assert!(matches!(
            decryptor.decrypt_handler_settings(&no_thumbprint),
            Err(SettingsError::Config(_))
        ));
    }
}
