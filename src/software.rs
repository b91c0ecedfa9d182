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

//! Software-based (in-memory) trust store implementation.
//!
//! This module provides an implementation of [`TrustStoreProvider`] that holds
//! DER certificates and their RSA private keys in memory. It is primarily
//! intended for:
//!
//! - **Development and testing**: exercising the full pipeline off Windows
//! - **Fixtures**: decrypting messages produced by `openssl cms -encrypt`
//!
//! It reports the same native error codes the CryptoAPI does, so callers see
//! the same [`SettingsError`](crate::error::SettingsError) variants on either
//! provider.
//!
//! # Security Considerations
//!
//! **WARNING**: private keys live in process memory. Do not use this provider
//! where the key must stay behind a platform boundary.
//!
//! # Example
//!
//! ```no_run
//! use usg_protected_settings::software::{SoftwareCertificate, SoftwareTrustStore};
//! use usg_protected_settings::store::StoreLocation;
//!
//! # fn example() -> usg_protected_settings::Result<()> {
//! let cert = SoftwareCertificate::from_der(std::fs::read("cert.der")?)?
//!     .with_private_key_pkcs8_der(&std::fs::read("key.der")?)?;
//!
//! let provider = SoftwareTrustStore::new();
//! provider.add_certificate(StoreLocation::LocalMachine, "MY", cert);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use const_oid::db::rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER;
use der::{Decode, Encode};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use tracing::debug;
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use x509_cert::Certificate;

use crate::enveloped::{
    decrypt_content, parse_enveloped_data, EnvelopeError, EnvelopedData, KeyEncryptionAlgorithm,
    RecipientIdentifier, RecipientInfo,
};
use crate::error::{Result, SettingsError};
use crate::provider::{fill_buffer, DecryptMessageParams, NativeError, PropertyId, TrustStoreProvider};
use crate::store::StoreLocation;
use crate::thumbprint::{self, Thumbprint};

/// A certificate held by the software store.
pub struct SoftwareCertificate {
    der: Vec<u8>,
    thumbprint: Thumbprint,
    issuer: Vec<u8>,
    serial: Vec<u8>,
    subject_key_id: Option<Vec<u8>>,
    private_key: Option<RsaPrivateKey>,
}

impl SoftwareCertificate {
    /// Parse a DER-encoded X.509 certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        let cert = Certificate::from_der(&der)
            .map_err(|e| SettingsError::config(format!("Invalid certificate: {}", e)))?;

        let tbs = &cert.tbs_certificate;
        let issuer = tbs
            .issuer
            .to_der()
            .map_err(|e| SettingsError::config(format!("Failed to encode issuer: {}", e)))?;
        let serial = tbs.serial_number.as_bytes().to_vec();

        let subject_key_id = tbs
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == ID_CE_SUBJECT_KEY_IDENTIFIER)
            .and_then(|ext| SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes()).ok())
            .map(|ski| ski.0.as_bytes().to_vec());

        Ok(Self {
            thumbprint: thumbprint::of_der(&der),
            der,
            issuer,
            serial,
            subject_key_id,
            private_key: None,
        })
    }

    /// Attach the RSA private key for this certificate (PKCS#8 DER).
    pub fn with_private_key_pkcs8_der(mut self, der: &[u8]) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| SettingsError::config(format!("Invalid PKCS#8 private key: {}", e)))?;
        self.private_key = Some(key);
        Ok(self)
    }

    /// The DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-1 thumbprint of the DER encoding.
    pub fn thumbprint(&self) -> &Thumbprint {
        &self.thumbprint
    }

    /// Whether a private key is attached.
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    fn matches(&self, rid: &RecipientIdentifier) -> bool {
        match rid {
            RecipientIdentifier::IssuerAndSerial { issuer, serial } => {
                *issuer == self.issuer && *serial == self.serial
            }
            RecipientIdentifier::SubjectKeyId(ski) => self.subject_key_id.as_ref() == Some(ski),
        }
    }
}

impl fmt::Debug for SoftwareCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareCertificate")
            .field("thumbprint", &self.thumbprint.to_string())
            .field("has_private_key", &self.has_private_key())
            .finish()
    }
}

type StoreKey = (StoreLocation, String);

fn store_key(location: StoreLocation, name: &str) -> StoreKey {
    (location, name.to_uppercase())
}

/// Open store: a snapshot of the certificates present when it was opened.
#[derive(Debug)]
pub struct SoftwareStore {
    path: String,
    certificates: Vec<Arc<SoftwareCertificate>>,
}

/// Certificate context handed out by enumeration.
#[derive(Debug, Clone)]
pub struct SoftwareCertContext {
    index: usize,
    certificate: Arc<SoftwareCertificate>,
}

impl SoftwareCertContext {
    /// The enumerated certificate.
    pub fn certificate(&self) -> &SoftwareCertificate {
        &self.certificate
    }
}

/// In-memory trust store provider.
///
/// Stores are keyed by location and case-insensitive name and are created
/// by the first [`add_certificate`](Self::add_certificate) into them.
#[derive(Clone, Default)]
pub struct SoftwareTrustStore {
    stores: Arc<RwLock<HashMap<StoreKey, Vec<Arc<SoftwareCertificate>>>>>,
    deny_access: bool,
    require_elevation: bool,
}

impl SoftwareTrustStore {
    /// Create an empty provider with no stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every store open with `ERROR_ACCESS_DENIED`.
    pub fn deny_access(mut self) -> Self {
        self.deny_access = true;
        self
    }

    /// Return a null handle from every store open, as an unelevated process
    /// sees for the machine store.
    pub fn require_elevation(mut self) -> Self {
        self.require_elevation = true;
        self
    }

    /// Add a certificate, creating the store if needed.
    pub fn add_certificate(&self, location: StoreLocation, name: &str, cert: SoftwareCertificate) {
        debug!(
            "Adding certificate {} to {}\\{}",
            cert.thumbprint(),
            location,
            name
        );
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(store_key(location, name))
            .or_default()
            .push(Arc::new(cert));
    }

    /// Builder form of [`add_certificate`](Self::add_certificate).
    pub fn with_certificate(
        self,
        location: StoreLocation,
        name: &str,
        cert: SoftwareCertificate,
    ) -> Self {
        self.add_certificate(location, name, cert);
        self
    }

    /// Create an empty store so that opening it succeeds.
    pub fn create_store(&self, location: StoreLocation, name: &str) {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(store_key(location, name))
            .or_default();
    }

    /// Number of certificates in a store, if it exists.
    pub fn certificate_count(&self, location: StoreLocation, name: &str) -> Option<usize> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&store_key(location, name))
            .map(Vec::len)
    }

    /// Locate the recipient this store can decrypt for.
    ///
    /// Returns the recipient and the store certificate holding its key.
    fn find_recipient<'a>(
        store: &'a SoftwareStore,
        envelope: &'a EnvelopedData,
    ) -> std::result::Result<(&'a RecipientInfo, SoftwareCertContext), NativeError> {
        for recipient in &envelope.recipients {
            let holder = store
                .certificates
                .iter()
                .enumerate()
                .find(|(_, cert)| cert.has_private_key() && cert.matches(&recipient.identifier));

            if let Some((index, cert)) = holder {
                debug!("Recipient matched certificate {}", cert.thumbprint());
                let context = SoftwareCertContext {
                    index,
                    certificate: Arc::clone(cert),
                };
                return Ok((recipient, context));
            }
        }

        debug!(
            "None of {} recipient(s) has a certificate with a private key in {}",
            envelope.recipients.len(),
            store.path
        );
        Err(NativeError::CRYPT_E_RECIPIENT_NOT_FOUND)
    }

    fn decrypt_envelope(
        envelope: &EnvelopedData,
        recipient: &RecipientInfo,
        holder: &SoftwareCertificate,
    ) -> std::result::Result<Vec<u8>, NativeError> {
        let key = holder
            .private_key
            .as_ref()
            .ok_or(NativeError::CRYPT_E_RECIPIENT_NOT_FOUND)?;

        if recipient.key_encryption_algorithm != KeyEncryptionAlgorithm::RsaPkcs1v15 {
            debug!(
                "Key encryption algorithm {:?} is not supported",
                recipient.key_encryption_algorithm
            );
            return Err(NativeError::CRYPT_E_UNKNOWN_ALGO);
        }

        let content_key = key
            .decrypt(Pkcs1v15Encrypt, &recipient.encrypted_key)
            .map_err(|e| {
                debug!("Content key unwrap failed: {}", e);
                NativeError::NTE_BAD_DATA
            })?;

        decrypt_content(
            &envelope.encrypted_content,
            &content_key,
            &envelope.iv,
            envelope.content_encryption_algorithm,
        )
        .map_err(native_error)
    }
}

impl fmt::Debug for SoftwareTrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SoftwareTrustStore")
            .field("stores", &stores.len())
            .field("deny_access", &self.deny_access)
            .field("require_elevation", &self.require_elevation)
            .finish()
    }
}

fn native_error(e: EnvelopeError) -> NativeError {
    debug!("Enveloped data rejected: {}", e);
    match e {
        EnvelopeError::BadTag(_) => NativeError::CRYPT_E_ASN1_BADTAG,
        EnvelopeError::Truncated(_) => NativeError::CRYPT_E_ASN1_CORRUPT,
        EnvelopeError::Unsupported(_) => NativeError::CRYPT_E_UNKNOWN_ALGO,
        EnvelopeError::Crypto(_) => NativeError::NTE_BAD_DATA,
    }
}

impl TrustStoreProvider for SoftwareTrustStore {
    type Store = SoftwareStore;
    type Cert = SoftwareCertContext;

    fn open_store(
        &self,
        location: StoreLocation,
        name: &str,
    ) -> std::result::Result<Option<SoftwareStore>, NativeError> {
        if self.deny_access {
            return Err(NativeError::ERROR_ACCESS_DENIED);
        }
        if self.require_elevation {
            return Ok(None);
        }

        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        let certificates = stores
            .get(&store_key(location, name))
            .ok_or(NativeError::ERROR_FILE_NOT_FOUND)?
            .clone();

        Ok(Some(SoftwareStore {
            path: format!("{}\\{}", location, name),
            certificates,
        }))
    }

    fn close_store(&self, store: &mut SoftwareStore) {
        store.certificates.clear();
    }

    fn next_certificate(
        &self,
        store: &SoftwareStore,
        previous: Option<SoftwareCertContext>,
    ) -> std::result::Result<Option<SoftwareCertContext>, NativeError> {
        let index = previous.map_or(0, |p| p.index + 1);
        match store.certificates.get(index) {
            Some(certificate) => Ok(Some(SoftwareCertContext {
                index,
                certificate: Arc::clone(certificate),
            })),
            None => Err(NativeError::CRYPT_E_NOT_FOUND),
        }
    }

    fn certificate_property(
        &self,
        cert: &SoftwareCertContext,
        property: PropertyId,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<(), NativeError> {
        match property {
            PropertyId::Sha1Hash => fill_buffer(cert.certificate.thumbprint.as_bytes(), buffer, len),
        }
    }

    fn decrypt_message(
        &self,
        params: &DecryptMessageParams<'_, SoftwareStore>,
        message: &[u8],
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> std::result::Result<Option<SoftwareCertContext>, NativeError> {
        let store = params.store();
        let envelope = parse_enveloped_data(&message[..params.message_len().min(message.len())])
            .map_err(native_error)?;
        let (recipient, holder) = Self::find_recipient(store, &envelope)?;

        match buffer {
            None => {
                // Padding makes the ciphertext an upper bound on the plaintext
                *len = envelope.encrypted_content.len() as u32;
            }
            Some(out) => {
                let plaintext = Self::decrypt_envelope(&envelope, recipient, holder.certificate())?;
                fill_buffer(&plaintext, Some(out), len)?;
            }
        }

        Ok(Some(holder))
    }

    fn release_certificate(&self, _cert: &mut SoftwareCertContext) {}
}
