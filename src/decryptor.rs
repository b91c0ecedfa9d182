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

//! PKCS#7 enveloped message decryption.
//!
//! Decryption is delegated to the trust store, which holds the private key of
//! the resolved certificate. The store is asked for the plaintext size first,
//! then fills a buffer of that size; the buffer is truncated to the length
//! reported by the second call.
//!
//! The store may hold keys for several certificates. The plaintext is only
//! accepted if the certificate the store decrypted with is the one resolved
//! by thumbprint.

use tracing::debug;

use crate::error::{Result, SettingsError};
use crate::provider::{
    query_then_fetch, DecryptMessageParams, FetchPhase, NativeError, TrustStoreProvider,
};
use crate::resolver::certificate_thumbprint;
use crate::store::CertificateEntry;
use crate::thumbprint::Thumbprint;

/// Exchange certificate reported by the provider, released on drop.
struct ExchangeCertificate<'p, P: TrustStoreProvider> {
    provider: &'p P,
    cert: Option<P::Cert>,
}

impl<'p, P: TrustStoreProvider> ExchangeCertificate<'p, P> {
    fn new(provider: &'p P) -> Self {
        Self {
            provider,
            cert: None,
        }
    }

    fn replace(&mut self, cert: Option<P::Cert>) {
        if let Some(cert) = cert {
            if let Some(mut previous) = self.cert.replace(cert) {
                self.provider.release_certificate(&mut previous);
            }
        }
    }

    /// Check that the message was decrypted with `expected`.
    fn verify(&self, expected: &Thumbprint) -> Result<()> {
        let mismatch = SettingsError::DecryptionFailed(NativeError::CRYPT_E_RECIPIENT_NOT_FOUND);

        let Some(cert) = &self.cert else {
            debug!("Store did not report the certificate it decrypted with");
            return Err(mismatch);
        };

        let actual = certificate_thumbprint(self.provider, cert)?;
        if actual != *expected {
            debug!(
                "Message was decrypted with certificate {}, not {}",
                actual, expected
            );
            return Err(mismatch);
        }
        Ok(())
    }
}

impl<P: TrustStoreProvider> Drop for ExchangeCertificate<'_, P> {
    fn drop(&mut self) {
        if let Some(mut cert) = self.cert.take() {
            self.provider.release_certificate(&mut cert);
        }
    }
}

/// Decrypt an enveloped message with the key of a resolved certificate.
///
/// The message is decrypted against the store that yielded `certificate`.
/// A zero plaintext size reported by the store yields an empty result.
///
/// # Errors
///
/// - [`SettingsError::InvalidCiphertextFormat`] if the size query reports an
///   ASN.1 bad tag
/// - [`SettingsError::DecryptionFailed`] with `CRYPT_E_RECIPIENT_NOT_FOUND`
///   if the store decrypted with a different certificate
/// - [`SettingsError::DecryptionFailed`] for any other native failure
pub fn decrypt<P: TrustStoreProvider>(
    ciphertext: &[u8],
    certificate: &CertificateEntry<'_, '_, P>,
) -> Result<Vec<u8>> {
    let store = certificate.store();
    let provider = store.provider();
    let params = DecryptMessageParams::new(ciphertext.len(), store.raw());
    let mut exchange = ExchangeCertificate::new(provider);

    debug!(
        "Decrypting {} byte message with certificate {}",
        ciphertext.len(),
        certificate.thumbprint()
    );

    let plaintext = query_then_fetch(|buffer, len| {
        let cert = provider.decrypt_message(&params, ciphertext, buffer, len)?;
        exchange.replace(cert);
        Ok(())
    })
    .map_err(|e| match e.phase {
        FetchPhase::Size if e.source.is_bad_tag() => SettingsError::InvalidCiphertextFormat,
        _ => SettingsError::DecryptionFailed(e.source),
    })?;

    exchange.verify(certificate.thumbprint())?;

    debug!("Decrypted {} bytes", plaintext.len());
    Ok(plaintext)
}
