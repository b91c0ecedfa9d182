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

//! Certificate resolution by thumbprint.
//!
//! Walks an open store one entry at a time, computes each entry's thumbprint
//! from its `CERT_HASH_PROP_ID` property and returns the first entry whose
//! thumbprint equals the target byte-for-byte. Entries whose thumbprint
//! cannot be read are skipped.

use tracing::debug;

use crate::error::{Result, SettingsError};
use crate::provider::{query_then_fetch, PropertyId, TrustStoreProvider};
use crate::store::{CertificateEntry, StoreHandle};
use crate::thumbprint::Thumbprint;

/// Compute the thumbprint of a certificate context.
///
/// Queries the SHA-1 hash property with the size-then-fetch protocol. A
/// zero reported size yields an empty thumbprint.
///
/// # Errors
///
/// [`SettingsError::ThumbprintFailed`] if either query phase fails.
pub fn certificate_thumbprint<P: TrustStoreProvider>(
    provider: &P,
    cert: &P::Cert,
) -> Result<Thumbprint> {
    query_then_fetch(|buffer, len| {
        provider.certificate_property(cert, PropertyId::Sha1Hash, buffer, len)
    })
    .map(Thumbprint::from)
    .map_err(|e| SettingsError::ThumbprintFailed(e.source))
}

/// Find the certificate with the given thumbprint in an open store.
///
/// # Errors
///
/// - [`SettingsError::CertNotFound`] if enumeration completes without a match
/// - [`SettingsError::EnumerationFailed`] on any enumeration error other than
///   end-of-store
pub fn resolve<'s, 'p, P: TrustStoreProvider>(
    store: &'s StoreHandle<'p, P>,
    target: &Thumbprint,
) -> Result<CertificateEntry<'s, 'p, P>> {
    let provider = store.provider();
    let mut previous: Option<P::Cert> = None;
    let mut examined = 0usize;

    loop {
        let cert = match provider.next_certificate(store.raw(), previous.take()) {
            Ok(Some(cert)) => cert,
            Ok(None) => break,
            Err(e) if e.is_end_of_enumeration() => break,
            Err(e) => return Err(SettingsError::EnumerationFailed(e)),
        };
        examined += 1;

        match certificate_thumbprint(provider, &cert) {
            Ok(candidate) if !candidate.is_empty() && candidate == *target => {
                debug!(
                    "Matched certificate {} after examining {} entries",
                    candidate, examined
                );
                return Ok(CertificateEntry::new(store, cert, candidate));
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping certificate {}: {}", examined, e),
        }

        previous = Some(cert);
    }

    debug!(
        "No certificate in {} matched {} ({} examined)",
        store.path(),
        target,
        examined
    );
    Err(SettingsError::cert_not_found(target.to_string()))
}
