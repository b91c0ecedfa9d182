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

//! CryptoAPI trust store provider.
//!
//! | Operation | Function |
//! |---|---|
//! | open / close | `CertOpenStore` (`CERT_STORE_PROV_SYSTEM_W`, read-only) / `CertCloseStore` |
//! | enumerate | `CertEnumCertificatesInStore` |
//! | thumbprint | `CertGetCertificateContextProperty` |
//! | decrypt | `CryptDecryptMessage` |
//! | release | `CertFreeCertificateContext` |

use std::ffi::{c_void, OsStr};
use std::os::windows::ffi::OsStrExt;

use windows::Win32::Security::Cryptography::{
    CertCloseStore, CertEnumCertificatesInStore, CertFreeCertificateContext,
    CertGetCertificateContextProperty, CertOpenStore, CryptDecryptMessage, CERT_CONTEXT,
    CERT_OPEN_STORE_FLAGS, CERT_QUERY_ENCODING_TYPE, CERT_STORE_OPEN_EXISTING_FLAG,
    CERT_STORE_PROV_SYSTEM_W, CERT_STORE_READONLY_FLAG, CERT_SYSTEM_STORE_CURRENT_USER,
    CERT_SYSTEM_STORE_LOCAL_MACHINE, CRYPT_DECRYPT_MESSAGE_PARA, HCERTSTORE,
};

use super::{last_error, native_error};
use crate::provider::{
    open_failure, DecryptMessageParams, NativeError, PropertyId, TrustStoreProvider,
};
use crate::store::StoreLocation;

fn location_flags(location: StoreLocation) -> u32 {
    match location {
        StoreLocation::LocalMachine => CERT_SYSTEM_STORE_LOCAL_MACHINE,
        StoreLocation::CurrentUser => CERT_SYSTEM_STORE_CURRENT_USER,
    }
}

/// An open `HCERTSTORE`.
#[derive(Debug)]
pub struct Crypt32Store {
    handle: HCERTSTORE,
}

/// A `PCCERT_CONTEXT` owned by the caller.
#[derive(Debug)]
pub struct Crypt32Cert {
    context: *const CERT_CONTEXT,
}

/// Trust store provider backed by `crypt32.dll`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crypt32Provider;

impl Crypt32Provider {
    /// Create a provider.
    pub fn new() -> Self {
        Self
    }
}

impl TrustStoreProvider for Crypt32Provider {
    type Store = Crypt32Store;
    type Cert = Crypt32Cert;

    fn open_store(
        &self,
        location: StoreLocation,
        name: &str,
    ) -> Result<Option<Crypt32Store>, NativeError> {
        let wide_name: Vec<u16> = OsStr::new(name)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let flags = CERT_OPEN_STORE_FLAGS(location_flags(location))
            | CERT_STORE_READONLY_FLAG
            | CERT_STORE_OPEN_EXISTING_FLAG;

        // SAFETY: wide_name is NUL-terminated and outlives the call.
        let result = unsafe {
            CertOpenStore(
                CERT_STORE_PROV_SYSTEM_W,
                CERT_QUERY_ENCODING_TYPE(0),
                None,
                flags,
                Some(wide_name.as_ptr() as *const c_void),
            )
        };

        // A null handle arrives as an error carrying last-error 0
        match result {
            Ok(handle) => Ok(Some(Crypt32Store { handle })),
            Err(e) => open_failure(native_error(&e)),
        }
    }

    fn close_store(&self, store: &mut Crypt32Store) {
        if store.handle.is_invalid() {
            return;
        }
        // SAFETY: the handle came from CertOpenStore and is closed once.
        unsafe {
            let _ = CertCloseStore(store.handle, 0);
        }
        store.handle = HCERTSTORE(std::ptr::null_mut());
    }

    fn next_certificate(
        &self,
        store: &Crypt32Store,
        previous: Option<Crypt32Cert>,
    ) -> Result<Option<Crypt32Cert>, NativeError> {
        // CertEnumCertificatesInStore frees the previous context, even on failure
        let previous = previous.map(|cert| cert.context);

        // SAFETY: previous, if any, was returned by this store's enumeration
        // and has not been freed.
        let context = unsafe { CertEnumCertificatesInStore(store.handle, previous) };

        if context.is_null() {
            let error = last_error();
            return if error.code() == 0 {
                Ok(None)
            } else {
                Err(error)
            };
        }

        Ok(Some(Crypt32Cert { context }))
    }

    fn certificate_property(
        &self,
        cert: &Crypt32Cert,
        property: PropertyId,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> Result<(), NativeError> {
        let data = match buffer {
            Some(buf) => {
                *len = buf.len() as u32;
                Some(buf.as_mut_ptr() as *mut c_void)
            }
            None => None,
        };

        // SAFETY: the context is live; data, if any, points at *len bytes.
        unsafe { CertGetCertificateContextProperty(cert.context, property.as_u32(), data, len) }
            .map_err(|e| native_error(&e))
    }

    fn decrypt_message(
        &self,
        params: &DecryptMessageParams<'_, Crypt32Store>,
        message: &[u8],
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> Result<Option<Crypt32Cert>, NativeError> {
        let mut stores = [params.store().handle];
        let para = CRYPT_DECRYPT_MESSAGE_PARA {
            cbSize: std::mem::size_of::<CRYPT_DECRYPT_MESSAGE_PARA>() as u32,
            dwMsgAndCertEncodingType: params.encoding_type(),
            cCertStore: params.store_count(),
            rghCertStore: stores.as_mut_ptr(),
        };

        let output = match buffer {
            Some(buf) => {
                *len = buf.len() as u32;
                Some(buf.as_mut_ptr())
            }
            None => None,
        };
        let message = &message[..params.message_len().min(message.len())];
        let mut exchange: *mut CERT_CONTEXT = std::ptr::null_mut();

        // SAFETY: para and stores live across the call; output, if any,
        // points at *len writable bytes.
        unsafe {
            CryptDecryptMessage(
                &para,
                message,
                output,
                Some(len as *mut u32),
                Some(&mut exchange as *mut *mut CERT_CONTEXT),
            )
        }
        .map_err(|e| native_error(&e))?;

        if exchange.is_null() {
            Ok(None)
        } else {
            Ok(Some(Crypt32Cert { context: exchange }))
        }
    }

    fn release_certificate(&self, cert: &mut Crypt32Cert) {
        if cert.context.is_null() {
            return;
        }
        // SAFETY: the context is owned by the caller and freed once.
        unsafe {
            let _ = CertFreeCertificateContext(Some(cert.context));
        }
        cert.context = std::ptr::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decryptor::decrypt;
    use crate::error::SettingsError;
    use crate::resolver::resolve;
    use crate::store::StoreHandle;
    use crate::thumbprint::Thumbprint;

    #[test]
    fn test_open_current_user_personal() {
        let provider = Crypt32Provider::new();
        let store = StoreHandle::open(&provider, StoreLocation::CurrentUser, "MY");
        assert!(store.is_ok());
    }

    #[test]
    fn test_open_missing_store() {
        let provider = Crypt32Provider::new();
        let err = StoreHandle::open(&provider, StoreLocation::CurrentUser, "NoSuchStore-7f3c")
            .unwrap_err();
        assert!(matches!(err, SettingsError::StoreAccessDenied { .. }));
    }

    #[test]
    fn test_resolve_unknown_thumbprint() {
        let provider = Crypt32Provider::new();
        let store = StoreHandle::open(&provider, StoreLocation::CurrentUser, "MY").unwrap();
        let err = resolve(&store, &Thumbprint::from_bytes(vec![0u8; 20])).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_location_flags() {
        assert_eq!(location_flags(StoreLocation::LocalMachine), 0x0002_0000);
        assert_eq!(location_flags(StoreLocation::CurrentUser), 0x0001_0000);
    }

    #[test]
    fn test_decrypt_requires_resolved_certificate() {
        // Resolution has to succeed before decryption can be attempted, so
        // exercise the garbage path only when the user store has an entry.
        let provider = Crypt32Provider::new();
        let store = StoreHandle::open(&provider, StoreLocation::CurrentUser, "MY").unwrap();
        let Some(first) = provider.next_certificate(store.raw(), None).unwrap_or(None) else {
            return;
        };
        let thumbprint = crate::resolver::certificate_thumbprint(&provider, &first).unwrap();
        let mut first = first;
        provider.release_certificate(&mut first);

        let entry = resolve(&store, &thumbprint).unwrap();
        let err = decrypt(b"definitely not pkcs7", &entry).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidCiphertextFormat));
    }
}
