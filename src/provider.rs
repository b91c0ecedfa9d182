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

//! Trust store capability interface.
//!
//! This module provides a trait-based abstraction over the platform trust
//! store, so the resolution and decryption pipeline can run against the
//! native Windows CryptoAPI or against an in-memory store.
//!
//! # Key Features
//!
//! - **Zero key material exposure**: the provider performs decryption; private
//!   keys are never handed to the pipeline
//! - **Native calling convention**: operations follow the CryptoAPI
//!   "query size, then fill buffer" protocol and report native error codes
//! - **Provider-agnostic**: the pipeline works with any [`TrustStoreProvider`]
//!
//! # Size-then-fetch
//!
//! Property queries and message decryption both report the required output
//! size when called without a buffer, then fill a buffer of that size on the
//! second call. [`query_then_fetch`] drives that sequence once for every
//! operation shaped this way.

use std::fmt;

use crate::store::StoreLocation;

/// Native error code reported by a trust store provider.
///
/// Codes are Win32 error values or HRESULTs, as returned by `GetLastError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("native error 0x{code:08X}")]
pub struct NativeError {
    code: u32,
}

impl NativeError {
    /// The file (or store) was not found.
    pub const ERROR_FILE_NOT_FOUND: Self = Self::new(2);
    /// Access denied.
    pub const ERROR_ACCESS_DENIED: Self = Self::new(5);
    /// The supplied buffer is too small.
    pub const ERROR_MORE_DATA: Self = Self::new(234);
    /// Bad data (key unwrap or padding failure).
    pub const NTE_BAD_DATA: Self = Self::new(0x8009_0005);
    /// Object or property not found; also marks the end of enumeration.
    pub const CRYPT_E_NOT_FOUND: Self = Self::new(0x8009_2004);
    /// Unknown cryptographic algorithm.
    pub const CRYPT_E_UNKNOWN_ALGO: Self = Self::new(0x8009_1002);
    /// No certificate and private key for any recipient of the message.
    pub const CRYPT_E_RECIPIENT_NOT_FOUND: Self = Self::new(0x8009_100B);
    /// ASN.1 data is truncated or otherwise corrupt.
    pub const CRYPT_E_ASN1_CORRUPT: Self = Self::new(0x8009_3106);
    /// ASN.1 bad tag value met.
    pub const CRYPT_E_ASN1_BADTAG: Self = Self::new(0x8009_310B);

    /// Wrap a raw native code.
    pub const fn new(code: u32) -> Self {
        Self { code }
    }

    /// The raw native code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// True when enumeration has run past the last entry.
    pub fn is_end_of_enumeration(&self) -> bool {
        *self == Self::CRYPT_E_NOT_FOUND
    }

    /// True when the message is not the expected ASN.1 structure.
    pub fn is_bad_tag(&self) -> bool {
        *self == Self::CRYPT_E_ASN1_BADTAG
    }

    /// True for code 0 (`ERROR_SUCCESS`).
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Interpret a failed store open.
///
/// A provider whose open call fails without setting an error code has
/// produced a null handle, which means elevation is required: that is
/// `Ok(None)`. Any real code is passed through.
pub fn open_failure<S>(error: NativeError) -> Result<Option<S>, NativeError> {
    if error.is_success() {
        Ok(None)
    } else {
        Err(error)
    }
}

/// Certificate context properties the pipeline queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyId {
    /// SHA-1 hash of the encoded certificate (`CERT_HASH_PROP_ID`).
    Sha1Hash,
}

impl PropertyId {
    /// Native property identifier.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Sha1Hash => 3,
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1Hash => write!(f, "CERT_HASH_PROP_ID"),
        }
    }
}

/// `X509_ASN_ENCODING`
pub const X509_ASN_ENCODING: u32 = 0x0000_0001;

/// `PKCS_7_ASN_ENCODING`
pub const PKCS_7_ASN_ENCODING: u32 = 0x0001_0000;

/// Parameters for a message decryption call.
///
/// Built once per decryption attempt and shared by both protocol phases.
#[derive(Debug)]
pub struct DecryptMessageParams<'a, S> {
    message_len: usize,
    encoding_type: u32,
    store: &'a S,
}

impl<'a, S> DecryptMessageParams<'a, S> {
    /// Parameters for decrypting `message_len` bytes against a single store.
    pub fn new(message_len: usize, store: &'a S) -> Self {
        Self {
            message_len,
            encoding_type: X509_ASN_ENCODING | PKCS_7_ASN_ENCODING,
            store,
        }
    }

    /// Length of the encrypted message.
    pub fn message_len(&self) -> usize {
        self.message_len
    }

    /// Message and certificate encoding type.
    pub fn encoding_type(&self) -> u32 {
        self.encoding_type
    }

    /// Number of stores searched for the recipient. Always one.
    pub fn store_count(&self) -> u32 {
        1
    }

    /// The store searched for the recipient certificate and key.
    pub fn store(&self) -> &'a S {
        self.store
    }
}

/// Trait for trust store providers (Windows CryptoAPI, in-memory, etc.).
///
/// Implementors expose the four store capabilities the pipeline consumes:
/// open/close, enumeration, property query and message decryption. Buffer
/// operations follow the native convention: with `None` the provider writes
/// the required size to `len`; with `Some(buf)` it fills `buf` and writes the
/// number of bytes produced.
pub trait TrustStoreProvider {
    /// Opaque open store handle.
    type Store;

    /// Opaque certificate context.
    type Cert;

    /// Open a store for reading.
    ///
    /// `Ok(None)` means the provider produced a null handle without an error,
    /// which signals that elevated privileges are required.
    fn open_store(
        &self,
        location: StoreLocation,
        name: &str,
    ) -> Result<Option<Self::Store>, NativeError>;

    /// Close a store handle. The handle is not used afterwards.
    fn close_store(&self, store: &mut Self::Store);

    /// Advance enumeration.
    ///
    /// Ownership of `previous` passes to the provider, which releases it.
    /// End of store is reported as `Ok(None)` or
    /// [`NativeError::CRYPT_E_NOT_FOUND`].
    fn next_certificate(
        &self,
        store: &Self::Store,
        previous: Option<Self::Cert>,
    ) -> Result<Option<Self::Cert>, NativeError>;

    /// Query a certificate context property.
    fn certificate_property(
        &self,
        cert: &Self::Cert,
        property: PropertyId,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> Result<(), NativeError>;

    /// Decrypt a PKCS#7 enveloped message.
    ///
    /// On success, returns the certificate whose private key decrypted the
    /// message (the CryptoAPI exchange certificate), if the provider knows
    /// it. Ownership passes to the caller, which releases it.
    fn decrypt_message(
        &self,
        params: &DecryptMessageParams<'_, Self::Store>,
        message: &[u8],
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> Result<Option<Self::Cert>, NativeError>;

    /// Release a retained certificate context. The context is not used afterwards.
    fn release_certificate(&self, cert: &mut Self::Cert);
}

/// Which step of the size-then-fetch protocol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// The size query without an output buffer.
    Size,
    /// The call that fills the sized buffer.
    Fill,
}

/// Failure of [`query_then_fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchError {
    /// Phase that failed.
    pub phase: FetchPhase,
    /// Native error from that phase.
    pub source: NativeError,
}

/// Run a two-phase "query size, then fill buffer" native operation.
///
/// The first call passes no buffer and learns the required size. A zero size
/// yields an empty result without a second call. Otherwise a buffer of that
/// size is allocated, filled by the second call, and truncated to the length
/// the provider reports afterwards.
pub fn query_then_fetch<F>(mut op: F) -> Result<Vec<u8>, FetchError>
where
    F: FnMut(Option<&mut [u8]>, &mut u32) -> Result<(), NativeError>,
{
    let mut len = 0u32;
    op(None, &mut len).map_err(|source| FetchError {
        phase: FetchPhase::Size,
        source,
    })?;

    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buffer = vec![0u8; len as usize];
    op(Some(&mut buffer), &mut len).map_err(|source| FetchError {
        phase: FetchPhase::Fill,
        source,
    })?;

    buffer.truncate(len as usize);
    Ok(buffer)
}

/// Copy `data` into an optional output buffer using the native convention.
///
/// Helper for providers that hold their results in memory.
pub fn fill_buffer(data: &[u8], buffer: Option<&mut [u8]>, len: &mut u32) -> Result<(), NativeError> {
    let required = data.len() as u32;
    match buffer {
        None => {
            *len = required;
            Ok(())
        }
        Some(out) if out.len() < data.len() => {
            *len = required;
            Err(NativeError::ERROR_MORE_DATA)
        }
        Some(out) => {
            out[..data.len()].copy_from_slice(data);
            *len = required;
            Ok(())
        }
    }
}
