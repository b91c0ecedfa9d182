//! Error types for protected settings decryption.
//!
//! This module defines all error types that can occur while opening the trust
//! store, resolving a certificate by thumbprint, decrypting the enveloped
//! message and parsing the resulting settings.

use thiserror::Error;

use crate::provider::NativeError;

/// Result type alias using [`SettingsError`].
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors that can occur while decrypting protected settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The certificate store could not be opened at all.
    #[error("Cannot open certificate store {store} due to '{source}'")]
    StoreAccessDenied {
        /// Store path, e.g. `LocalMachine\MY`.
        store: String,
        /// Native error reported by the provider.
        #[source]
        source: NativeError,
    },

    /// The store opened but returned no usable handle.
    ///
    /// The provider signals that administrative privileges are required.
    #[error("Certificate store {store} returned no handle; the process must run as administrator")]
    PermissionRequired {
        /// Store path, e.g. `LocalMachine\MY`.
        store: String,
    },

    /// Enumeration failed with something other than end-of-store.
    #[error("Could not enumerate certificates due to '{0}'")]
    EnumerationFailed(NativeError),

    /// The thumbprint property of a certificate could not be read.
    #[error("Could not hash certificate due to '{0}'")]
    ThumbprintFailed(NativeError),

    /// No certificate in the store matched the requested thumbprint.
    #[error("Certificate with thumbprint {thumbprint} was not found")]
    CertNotFound {
        /// Upper-case hex of the requested thumbprint.
        thumbprint: String,
    },

    /// The ciphertext is not a valid enveloped message for this certificate.
    #[error("Protected settings are not a valid PKCS#7 enveloped message")]
    InvalidCiphertextFormat,

    /// Any other native decryption failure.
    #[error("Could not decrypt data due to '{0}'")]
    DecryptionFailed(NativeError),

    /// Decrypted plaintext is not a JSON object.
    #[error("Could not parse decrypted settings: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Thumbprint rejected by strict decoding.
    #[error("Invalid thumbprint: {0}")]
    InvalidThumbprint(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Configuration or settings file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Platform capability unavailable.
    #[error("Platform error: {0}")]
    Platform(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SettingsError {
    /// Create a store access error for the given store path.
    pub fn store_access_denied(store: impl Into<String>, source: NativeError) -> Self {
        Self::StoreAccessDenied {
            store: store.into(),
            source,
        }
    }

    /// Create a permission required error for the given store path.
    pub fn permission_required(store: impl Into<String>) -> Self {
        Self::PermissionRequired {
            store: store.into(),
        }
    }

    /// Create a certificate not found error.
    pub fn cert_not_found(thumbprint: impl Into<String>) -> Self {
        Self::CertNotFound {
            thumbprint: thumbprint.into(),
        }
    }

    /// Create an invalid thumbprint error with the given message.
    pub fn invalid_thumbprint(msg: impl Into<String>) -> Self {
        Self::InvalidThumbprint(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a platform error with the given message.
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Returns true if the caller lacks the rights to use the store.
    pub fn is_permission_error(&self) -> bool {
        matches!(
            self,
            Self::StoreAccessDenied { .. } | Self::PermissionRequired { .. }
        )
    }

    /// Returns true if the certificate is not installed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CertNotFound { .. })
    }

    /// An actionable message for operators, if one applies.
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::StoreAccessDenied { .. } => {
                Some("check that the LocalMachine certificate store is accessible")
            }
            Self::PermissionRequired { .. } => Some("run the agent as an elevated user"),
            Self::CertNotFound { .. } => {
                Some("install the certificate and private key used to encrypt the settings")
            }
            Self::InvalidCiphertextFormat => {
                Some("the payload is corrupt or was encrypted for a different certificate")
            }
            Self::Deserialization(_) => Some("the decrypted payload is not a JSON object"),
            _ => None,
        }
    }
}
