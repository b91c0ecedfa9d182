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

//! CMS EnvelopedData parsing and content decryption.
//!
//! Decodes a PKCS#7 / CMS `ContentInfo` carrying `EnvelopedData` with the
//! `cms` crate and extracts what the in-memory trust store needs to decrypt
//! it: the key-transport recipients and the encrypted content with its
//! algorithm and IV.
//!
//! Decode failures are split the way the native decoder reports them: an
//! unexpected tag or content type is [`EnvelopeError::BadTag`], a length
//! that runs past the end of the input is [`EnvelopeError::Truncated`].
//!
//! ```
//! use usg_protected_settings::enveloped::{parse_enveloped_data, EnvelopeError};
//!
//! let err = parse_enveloped_data(br#"{"key":"value"}"#).unwrap_err();
//! assert!(matches!(err, EnvelopeError::BadTag(_)));
//! ```

use cms::content_info::ContentInfo;
use cms::enveloped_data::{
    EnvelopedData as CmsEnvelopedData, KeyTransRecipientInfo,
    RecipientIdentifier as CmsRecipientIdentifier, RecipientInfo as CmsRecipientInfo,
};
use const_oid::db::rfc5911::ID_ENVELOPED_DATA;
use const_oid::ObjectIdentifier;
use der::asn1::OctetString;
use der::{Decode, Encode, ErrorKind};
use tracing::debug;

// Key transport
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const ID_RSAES_OAEP: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.7");

// Content encryption
const ID_AES_128_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.2");
const ID_AES_192_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.22");
const ID_AES_256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");
const DES_EDE3_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.3.7");

/// Errors from parsing or decrypting EnvelopedData.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// The input is not the expected ASN.1 structure.
    #[error("unexpected ASN.1 structure: {0}")]
    BadTag(String),

    /// An ASN.1 length runs past the end of the input, or the DER is
    /// otherwise corrupt.
    #[error("truncated ASN.1 data: {0}")]
    Truncated(String),

    /// Well-formed but uses an algorithm or encoding we do not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Symmetric decryption or padding failed.
    #[error("content decryption failed: {0}")]
    Crypto(String),
}

/// Result alias for envelope operations.
pub type EnvelopeResult<T> = std::result::Result<T, EnvelopeError>;

/// Classify a DER decode failure.
fn der_error(what: &str, e: der::Error) -> EnvelopeError {
    let message = format!("{}: {}", what, e);
    match e.kind() {
        ErrorKind::TagUnexpected { .. }
        | ErrorKind::TagUnknown { .. }
        | ErrorKind::TagNumberInvalid
        | ErrorKind::TagModeUnknown => EnvelopeError::BadTag(message),
        ErrorKind::IndefiniteLength => EnvelopeError::Unsupported(message),
        _ => EnvelopeError::Truncated(message),
    }
}

/// Supported content encryption algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    /// AES-128-CBC
    Aes128Cbc,
    /// AES-192-CBC
    Aes192Cbc,
    /// AES-256-CBC
    Aes256Cbc,
    /// Triple DES (3DES) CBC
    TripleDesCbc,
}

impl EncryptionAlgorithm {
    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
            Self::TripleDesCbc => 24,
        }
    }

    /// Block size in bytes, which is also the IV size.
    pub fn block_size(&self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
            Self::TripleDesCbc => 8,
        }
    }

    /// Display name, e.g. `AES-256-CBC`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes128Cbc => "AES-128-CBC",
            Self::Aes192Cbc => "AES-192-CBC",
            Self::Aes256Cbc => "AES-256-CBC",
            Self::TripleDesCbc => "3DES-CBC",
        }
    }

    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == ID_AES_128_CBC {
            Some(Self::Aes128Cbc)
        } else if *oid == ID_AES_192_CBC {
            Some(Self::Aes192Cbc)
        } else if *oid == ID_AES_256_CBC {
            Some(Self::Aes256Cbc)
        } else if *oid == DES_EDE3_CBC {
            Some(Self::TripleDesCbc)
        } else {
            None
        }
    }
}

/// Key encryption algorithm of a key-transport recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncryptionAlgorithm {
    /// RSA PKCS#1 v1.5 (`rsaEncryption`).
    RsaPkcs1v15,
    /// RSAES-OAEP. Recognized but not decrypted.
    RsaOaep,
    /// Anything else.
    Other,
}

impl From<&ObjectIdentifier> for KeyEncryptionAlgorithm {
    fn from(oid: &ObjectIdentifier) -> Self {
        if *oid == RSA_ENCRYPTION {
            Self::RsaPkcs1v15
        } else if *oid == ID_RSAES_OAEP {
            Self::RsaOaep
        } else {
            Self::Other
        }
    }
}

/// How a recipient's certificate is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientIdentifier {
    /// `IssuerAndSerialNumber`: the full DER `Name` of the issuer and the
    /// content octets of the serial number INTEGER.
    #[allow(missing_docs)]
    IssuerAndSerial { issuer: Vec<u8>, serial: Vec<u8> },
    /// `[0] SubjectKeyIdentifier`
    SubjectKeyId(Vec<u8>),
}

/// A `KeyTransRecipientInfo`.
#[derive(Debug, Clone)]
pub struct RecipientInfo {
    /// Certificate the key was wrapped for.
    pub identifier: RecipientIdentifier,
    /// Key transport algorithm.
    pub key_encryption_algorithm: KeyEncryptionAlgorithm,
    /// Content encryption key wrapped for this recipient.
    pub encrypted_key: Vec<u8>,
}

impl TryFrom<&KeyTransRecipientInfo> for RecipientInfo {
    type Error = EnvelopeError;

    fn try_from(ktri: &KeyTransRecipientInfo) -> EnvelopeResult<Self> {
        let identifier = match &ktri.rid {
            CmsRecipientIdentifier::IssuerAndSerialNumber(ias) => {
                RecipientIdentifier::IssuerAndSerial {
                    issuer: ias.issuer.to_der().map_err(|e| der_error("issuer", e))?,
                    serial: ias.serial_number.as_bytes().to_vec(),
                }
            }
            CmsRecipientIdentifier::SubjectKeyIdentifier(ski) => {
                RecipientIdentifier::SubjectKeyId(ski.0.as_bytes().to_vec())
            }
        };

        Ok(Self {
            identifier,
            key_encryption_algorithm: KeyEncryptionAlgorithm::from(&ktri.key_enc_alg.oid),
            encrypted_key: ktri.enc_key.as_bytes().to_vec(),
        })
    }
}

/// Parsed EnvelopedData.
#[derive(Debug, Clone)]
pub struct EnvelopedData {
    /// CMSVersion.
    pub version: u8,

    /// Key-transport recipients. Other recipient kinds are skipped.
    pub recipients: Vec<RecipientInfo>,

    /// Content cipher.
    pub content_encryption_algorithm: EncryptionAlgorithm,

    /// CBC initialization vector from the algorithm parameters.
    pub iv: Vec<u8>,

    /// Encrypted content.
    pub encrypted_content: Vec<u8>,
}

/// Parse a DER `ContentInfo` holding `EnvelopedData`.
///
/// # Errors
///
/// - [`EnvelopeError::BadTag`] if the outer structure or content type is wrong
/// - [`EnvelopeError::Truncated`] if any length overruns the input
/// - [`EnvelopeError::Unsupported`] for an unknown content cipher, a
///   BER indefinite length, or missing encrypted content
pub fn parse_enveloped_data(data: &[u8]) -> EnvelopeResult<EnvelopedData> {
    debug!("Parsing CMS EnvelopedData ({} bytes)", data.len());

    let content_info = ContentInfo::from_der(data).map_err(|e| der_error("ContentInfo", e))?;
    if content_info.content_type != ID_ENVELOPED_DATA {
        return Err(EnvelopeError::BadTag(format!(
            "expected EnvelopedData, got content type {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| der_error("EnvelopedData", e))?;
    let enveloped =
        CmsEnvelopedData::from_der(&content).map_err(|e| der_error("EnvelopedData", e))?;

    let mut recipients = Vec::new();
    for recipient in enveloped.recip_infos.0.iter() {
        match recipient {
            CmsRecipientInfo::Ktri(ktri) => recipients.push(RecipientInfo::try_from(ktri)?),
            _ => debug!("Skipping recipient that is not key transport"),
        }
    }

    let eci = &enveloped.encrypted_content;
    let algorithm = EncryptionAlgorithm::from_oid(&eci.content_enc_alg.oid).ok_or_else(|| {
        EnvelopeError::Unsupported(format!(
            "content encryption algorithm {}",
            eci.content_enc_alg.oid
        ))
    })?;

    let params = eci
        .content_enc_alg
        .parameters
        .as_ref()
        .ok_or_else(|| EnvelopeError::Unsupported("content cipher without IV".to_string()))?;
    let params = params.to_der().map_err(|e| der_error("IV", e))?;
    let iv = OctetString::from_der(&params).map_err(|e| der_error("IV", e))?;

    let encrypted_content = eci
        .encrypted_content
        .as_ref()
        .ok_or_else(|| EnvelopeError::Unsupported("detached encrypted content".to_string()))?;

    debug!(
        "EnvelopedData: {} key-transport recipient(s), {}, {} content bytes",
        recipients.len(),
        algorithm.as_str(),
        encrypted_content.as_bytes().len()
    );

    Ok(EnvelopedData {
        version: enveloped.version as u8,
        recipients,
        content_encryption_algorithm: algorithm,
        iv: iv.as_bytes().to_vec(),
        encrypted_content: encrypted_content.as_bytes().to_vec(),
    })
}

/// Decrypt content using symmetric encryption.
///
/// Strips PKCS#7 padding from the result.
pub fn decrypt_content(
    encrypted: &[u8],
    key: &[u8],
    iv: &[u8],
    algorithm: EncryptionAlgorithm,
) -> EnvelopeResult<Vec<u8>> {
    use cbc::cipher::block_padding::Pkcs7;
    use cbc::cipher::{BlockDecryptMut, KeyIvInit};

    if key.len() != algorithm.key_size() {
        return Err(EnvelopeError::Crypto(format!(
            "invalid key size for {}: expected {}, got {}",
            algorithm.as_str(),
            algorithm.key_size(),
            key.len()
        )));
    }
    if iv.len() != algorithm.block_size() {
        return Err(EnvelopeError::Crypto(format!(
            "invalid IV size: expected {}, got {}",
            algorithm.block_size(),
            iv.len()
        )));
    }

    let crypto = |e: &dyn std::fmt::Display| EnvelopeError::Crypto(e.to_string());
    let mut buffer = encrypted.to_vec();

    let plaintext = match algorithm {
        EncryptionAlgorithm::Aes128Cbc => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(|e| crypto(&e))?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|e| crypto(&e))?
            .len(),
        EncryptionAlgorithm::Aes192Cbc => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(|e| crypto(&e))?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|e| crypto(&e))?
            .len(),
        EncryptionAlgorithm::Aes256Cbc => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(|e| crypto(&e))?
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|e| crypto(&e))?
            .len(),
        EncryptionAlgorithm::TripleDesCbc => {
            cbc::Decryptor::<des::TdesEde3>::new_from_slices(key, iv)
                .map_err(|e| crypto(&e))?
                .decrypt_padded_mut::<Pkcs7>(&mut buffer)
                .map_err(|e| crypto(&e))?
                .len()
        }
    };

    buffer.truncate(plaintext);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit};

    const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
    const ID_AT_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

    const TAG_INTEGER: u8 = 0x02;
    const TAG_OCTET_STRING: u8 = 0x04;
    const TAG_NULL: u8 = 0x05;
    const TAG_OID: u8 = 0x06;
    const TAG_UTF8_STRING: u8 = 0x0C;
    const TAG_SEQUENCE: u8 = 0x30;
    const TAG_SET: u8 = 0x31;
    const TAG_CONTEXT_0_PRIMITIVE: u8 = 0x80;
    const TAG_CONTEXT_0_CONSTRUCTED: u8 = 0xA0;

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = content.len();
        if len < 0x80 {
            out.push(len as u8);
        } else if len < 0x100 {
            out.extend_from_slice(&[0x81, len as u8]);
        } else {
            out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
        }
        out.extend_from_slice(content);
        out
    }

    fn oid(oid: ObjectIdentifier) -> Vec<u8> {
        tlv(TAG_OID, oid.as_bytes())
    }

    fn algorithm_identifier(algorithm: ObjectIdentifier, params: &[u8]) -> Vec<u8> {
        let mut body = oid(algorithm);
        body.extend_from_slice(params);
        tlv(TAG_SEQUENCE, &body)
    }

    fn ktri(version: u8, rid: Vec<u8>, encrypted_key: &[u8]) -> Vec<u8> {
        let mut body = tlv(TAG_INTEGER, &[version]);
        body.extend(rid);
        body.extend(algorithm_identifier(RSA_ENCRYPTION, &tlv(TAG_NULL, &[])));
        body.extend(tlv(TAG_OCTET_STRING, encrypted_key));
        tlv(TAG_SEQUENCE, &body)
    }

    fn issuer_name(common_name: &[u8]) -> Vec<u8> {
        let mut atv = oid(ID_AT_COMMON_NAME);
        atv.extend(tlv(TAG_UTF8_STRING, common_name));
        tlv(TAG_SEQUENCE, &tlv(TAG_SET, &tlv(TAG_SEQUENCE, &atv)))
    }

    fn issuer_and_serial(common_name: &[u8], serial: &[u8]) -> Vec<u8> {
        let mut body = issuer_name(common_name);
        body.extend(tlv(TAG_INTEGER, serial));
        tlv(TAG_SEQUENCE, &body)
    }

    fn content_info(
        recipients: &[Vec<u8>],
        cipher: ObjectIdentifier,
        iv: &[u8],
        content: Vec<u8>,
    ) -> Vec<u8> {
        let mut eci = oid(ID_DATA);
        eci.extend(algorithm_identifier(cipher, &tlv(TAG_OCTET_STRING, iv)));
        eci.extend(content);

        let mut enveloped = tlv(TAG_INTEGER, &[0]);
        enveloped.extend(tlv(TAG_SET, &recipients.concat()));
        enveloped.extend(tlv(TAG_SEQUENCE, &eci));

        let mut ci = oid(ID_ENVELOPED_DATA);
        ci.extend(tlv(TAG_CONTEXT_0_CONSTRUCTED, &tlv(TAG_SEQUENCE, &enveloped)));
        tlv(TAG_SEQUENCE, &ci)
    }

    fn aes256_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        use cbc::cipher::block_padding::Pkcs7;
        let mut buffer = plaintext.to_vec();
        buffer.resize((plaintext.len() / 16 + 1) * 16, 0);
        cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_parse_issuer_and_serial_recipient() {
        let recipient = ktri(0, issuer_and_serial(b"issuer", &[0x01, 0x02]), &[0xEE; 4]);
        let data = content_info(
            &[recipient],
            ID_AES_256_CBC,
            &[0x11; 16],
            tlv(TAG_CONTEXT_0_PRIMITIVE, &[0x22; 32]),
        );

        let parsed = parse_enveloped_data(&data).unwrap();
        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.content_encryption_algorithm, EncryptionAlgorithm::Aes256Cbc);
        assert_eq!(parsed.iv, vec![0x11; 16]);
        assert_eq!(parsed.encrypted_content, vec![0x22; 32]);
        assert_eq!(parsed.recipients.len(), 1);

        let recipient = &parsed.recipients[0];
        assert_eq!(recipient.encrypted_key, vec![0xEE; 4]);
        assert_eq!(
            recipient.key_encryption_algorithm,
            KeyEncryptionAlgorithm::RsaPkcs1v15
        );
        assert_eq!(
            recipient.identifier,
            RecipientIdentifier::IssuerAndSerial {
                issuer: issuer_name(b"issuer"),
                serial: vec![0x01, 0x02],
            }
        );
    }

    #[test]
    fn test_parse_subject_key_id_recipient() {
        let recipient = ktri(2, tlv(TAG_CONTEXT_0_PRIMITIVE, &[0xAB; 20]), &[0xEE; 4]);
        let data = content_info(
            &[recipient],
            ID_AES_128_CBC,
            &[0x11; 16],
            tlv(TAG_CONTEXT_0_PRIMITIVE, &[0x01; 16]),
        );

        let parsed = parse_enveloped_data(&data).unwrap();
        assert_eq!(
            parsed.recipients[0].identifier,
            RecipientIdentifier::SubjectKeyId(vec![0xAB; 20])
        );
        assert_eq!(parsed.content_encryption_algorithm, EncryptionAlgorithm::Aes128Cbc);
    }

    #[test]
    fn test_parse_rejects_non_der_input() {
        assert!(matches!(
            parse_enveloped_data(br#"{"key":"value"}"#),
            Err(EnvelopeError::BadTag(_))
        ));
        assert!(matches!(
            parse_enveloped_data(b"garbage"),
            Err(EnvelopeError::BadTag(_))
        ));
        assert!(matches!(parse_enveloped_data(&[]), Err(EnvelopeError::Truncated(_))));
    }

    #[test]
    fn test_parse_rejects_other_content_type() {
        let mut ci = oid(ID_DATA);
        ci.extend(tlv(TAG_CONTEXT_0_CONSTRUCTED, &tlv(TAG_OCTET_STRING, b"x")));
        let data = tlv(TAG_SEQUENCE, &ci);

        assert!(matches!(
            parse_enveloped_data(&data),
            Err(EnvelopeError::BadTag(_))
        ));
    }

    #[test]
    fn test_parse_truncated() {
        let recipient = ktri(0, issuer_and_serial(b"issuer", &[0x01]), &[0xEE; 4]);
        let data = content_info(
            &[recipient],
            ID_AES_256_CBC,
            &[0x11; 16],
            tlv(TAG_CONTEXT_0_PRIMITIVE, &[0x22; 32]),
        );

        let cut = &data[..data.len() - 10];
        assert!(matches!(
            parse_enveloped_data(cut),
            Err(EnvelopeError::Truncated(_))
        ));
    }

    #[test]
    fn test_parse_unknown_cipher() {
        let recipient = ktri(0, issuer_and_serial(b"issuer", &[0x01]), &[0xEE; 4]);
        let data = content_info(
            &[recipient],
            ObjectIdentifier::new_unwrap("1.3.6.1"),
            &[0x11; 16],
            tlv(TAG_CONTEXT_0_PRIMITIVE, &[0x22; 16]),
        );
        assert!(matches!(
            parse_enveloped_data(&data),
            Err(EnvelopeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_algorithm_from_oid() {
        assert_eq!(
            EncryptionAlgorithm::from_oid(&ID_AES_192_CBC),
            Some(EncryptionAlgorithm::Aes192Cbc)
        );
        assert_eq!(
            EncryptionAlgorithm::from_oid(&DES_EDE3_CBC),
            Some(EncryptionAlgorithm::TripleDesCbc)
        );
        assert_eq!(EncryptionAlgorithm::from_oid(&RSA_ENCRYPTION), None);
        assert_eq!(EncryptionAlgorithm::TripleDesCbc.block_size(), 8);
        assert_eq!(EncryptionAlgorithm::Aes192Cbc.key_size(), 24);
        assert_eq!(
            KeyEncryptionAlgorithm::from(&ID_RSAES_OAEP),
            KeyEncryptionAlgorithm::RsaOaep
        );
    }

    #[test]
    fn test_aes_decryption() {
        let key = [0x42u8; 32];
        let iv = [0x24u8; 16];
        let plaintext = br#"{"key":"value"}"#;

        let ciphertext = aes256_encrypt(&key, &iv, plaintext);
        let decrypted =
            decrypt_content(&ciphertext, &key, &iv, EncryptionAlgorithm::Aes256Cbc).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decryption_wrong_key_or_sizes() {
        let key = [0x42u8; 32];
        let iv = [0x24u8; 16];
        let ciphertext = aes256_encrypt(&key, &iv, b"Hello, World!");

        assert!(matches!(
            decrypt_content(&ciphertext, &key[..16], &iv, EncryptionAlgorithm::Aes256Cbc),
            Err(EnvelopeError::Crypto(_))
        ));
        assert!(matches!(
            decrypt_content(&ciphertext, &key, &iv[..8], EncryptionAlgorithm::Aes256Cbc),
            Err(EnvelopeError::Crypto(_))
        ));
        assert!(matches!(
            decrypt_content(&ciphertext[..15], &key, &iv, EncryptionAlgorithm::Aes256Cbc),
            Err(EnvelopeError::Crypto(_))
        ));
    }
}
