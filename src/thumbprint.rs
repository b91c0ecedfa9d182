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

//! Certificate thumbprint codec.
//!
//! Thumbprints are compared as bytes, never as text, so differences in case
//! or a stray leading character from the source encoding do not matter.
//!
//! Two decoders are provided:
//!
//! - [`decode`] is lenient: an odd-length input loses its first character, and
//!   a pair that is not two hex digits decodes to `0x00`. It never fails.
//! - [`decode_strict`] applies the same leading-character rule but rejects
//!   empty input and any invalid pair.
//!
//! ```
//! use usg_protected_settings::thumbprint;
//!
//! let upper = thumbprint::decode("AB12CD");
//! let lower = thumbprint::decode("ab12cd");
//! assert_eq!(upper, lower);
//! assert_eq!(upper.as_bytes(), &[0xAB, 0x12, 0xCD]);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::error::{Result, SettingsError};

/// Length of a SHA-1 thumbprint in bytes.
pub const SHA1_THUMBPRINT_LEN: usize = 20;

/// A certificate thumbprint as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Thumbprint(Vec<u8>);

impl Thumbprint {
    /// Wrap raw thumbprint bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The thumbprint bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the thumbprint has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Format with colon separators, e.g. `AB:CD:EF`.
    pub fn to_colon_hex(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl AsRef<[u8]> for Thumbprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Thumbprint {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl FromStr for Thumbprint {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        decode_strict(s)
    }
}

/// How caller-supplied thumbprints are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbprintPolicy {
    /// Zero-fill invalid hex pairs ([`decode`]).
    #[default]
    Lenient,
    /// Reject invalid hex pairs ([`decode_strict`]).
    Strict,
}

impl ThumbprintPolicy {
    /// Decode `thumbprint` under this policy.
    pub fn decode(self, thumbprint: &str) -> Result<Thumbprint> {
        match self {
            Self::Lenient => Ok(decode(thumbprint)),
            Self::Strict => decode_strict(thumbprint),
        }
    }
}

/// Characters that carry hex digit pairs, without a stray leading character.
fn effective_chars(thumbprint: &str) -> Vec<char> {
    let mut chars: Vec<char> = thumbprint.chars().collect();
    if chars.len() % 2 == 1 {
        chars.remove(0);
    }
    chars
}

fn parse_pair(pair: &[char]) -> Option<u8> {
    if !pair.iter().all(char::is_ascii_hexdigit) {
        return None;
    }
    let text: String = pair.iter().collect();
    u8::from_str_radix(&text, 16).ok()
}

/// SHA-1 thumbprint of a DER-encoded certificate, as the store computes it.
pub fn of_der(der: &[u8]) -> Thumbprint {
    Thumbprint(Sha1::digest(der).to_vec())
}

/// Decode a hex thumbprint leniently.
///
/// Invalid pairs become `0x00` and are logged; the result always has
/// `floor(len / 2)` bytes of the effective input.
pub fn decode(thumbprint: &str) -> Thumbprint {
    let chars = effective_chars(thumbprint);

    let bytes = chars
        .chunks_exact(2)
        .enumerate()
        .map(|(index, pair)| {
            parse_pair(pair).unwrap_or_else(|| {
                warn!(
                    "Thumbprint byte {} is not a hex pair, substituting 00",
                    index
                );
                0
            })
        })
        .collect();

    Thumbprint(bytes)
}

/// Decode a hex thumbprint, rejecting invalid input.
pub fn decode_strict(thumbprint: &str) -> Result<Thumbprint> {
    let chars = effective_chars(thumbprint);
    if chars.is_empty() {
        return Err(SettingsError::invalid_thumbprint("thumbprint is empty"));
    }

    let bytes = chars
        .chunks_exact(2)
        .enumerate()
        .map(|(index, pair)| {
            parse_pair(pair).ok_or_else(|| {
                SettingsError::invalid_thumbprint(format!(
                    "'{}' at byte {} is not a hex pair",
                    pair.iter().collect::<String>(),
                    index
                ))
            })
        })
        .collect::<Result<Vec<u8>>>()?;

    Ok(Thumbprint(bytes))
}
