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

//! Windows platform integration.
//!
//! [`Crypt32Provider`] implements [`TrustStoreProvider`](crate::provider::TrustStoreProvider)
//! on the CryptoAPI functions in `crypt32.dll`. The private key stays inside
//! the system key store; `CryptDecryptMessage` finds it through the
//! certificate store handle.
//!
//! # Security Considerations
//!
//! - Private keys of LocalMachine certificates are normally readable only by
//!   administrators and `SYSTEM`
//! - Stores are always opened read-only
//!
//! # Example
//!
//! ```no_run
//! use usg_protected_settings::windows::Crypt32Provider;
//! use usg_protected_settings::decrypt_protected_settings;
//!
//! # fn example(ciphertext: &[u8]) -> usg_protected_settings::Result<()> {
//! let provider = Crypt32Provider::new();
//! let settings = decrypt_protected_settings(
//!     &provider,
//!     r"C:\Packages\Plugins\Agent\RuntimeSettings",
//!     "F8D51EC7F8596F01D58711061A19D4A78CE42CA4",
//!     ciphertext,
//! )?;
//! println!("{} protected settings", settings.len());
//! # Ok(())
//! # }
//! ```

pub mod crypt32;

pub use crypt32::Crypt32Provider;

use crate::provider::NativeError;

/// Check if the current process has administrator privileges.
///
/// The private keys of LocalMachine certificates usually require it.
pub fn is_elevated() -> bool {
    use std::mem::MaybeUninit;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
            return false;
        }

        let mut elevation = MaybeUninit::<TOKEN_ELEVATION>::uninit();
        let mut size = 0u32;

        let result = GetTokenInformation(
            token,
            TokenElevation,
            Some(elevation.as_mut_ptr() as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut size,
        );
        let _ = CloseHandle(token);

        if result.is_ok() {
            elevation.assume_init().TokenIsElevated != 0
        } else {
            false
        }
    }
}

/// Convert an HRESULT into the code `GetLastError` reported.
///
/// Win32 errors wrapped as `0x8007xxxx` are unwrapped; CryptoAPI HRESULTs
/// are kept as they are.
pub(crate) fn native_code(hresult: u32) -> NativeError {
    const FACILITY_WIN32: u32 = 0x8007_0000;

    if hresult & 0xFFFF_0000 == FACILITY_WIN32 {
        NativeError::new(hresult & 0xFFFF)
    } else {
        NativeError::new(hresult)
    }
}

/// Native error of a failed `windows` crate call.
pub(crate) fn native_error(e: &windows::core::Error) -> NativeError {
    native_code(e.code().0 as u32)
}

/// Native error from the calling thread's last-error value.
pub(crate) fn last_error() -> NativeError {
    let code = unsafe { windows::Win32::Foundation::GetLastError() };
    NativeError::new(code.0)
}
