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

//! Protected Settings Command-Line Tool
//!
//! Decrypts PKCS#7 protected settings with a certificate from the trust store.
//!
//! # Usage
//!
//! ```text
//! protected-settings [OPTIONS] <COMMAND>
//!
//! Commands:
//!   decrypt     Decrypt a protected settings blob
//!   settings    Decrypt the protected settings of a handler settings file
//!   thumbprint  Normalize a thumbprint or compute one from a certificate
//!
//! Options:
//!   -c, --config <PATH>   Path to configuration file
//!   -v, --verbose         Enable verbose output
//!   -q, --quiet           Suppress non-error output
//!       --json-logs       Emit logs as JSON
//!       --cert <PATH>     Use an in-memory store holding this DER certificate
//!       --key <PATH>      PKCS#8 DER private key for --cert
//!   -h, --help            Print help
//!   -V, --version         Print version
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Decrypt a base64 blob with a certificate in LocalMachine\MY
//! protected-settings decrypt --thumbprint F8D51EC7... --base64 MIIBzQYJ...
//!
//! # Decrypt the newest settings file in a configuration folder
//! protected-settings settings --config-folder C:\Packages\Plugins\Agent\RuntimeSettings
//!
//! # Thumbprint of a certificate file
//! protected-settings thumbprint --der recipient.der
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use usg_protected_settings::logging::{self, LogLevel};
use usg_protected_settings::settings::{HandlerSettings, HandlerSettingsFile};
use usg_protected_settings::thumbprint;
use usg_protected_settings::{
    DecryptorConfig, ProtectedSettingsDecryptor, Result, SettingsError, SettingsMap,
    TrustStoreProvider,
};

/// Protected Settings Command-Line Tool
#[derive(Parser)]
#[command(name = "protected-settings")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Decrypt PKCS#7 protected settings with a trust store certificate", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use an in-memory store holding this DER certificate
    #[arg(long, global = true, value_name = "PATH", requires = "key")]
    cert: Option<PathBuf>,

    /// PKCS#8 DER private key for --cert
    #[arg(long, global = true, value_name = "PATH")]
    key: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt a protected settings blob
    Decrypt {
        /// Certificate thumbprint (hex)
        #[arg(short, long)]
        thumbprint: String,

        /// File holding the DER enveloped message
        #[arg(short, long, value_name = "FILE", conflicts_with = "base64")]
        input: Option<PathBuf>,

        /// Base64 enveloped message
        #[arg(short, long, value_name = "BASE64")]
        base64: Option<String>,
    },

    /// Decrypt the protected settings of a handler settings file
    Settings {
        /// Folder holding <n>.settings files
        #[arg(long, value_name = "DIR")]
        config_folder: PathBuf,

        /// Sequence number to load (default: highest present)
        #[arg(long, value_name = "N")]
        sequence: Option<u32>,
    },

    /// Normalize a thumbprint or compute one from a certificate
    Thumbprint {
        /// Thumbprint to normalize (hex)
        #[arg(conflicts_with = "der")]
        value: Option<String>,

        /// DER certificate to compute the thumbprint of
        #[arg(long, value_name = "PATH")]
        der: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let mut log_config = config.logging.clone();
    if cli.quiet {
        log_config.level = LogLevel::Error;
    } else if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    if cli.json_logs {
        log_config.json_format = true;
    }
    if let Err(e) = logging::init(&log_config) {
        eprintln!("Warning: {}", e);
    }

    match run_command(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.user_hint() {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DecryptorConfig> {
    match path {
        Some(path) => DecryptorConfig::from_file(path),
        None => Ok(DecryptorConfig::default()),
    }
}

fn run_command(cli: &Cli, config: &DecryptorConfig) -> Result<()> {
    match &cli.command {
        Commands::Decrypt {
            thumbprint,
            input,
            base64,
        } => {
            let request = Request::Blob {
                thumbprint: thumbprint.clone(),
                ciphertext: read_ciphertext(input.as_deref(), base64.as_deref())?,
            };
            let settings = with_provider(cli, config, &request)?;
            print_json(&serde_json::Value::Object(settings))
        }
        Commands::Settings {
            config_folder,
            sequence,
        } => cmd_settings(cli, config, config_folder, *sequence),
        Commands::Thumbprint { value, der } => cmd_thumbprint(config, value.as_deref(), der.as_deref()),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// What to decrypt.
enum Request {
    Blob { thumbprint: String, ciphertext: Vec<u8> },
    Handler(HandlerSettings),
}

impl Request {
    fn run<P: TrustStoreProvider>(&self, provider: &P, config: &DecryptorConfig) -> Result<SettingsMap> {
        let decryptor = ProtectedSettingsDecryptor::with_config(provider, config.clone());
        match self {
            Self::Blob {
                thumbprint,
                ciphertext,
            } => decryptor.decrypt(thumbprint, ciphertext),
            Self::Handler(handler) => decryptor.decrypt_handler_settings(handler),
        }
    }
}

/// Run a request against the software store if `--cert` was given, the
/// platform store otherwise.
fn with_provider(cli: &Cli, config: &DecryptorConfig, request: &Request) -> Result<SettingsMap> {
    if let (Some(cert), Some(key)) = (&cli.cert, &cli.key) {
        return with_software_store(cert, key, config, request);
    }

    #[cfg(windows)]
    {
        let provider = usg_protected_settings::windows::Crypt32Provider::new();
        let result = request.run(&provider, config);
        if matches!(&result, Err(e) if e.is_permission_error()) {
            tracing::debug!(
                "Process elevated: {}",
                usg_protected_settings::windows::is_elevated()
            );
        }
        result
    }

    #[cfg(not(windows))]
    {
        let _ = (config, request);
        Err(SettingsError::platform(
            "the system trust store requires Windows; use --cert and --key",
        ))
    }
}

#[cfg(feature = "software-store")]
fn with_software_store(
    cert: &Path,
    key: &Path,
    config: &DecryptorConfig,
    request: &Request,
) -> Result<SettingsMap> {
    use usg_protected_settings::software::{SoftwareCertificate, SoftwareTrustStore};

    let certificate =
        SoftwareCertificate::from_der(std::fs::read(cert)?)?.with_private_key_pkcs8_der(&std::fs::read(key)?)?;
    tracing::debug!("Loaded {} into the in-memory store", certificate.thumbprint());

    let provider = SoftwareTrustStore::new().with_certificate(
        config.store_location,
        &config.store_name,
        certificate,
    );
    request.run(&provider, config)
}

#[cfg(not(feature = "software-store"))]
fn with_software_store(
    _cert: &Path,
    _key: &Path,
    _config: &DecryptorConfig,
    _request: &Request,
) -> Result<SettingsMap> {
    Err(SettingsError::platform(
        "--cert requires the 'software-store' feature",
    ))
}

fn read_ciphertext(input: Option<&Path>, base64: Option<&str>) -> Result<Vec<u8>> {
    use base64::Engine;

    match (input, base64) {
        (Some(path), _) => Ok(std::fs::read(path)?),
        (None, Some(encoded)) => {
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
        }
        (None, None) => Err(SettingsError::config("one of --input or --base64 is required")),
    }
}

fn cmd_settings(
    cli: &Cli,
    config: &DecryptorConfig,
    config_folder: &Path,
    sequence: Option<u32>,
) -> Result<()> {
    let (sequence, file) = match sequence {
        Some(n) => (n, HandlerSettingsFile::load(config_folder, n)?),
        None => HandlerSettingsFile::load_latest(config_folder)?,
    };
    let handler = file.handler_settings()?.clone();
    let public = handler.public_settings.clone().unwrap_or_default();

    let protected = with_provider(cli, config, &Request::Handler(handler))?;

    print_json(&serde_json::json!({
        "sequenceNumber": sequence,
        "publicSettings": public,
        "protectedSettings": protected,
    }))
}

fn cmd_thumbprint(config: &DecryptorConfig, value: Option<&str>, der: Option<&Path>) -> Result<()> {
    let thumb = match (value, der) {
        (Some(value), _) => config.thumbprint_policy.decode(value)?,
        (None, Some(path)) => thumbprint::of_der(&std::fs::read(path)?),
        (None, None) => {
            return Err(SettingsError::config(
                "provide a thumbprint or --der <PATH>",
            ))
        }
    };

    println!("{}", thumb);
    println!("{}", thumb.to_colon_hex());
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
