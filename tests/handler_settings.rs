//! Handler settings files decrypted end to end.

#![cfg(feature = "software-store")]

use std::fs;

use tempfile::TempDir;
use usg_protected_settings::settings::{latest_sequence_number, HandlerSettingsFile};
use usg_protected_settings::software::{SoftwareCertificate, SoftwareTrustStore};
use usg_protected_settings::{ProtectedSettingsDecryptor, SettingsError, StoreLocation};

const SAMPLE_SETTINGS: &str = include_str!("fixtures/config/0.settings");

fn provider() -> SoftwareTrustStore {
    let cert = SoftwareCertificate::from_der(include_bytes!("fixtures/store/recipient-cert.der").as_slice())
        .unwrap()
        .with_private_key_pkcs8_der(include_bytes!("fixtures/store/recipient-key.der"))
        .unwrap();
    SoftwareTrustStore::new().with_certificate(StoreLocation::LocalMachine, "MY", cert)
}

fn config_folder() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("0.settings"), SAMPLE_SETTINGS).unwrap();
    dir
}

#[test]
fn test_decrypt_latest_settings_file() {
    let dir = config_folder();
    let (sequence, file) = HandlerSettingsFile::load_latest(dir.path()).unwrap();
    assert_eq!(sequence, 0);

    let handler = file.handler_settings().unwrap();
    let provider = provider();
    let settings = ProtectedSettingsDecryptor::new(&provider)
        .decrypt_handler_settings(handler)
        .unwrap();

    assert_eq!(settings["key"], "value");
    let public = handler.public_settings.as_ref().unwrap();
    assert_eq!(public["applicationName"], "agent");
}

#[test]
fn test_latest_sequence_wins() {
    let dir = config_folder();
    fs::write(
        dir.path().join("3.settings"),
        r#"{"runtimeSettings":[{"handlerSettings":{"publicSettings":{"order":3}}}]}"#,
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    assert_eq!(latest_sequence_number(dir.path()).unwrap(), Some(3));

    let (sequence, file) = HandlerSettingsFile::load_latest(dir.path()).unwrap();
    assert_eq!(sequence, 3);

    // No protected settings in the newest file
    let provider = provider();
    let settings = ProtectedSettingsDecryptor::new(&provider)
        .decrypt_handler_settings(file.handler_settings().unwrap())
        .unwrap();
    assert!(settings.is_empty());
}

#[test]
fn test_thumbprint_not_in_store() {
    let json = SAMPLE_SETTINGS.replace(
        "F8D51EC7F8596F01D58711061A19D4A78CE42CA4",
        "06D12C0A6F36E8DC20BA2E190C8CBE75353CAE71",
    );
    let file = HandlerSettingsFile::from_json(&json).unwrap();

    let provider = provider();
    let err = ProtectedSettingsDecryptor::new(&provider)
        .decrypt_handler_settings(file.handler_settings().unwrap())
        .unwrap_err();
    assert!(matches!(err, SettingsError::CertNotFound { .. }));
}

#[test]
fn test_empty_config_folder() {
    let dir = TempDir::new().unwrap();
    assert_eq!(latest_sequence_number(dir.path()).unwrap(), None);
    assert!(HandlerSettingsFile::load_latest(dir.path()).is_err());
}
