#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gdrive_upload::clock::ManualClock;
use gdrive_upload::config::Config;
use gdrive_upload::oauth::{Credential, FileTokenStorage, TokenStorage};
use wiremock::MockServer;

pub const NOW: i64 = 1_700_000_000_000;

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(NOW))
}

/// Config pointing every endpoint at `server` and the credential file into `dir`.
pub fn config_for(server: &MockServer, dir: &Path) -> Config {
    let mut config = Config::default();
    config.oauth.client_id = Some("client-123.apps.googleusercontent.com".into());
    config.oauth.client_secret = Some("s3cret".into());
    config.oauth.device_code_url = format!("{}/device/code", server.uri());
    config.oauth.token_url = format!("{}/token", server.uri());
    config.upload.endpoint = format!("{}/upload/drive/v3/files", server.uri());
    config.upload.initial_backoff_ms = 1;
    config.upload.max_backoff_ms = 4;
    config.storage.credentials_file = dir.join("gdriveupload.credentials");
    config
}

pub fn valid_credential() -> Credential {
    Credential {
        access_token: "ya29.valid".into(),
        refresh_token: "1//refresh".into(),
        expires_at: NOW + 3_600_000,
    }
}

pub fn expired_credential() -> Credential {
    Credential {
        access_token: "ya29.expired".into(),
        refresh_token: "1//refresh".into(),
        expires_at: NOW - 1_000,
    }
}

pub fn store_credential(config: &Config, credential: &Credential) {
    FileTokenStorage::new(&config.storage.credentials_file)
        .save(credential)
        .unwrap();
}

pub fn stored_credential(config: &Config) -> Option<Credential> {
    FileTokenStorage::new(&config.storage.credentials_file)
        .load()
        .unwrap()
}

pub fn write_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
