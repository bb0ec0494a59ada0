//! Component wiring.
//!
//! Every dependency is built here from [`Config`] and handed to its
//! consumer through a constructor.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::HttpClient;
use crate::oauth::{
    AuthApi, AuthClient, AuthEndpoints, ClientCredentials, Credential, CredentialStore,
    DeviceAuthFlow, FileTokenStorage, PendingAuthorization, TokenProvider, TokenStorage,
};
use crate::upload::{
    ResumableUploadEngine, RetryPolicy, UploadApi, UploadClient, UploadReport, UploadTarget,
};

/// The authenticated uploader.
pub struct App {
    config: Config,
    clock: Arc<dyn Clock>,
    auth_api: Arc<dyn AuthApi>,
    upload_api: Arc<dyn UploadApi>,
    store: Arc<CredentialStore>,
}

impl App {
    /// Build with the system clock and the credential file from `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let client = client_credentials(&config)?;

        let auth_http = HttpClient::new()?.into_inner();
        let upload_http = HttpClient::builder().no_redirects().build()?.into_inner();

        let auth_api: Arc<dyn AuthApi> = Arc::new(AuthClient::new(
            auth_http,
            AuthEndpoints {
                device_code_url: config.oauth.device_code_url.clone(),
                token_url: config.oauth.token_url.clone(),
            },
            clock.clone(),
        ));
        let upload_api: Arc<dyn UploadApi> =
            Arc::new(UploadClient::new(upload_http, &config.upload.endpoint)?);
        let storage: Arc<dyn TokenStorage> =
            Arc::new(FileTokenStorage::new(&config.storage.credentials_file));

        let store = Arc::new(CredentialStore::new(
            storage,
            auth_api.clone(),
            clock.clone(),
            client,
        ));

        Ok(Self {
            config,
            clock,
            auth_api,
            upload_api,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.store
    }

    /// Make sure a credential exists.
    ///
    /// Runs the device flow when nothing is stored or when `force` is set,
    /// and persists the result. `on_prompt` receives the code the user has
    /// to enter.
    pub async fn authenticate<F>(&self, force: bool, on_prompt: F) -> Result<Credential>
    where
        F: FnOnce(&PendingAuthorization),
    {
        if !force {
            if let Some(credential) = self.store.load().await? {
                info!(
                    storage = self.store.storage_name(),
                    expires_in_secs = credential
                        .time_until_expiry(self.clock.now_millis())
                        .as_secs(),
                    "Using stored credential"
                );
                return Ok(credential);
            }
        }

        info!(forced = force, "Starting device authorization");
        let flow = DeviceAuthFlow::new(self.auth_api.clone(), self.clock.clone());
        let credential = flow
            .authorize(self.store.client(), &self.config.oauth.scope, on_prompt)
            .await?;
        self.store.save(&credential).await?;
        Ok(credential)
    }

    /// Refresh the access token now, regardless of expiry.
    pub async fn refresh_token(&self) -> Result<Credential> {
        self.store.force_refresh().await
    }

    /// Upload `source` under `destination`.
    ///
    /// The source is checked before any network activity.
    pub async fn upload(
        &self,
        source: &Path,
        destination: &str,
        mime_type: Option<&str>,
    ) -> Result<UploadReport> {
        let target = UploadTarget::resolve(source, destination, mime_type)?;
        info!(
            source = %source.display(),
            file_name = %target.file_name,
            size = target.size_bytes,
            "Uploading"
        );

        let tokens: Arc<dyn TokenProvider> = self.store.clone();
        let engine = ResumableUploadEngine::new(self.upload_api.clone(), tokens, self.clock.clone())
            .with_chunk_size(self.config.upload.chunk_size)
            .with_retry_policy(retry_policy(&self.config));

        engine.upload(&target).await
    }
}

fn client_credentials(config: &Config) -> Result<ClientCredentials> {
    if !config.oauth.has_client() {
        return Err(Error::Config(
            "OAuth client id and secret are not configured (run with --force-setup)".into(),
        ));
    }
    Ok(ClientCredentials::new(
        config.oauth.client_id.clone().unwrap_or_default(),
        config.oauth.client_secret.clone().unwrap_or_default(),
    ))
}

fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_retries(config.upload.max_retries)
        .with_initial_backoff(std::time::Duration::from_millis(config.upload.initial_backoff_ms))
        .with_max_backoff(std::time::Duration::from_millis(config.upload.max_backoff_ms))
}
