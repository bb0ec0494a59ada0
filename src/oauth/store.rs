//! Credential lifecycle: load, persist, detect expiry, refresh.
//!
//! [`CredentialStore`] is the single owner of the current [`Credential`].
//! Callers only ever receive copies, and every authorized request goes
//! through [`CredentialStore::ensure_fresh`] first.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::TokenProvider;
use super::client::AuthApi;
use super::storage::TokenStorage;
use super::token::{self, ClientCredentials, Credential, REFRESH_SKEW_MS};
use crate::clock::Clock;
use crate::error::{Error, Result};

/// Owns the persisted credential and refreshes it when it nears expiry.
pub struct CredentialStore {
    storage: Arc<dyn TokenStorage>,
    api: Arc<dyn AuthApi>,
    clock: Arc<dyn Clock>,
    client: ClientCredentials,
    skew_ms: i64,
    current: Mutex<Option<Credential>>,
}

impl CredentialStore {
    pub fn new(
        storage: Arc<dyn TokenStorage>,
        api: Arc<dyn AuthApi>,
        clock: Arc<dyn Clock>,
        client: ClientCredentials,
    ) -> Self {
        Self {
            storage,
            api,
            clock,
            client,
            skew_ms: REFRESH_SKEW_MS,
            current: Mutex::new(None),
        }
    }

    /// Override the refresh skew (milliseconds).
    pub fn with_skew_ms(mut self, skew_ms: i64) -> Self {
        self.skew_ms = skew_ms;
        self
    }

    pub fn client(&self) -> &ClientCredentials {
        &self.client
    }

    pub fn storage_name(&self) -> &str {
        self.storage.name()
    }

    /// Read the persisted credential. `None` means authorization is required.
    #[instrument(skip(self), fields(storage = self.storage.name()))]
    pub async fn load(&self) -> Result<Option<Credential>> {
        let loaded = self.storage.load()?;
        debug!(found = loaded.is_some(), "Loaded credential");
        *self.current.lock().await = loaded.clone();
        Ok(loaded)
    }

    /// Persist `credential`, replacing the prior value, and make it current.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        self.storage.save(credential)?;
        *self.current.lock().await = Some(credential.clone());
        debug!(expires_at = credential.expires_at, "Credential saved");
        Ok(())
    }

    /// The cached credential, loading from storage on first use.
    pub async fn current(&self) -> Result<Option<Credential>> {
        if let Some(credential) = self.current.lock().await.clone() {
            return Ok(Some(credential));
        }
        self.load().await
    }

    /// True when `now_ms >= expires_at - skew`.
    pub fn needs_refresh(&self, credential: &Credential, now_ms: i64) -> bool {
        token::needs_refresh(credential, now_ms, self.skew_ms)
    }

    /// Return `credential` unchanged, or a refreshed and persisted
    /// replacement when it is about to expire.
    pub async fn ensure_fresh(&self, credential: Credential) -> Result<Credential> {
        let now = self.clock.now_millis();
        if !self.needs_refresh(&credential, now) {
            return Ok(credential);
        }
        debug!(
            expires_at = credential.expires_at,
            now, "Access token near expiry"
        );
        self.refresh(&credential).await
    }

    /// Refresh the current credential regardless of its expiry.
    pub async fn force_refresh(&self) -> Result<Credential> {
        info!("Force refresh requested");
        let credential = self.current().await?.ok_or(Error::NotAuthenticated)?;
        self.refresh(&credential).await
    }

    /// The current credential, refreshed if needed.
    pub async fn fresh_credential(&self) -> Result<Credential> {
        let credential = self.current().await?.ok_or(Error::NotAuthenticated)?;
        self.ensure_fresh(credential).await
    }

    /// Forget the credential, both cached and persisted.
    pub async fn clear(&self) -> Result<()> {
        self.storage.remove()?;
        *self.current.lock().await = None;
        info!("Credential cleared");
        Ok(())
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let response = self
            .api
            .refresh(&self.client, &credential.refresh_token)
            .await?;

        let updated = credential.with_refreshed_access_token(
            response.access_token,
            response.expires_in,
            response.refresh_token,
            self.clock.now_millis(),
        );
        self.save(&updated).await?;

        info!(expires_at = updated.expires_at, "Access token refreshed");
        Ok(updated)
    }
}

#[async_trait]
impl TokenProvider for CredentialStore {
    async fn fresh_credential(&self) -> Result<Credential> {
        CredentialStore::fresh_credential(self).await
    }
}
