//! OAuth 2.0 device authorization and credential lifecycle.
//!
//! # Architecture
//!
//! - [`AuthClient`] - stateless request/response contract with the
//!   authorization server (device code, polling, refresh)
//! - [`DeviceAuthFlow`] - RFC 8628 state machine built on [`AuthApi`]
//! - [`CredentialStore`] - owns the current [`Credential`], persists it
//!   through a [`TokenStorage`] and refreshes it near expiry
//! - [`TokenProvider`] - what the upload engine sees of all this
//!
//! # Example
//!
//! ```rust,ignore
//! let flow = DeviceAuthFlow::new(api.clone(), clock.clone());
//! let credential = flow
//!     .authorize(&client, DEFAULT_SCOPE, |p| {
//!         println!("Visit {} and enter {}", p.verification_url, p.user_code)
//!     })
//!     .await?;
//! store.save(&credential).await?;
//! ```

pub mod client;
pub mod device;
pub mod storage;
pub mod store;
pub mod token;

pub use client::{
    AuthApi, AuthClient, AuthEndpoints, DeviceAuthorization, PollOutcome, RefreshedToken,
};
pub use device::{DeviceAuthFlow, FlowState, PendingAuthorization};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use store::CredentialStore;
pub use token::{ClientCredentials, Credential, REFRESH_SKEW_MS, needs_refresh};

use crate::error::Result;

/// Scope requested by default: access to files created by this app only.
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

// =============================================================================
// TokenProvider Trait
// =============================================================================

/// Source of a credential that is valid for at least the next request.
///
/// Implementations refresh as needed before returning.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fresh_credential(&self) -> Result<Credential>;
}

/// A fixed credential that is never refreshed.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(pub Credential);

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fresh_credential(&self) -> Result<Credential> {
        Ok(self.0.clone())
    }
}
