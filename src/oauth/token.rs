//! Credential data and expiry checks.
//!
//! A [`Credential`] is an immutable snapshot of the OAuth tokens. Refreshing
//! never mutates one in place; it builds a replacement value via
//! [`Credential::with_refreshed_access_token`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Refresh this long before the recorded expiry to absorb clock drift and
/// request latency (100 seconds).
pub const REFRESH_SKEW_MS: i64 = 100_000;

/// OAuth client registration used for the device flow and refreshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// The Google Cloud project's OAuth client ID.
    pub client_id: String,
    /// The matching client secret.
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// Persisted OAuth tokens.
///
/// Serialized field names match the on-disk credential file:
/// `access_token`, `refresh_token`, `expires_at` (epoch milliseconds).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token sent with API requests.
    pub access_token: String,

    /// Long-lived token used to obtain new access tokens.
    pub refresh_token: String,

    /// Epoch milliseconds after which `access_token` must not be used
    /// without refreshing first.
    pub expires_at: i64,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Create a credential issued at `now_ms` that lives `expires_in_secs`.
    pub fn issued(
        access_token: String,
        refresh_token: String,
        expires_in_secs: u64,
        now_ms: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: expiry_from(now_ms, expires_in_secs),
        }
    }

    /// Build the replacement value after a refresh.
    ///
    /// The refresh token is kept unless the server rotated it.
    #[must_use]
    pub fn with_refreshed_access_token(
        &self,
        access_token: String,
        expires_in_secs: u64,
        rotated_refresh_token: Option<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token: rotated_refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
            expires_at: expiry_from(now_ms, expires_in_secs),
        }
    }

    /// Time left before the access token expires, zero if already expired.
    pub fn time_until_expiry(&self, now_ms: i64) -> Duration {
        let remaining = self.expires_at.saturating_sub(now_ms);
        if remaining > 0 {
            Duration::from_millis(remaining as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// True when `now_ms >= expires_at - skew_ms`.
#[must_use]
pub fn needs_refresh(credential: &Credential, now_ms: i64, skew_ms: i64) -> bool {
    now_ms >= credential.expires_at.saturating_sub(skew_ms)
}

fn expiry_from(now_ms: i64, expires_in_secs: u64) -> i64 {
    let lifetime_ms = i64::try_from(expires_in_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    now_ms.saturating_add(lifetime_ms)
}
