//! HTTP contract with the OAuth authorization server.
//!
//! Three stateless exchanges, each a single request with fixed headers:
//! 1. Device code request (RFC 8628 section 3.1)
//! 2. Token polling with the device code (RFC 8628 section 3.4)
//! 3. Access token refresh
//!
//! # Endpoints
//! - Device code: `https://oauth2.googleapis.com/device/code`
//! - Token: `https://oauth2.googleapis.com/token`

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::token::{ClientCredentials, Credential};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::net::truncate_body;

/// Default Google device code endpoint.
pub const DEVICE_CODE_URL: &str = "https://oauth2.googleapis.com/device/code";

/// Default Google token endpoint.
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Grant type used when polling with a device code.
const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Grant type used when refreshing an access token.
const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Authorization server endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub device_code_url: String,
    pub token_url: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            device_code_url: DEVICE_CODE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

/// Response to the device code request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    /// Identifies this device while polling.
    pub device_code: String,
    /// Code the user enters at the verification URL.
    pub user_code: String,
    /// Where the user enters the code.
    pub verification_url: String,
    /// Seconds until `device_code` and `user_code` expire.
    pub expires_in: u64,
    /// Seconds to wait between polling requests.
    pub interval: u64,
}

/// Result of a single poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// User hasn't completed authorization yet, keep polling.
    Pending,
    /// Server asked us to slow down; keep polling at a longer interval.
    SlowDown,
    /// Authorization complete.
    Authorized(Credential),
    /// The server answered with any other OAuth error; polling must stop.
    Denied(String),
}

/// Successful refresh response.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Lifetime of the new access token, in seconds.
    pub expires_in: u64,
    /// Present only when the server rotated the refresh token.
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// The request/response contract with the authorization server.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Start a device authorization for `client_id` and `scope`.
    async fn request_device_code(&self, client_id: &str, scope: &str)
    -> Result<DeviceAuthorization>;

    /// Poll the token endpoint once with `device_code`.
    async fn poll_authorization(
        &self,
        client: &ClientCredentials,
        device_code: &str,
    ) -> Result<PollOutcome>;

    /// Exchange `refresh_token` for a new access token.
    async fn refresh(
        &self,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<RefreshedToken>;
}

/// Union of every field the three responses can carry.
#[derive(Debug, Default, Deserialize)]
struct RawResponse {
    device_code: Option<String>,
    user_code: Option<String>,
    #[serde(alias = "verification_uri")]
    verification_url: Option<String>,
    expires_in: Option<u64>,
    interval: Option<u64>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    error_code: Option<serde_json::Value>,
}

impl RawResponse {
    /// Describe an explicit server-side error, if the response carries one.
    fn server_error(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(match &self.error_description {
                Some(description) => {
                    format!("Authorization server returned an error ({error}): {description}")
                }
                None => format!("Authorization server returned an error ({error})"),
            });
        }
        self.error_code
            .as_ref()
            .map(|code| format!("Authorization server returned an error: {code}"))
    }
}

/// Collects required fields, remembering which ones were absent.
#[derive(Default)]
struct RequiredFields {
    missing: Vec<&'static str>,
}

impl RequiredFields {
    fn take<T: Default>(&mut self, name: &'static str, value: Option<T>) -> T {
        value.unwrap_or_else(|| {
            self.missing.push(name);
            T::default()
        })
    }

    fn finish(self) -> Result<()> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "Authorization server returned an invalid response (missing {})",
                self.missing.join(", ")
            )))
        }
    }
}

/// [`AuthApi`] over HTTP.
pub struct AuthClient {
    http: reqwest::Client,
    endpoints: AuthEndpoints,
    clock: Arc<dyn Clock>,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, endpoints: AuthEndpoints, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            endpoints,
            clock,
        }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// POST a form and decode the JSON body.
    ///
    /// 5xx answers are transient regardless of body; anything else must be
    /// JSON, error or not, because the server reports OAuth errors in a 4xx
    /// JSON body.
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<RawResponse> {
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_server_error() {
            return Err(Error::TransientNetwork(format!(
                "Authorization server returned HTTP {}: {}",
                status.as_u16(),
                truncate_body(&body)
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            Error::Protocol(format!(
                "Unparseable authorization server response (HTTP {}): {e}: {}",
                status.as_u16(),
                truncate_body(&body)
            ))
        })
    }
}

#[async_trait]
impl AuthApi for AuthClient {
    async fn request_device_code(
        &self,
        client_id: &str,
        scope: &str,
    ) -> Result<DeviceAuthorization> {
        info!("Requesting device code");

        let raw = self
            .post_form(
                &self.endpoints.device_code_url,
                &[("client_id", client_id), ("scope", scope)],
            )
            .await?;

        if let Some(message) = raw.server_error() {
            warn!(error = ?raw.error, "Device code request rejected");
            return Err(Error::Protocol(message));
        }

        let mut fields = RequiredFields::default();
        let authorization = DeviceAuthorization {
            device_code: fields.take("device_code", raw.device_code),
            user_code: fields.take("user_code", raw.user_code),
            verification_url: fields.take("verification_url", raw.verification_url),
            expires_in: fields.take("expires_in", raw.expires_in),
            interval: fields.take("interval", raw.interval),
        };
        fields.finish()?;

        debug!(
            verification_url = %authorization.verification_url,
            expires_in = authorization.expires_in,
            interval = authorization.interval,
            "Device code obtained"
        );

        Ok(authorization)
    }

    async fn poll_authorization(
        &self,
        client: &ClientCredentials,
        device_code: &str,
    ) -> Result<PollOutcome> {
        let raw = self
            .post_form(
                &self.endpoints.token_url,
                &[
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                    ("device_code", device_code),
                    ("grant_type", DEVICE_CODE_GRANT_TYPE),
                ],
            )
            .await?;

        match raw.error.as_deref() {
            Some("authorization_pending") => return Ok(PollOutcome::Pending),
            Some("slow_down") => return Ok(PollOutcome::SlowDown),
            _ => {}
        }
        if let Some(message) = raw.server_error() {
            warn!(error = ?raw.error, "Device authorization refused");
            return Ok(PollOutcome::Denied(message));
        }

        let mut fields = RequiredFields::default();
        let access_token = fields.take("access_token", raw.access_token);
        let expires_in = fields.take("expires_in", raw.expires_in);
        let _scope: String = fields.take("scope", raw.scope);
        let _token_type: String = fields.take("token_type", raw.token_type);
        let refresh_token = fields.take("refresh_token", raw.refresh_token);
        fields.finish()?;

        Ok(PollOutcome::Authorized(Credential::issued(
            access_token,
            refresh_token,
            expires_in,
            self.clock.now_millis(),
        )))
    }

    async fn refresh(
        &self,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<RefreshedToken> {
        info!("Refreshing access token");

        let raw = self
            .post_form(
                &self.endpoints.token_url,
                &[
                    ("client_id", client.client_id.as_str()),
                    ("client_secret", client.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", REFRESH_GRANT_TYPE),
                ],
            )
            .await?;

        if let Some(message) = raw.server_error() {
            warn!(error = ?raw.error, "Token refresh rejected");
            return Err(Error::Protocol(message));
        }

        let mut fields = RequiredFields::default();
        let access_token = fields.take("access_token", raw.access_token);
        let expires_in = fields.take("expires_in", raw.expires_in);
        let _scope: String = fields.take("scope", raw.scope);
        let _token_type: String = fields.take("token_type", raw.token_type);
        fields.finish()?;

        debug!(expires_in, rotated = raw.refresh_token.is_some(), "Access token refreshed");

        Ok(RefreshedToken {
            access_token,
            expires_in,
            refresh_token: raw.refresh_token,
        })
    }
}
