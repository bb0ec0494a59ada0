//! Generic HTTP client.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};

use crate::error::{Error, Result};

/// Identifying user agent sent with every request.
pub const USER_AGENT: &str = concat!(
    "gdrive-upload/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/Gigadrive/google-drive-upload-cli)"
);

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout. Large chunks over slow links need headroom.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum length of a response body quoted in an error message.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body so error messages stay readable.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        None => body.to_string(),
        Some((cut, _)) => format!(
            "{}... (truncated, {} total bytes)",
            &body[..cut],
            body.len()
        ),
    }
}

/// HTTP client wrapper.
///
/// Provides a standard configuration (User-Agent, timeouts, redirect policy)
/// for the authorization and upload clients.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// Create a new HTTP client with default settings.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a new builder.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Get the inner reqwest client.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Consume the wrapper, returning the reqwest client.
    pub fn into_inner(self) -> Client {
        self.inner
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .redirect(Policy::limited(10)),
        }
    }
}

impl HttpClientBuilder {
    /// Set a custom user agent.
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.builder = self.builder.user_agent(ua);
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    /// Set request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    /// Never follow redirects.
    ///
    /// The resumable upload protocol answers `308` without a `Location`
    /// header; the caller has to see that status untouched.
    pub fn no_redirects(mut self) -> Self {
        self.builder = self.builder.redirect(Policy::none());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<HttpClient> {
        let inner = self
            .builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(HttpClient { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_identifies_tool() {
        assert!(USER_AGENT.starts_with("gdrive-upload/"));
        assert!(USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "é".repeat(600);
        let truncated = truncate_body(&long);
        assert!(truncated.starts_with(&"é".repeat(500)));
        assert!(truncated.ends_with("(truncated, 1200 total bytes)"));
    }

    #[test]
    fn test_builder_variants_build() {
        assert!(HttpClient::new().is_ok());
        assert!(
            HttpClient::builder()
                .no_redirects()
                .request_timeout(Duration::from_secs(5))
                .build()
                .is_ok()
        );
    }
}
