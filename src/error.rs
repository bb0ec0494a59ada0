//! Error types for gdrive-upload.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for gdrive-upload.
#[derive(Debug, Error)]
pub enum Error {
    // ── Remote contract ─────────────────────────────────────────────────────
    /// The server's response violated the expected contract: missing fields
    /// or an explicit error code that is not a recognised pending state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection failure, timeout, or a 5xx-class response.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    // ── Device authorization ────────────────────────────────────────────────
    /// The user (or the authorization server) refused the device code.
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The device code expired before the user completed authorization.
    #[error("Authorization expired after {expires_in}s without user approval")]
    AuthorizationExpired {
        /// Lifetime of the device code, in seconds.
        expires_in: u64,
    },

    /// No stored credential is available for an authorized operation.
    #[error("Not authenticated - run the setup first")]
    NotAuthenticated,

    // ── Upload ──────────────────────────────────────────────────────────────
    /// Retry budget exhausted or the file was rejected outright.
    #[error("Upload failed: {0}")]
    Upload(String),

    // ── Local ───────────────────────────────────────────────────────────────
    /// Source file missing/unreadable or credential file unwritable.
    #[error("I/O error at {path}: {message}")]
    LocalIo {
        /// Path that caused the error.
        path: PathBuf,
        /// Error description.
        message: String,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a [`Error::LocalIo`] for `path`.
    pub fn local_io(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Error::LocalIo {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Returns true for failures that may succeed when simply tried again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }

    /// Returns true if this error means the device flow has to run again.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Error::NotAuthenticated
                | Error::AuthorizationDenied(_)
                | Error::AuthorizationExpired { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Protocol(format!("Failed to decode response body: {err}"))
        } else {
            Error::TransientNetwork(err.to_string())
        }
    }
}
