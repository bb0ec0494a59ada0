//! Google Drive resumable upload protocol.
//!
//! # Wire format
//!
//! - Initiate: `POST {endpoint}?uploadType=resumable` with the file metadata
//!   as JSON and the final size in `X-Upload-Content-Length`. The session URI
//!   comes back in the `Location` header.
//! - Chunk: `PUT {session}` with `Content-Range: bytes a-b/total`.
//!   `200`/`201` means the whole file is stored, `308` means more is expected
//!   and `Range: bytes=0-N` tells how much the server holds.
//! - Status: `PUT {session}` with `Content-Range: bytes */total` and no body.
//!
//! The reqwest client passed in must not follow redirects, otherwise `308`
//! never reaches the caller.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, HeaderMap, LOCATION, RANGE};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::target::UploadTarget;
use crate::error::{Error, Result};
use crate::net::truncate_body;
use crate::oauth::Credential;

/// Default Drive v3 upload endpoint.
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// Chunk sizes must be a multiple of this, except for the final chunk.
pub const CHUNK_ALIGNMENT: u64 = 256 * 1024;

/// An in-progress resumable upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Server-issued handle for this upload.
    pub session_uri: String,
    pub total_size: u64,
    /// Bytes the server has acknowledged (exclusive upper offset).
    pub bytes_confirmed: u64,
}

/// Outcome of sending one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResult {
    /// The whole file has been stored.
    Complete,
    /// More bytes are expected; continue from this offset.
    Incomplete(u64),
    /// Transient failure; resynchronise and resend.
    Retryable { reason: String },
}

/// Server-side view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Complete,
    /// Bytes received so far.
    Confirmed(u64),
}

/// Request/response contract with the upload endpoint.
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// Declare size and metadata and obtain a session.
    async fn initiate_session(
        &self,
        credential: &Credential,
        target: &UploadTarget,
    ) -> Result<UploadSession>;

    /// Send `data` as the bytes starting at `offset`.
    async fn send_chunk(
        &self,
        credential: &Credential,
        session: &UploadSession,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<ChunkResult>;

    /// Ask the server how much of the file it holds.
    async fn query_status(
        &self,
        credential: &Credential,
        session: &UploadSession,
    ) -> Result<SessionStatus>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    mime_type: &'a str,
}

/// [`UploadApi`] over HTTP.
pub struct UploadClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl UploadClient {
    /// Create a client for `endpoint`, which must be an absolute URL.
    pub fn new(http: reqwest::Client, endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("Invalid upload endpoint '{endpoint}': {e}")))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn initiate_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("uploadType", "resumable");
        url
    }
}

#[async_trait]
impl UploadApi for UploadClient {
    async fn initiate_session(
        &self,
        credential: &Credential,
        target: &UploadTarget,
    ) -> Result<UploadSession> {
        let metadata = FileMetadata {
            name: &target.file_name,
            mime_type: &target.mime_type,
        };

        let response = self
            .http
            .post(self.initiate_url())
            .header(AUTHORIZATION, bearer(credential))
            .header("X-Upload-Content-Type", &target.mime_type)
            .header("X-Upload-Content-Length", target.size_bytes.to_string())
            .json(&metadata)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "Upload session rejected (HTTP {}): {}",
                status.as_u16(),
                truncate_body(&body)
            );
            return Err(if status.is_server_error() {
                Error::TransientNetwork(message)
            } else {
                Error::Protocol(message)
            });
        }

        let session_uri = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Protocol("Upload session response has no Location header".into())
            })?;

        info!(file_name = %target.file_name, size = target.size_bytes, "Upload session created");

        Ok(UploadSession {
            session_uri,
            total_size: target.size_bytes,
            bytes_confirmed: 0,
        })
    }

    async fn send_chunk(
        &self,
        credential: &Credential,
        session: &UploadSession,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<ChunkResult> {
        let range = chunk_content_range(offset, data.len() as u64, session.total_size);
        debug!(content_range = %range, "Sending chunk");

        let response = match self
            .http
            .put(&session.session_uri)
            .header(AUTHORIZATION, bearer(credential))
            .header(CONTENT_RANGE, range)
            .body(data)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Chunk transfer failed");
                return Ok(ChunkResult::Retryable {
                    reason: e.to_string(),
                });
            }
        };

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(ChunkResult::Complete),
            StatusCode::PERMANENT_REDIRECT => {
                Ok(ChunkResult::Incomplete(confirmed_bytes(response.headers())?))
            }
            s if is_retryable_status(s) => Ok(ChunkResult::Retryable {
                reason: format!("HTTP {}", s.as_u16()),
            }),
            _ => Err(rejection(status, response).await),
        }
    }

    async fn query_status(
        &self,
        credential: &Credential,
        session: &UploadSession,
    ) -> Result<SessionStatus> {
        let response = self
            .http
            .put(&session.session_uri)
            .header(AUTHORIZATION, bearer(credential))
            .header(CONTENT_RANGE, format!("bytes */{}", session.total_size))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Vec::new())
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(SessionStatus::Complete),
            StatusCode::PERMANENT_REDIRECT => {
                let confirmed = confirmed_bytes(response.headers())?;
                debug!(confirmed, "Upload status queried");
                Ok(SessionStatus::Confirmed(confirmed))
            }
            s if is_retryable_status(s) => Err(Error::TransientNetwork(format!(
                "Upload status query returned HTTP {}",
                s.as_u16()
            ))),
            _ => Err(rejection(status, response).await),
        }
    }
}

fn bearer(credential: &Credential) -> String {
    format!("Bearer {}", credential.access_token)
}

/// `Content-Range` for `len` bytes at `offset` of a `total`-byte file.
///
/// An empty body (only valid for an empty file) uses the `*` form.
pub fn chunk_content_range(offset: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + len - 1, total)
    }
}

/// Parse the `Range: bytes=0-N` header of a `308` into `N + 1`.
///
/// No header means the server holds nothing yet.
fn confirmed_bytes(headers: &HeaderMap) -> Result<u64> {
    let Some(value) = headers.get(RANGE) else {
        return Ok(0);
    };
    let value = value
        .to_str()
        .map_err(|_| Error::Protocol("Non-ASCII Range header".into()))?;

    value
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .map(|end| end + 1)
        .ok_or_else(|| Error::Protocol(format!("Malformed Range header: {value}")))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

async fn rejection(status: StatusCode, response: reqwest::Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    let reason = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => "Upload session is no longer valid",
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "Upload not permitted",
        _ => "Upload rejected",
    };
    Error::Protocol(format!(
        "{reason} (HTTP {}): {}",
        status.as_u16(),
        truncate_body(&body)
    ))
}
