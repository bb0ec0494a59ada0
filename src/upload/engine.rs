//! Chunked transfer loop over an [`UploadApi`].
//!
//! One session per call. The server's acknowledged offset is authoritative:
//! every chunk starts where the server says it holds data up to, never where
//! the previous chunk ended locally.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::client::{ChunkResult, SessionStatus, UploadApi, UploadSession};
use super::retry::RetryPolicy;
use super::target::UploadTarget;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::oauth::TokenProvider;

/// Default chunk size (8 MiB, a multiple of the 256 KiB alignment).
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Summary of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub session_uri: String,
    pub bytes_uploaded: u64,
    /// Chunk requests sent, including resends.
    pub chunks_sent: u32,
    /// Retryable failures encountered along the way.
    pub retries: u32,
}

/// Transfers one file through a resumable session.
pub struct ResumableUploadEngine {
    api: Arc<dyn UploadApi>,
    tokens: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    chunk_size: u64,
    retry: RetryPolicy,
}

impl ResumableUploadEngine {
    pub fn new(
        api: Arc<dyn UploadApi>,
        tokens: Arc<dyn TokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            tokens,
            clock,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the chunk size in bytes. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Upload `target` from start to finish.
    pub async fn upload(&self, target: &UploadTarget) -> Result<UploadReport> {
        let mut file = tokio::fs::File::open(&target.source)
            .await
            .map_err(|e| Error::local_io(&target.source, format!("Failed to open: {e}")))?;

        let credential = self.tokens.fresh_credential().await?;
        let mut session = self.api.initiate_session(&credential, target).await?;
        let total = session.total_size;

        let mut report = UploadReport {
            session_uri: session.session_uri.clone(),
            bytes_uploaded: 0,
            chunks_sent: 0,
            retries: 0,
        };
        let mut failures: u32 = 0;

        loop {
            let offset = session.bytes_confirmed;
            let len = self.chunk_size.min(total - offset);
            let data = read_chunk(&mut file, &target.source, offset, len).await?;

            let credential = self.tokens.fresh_credential().await?;
            report.chunks_sent += 1;
            debug!(offset, len, total, "Uploading chunk");

            let reason = match self
                .api
                .send_chunk(&credential, &session, offset, data)
                .await?
            {
                ChunkResult::Complete => {
                    report.bytes_uploaded = total;
                    info!(
                        bytes = total,
                        chunks = report.chunks_sent,
                        retries = report.retries,
                        "Upload complete"
                    );
                    return Ok(report);
                }
                ChunkResult::Incomplete(confirmed) => {
                    if confirmed >= total {
                        return Err(Error::Protocol(format!(
                            "Server acknowledged {confirmed} of {total} bytes without completing the upload"
                        )));
                    }
                    if confirmed > offset + len {
                        return Err(Error::Protocol(format!(
                            "Server acknowledged {confirmed} bytes after receiving only up to byte {}",
                            offset + len
                        )));
                    }
                    session.bytes_confirmed = confirmed;
                    report.bytes_uploaded = confirmed;
                    if confirmed > offset {
                        failures = 0;
                        info!(
                            confirmed,
                            total,
                            percent = confirmed * 100 / total,
                            "Upload progress"
                        );
                        continue;
                    }
                    format!("no progress past byte {confirmed}")
                }
                ChunkResult::Retryable { reason } => reason,
            };

            failures += 1;
            report.retries += 1;
            if self.retry.is_exhausted(failures) {
                warn!(failures, %reason, "Retry budget exhausted");
                return Err(Error::Upload(format!(
                    "Giving up after {failures} consecutive failed attempts: {reason}"
                )));
            }

            if self.resync(&mut session, &reason).await? {
                report.bytes_uploaded = total;
                info!(bytes = total, "Upload complete (confirmed by status query)");
                return Ok(report);
            }
            report.bytes_uploaded = session.bytes_confirmed;

            let backoff = self.retry.calculate_backoff(failures - 1);
            warn!(
                failures,
                resume_at = session.bytes_confirmed,
                backoff_ms = backoff.as_millis() as u64,
                %reason,
                "Chunk failed, retrying after backoff"
            );
            self.clock.sleep(backoff).await;
        }
    }

    /// Ask the server how much it holds and move the session there.
    ///
    /// Returns true when the server reports the upload as already complete.
    /// A transient failure of the query itself leaves the offset unchanged.
    async fn resync(&self, session: &mut UploadSession, reason: &str) -> Result<bool> {
        let credential = self.tokens.fresh_credential().await?;
        match self.api.query_status(&credential, session).await {
            Ok(SessionStatus::Complete) => Ok(true),
            Ok(SessionStatus::Confirmed(confirmed)) => {
                if confirmed > session.total_size {
                    return Err(Error::Protocol(format!(
                        "Server reports {confirmed} bytes received for a {}-byte file",
                        session.total_size
                    )));
                }
                debug!(
                    previous = session.bytes_confirmed,
                    confirmed, reason, "Resynchronised upload offset"
                );
                session.bytes_confirmed = confirmed;
                Ok(false)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Status query failed, keeping last known offset");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

async fn read_chunk(
    file: &mut tokio::fs::File,
    path: &Path,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>> {
    let len = usize::try_from(len)
        .map_err(|_| Error::local_io(path, format!("Chunk of {len} bytes is too large")))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| Error::local_io(path, format!("Failed to seek to {offset}: {e}")))?;

    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer).await.map_err(|e| {
        Error::local_io(
            path,
            format!("Failed to read {len} bytes at offset {offset}: {e}"),
        )
    })?;
    Ok(buffer)
}
