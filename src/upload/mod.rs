//! Resumable upload to Google Drive.
//!
//! - [`UploadTarget`] - what is uploaded and under which name
//! - [`UploadClient`] - stateless HTTP contract with the upload endpoint
//! - [`ResumableUploadEngine`] - chunk loop with resync and bounded retries

pub mod client;
pub mod engine;
pub mod retry;
pub mod target;

pub use client::{ChunkResult, SessionStatus, UploadApi, UploadClient, UploadSession};
pub use engine::{ResumableUploadEngine, UploadReport};
pub use retry::RetryPolicy;
pub use target::UploadTarget;
