//! gdrive-upload -- headless Google Drive uploader.
//!
//! Authenticates with the OAuth 2.0 device authorization grant, keeps the
//! resulting credential fresh on disk, and uploads one file per run through
//! the Drive resumable upload protocol.

pub mod app;
pub mod clock;
pub mod config;
pub mod error;
pub mod net;
pub mod oauth;
pub mod upload;

pub use app::App;
pub use error::{Error, Result};
