//! Shared networking infrastructure.

pub mod client;

pub use client::{HttpClient, HttpClientBuilder, truncate_body};
