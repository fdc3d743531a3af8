//! # Data Retrieval Module
//!
//! Generic HTTP clients and utilities shared by the catalog and chat
//! integrations, so those modules only deal with their own schemas.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a JSON `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with exponential-backoff retries for transient
//!   failures and a per-request timeout.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
