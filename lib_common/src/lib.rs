//! # lib_common
//!
//! Shared library for the `pricewatch` outlet alert bot. Each top-level module is
//! gated behind a cargo feature of the same name so binaries only pull in the
//! dependencies they use.
//!
//! - **`core`**: the persistent reactive pipeline (poll, diff, dedup, fan-out).
//! - **`retrieve`**: generic HTTP client with retry middleware.
//! - **`catalog`**: outlet catalog schema and polling source.
//! - **`chat`**: Telegram Bot API client and command parsing.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "catalog")]
pub mod catalog;

#[cfg(feature = "chat")]
pub mod chat;
