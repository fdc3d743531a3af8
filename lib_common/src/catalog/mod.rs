//! # Outlet Catalog
//!
//! The data source of the bot: the outlet search endpoint, its JSON schema and
//! a [`SnapshotSource`](crate::core::poller::SnapshotSource) over it.

#![doc(html_logo_url = "https://example.com/logo.png")] // Placeholder
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// HTTP client for the catalog endpoint.
pub mod apicall;
/// Wire types of the search response.
pub mod schema;

pub use apicall::{CatalogClient, CatalogError};

/// Outlet search endpoint polled by default.
pub const DEFAULT_API_URI: &str = "https://www.bolia.com/api/search/outlet?includerangelimits=true&language=nb-no&mode=category&pageLink=5471&size=2000&v=2021.4143.1215.1-48";

/// Prefix of the public product pages.
pub const DEFAULT_ITEM_URL_BASE: &str = "https://www.bolia.com/nb-no/mot-oss/butikker/online-outlet/produkt/";
