//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with retry middleware
//! for transient failures and uniform JSON response handling. The catalog and
//! chat clients are thin layers on top of it.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header::HeaderMap, Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// Attempts beyond the first for requests that fail transiently.
pub const MAX_RETRIES: u32 = 3;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A standardized container for API responses.
///
/// Wraps the decoded body together with the status and headers of the
/// exchange. Non-2xx responses keep the raw body in `error_body`.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The decoded response body, present only on success.
    pub data: Option<T>,
    /// The raw body of a failed response.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Whether the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A JSON API client bound to one base URL.
///
/// Built on `reqwest_middleware`: transient failures (connection errors, 5xx,
/// 429) are retried with exponential backoff before the caller sees them.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client for `base_url` with the given request timeout.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the TLS backend cannot be
    /// initialised.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid base URL '{base_url}' (must be absolute)"))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pricewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner, base_url })
    }

    /// The base URL every path is joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request and decodes the JSON response.
    ///
    /// `path` is joined to the base URL; an empty path targets the base URL
    /// itself. A `body` is sent as JSON.
    ///
    /// # Errors
    /// Network failures (after retries), URL joining and body decoding errors.
    /// A non-2xx status is *not* an error: it comes back with `success: false`.
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        // --- Phase 1: Target URL ---
        let url = if path.is_empty() { self.base_url.clone() } else { self.base_url.join(path)? };
        let mut req = self.inner.request(method, url.clone());

        // --- Phase 2: JSON body ---
        if let Some(b) = body {
            use reqwest::header::CONTENT_TYPE;
            let json_body = serde_json::to_vec(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        // --- Phase 3: Execute and capture metadata ---
        let response: reqwest::Response = req.send().await.with_context(|| format!("request to {} failed", redact(&url)))?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await.with_context(|| format!("undecodable response from {}", redact(&url)))?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }

    /// `GET` without a body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<ApiResponse<T>> {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    /// `POST` with a JSON body.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }
}

/// Host and path only; Bot API URLs carry the token in the path, so the path
/// is dropped for anything under `/bot`.
pub fn redact(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    if url.path().starts_with("/bot") {
        format!("{}://{host}/bot<redacted>", url.scheme())
    } else {
        format!("{}://{host}{}", url.scheme(), url.path())
    }
}
