//! HTTP transport abstraction.
//!
//! The manifest client and the downloader talk to the network only through
//! [`HttpTransport`], so both can be exercised against an in-memory server in
//! tests. [`ReqwestTransport`] is the real implementation.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use thiserror::Error;

use crate::config::NetworkConfig;
use crate::error::{UpdateError, UpdateResult};

/// HTTP status for a successful ranged response.
pub const STATUS_PARTIAL_CONTENT: u16 = 206;

/// HTTP status for a range beyond the end of the resource.
pub const STATUS_RANGE_NOT_SATISFIABLE: u16 = 416;

/// Network-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with an error status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) | Self::Body(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
        }
    }
}

/// Response to a (possibly ranged) GET, with the body left unread.
pub struct RangeResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length` of this response, if the server sent one.
    pub content_length: Option<u64>,
    /// Streaming body.
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Minimal HTTP operations the update agent needs.
pub trait HttpTransport: Send + Sync {
    /// Issue a HEAD request and return the status code.
    fn head(&self, url: &str, timeout: Duration) -> Result<u16, TransportError>;

    /// GET a small document as UTF-8 text. Error statuses are errors.
    fn get_text(&self, url: &str, timeout: Duration) -> Result<String, TransportError>;

    /// GET starting at byte `offset`, sending a `Range` header when it is
    /// non-zero. Any status is returned as-is for the caller to interpret.
    fn get_range(&self, url: &str, offset: u64) -> Result<RangeResponse, TransportError>;
}

/// Blocking reqwest implementation of [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client with the configured connect and read timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::HttpClient`] if the TLS backend cannot be
    /// initialised.
    pub fn new(config: &NetworkConfig) -> UpdateResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .user_agent(concat!("modupdater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdateError::HttpClient(e.to_string()))?;

        Ok(Self { client })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    fn head(&self, url: &str, timeout: Duration) -> Result<u16, TransportError> {
        self.client
            .head(url)
            .timeout(timeout)
            .send()
            .map(|r| r.status().as_u16())
            .map_err(map_reqwest_error)
    }

    fn get_text(&self, url: &str, timeout: Duration) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        response.text().map_err(map_reqwest_error)
    }

    fn get_range(&self, url: &str, offset: u64) -> Result<RangeResponse, TransportError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().map_err(map_reqwest_error)?;
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        Ok(RangeResponse {
            status: response.status().as_u16(),
            content_length,
            body: Box::new(response),
        })
    }
}
