//! Transport collaborator contract and its HTTP implementation.
//!
//! The sync layer never talks HTTP directly; it hands a [`TransportRequest`]
//! to a [`Transport`] and treats every non-success outcome the same way.

mod http;

pub use http::{HttpPinger, HttpTransport};

use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

/// A single logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
  pub url: String,
  pub method: Method,
  pub headers: Vec<(String, String)>,
  pub body: Option<Value>,
  pub timeout: Duration,
}

impl TransportRequest {
  pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
    Self {
      url: url.into(),
      method: Method::Get,
      headers: Vec::new(),
      body: None,
      timeout,
    }
  }

  pub fn post(url: impl Into<String>, body: Value, timeout: Duration) -> Self {
    Self {
      url: url.into(),
      method: Method::Post,
      headers: Vec::new(),
      body: Some(body),
      timeout,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
  pub status: u16,
  pub body: Value,
}

/// Any way a request can fail. The sync layer does not distinguish between
/// these when choosing a fallback; they only feed logs and status messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("HTTP {status}: {reason}")]
  Status { status: u16, reason: String },

  #[error("network error: {0}")]
  Network(String),

  #[error("invalid response body: {0}")]
  Decode(String),

  #[error("rejected by backend: {0}")]
  Rejected(String),
}

/// Performs requests against the backend.
pub trait Transport: Send + Sync {
  fn request(&self, request: TransportRequest)
    -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

/// Lightweight connectivity check.
pub trait Pinger: Send + Sync {
  fn ping(&self, timeout: Duration) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Run `future` with a hard deadline; expiry maps to [`TransportError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T, TransportError>
where
  F: Future<Output = Result<T, TransportError>>,
{
  tokio::time::timeout(timeout, future)
    .await
    .unwrap_or(Err(TransportError::Timeout(timeout)))
}
