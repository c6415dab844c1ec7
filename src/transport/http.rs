//! reqwest-backed transport and health pinger.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{Method, Pinger, Transport, TransportError, TransportRequest, TransportResponse};

/// HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("csync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Reuse an existing client (connection pool is shared).
  pub fn client(&self) -> &reqwest::Client {
    &self.client
  }

  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
    let mut builder = match request.method {
      Method::Get => self.client.get(&request.url),
      Method::Post => self.client.post(&request.url),
    };

    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::Network(format!("invalid header {}: {}", name, e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| TransportError::Network(format!("invalid header value: {}", e)))?;
      builder = builder.header(name, value);
    }

    if let Some(body) = &request.body {
      let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Decode(e.to_string()))?;
      builder = builder
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(bytes);
    }

    debug!(url = %request.url, method = ?request.method, "sending request");

    let response = builder
      .timeout(request.timeout)
      .send()
      .await
      .map_err(|e| classify(e, request.timeout))?;

    let status = response.status();
    if !status.is_success() {
      return Err(TransportError::Status {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("unknown").to_string(),
      });
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| classify(e, request.timeout))?;

    let body = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?
    };

    Ok(TransportResponse {
      status: status.as_u16(),
      body,
    })
  }
}

impl Transport for HttpTransport {
  fn request(
    &self,
    request: TransportRequest,
  ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
    Box::pin(self.send(request))
  }
}

/// Health check against a fixed URL.
#[derive(Clone)]
pub struct HttpPinger {
  client: reqwest::Client,
  url: String,
}

impl HttpPinger {
  pub fn new(transport: &HttpTransport, url: impl Into<String>) -> Self {
    Self {
      client: transport.client().clone(),
      url: url.into(),
    }
  }
}

impl Pinger for HttpPinger {
  fn ping(&self, timeout: Duration) -> BoxFuture<'_, Result<(), TransportError>> {
    Box::pin(async move {
      let response = self
        .client
        .get(&self.url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;

      let status = response.status();
      if status.is_success() {
        Ok(())
      } else {
        Err(TransportError::Status {
          status: status.as_u16(),
          reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        })
      }
    })
  }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
  if error.is_timeout() {
    TransportError::Timeout(timeout)
  } else if error.is_decode() {
    TransportError::Decode(error.to_string())
  } else {
    TransportError::Network(error.to_string())
  }
}
