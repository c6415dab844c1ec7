//! The backend wraps every answer in `{success, data, error, message}`.

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};

#[derive(Debug, Deserialize)]
struct Envelope {
  success: bool,
  #[serde(default)]
  data: Option<Value>,
  #[serde(default)]
  error: Option<String>,
  #[serde(default)]
  message: Option<String>,
}

/// Strip the envelope from a response body.
///
/// Bodies that are not envelopes pass through untouched. `success: false`
/// becomes [`TransportError::Rejected`].
pub fn unwrap_envelope(body: Value) -> Result<Value, TransportError> {
  let is_envelope = body.as_object().is_some_and(|o| o.contains_key("success"));
  if !is_envelope {
    return Ok(body);
  }

  let envelope: Envelope =
    serde_json::from_value(body).map_err(|e| TransportError::Decode(e.to_string()))?;

  if envelope.success {
    Ok(envelope.data.unwrap_or(Value::Null))
  } else {
    let reason = envelope
      .error
      .or(envelope.message)
      .unwrap_or_else(|| "request failed".to_string());
    Err(TransportError::Rejected(reason))
  }
}

/// Transport decorator that unwraps backend envelopes.
pub struct EnvelopeTransport {
  inner: Arc<dyn Transport>,
}

impl EnvelopeTransport {
  pub fn new(inner: Arc<dyn Transport>) -> Self {
    Self { inner }
  }
}

impl Transport for EnvelopeTransport {
  fn request(
    &self,
    request: TransportRequest,
  ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
    Box::pin(async move {
      let response = self.inner.request(request).await?;
      Ok(TransportResponse {
        status: response.status,
        body: unwrap_envelope(response.body)?,
      })
    })
  }
}
