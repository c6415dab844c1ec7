use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::resources::{Mutation, Resource};
use crate::config::BackendConfig;
use crate::sync::MutationRequest;
use crate::transport::TransportRequest;

/// Builds transport requests for the complaint backend.
#[derive(Clone, Debug)]
pub struct BackendClient {
  base: Url,
  health_path: String,
  token: Option<String>,
  timeout: Duration,
}

impl BackendClient {
  pub fn new(config: &BackendConfig, token: Option<String>, timeout: Duration) -> Result<Self> {
    let base =
      Url::parse(&config.url).map_err(|e| eyre!("Invalid backend URL {}: {}", config.url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Backend URL {} cannot have paths appended", config.url));
    }

    Ok(Self {
      base,
      health_path: config.health_path.clone(),
      token,
      timeout,
    })
  }

  pub fn base_url(&self) -> &str {
    self.base.as_str()
  }

  /// Endpoint the network monitor pings.
  pub fn health_url(&self) -> String {
    let segments: Vec<&str> = self.health_path.split('/').filter(|s| !s.is_empty()).collect();
    self.endpoint(&segments)
  }

  /// Read request for `resource`.
  pub fn request(&self, resource: &Resource) -> TransportRequest {
    let request = match resource {
      Resource::Complaints { filters } => TransportRequest::post(
        self.endpoint(&["api", "complaints"]),
        json!(filters),
        self.timeout,
      ),
      Resource::DashboardStats => {
        TransportRequest::get(self.endpoint(&["api", "dashboard", "stats"]), self.timeout)
      }
      Resource::Complaint { id } => {
        TransportRequest::get(self.endpoint(&["api", "complaints", id.trim()]), self.timeout)
      }
    };

    self.decorate(request)
  }

  /// Write request for `mutation`, tagged with what it invalidates.
  pub fn mutation(&self, mutation: &Mutation) -> MutationRequest {
    let request = match mutation {
      Mutation::CreateComplaint { data } => TransportRequest::post(
        self.endpoint(&[]),
        json!({ "action": "createComplaint", "complaintData": data }),
        self.timeout,
      ),
      Mutation::UpdateComplaint { id, updates } => TransportRequest::post(
        self.endpoint(&["api", "complaints", id.trim()]),
        updates.clone(),
        self.timeout,
      ),
    };

    MutationRequest {
      request: self.decorate(request),
      invalidates: mutation.invalidates(),
    }
  }

  fn decorate(&self, request: TransportRequest) -> TransportRequest {
    let request = request
      .with_header("Accept", "application/json")
      .with_header("Cache-Control", "no-cache");

    match &self.token {
      Some(token) => request.with_header("Authorization", format!("Bearer {}", token)),
      None => request,
    }
  }

  fn endpoint(&self, segments: &[&str]) -> String {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url.to_string()
  }
}

/// Parse `key=value` filter arguments.
pub fn parse_filter(raw: &str) -> Result<(String, String)> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| eyre!("Filter must look like key=value, got {}", raw))?;
  if key.trim().is_empty() {
    return Err(eyre!("Filter key is empty in {}", raw));
  }
  Ok((key.trim().to_string(), value.trim().to_string()))
}

/// Payload for a mutation given on the command line as JSON.
pub fn parse_payload(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON payload: {}", e))
}
