use serde_json::Value;
use std::collections::BTreeMap;

use crate::sync::{InvalidationTag, ResourceKey};

pub const COMPLAINTS: &str = "complaints";
pub const DASHBOARD_STATS: &str = "dashboard_stats";
pub const COMPLAINT: &str = "complaint";

/// Something the client reads from the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
  /// Complaint list, optionally filtered
  Complaints { filters: BTreeMap<String, String> },
  /// Dashboard counters
  DashboardStats,
  /// One complaint by id
  Complaint { id: String },
}

impl Resource {
  pub fn complaints() -> Self {
    Self::Complaints {
      filters: BTreeMap::new(),
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Complaints { .. } => COMPLAINTS,
      Self::DashboardStats => DASHBOARD_STATS,
      Self::Complaint { .. } => COMPLAINT,
    }
  }

  /// Cache key for this resource and its parameters.
  pub fn key(&self) -> ResourceKey {
    match self {
      Self::Complaints { filters } if filters.is_empty() => ResourceKey::new(COMPLAINTS),
      Self::Complaints { filters } => {
        ResourceKey::with_params(COMPLAINTS, &normalize_filters(filters))
      }
      Self::DashboardStats => ResourceKey::new(DASHBOARD_STATS),
      Self::Complaint { id } => ResourceKey::with_params(COMPLAINT, id.trim()),
    }
  }

  /// Human-readable description
  pub fn description(&self) -> String {
    match self {
      Self::Complaints { filters } if filters.is_empty() => "all complaints".to_string(),
      Self::Complaints { filters } => format!("complaints where {}", normalize_filters(filters)),
      Self::DashboardStats => "dashboard stats".to_string(),
      Self::Complaint { id } => format!("complaint {}", id),
    }
  }
}

/// A write sent to the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
  CreateComplaint { data: Value },
  UpdateComplaint { id: String, updates: Value },
}

impl Mutation {
  /// Cached reads this write makes stale.
  pub fn invalidates(&self) -> Vec<InvalidationTag> {
    match self {
      Self::CreateComplaint { .. } => vec![InvalidationTag::resource(COMPLAINTS)],
      Self::UpdateComplaint { id, .. } => vec![
        InvalidationTag::resource(COMPLAINTS),
        InvalidationTag::resource(DASHBOARD_STATS),
        InvalidationTag::Key(Resource::Complaint { id: id.clone() }.key()),
      ],
    }
  }
}

/// Filters in a stable order so equal filter sets share a cache key.
fn normalize_filters(filters: &BTreeMap<String, String>) -> String {
  filters
    .iter()
    .map(|(k, v)| format!("{}={}", k.trim().to_lowercase(), v.trim()))
    .collect::<Vec<_>>()
    .join("&")
}
