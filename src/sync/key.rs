//! Cache keys and structured invalidation tags.

use sha2::{Digest, Sha256};
use std::fmt;

/// Identifies one cached result: a resource name plus an optional digest of
/// the parameters it was requested with.
///
/// Renders as `name` or `name:digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
  resource: String,
  digest: Option<String>,
}

impl ResourceKey {
  /// Key for a parameterless resource.
  pub fn new(resource: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      digest: None,
    }
  }

  /// Key for a resource requested with `params`.
  ///
  /// `params` should already be normalized; equal strings give equal keys.
  pub fn with_params(resource: impl Into<String>, params: &str) -> Self {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(params.as_bytes());
    let digest = hex::encode(hasher.finalize());

    Self {
      resource: resource.into(),
      digest: Some(digest[..16].to_string()),
    }
  }

  /// Parse a rendered cache key back into its parts.
  pub fn parse(key: &str) -> Self {
    match key.split_once(':') {
      Some((resource, digest)) => Self {
        resource: resource.to_string(),
        digest: Some(digest.to_string()),
      },
      None => Self::new(key),
    }
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn digest(&self) -> Option<&str> {
    self.digest.as_deref()
  }

  /// The string stored in the cache.
  pub fn cache_key(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.digest {
      Some(digest) => write!(f, "{}:{}", self.resource, digest),
      None => f.write_str(&self.resource),
    }
  }
}

/// What a mutation makes stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTag {
  /// Every key of a resource, whatever its parameters
  Resource(String),
  /// One exact key
  Key(ResourceKey),
}

impl InvalidationTag {
  pub fn resource(name: impl Into<String>) -> Self {
    Self::Resource(name.into())
  }

  pub fn matches(&self, key: &ResourceKey) -> bool {
    match self {
      Self::Resource(name) => key.resource() == name,
      Self::Key(exact) => key == exact,
    }
  }

  /// Match against a rendered cache key.
  pub fn matches_key(&self, key: &str) -> bool {
    self.matches(&ResourceKey::parse(key))
  }
}

impl fmt::Display for InvalidationTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Resource(name) => write!(f, "{}:*", name),
      Self::Key(key) => write!(f, "{}", key),
    }
  }
}
