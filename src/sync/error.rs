use crate::transport::TransportError;

/// Errors surfaced by the sync layer.
///
/// Transport failures during a fetch are normally absorbed by the fallback
/// chain; only [`SyncError::NoFallbackAvailable`] reaches callers from `fetch`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// Network failed and neither cache nor static data could stand in
  #[error("no data available for {resource}: {source}")]
  NoFallbackAvailable {
    resource: String,
    source: TransportError,
  },

  /// A write failed; writes are never served from cache
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("{0} is not scheduled")]
  NotScheduled(String),

  #[error("fetch for {0} was aborted")]
  Aborted(String),
}
