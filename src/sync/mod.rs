//! Cache-aside fetching, invalidation and refresh scheduling.

mod client;
mod error;
mod fallback;
mod flight;
mod key;
mod scheduler;
mod status;

pub use client::{
  FetchOptions, FetchOutcome, FetchSource, MutationRequest, SyncClient, DEFAULT_FETCH_TIMEOUT,
};
pub use error::SyncError;
pub use fallback::StaticFallback;
pub use flight::SingleFlight;
pub use key::{InvalidationTag, ResourceKey};
pub use scheduler::{ScheduleOptions, SyncScheduler};
pub use status::{StatusBoard, SyncStatus};
