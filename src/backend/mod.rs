//! Glue between the sync layer and the complaint backend: which requests
//! fetch which resources, and how the backend's response envelope unwraps.

mod client;
mod envelope;
mod resources;

pub use client::{parse_filter, parse_payload, BackendClient};
pub use envelope::{unwrap_envelope, EnvelopeTransport};
pub use resources::{Mutation, Resource};
