//! Offline-first cache and sync layer for the complaint tracker client.

pub mod app;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod commands;
pub mod config;
pub mod logging;
pub mod network;
pub mod sync;
pub mod timer;
pub mod transport;

#[cfg(test)]
mod testing;
