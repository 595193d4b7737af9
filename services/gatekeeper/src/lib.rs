//! Gatekeeper sidecar library crate.
//!
//! # Purpose
//! Exposes configuration, key loading, identity store backends and the HTTP
//! router so the binary and the integration tests share one wiring path.
pub mod api;
pub mod app;
pub mod config;
pub mod keys;
pub mod observability;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
