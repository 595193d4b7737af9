//! HTTP handlers: the auth sub-request endpoint and the probes.
pub mod decision;
pub mod system;
pub mod types;
