//! HTTP surface of the novels service.
//!
//! The binary in `main.rs` wires the stores, importer and scheduler together;
//! this library exposes the router and state so integration tests can drive
//! the API in-process.

pub mod api;
pub mod metrics;
pub mod state;
