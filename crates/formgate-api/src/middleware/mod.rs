//! # Middleware Modules
//!
//! Tower middleware layers for the service: request tracing, envelope
//! metrics, and panic containment.

pub mod metrics;
pub mod panic;
pub mod tracing_layer;
