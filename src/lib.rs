//! Request admission gate.
//!
//! A per-identity token-bucket rate limiter combined with a sliding-activity
//! abuse detector, applied to every inbound request before it is forwarded
//! to the service behind the gate.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GateConfig;
pub use http::GateServer;
pub use lifecycle::Shutdown;
pub use security::{AdmissionFilter, Decision, DenyReason};
