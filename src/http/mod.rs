//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tracing, request ID)
//!     → middleware/admission.rs (admit or 429)
//!     → server.rs forward handler (single upstream)
//!     → Send to client
//! ```

pub mod middleware;
pub mod response;
pub mod server;

pub use server::{GateServer, ServerError};
