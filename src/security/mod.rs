//! Request admission subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (X-Forwarded-For / X-Real-IP / "unknown")
//!     → activity.rs (per-identity request volume, abuse signals)
//!     → rate_limit.rs (per-identity token bucket)
//!     → admission.rs (Admit or Deny)
//!     → Pass to upstream, or 429
//! ```
//!
//! # Design Decisions
//! - All state is in memory and scoped to one process
//! - Abuse detection is observational; only the token bucket denies
//! - Identity maps grow without eviction for the life of the process

pub mod activity;
pub mod admission;
pub mod clock;
pub mod identity;
pub mod rate_limit;

pub use activity::{AbuseSignal, ActivityMonitor, ActivitySnapshot};
pub use admission::{AdmissionFilter, Decision, DenyReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{resolve_identity, UNKNOWN_IDENTITY};
pub use rate_limit::{Acquire, BucketSnapshot, TokenBucketRegistry};
