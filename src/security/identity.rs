//! Client identity resolution.
//!
//! # Responsibilities
//! - Derive the key that partitions rate-limit and activity state
//! - Prefer the first hop of `X-Forwarded-For`, then `X-Real-IP`
//! - Collapse every unidentified client into one shared identity
//!
//! # Design Decisions
//! - Never fails: malformed or missing headers degrade to [`UNKNOWN_IDENTITY`]
//! - Values are used as opaque strings, not parsed as IP addresses

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Identity shared by all clients that carry no forwarding headers.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Resolve the client identity for a request's header set.
pub fn resolve_identity(headers: &HeaderMap) -> String {
    if let Some(forwarded) = header_str(headers, X_FORWARDED_FOR) {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    if let Some(real_ip) = header_str(headers, X_REAL_IP) {
        return real_ip.to_string();
    }

    UNKNOWN_IDENTITY.to_string()
}

/// First value of `name`, if present, valid visible ASCII and non-empty.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
}
