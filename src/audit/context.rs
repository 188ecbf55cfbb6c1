//! Request context and actor identity captured on every audit record

use axum::http::{header::USER_AGENT, HeaderMap};
use serde::{Deserialize, Serialize};

/// Where a request came from.
///
/// Filled from proxy headers at the HTTP edge, or built directly by
/// non-HTTP callers (the reporting command, background jobs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Client IP address, `"unknown"` if it could not be determined
    pub ip: String,
    /// Raw `User-Agent` header, empty if absent
    pub user_agent: String,
    /// Request path
    pub path: String,
}

impl RequestContext {
    /// Build a context from explicit values
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            path: String::new(),
        }
    }

    /// Set the request path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Context for events raised by the process itself
    pub fn system() -> Self {
        Self::new("127.0.0.1", "eventguard")
    }

    /// Extract client IP and user agent from request headers
    pub fn from_headers(headers: &HeaderMap, path: &str) -> Self {
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        Self::new(extract_client_ip(headers), user_agent).with_path(path)
    }
}

/// Extract client IP from request headers
///
/// Checks headers in priority order:
/// 1. `X-Forwarded-For` (standard, may contain chain - takes first)
/// 2. `X-Real-IP` (single IP from reverse proxy)
/// 3. `CF-Connecting-IP` (Cloudflare)
///
/// Returns "unknown" if no client IP can be determined.
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    // X-Forwarded-For (may contain multiple IPs, take first)
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next().map(str::trim) {
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    for name in ["x-real-ip", "cf-connecting-ip"] {
        if let Some(ip) = headers.get(name).and_then(|v| v.to_str().ok()) {
            return ip.trim().to_string();
        }
    }

    "unknown".to_string()
}

/// The account an audit record is attributed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Account id
    pub id: Option<i64>,
    /// Account email (plaintext; audit rows are not field-encrypted)
    pub email: Option<String>,
}

impl Actor {
    /// A known account
    pub fn user(id: i64, email: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            email: Some(email.into()),
        }
    }

    /// An account known only by id
    pub fn with_id(id: i64) -> Self {
        Self {
            id: Some(id),
            email: None,
        }
    }

    /// No authenticated account
    pub fn anonymous() -> Self {
        Self::default()
    }
}
