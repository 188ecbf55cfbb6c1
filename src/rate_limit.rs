//! Authentication Throttling
//!
//! Brute-force defense for login, password reset and MFA endpoints. Each
//! request is keyed by client IP, submitted email and endpoint path; a key
//! gets a fixed number of attempts per window before the gate rejects it
//! with `429 Too Many Requests`.
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | Attempts per key | 5 |
//! | Window | 15 minutes |
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::post};
//! use eventguard::rate_limit::{AuthThrottle, throttle_auth_middleware};
//!
//! let throttle = AuthThrottle::new(RateLimiter::in_memory(), ThrottlePolicy::default(), trail);
//!
//! let auth_routes = Router::new()
//!     .route("/api/login", post(login_handler))
//!     .route("/api/mfa/verify", post(verify_mfa))
//!     .layer(axum::middleware::from_fn_with_state(
//!         throttle,
//!         throttle_auth_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::form_urlencoded;

use crate::accounts::normalize_email;
use crate::audit::{AuditEvent, AuditTrail, RequestContext};
use crate::clock::{Clock, SystemClock};
use crate::crypto::sha256_hex;
use crate::observability::SecurityEvent;

/// Largest request body the gate buffers to read the submitted email
pub const MAX_IDENTITY_BODY_BYTES: usize = 64 * 1024;

// ============================================================================
// Counter Store
// ============================================================================

/// Attempt counter for one key. Created on first hit, discarded once
/// `expires_at` passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitBucket {
    /// Throttle key
    pub key: String,
    /// Attempts recorded in the current window
    pub count: u64,
    /// End of the current window
    pub expires_at: DateTime<Utc>,
}

/// Result of an atomic check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// Under the limit; the attempt was counted
    Admitted {
        /// Attempts in the window including this one
        attempts: u64,
    },
    /// At or over the limit; nothing was counted
    Rejected {
        /// Attempts in the window
        attempts: u64,
        /// Time until the window resets
        retry_after: Duration,
    },
}

/// Shared attempt counters with per-key expiry.
///
/// `hit_within` must be atomic: concurrent callers on the same key never
/// admit more than `max` attempts per window.
pub trait CounterStore: Send + Sync {
    /// Count an attempt, creating the bucket with a `window` TTL if absent.
    /// Returns the new count.
    fn hit(&self, key: &str, window: Duration) -> u64;

    /// Count an attempt only if fewer than `max` are already recorded
    fn hit_within(&self, key: &str, max: u64, window: Duration) -> HitOutcome;

    /// Attempts recorded for a live bucket (zero if none)
    fn attempts(&self, key: &str) -> u64;

    /// Time until the bucket expires (zero if none)
    fn available_in(&self, key: &str) -> Duration;

    /// Drop a bucket
    fn clear(&self, key: &str);
}

/// In-process [`CounterStore`]
pub struct InMemoryCounterStore {
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryCounterStore {
    /// Create a store on the system clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store on an explicit clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Snapshot of a live bucket
    pub fn bucket(&self, key: &str) -> Option<RateLimitBucket> {
        let now = self.clock.now();
        self.buckets
            .lock()
            .get(key)
            .filter(|b| b.expires_at > now)
            .cloned()
    }

    fn live_bucket<'a>(
        buckets: &'a mut HashMap<String, RateLimitBucket>,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> &'a mut RateLimitBucket {
        // Cleanup expired buckets periodically
        if buckets.len() > 1024 {
            buckets.retain(|_, b| b.expires_at > now);
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| new_bucket(key, window, now));
        if bucket.expires_at <= now {
            *bucket = new_bucket(key, window, now);
        }
        bucket
    }
}

fn new_bucket(key: &str, window: Duration, now: DateTime<Utc>) -> RateLimitBucket {
    let ttl = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
    RateLimitBucket {
        key: key.to_string(),
        count: 0,
        expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
}

fn remaining_ttl(bucket: &RateLimitBucket, now: DateTime<Utc>) -> Duration {
    (bucket.expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

impl CounterStore for InMemoryCounterStore {
    fn hit(&self, key: &str, window: Duration) -> u64 {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        let bucket = Self::live_bucket(&mut buckets, key, window, now);
        bucket.count += 1;
        bucket.count
    }

    fn hit_within(&self, key: &str, max: u64, window: Duration) -> HitOutcome {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        let bucket = Self::live_bucket(&mut buckets, key, window, now);

        if bucket.count >= max {
            return HitOutcome::Rejected {
                attempts: bucket.count,
                retry_after: remaining_ttl(bucket, now),
            };
        }

        bucket.count += 1;
        HitOutcome::Admitted {
            attempts: bucket.count,
        }
    }

    fn attempts(&self, key: &str) -> u64 {
        self.bucket(key).map(|b| b.count).unwrap_or(0)
    }

    fn available_in(&self, key: &str) -> Duration {
        let now = self.clock.now();
        self.bucket(key)
            .map(|b| remaining_ttl(&b, now))
            .unwrap_or(Duration::ZERO)
    }

    fn clear(&self, key: &str) {
        self.buckets.lock().remove(key);
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Attempt counter operations over a [`CounterStore`]
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter over a counter store
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Limiter over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()))
    }

    /// Count an attempt; the bucket lives for `window` from its first hit
    pub fn hit(&self, key: &str, window: Duration) -> u64 {
        self.store.hit(key, window)
    }

    /// Whether `max` or more attempts are recorded
    pub fn too_many_attempts(&self, key: &str, max: u64) -> bool {
        self.store.attempts(key) >= max
    }

    /// Whole seconds until the key's window resets, rounded up
    pub fn available_in(&self, key: &str) -> u64 {
        ceil_secs(self.store.available_in(key))
    }

    /// Attempts recorded for the key
    pub fn attempts(&self, key: &str) -> u64 {
        self.store.attempts(key)
    }

    /// Attempts left before the limit
    pub fn remaining(&self, key: &str, max: u64) -> u64 {
        max.saturating_sub(self.store.attempts(key))
    }

    /// Atomic check-and-increment
    pub fn attempt(&self, key: &str, max: u64, window: Duration) -> HitOutcome {
        self.store.hit_within(key, max, window)
    }

    /// Reset a key
    pub fn clear(&self, key: &str) {
        self.store.clear(key)
    }
}

pub(crate) fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Stable throttle key: SHA-256 over `ip|identity|path`
pub fn throttle_key(ip: &str, identity: &str, path: &str) -> String {
    sha256_hex(format!("{}|{}|{}", ip, identity, path).as_bytes())
}

// ============================================================================
// Auth Gate
// ============================================================================

/// Attempts allowed per throttle key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Attempts per window
    pub max_attempts: u64,
    /// Window length
    pub window: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Outcome of the gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Proceed to the handler
    Allowed {
        /// Throttle key
        key: String,
        /// Configured limit
        limit: u64,
        /// Attempts left after this one
        remaining: u64,
    },
    /// Reject with 429
    Rejected {
        /// Throttle key
        key: String,
        /// Configured limit
        limit: u64,
        /// Attempts already recorded
        attempts: u64,
        /// Seconds until the window resets
        retry_after_secs: u64,
    },
}

impl GateDecision {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Throttle key the decision was made for
    pub fn key(&self) -> &str {
        match self {
            Self::Allowed { key, .. } | Self::Rejected { key, .. } => key,
        }
    }
}

/// Rate limit gate for authentication endpoints.
///
/// Rejections and failed attempts (401 responses) are written to the audit
/// trail as `rate_limit_exceeded` and `auth.failed_attempt`.
#[derive(Clone)]
pub struct AuthThrottle {
    limiter: RateLimiter,
    policy: ThrottlePolicy,
    trail: AuditTrail,
}

impl AuthThrottle {
    /// Create a gate
    pub fn new(limiter: RateLimiter, policy: ThrottlePolicy, trail: AuditTrail) -> Self {
        Self {
            limiter,
            policy,
            trail,
        }
    }

    /// Active policy
    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }

    /// Underlying limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Check and count an attempt for `identity` at the context's path.
    ///
    /// A missing identity is keyed as `unknown`.
    pub fn check(&self, ctx: &RequestContext, identity: Option<&str>) -> GateDecision {
        let identity = identity.unwrap_or("unknown");
        let key = throttle_key(&ctx.ip, identity, &ctx.path);
        let limit = self.policy.max_attempts;

        match self.limiter.attempt(&key, limit, self.policy.window) {
            HitOutcome::Admitted { attempts } => {
                debug!(
                    ip = %ctx.ip,
                    path = %ctx.path,
                    attempts = attempts,
                    limit = limit,
                    "Auth throttle check passed"
                );
                GateDecision::Allowed {
                    key,
                    limit,
                    remaining: limit.saturating_sub(attempts),
                }
            }
            HitOutcome::Rejected {
                attempts,
                retry_after,
            } => {
                let retry_after_secs = ceil_secs(retry_after);

                crate::security_event!(
                    SecurityEvent::RateLimitExceeded,
                    ip_address = %ctx.ip,
                    identity = identity,
                    user_agent = %ctx.user_agent,
                    endpoint = %ctx.path,
                    attempts = attempts,
                    retry_after = retry_after_secs,
                    "Rate limit exceeded for authentication"
                );
                self.trail.record(
                    AuditEvent::from(SecurityEvent::RateLimitExceeded)
                        .meta("email", identity)
                        .meta("endpoint", ctx.path.as_str())
                        .meta("attempts", attempts)
                        .meta("retry_after", retry_after_secs),
                    ctx,
                );

                GateDecision::Rejected {
                    key,
                    limit,
                    attempts,
                    retry_after_secs,
                }
            }
        }
    }

    /// Record the handler's outcome. A 401 is logged as a failed attempt.
    pub fn record_outcome(&self, ctx: &RequestContext, identity: Option<&str>, key: &str, status: StatusCode) {
        if status != StatusCode::UNAUTHORIZED {
            return;
        }

        let attempts = self.limiter.attempts(key);
        let identity = identity.unwrap_or("unknown");
        crate::security_event!(
            SecurityEvent::FailedAttempt,
            ip_address = %ctx.ip,
            identity = identity,
            user_agent = %ctx.user_agent,
            endpoint = %ctx.path,
            attempts = attempts,
            "Failed authentication attempt"
        );
        self.trail.record(
            AuditEvent::from(SecurityEvent::FailedAttempt)
                .meta("email", identity)
                .meta("endpoint", ctx.path.as_str())
                .meta("attempts", attempts),
            ctx,
        );
    }
}

/// Rate limit response body
#[derive(Debug, Serialize)]
struct ThrottleErrorResponse {
    error: &'static str,
    message: String,
    retry_after: u64,
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u64, remaining: u64) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
}

/// Build the 429 response for a rejected decision
pub fn rejection_response(limit: u64, retry_after_secs: u64) -> Response {
    let minutes = retry_after_secs.div_ceil(60);
    let body = ThrottleErrorResponse {
        error: "rate_limit_exceeded",
        message: format!("Too many attempts. Please try again in {} minutes.", minutes),
        retry_after: retry_after_secs,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert("Retry-After", HeaderValue::from(retry_after_secs));
    set_limit_headers(headers, limit, 0);
    response
}

/// Email submitted in a JSON or form-encoded body, normalized.
///
/// Anything else (no body, another content type, no `email` field) yields
/// `None` and the request is keyed as `unknown`.
pub fn submitted_identity(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let email = if content_type.starts_with("application/x-www-form-urlencoded") {
        form_urlencoded::parse(body)
            .find(|(name, _)| name == "email")
            .map(|(_, value)| value.into_owned())
    } else if content_type.starts_with("application/json") {
        serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|json| json.get("email")?.as_str().map(str::to_string))
    } else {
        None
    };

    email.map(|e| normalize_email(&e)).filter(|e| !e.is_empty())
}

/// Auth throttling middleware for Axum
///
/// Buffers the request body (up to [`MAX_IDENTITY_BODY_BYTES`]) to key the
/// attempt on the submitted `email`, then hands the handler an identical
/// body. The client IP comes from proxy headers.
///
/// # Usage
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/login", post(login))
///     .layer(axum::middleware::from_fn_with_state(throttle, throttle_auth_middleware));
/// ```
pub async fn throttle_auth_middleware(
    State(throttle): State<AuthThrottle>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_headers(request.headers(), request.uri().path());

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_IDENTITY_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %ctx.path, error = %e, "Auth request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };
    let identity = submitted_identity(&parts.headers, &bytes);
    let request = Request::from_parts(parts, Body::from(bytes));

    match throttle.check(&ctx, identity.as_deref()) {
        GateDecision::Rejected {
            limit,
            retry_after_secs,
            ..
        } => rejection_response(limit, retry_after_secs),
        GateDecision::Allowed { key, limit, .. } => {
            let mut response = next.run(request).await;

            throttle.record_outcome(&ctx, identity.as_deref(), &key, response.status());

            let remaining = throttle.limiter().remaining(&key, limit);
            set_limit_headers(response.headers_mut(), limit, remaining);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;
    use crate::testing::ManualClock;
    use axum::{routing::post, Router};
    use tower::ServiceExt;

    fn setup(max: u64) -> (AuthThrottle, Arc<ManualClock>, Arc<InMemoryAuditStore>) {
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(InMemoryAuditStore::new());
        let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::with_clock(clock.clone())));
        let trail = AuditTrail::with_clock(audit.clone(), clock.clone());
        let policy = ThrottlePolicy {
            max_attempts: max,
            window: Duration::from_secs(900),
        };
        (AuthThrottle::new(limiter, policy, trail), clock, audit)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("1.2.3.4", "test").with_path("/api/login")
    }

    #[test]
    fn test_throttle_key_is_stable_and_distinct() {
        let a = throttle_key("1.2.3.4", "a@example.com", "/api/login");
        assert_eq!(a, throttle_key("1.2.3.4", "a@example.com", "/api/login"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, throttle_key("1.2.3.4", "b@example.com", "/api/login"));
        assert_ne!(a, throttle_key("1.2.3.5", "a@example.com", "/api/login"));
        assert_ne!(a, throttle_key("1.2.3.4", "a@example.com", "/api/forgot-password"));
    }

    #[test]
    fn test_limiter_window() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::with_clock(clock.clone())));
        let window = Duration::from_secs(900);

        for _ in 0..5 {
            assert!(!limiter.too_many_attempts("k", 5));
            limiter.hit("k", window);
        }
        assert!(limiter.too_many_attempts("k", 5));
        assert_eq!(limiter.available_in("k"), 900);

        clock.advance(Duration::from_secs(600));
        assert_eq!(limiter.available_in("k"), 300);
        assert!(limiter.too_many_attempts("k", 5));

        clock.advance(Duration::from_secs(300));
        assert!(!limiter.too_many_attempts("k", 5));
        assert_eq!(limiter.attempts("k"), 0);
        assert_eq!(limiter.available_in("k"), 0);
    }

    #[test]
    fn test_window_starts_at_first_hit() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::with_clock(clock.clone())));
        let window = Duration::from_secs(60);

        limiter.hit("k", window);
        clock.advance(Duration::from_secs(50));
        limiter.hit("k", window);
        assert_eq!(limiter.available_in("k"), 10);

        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.hit("k", window), 1);
    }

    #[test]
    fn test_gate_rejects_after_limit() {
        let (throttle, _, audit) = setup(5);
        for i in 0..5 {
            let decision = throttle.check(&ctx(), Some("a@example.com"));
            assert!(decision.is_allowed(), "attempt {} should pass", i + 1);
        }

        match throttle.check(&ctx(), Some("a@example.com")) {
            GateDecision::Rejected {
                attempts,
                retry_after_secs,
                limit,
                ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(limit, 5);
                assert_eq!(retry_after_secs, 900);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "rate_limit_exceeded");

        // Other identities are unaffected
        assert!(throttle.check(&ctx(), Some("b@example.com")).is_allowed());
    }

    #[test]
    fn test_parallel_attempts_never_exceed_limit() {
        let (throttle, _, _) = setup(8);
        let admitted = std::sync::atomic::AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..32 {
                s.spawn(|| {
                    if throttle.check(&ctx(), Some("race@example.com")).is_allowed() {
                        admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(std::sync::atomic::Ordering::SeqCst), 8);
    }

    #[test]
    fn test_record_outcome_only_logs_401() {
        let (throttle, _, audit) = setup(5);
        let decision = throttle.check(&ctx(), None);
        throttle.record_outcome(&ctx(), None, decision.key(), StatusCode::OK);
        assert!(audit.is_empty());

        throttle.record_outcome(&ctx(), None, decision.key(), StatusCode::UNAUTHORIZED);
        let records = audit.records();
        assert_eq!(records[0].action, "auth.failed_attempt");
        assert_eq!(records[0].metadata["attempts"], 1);
        assert_eq!(records[0].metadata["email"], "unknown");
    }

    fn app(throttle: AuthThrottle) -> Router {
        Router::new()
            .route("/api/login", post(|| async { StatusCode::UNAUTHORIZED }))
            .layer(axum::middleware::from_fn_with_state(
                throttle,
                throttle_auth_middleware,
            ))
    }

    fn login_request(email: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/login")
            .header("x-forwarded-for", "9.9.9.9")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "email": email, "password": "guess" }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_middleware_headers_and_rejection() {
        let (throttle, _, audit) = setup(2);
        let app = app(throttle);

        let response = app.clone().oneshot(login_request("Alice@Example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["X-RateLimit-Limit"], "2");
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "1");

        let response = app.clone().oneshot(login_request("Alice@Example.com")).await.unwrap();
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");

        let response = app.oneshot(login_request("alice@example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["Retry-After"], "900");
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");

        let actions: Vec<_> = audit.records().into_iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            ["auth.failed_attempt", "auth.failed_attempt", "rate_limit_exceeded"]
        );
        assert!(audit.records().iter().all(|r| r.ip_address == "9.9.9.9"));
    }

    #[tokio::test]
    async fn test_middleware_keys_on_submitted_email_not_headers() {
        let (throttle, _, audit) = setup(5);
        let app = app(throttle);

        let mut reached = 0;
        for i in 0..20 {
            let mut request = login_request("victim@example.com");
            request.headers_mut().insert(
                "x-login-identity",
                HeaderValue::from_str(&format!("decoy-{}@example.com", i)).unwrap(),
            );
            let response = app.clone().oneshot(request).await.unwrap();
            if response.status() == StatusCode::UNAUTHORIZED {
                reached += 1;
            }
        }
        assert_eq!(reached, 5);

        let rejected = audit
            .records()
            .into_iter()
            .filter(|r| r.action == "rate_limit_exceeded")
            .collect::<Vec<_>>();
        assert_eq!(rejected.len(), 15);
        assert_eq!(rejected[0].metadata["email"], "victim@example.com");

        // A different submitted email has its own budget
        let response = app.oneshot(login_request("other@example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_middleware_passes_body_through() {
        let (throttle, _, _) = setup(5);
        let app = Router::new()
            .route(
                "/api/login",
                post(|body: String| async move { body }),
            )
            .layer(axum::middleware::from_fn_with_state(
                throttle,
                throttle_auth_middleware,
            ));

        let response = app.oneshot(login_request("alice@example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["email"], "alice@example.com");
        assert_eq!(json["password"], "guess");
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused() {
        let (throttle, _, audit) = setup(5);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/login")
            .header("content-type", "application/json")
            .body(Body::from(vec![b' '; MAX_IDENTITY_BODY_BYTES + 1]))
            .unwrap();
        let response = app(throttle).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(audit.is_empty());
    }

    #[test]
    fn test_submitted_identity() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        assert_eq!(
            submitted_identity(&headers, br#"{"email":" Bob@Example.COM ","password":"x"}"#),
            Some("bob@example.com".to_string())
        );
        assert_eq!(submitted_identity(&headers, b"not json"), None);
        assert_eq!(submitted_identity(&headers, br#"{"email":"   "}"#), None);

        headers.insert(
            "content-type",
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );
        assert_eq!(
            submitted_identity(&headers, b"password=x&email=Carol%40example.com"),
            Some("carol@example.com".to_string())
        );

        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        assert_eq!(submitted_identity(&headers, br#"{"email":"a@example.com"}"#), None);
    }

    #[tokio::test]
    async fn test_rejection_body() {
        let response = rejection_response(5, 840);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["retry_after"], 840);
        assert_eq!(json["message"], "Too many attempts. Please try again in 14 minutes.");
    }
}
