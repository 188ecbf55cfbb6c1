//! Security Testing Utilities
//!
//! Deterministic stand-ins for the collaborators the security services
//! depend on, so host applications can test their own wiring without a
//! database or a real clock.
//!
//! # Usage
//!
//! ```ignore
//! use eventguard::testing::{ManualClock, StaticPasswordVerifier};
//!
//! let clock = Arc::new(ManualClock::default());
//! let services = SecurityServices::builder(config, Arc::new(StaticPasswordVerifier))
//!     .clock(clock.clone())
//!     .build();
//!
//! clock.advance(Duration::from_secs(16 * 60));
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::audit::{AuditEvent, AuditRecord, AuditStore, AuditTrail, RequestContext};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::login::PasswordVerifier;
use crate::observability::SecurityEvent;

// ============================================================================
// Clock
// ============================================================================

/// A clock that only moves when told to.
///
/// Starts at 2026-01-01T00:00:00Z by default.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::at(start)
    }
}

impl ManualClock {
    /// A clock stopped at `at`
    pub fn at(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock();
        *now = *now + step;
    }

    /// Jump to an absolute time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Stores
// ============================================================================

/// An audit store that refuses every read and write
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingAuditStore;

impl AuditStore for FailingAuditStore {
    fn append(&self, _record: &AuditRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("audit store offline".into()))
    }

    fn since(&self, _from: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError> {
        Err(StoreError::Unavailable("audit store offline".into()))
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Treats the stored hash as the plaintext password.
///
/// Never use outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPasswordVerifier;

impl PasswordVerifier for StaticPasswordVerifier {
    fn verify(&self, password: &str, hash: &str) -> bool {
        crate::crypto::constant_time_str_eq(password, hash)
    }
}

// ============================================================================
// Seeding
// ============================================================================

/// Record `count` anonymous `auth.login_failed` events from `ip`
pub fn seed_failed_logins(trail: &AuditTrail, ip: &str, count: usize) {
    let ctx = RequestContext::new(ip, "eventguard-test");
    for _ in 0..count {
        trail.record(
            AuditEvent::from(SecurityEvent::LoginFailed).resource_type("user"),
            &ctx,
        );
    }
}
