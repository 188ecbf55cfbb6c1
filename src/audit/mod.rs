//! Audit trail
//!
//! Records security-relevant actions to the `security` log stream and to a
//! durable [`AuditStore`], and answers windowed queries over what was
//! recorded.
//!
//! Recording never fails. The log line is written first; if the durable
//! append fails the event survives in the log stream only and an
//! `audit_store_unavailable` security event is emitted.
//!
//! # Usage
//!
//! ```ignore
//! use eventguard::audit::{Actor, AuditTrail, InMemoryAuditStore, RequestContext};
//!
//! let trail = AuditTrail::new(Arc::new(InMemoryAuditStore::new()));
//! let ctx = RequestContext::from_headers(request.headers(), request.uri().path());
//!
//! trail.log_create(&Actor::user(user.id, &user.email), "event", event.id, Metadata::new(), &ctx);
//! let stats = trail.security_stats(24)?;
//! ```

mod context;
mod query;
mod record;
mod store;

pub use context::{extract_client_ip, Actor, RequestContext};
pub use query::{Aggregate, Dimension, GroupQuery, GroupRow};
pub use record::{AuditEvent, AuditRecord, Metadata};
pub use store::{AuditStore, InMemoryAuditStore, JsonlAuditStore};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::observability::SecurityEvent;

/// Counts of the headline authentication actions over a window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityStats {
    /// `auth.login_failed`
    pub failed_logins: u64,
    /// `auth.login_success`
    pub successful_logins: u64,
    /// `access_denied`
    pub access_denied: u64,
    /// `auth.password_reset_completed`
    pub password_resets: u64,
    /// `auth.mfa_enabled`
    pub mfa_enabled: u64,
}

/// Append-only audit log with windowed queries
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    /// Create a trail over a store, using the system clock
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a trail with an explicit clock
    pub fn with_clock(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record an event with the request's ip, user agent and the current
    /// time. Returns the record as written.
    pub fn record(&self, event: AuditEvent, ctx: &RequestContext) -> AuditRecord {
        let record = event.into_record(ctx, self.clock.now());

        info!(
            target: "security",
            action = %record.action,
            user_id = ?record.user_id,
            user_email = record.user_email.as_deref().unwrap_or("-"),
            resource_type = record.resource_type.as_deref().unwrap_or("-"),
            resource_id = record.resource_id.as_deref().unwrap_or("-"),
            ip_address = %record.ip_address,
            user_agent = %record.user_agent,
            metadata = %serde_json::Value::Object(record.metadata.clone()),
            "Audit: {}",
            record.action
        );

        if let Err(e) = self.store.append(&record) {
            crate::security_event!(
                SecurityEvent::AuditStoreUnavailable,
                action = %record.action,
                error = %e,
                "Failed to write audit record to store"
            );
        }

        record
    }

    /// Record an authentication event as `auth.<name>` against the account
    pub fn log_auth(
        &self,
        event: SecurityEvent,
        actor: &Actor,
        metadata: Metadata,
        ctx: &RequestContext,
    ) -> AuditRecord {
        let mut audit = AuditEvent::from(event).actor(actor).metadata(metadata);
        audit = match actor.id {
            Some(id) => audit.resource("user", id),
            None => audit.resource_type("user"),
        };
        self.record(audit, ctx)
    }

    /// Record creation of a resource
    pub fn log_create(
        &self,
        actor: &Actor,
        resource_type: &str,
        resource_id: impl ToString,
        metadata: Metadata,
        ctx: &RequestContext,
    ) -> AuditRecord {
        self.log_resource(SecurityEvent::ResourceCreated, actor, resource_type, resource_id, metadata, ctx)
    }

    /// Record modification of a resource
    pub fn log_update(
        &self,
        actor: &Actor,
        resource_type: &str,
        resource_id: impl ToString,
        metadata: Metadata,
        ctx: &RequestContext,
    ) -> AuditRecord {
        self.log_resource(SecurityEvent::ResourceUpdated, actor, resource_type, resource_id, metadata, ctx)
    }

    /// Record deletion of a resource
    pub fn log_delete(
        &self,
        actor: &Actor,
        resource_type: &str,
        resource_id: impl ToString,
        metadata: Metadata,
        ctx: &RequestContext,
    ) -> AuditRecord {
        self.log_resource(SecurityEvent::ResourceDeleted, actor, resource_type, resource_id, metadata, ctx)
    }

    /// Record a read of a sensitive resource
    pub fn log_view(
        &self,
        actor: &Actor,
        resource_type: &str,
        resource_id: impl ToString,
        ctx: &RequestContext,
    ) -> AuditRecord {
        self.log_resource(SecurityEvent::ResourceViewed, actor, resource_type, resource_id, Metadata::new(), ctx)
    }

    fn log_resource(
        &self,
        event: SecurityEvent,
        actor: &Actor,
        resource_type: &str,
        resource_id: impl ToString,
        metadata: Metadata,
        ctx: &RequestContext,
    ) -> AuditRecord {
        let audit = AuditEvent::from(event)
            .actor(actor)
            .resource(resource_type, resource_id)
            .metadata(metadata);
        self.record(audit, ctx)
    }

    /// Record a refused authorization, with the reason under `metadata.reason`
    pub fn log_access_denied(
        &self,
        actor: &Actor,
        resource_type: &str,
        resource_id: impl ToString,
        reason: Option<&str>,
        ctx: &RequestContext,
    ) -> AuditRecord {
        let audit = AuditEvent::from(SecurityEvent::AccessDenied)
            .actor(actor)
            .resource(resource_type, resource_id)
            .meta("reason", reason);
        self.record(audit, ctx)
    }

    /// Report a policy violation. Written to the log stream only, never to
    /// the durable store.
    pub fn log_security_violation(
        &self,
        violation: &str,
        actor: Option<&Actor>,
        metadata: Metadata,
        ctx: &RequestContext,
    ) {
        crate::security_event!(
            SecurityEvent::SecurityViolation,
            violation = violation,
            user_id = ?actor.and_then(|a| a.id),
            ip_address = %ctx.ip,
            user_agent = %ctx.user_agent,
            timestamp = %self.clock.now().to_rfc3339(),
            metadata = %serde_json::Value::Object(metadata),
            "Security Violation: {}",
            violation
        );
    }

    /// Records inside a look-back window
    pub fn window(&self, window: Duration) -> Result<Vec<AuditRecord>, StoreError> {
        self.store.since(window_start(self.clock.now(), window))
    }

    /// Grouped counts over the query's window
    pub fn query(&self, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError> {
        Ok(query.evaluate(&self.window(query.window)?))
    }

    /// Count of every action recorded in the last `hours` hours
    pub fn stats(&self, hours: u64) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        for record in self.window(hours_window(hours))? {
            *counts.entry(record.action).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Headline authentication counts for the last `hours` hours
    pub fn security_stats(&self, hours: u64) -> Result<SecurityStats, StoreError> {
        let counts = self.stats(hours)?;
        let count = |event: SecurityEvent| counts.get(&event.action()).copied().unwrap_or(0);

        Ok(SecurityStats {
            failed_logins: count(SecurityEvent::LoginFailed),
            successful_logins: count(SecurityEvent::LoginSuccess),
            access_denied: count(SecurityEvent::AccessDenied),
            password_resets: count(SecurityEvent::PasswordResetCompleted),
            mfa_enabled: count(SecurityEvent::MfaEnabled),
        })
    }
}

fn hours_window(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingAuditStore, ManualClock};

    fn trail() -> (AuditTrail, Arc<InMemoryAuditStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(ManualClock::default());
        (AuditTrail::with_clock(store.clone(), clock.clone()), store, clock)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("1.2.3.4", "test-agent")
    }

    #[test]
    fn test_record_fills_context() {
        let (trail, store, clock) = trail();
        let record = trail.record(AuditEvent::new("view").resource("event", 3), &ctx());

        assert_eq!(record.ip_address, "1.2.3.4");
        assert_eq!(record.user_agent, "test-agent");
        assert_eq!(record.created_at, clock.now());
        assert_eq!(store.records(), vec![record]);
    }

    #[test]
    fn test_record_survives_store_failure() {
        let trail = AuditTrail::new(Arc::new(FailingAuditStore));
        let record = trail.record(AuditEvent::new("create"), &ctx());
        assert_eq!(record.action, "create");
        assert!(trail.stats(24).is_err());
    }

    #[test]
    fn test_log_auth_namespaces_action() {
        let (trail, _, _) = trail();
        let record = trail.log_auth(
            SecurityEvent::MfaEnabled,
            &Actor::user(5, "a@example.com"),
            Metadata::new(),
            &ctx(),
        );
        assert_eq!(record.action, "auth.mfa_enabled");
        assert_eq!(record.resource_type.as_deref(), Some("user"));
        assert_eq!(record.resource_id.as_deref(), Some("5"));
    }

    #[test]
    fn test_log_view_records_resource() {
        let (trail, store, _) = trail();
        trail.log_view(&Actor::user(4, "d@example.com"), "helpdesk_message", 12, &ctx());
        let records = store.records();
        assert_eq!(records[0].action, "view");
        assert_eq!(records[0].resource_type.as_deref(), Some("helpdesk_message"));
        assert_eq!(records[0].resource_id.as_deref(), Some("12"));
        assert_eq!(records[0].user_id, Some(4));
    }

    #[test]
    fn test_access_denied_reason() {
        let (trail, _, _) = trail();
        let record = trail.log_access_denied(&Actor::with_id(2), "event", 9, Some("not owner"), &ctx());
        assert_eq!(record.action, "access_denied");
        assert_eq!(record.metadata["reason"], "not owner");
    }

    #[test]
    fn test_security_violation_is_not_persisted() {
        let (trail, store, _) = trail();
        trail.log_security_violation("csrf_mismatch", None, Metadata::new(), &ctx());
        assert!(store.is_empty());
    }

    #[test]
    fn test_stats_respect_window() {
        let (trail, _, clock) = trail();
        let actor = Actor::user(1, "a@example.com");
        trail.log_auth(SecurityEvent::LoginFailed, &Actor::anonymous(), Metadata::new(), &ctx());
        clock.advance(Duration::from_secs(25 * 3600));
        trail.log_auth(SecurityEvent::LoginFailed, &Actor::anonymous(), Metadata::new(), &ctx());
        trail.log_auth(SecurityEvent::LoginSuccess, &actor, Metadata::new(), &ctx());
        trail.log_create(&actor, "event", 1, Metadata::new(), &ctx());

        let stats = trail.stats(24).unwrap();
        assert_eq!(stats.get("auth.login_failed"), Some(&1));
        assert_eq!(stats.get("create"), Some(&1));

        let security = trail.security_stats(24).unwrap();
        assert_eq!(security.failed_logins, 1);
        assert_eq!(security.successful_logins, 1);
        assert_eq!(security.mfa_enabled, 0);

        assert_eq!(trail.security_stats(48).unwrap().failed_logins, 2);
    }

    #[test]
    fn test_query_uses_window() {
        let (trail, _, clock) = trail();
        for _ in 0..3 {
            trail.record(AuditEvent::new("access_denied"), &ctx());
        }
        let query = GroupQuery::group_by(&[Dimension::Ip]).action("access_denied").min(3);
        assert_eq!(trail.query(&query).unwrap().len(), 1);

        clock.advance(Duration::from_secs(2 * 3600));
        assert!(trail.query(&query).unwrap().is_empty());
    }
}
