//! Audit events and the persisted audit row

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{Actor, RequestContext};
use crate::observability::SecurityEvent;

/// Free-form structured metadata attached to an audit record
pub type Metadata = serde_json::Map<String, Value>;

/// An auditable action, before request context and timestamp are added.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub(crate) action: String,
    pub(crate) actor: Actor,
    pub(crate) resource_type: Option<String>,
    pub(crate) resource_id: Option<String>,
    pub(crate) metadata: Metadata,
}

impl AuditEvent {
    /// Create an event for an arbitrary action name
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            actor: Actor::anonymous(),
            resource_type: None,
            resource_id: None,
            metadata: Metadata::new(),
        }
    }

    /// Attribute the event to an account
    pub fn actor(mut self, actor: &Actor) -> Self {
        self.actor = actor.clone();
        self
    }

    /// Name the affected resource
    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl ToString) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    /// Name the affected resource type without an id
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Add one metadata entry
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a metadata map
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Action name
    pub fn action(&self) -> &str {
        &self.action
    }

    pub(crate) fn into_record(self, ctx: &RequestContext, at: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            action: self.action,
            user_id: self.actor.id,
            user_email: self.actor.email,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            ip_address: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            metadata: self.metadata,
            created_at: at,
        }
    }
}

impl From<SecurityEvent> for AuditEvent {
    fn from(event: SecurityEvent) -> Self {
        Self::new(event.action())
    }
}

/// A persisted audit row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Action name (`auth.login_failed`, `access_denied`, `create`, ...)
    pub action: String,
    /// Acting account id
    pub user_id: Option<i64>,
    /// Acting account email
    pub user_email: Option<String>,
    /// Affected resource type
    pub resource_type: Option<String>,
    /// Affected resource id
    pub resource_id: Option<String>,
    /// Client IP
    pub ip_address: String,
    /// Client user agent
    pub user_agent: String,
    /// Structured extra context
    #[serde(default)]
    pub metadata: Metadata,
    /// When the event was recorded
    pub created_at: DateTime<Utc>,
}
