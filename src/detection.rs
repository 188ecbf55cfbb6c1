//! Threat detection over the audit trail
//!
//! Detection rules are data: each [`AlertRule`] is a grouped-threshold
//! [`GroupQuery`] plus the alert it raises. One evaluator runs every rule,
//! so a new rule never needs a change to the evaluation loop.
//!
//! # Built-in rules
//!
//! | Alert type | Grouping | Filter | Threshold | Severity |
//! |------------|----------|--------|-----------|----------|
//! | `multiple_failed_logins` | ip | `auth.login_failed` | 5 attempts | high |
//! | `unusual_access` | user id + email | any action by an account | 3 distinct IPs | medium |
//! | `access_denied_patterns` | user id + ip | `access_denied` | 3 attempts | medium |
//!
//! # Usage
//!
//! ```ignore
//! use eventguard::detection::ThreatDetector;
//!
//! let detector = ThreatDetector::new(trail.clone());
//! detector.register_handler(|alert| pager.notify(alert));
//!
//! let alerts = detector.check_security_alerts();
//! detector.send_alerts(&alerts);
//! ```

use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, warn};

use crate::audit::{Aggregate, AuditTrail, Dimension, GroupQuery, GroupRow};
use crate::observability::SecurityEvent;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Investigate when convenient
    Low,
    /// Investigate soon
    Medium,
    /// Likely attack in progress
    High,
}

impl AlertSeverity {
    /// Log channel an alert of this severity is routed to
    pub fn channel(&self) -> AlertChannel {
        match self {
            Self::High => AlertChannel::Critical,
            Self::Medium | Self::Low => AlertChannel::Warning,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Destination channel for delivered alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertChannel {
    /// Logged at error level
    Critical,
    /// Logged at warn level
    Warning,
}

/// A detection rule
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    /// Alert type raised when the rule fires
    pub alert_type: String,
    /// Severity of the raised alert
    pub severity: AlertSeverity,
    /// Human-readable alert message
    pub message: String,
    /// Grouped-threshold query evaluated against the audit trail
    pub query: GroupQuery,
}

impl AlertRule {
    /// Create a rule
    pub fn new(
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
        query: GroupQuery,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity,
            message: message.into(),
            query,
        }
    }
}

/// The three built-in rules, each looking back over `window`
pub fn builtin_rules(window: Duration) -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "multiple_failed_logins",
            AlertSeverity::High,
            "Multiple failed login attempts detected",
            GroupQuery::group_by(&[Dimension::Ip])
                .action(SecurityEvent::LoginFailed.action())
                .min(5)
                .window(window),
        ),
        AlertRule::new(
            "unusual_access",
            AlertSeverity::Medium,
            "Unusual access patterns detected",
            GroupQuery::group_by(&[Dimension::UserId, Dimension::UserEmail])
                .require_actor()
                .aggregate(Aggregate::DistinctIps)
                .min(3)
                .window(window),
        ),
        AlertRule::new(
            "access_denied_patterns",
            AlertSeverity::Medium,
            "Multiple access denied attempts detected",
            GroupQuery::group_by(&[Dimension::UserId, Dimension::Ip])
                .action(SecurityEvent::AccessDenied.action())
                .min(3)
                .window(window),
        ),
    ]
}

/// An alert raised by a rule, with the groups that crossed its threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityAlert {
    /// Alert type (rule name)
    #[serde(rename = "type")]
    pub alert_type: String,
    /// Severity
    pub severity: AlertSeverity,
    /// Message
    pub message: String,
    /// Crossing groups
    #[serde(rename = "data")]
    pub evidence: Vec<GroupRow>,
}

impl SecurityAlert {
    /// Sum of the aggregate over every evidence row
    pub fn evidence_total(&self) -> u64 {
        self.evidence.iter().map(|row| row.value).sum()
    }
}

/// Alert handler function type
pub type AlertHandler = Box<dyn Fn(&SecurityAlert) + Send + Sync>;

/// Evaluates detection rules and delivers alerts
pub struct ThreatDetector {
    trail: AuditTrail,
    rules: Vec<AlertRule>,
    handlers: RwLock<Vec<AlertHandler>>,
}

impl ThreatDetector {
    /// Detector with the built-in rules over a one hour window
    pub fn new(trail: AuditTrail) -> Self {
        Self::with_rules(trail, builtin_rules(Duration::from_secs(3600)))
    }

    /// Detector with an explicit rule set
    pub fn with_rules(trail: AuditTrail, rules: Vec<AlertRule>) -> Self {
        Self {
            trail,
            rules,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Add a rule
    pub fn add_rule(mut self, rule: AlertRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Active rules
    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Register a handler called for every delivered alert
    pub fn register_handler<F>(&self, handler: F)
    where
        F: Fn(&SecurityAlert) + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(handler));
    }

    /// Evaluate every rule. One alert per rule that has at least one group
    /// over its threshold.
    ///
    /// A rule whose query fails (audit store unreachable) is skipped with a
    /// warning.
    pub fn check_security_alerts(&self) -> Vec<SecurityAlert> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let evidence = match self.trail.query(&rule.query) {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(alert_type = %rule.alert_type, error = %e, "Detection rule skipped");
                        return None;
                    }
                };

                (!evidence.is_empty()).then(|| SecurityAlert {
                    alert_type: rule.alert_type.clone(),
                    severity: rule.severity,
                    message: rule.message.clone(),
                    evidence,
                })
            })
            .collect()
    }

    /// Log each alert to the channel for its severity and notify handlers
    pub fn send_alerts(&self, alerts: &[SecurityAlert]) {
        let handlers = self.handlers.read();
        for alert in alerts {
            log_alert(alert);
            for handler in handlers.iter() {
                handler(alert);
            }
        }
    }
}

fn log_alert(alert: &SecurityAlert) {
    let evidence = serde_json::to_string(&alert.evidence).unwrap_or_default();
    let event = SecurityEvent::SecurityAlertRaised;

    match alert.severity.channel() {
        AlertChannel::Critical => {
            error!(
                target: "security",
                security_event = event.name(),
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                evidence = %evidence,
                "SECURITY ALERT: {}",
                alert.message
            );
        }
        AlertChannel::Warning => {
            warn!(
                target: "security",
                security_event = event.name(),
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                evidence = %evidence,
                "SECURITY ALERT: {}",
                alert.message
            );
        }
    }
}
