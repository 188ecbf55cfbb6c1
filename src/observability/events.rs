//! Security Event Logging
//!
//! Every security-relevant event has a fixed audit action name, a category
//! and a severity. The action name is what the audit trail persists and
//! what detection rules filter on.
//!
//! # Usage
//!
//! ```ignore
//! use eventguard::observability::SecurityEvent;
//! use eventguard::security_event;
//!
//! security_event!(
//!     SecurityEvent::LoginFailed,
//!     ip_address = %client_ip,
//!     "Authentication failed"
//! );
//! ```

use std::fmt;

/// Security events recognized by the audit trail and the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEvent {
    // Authentication events
    /// Password accepted and credential issued
    LoginSuccess,
    /// Unknown account or wrong password
    LoginFailed,
    /// Password accepted, one-time code still required
    LoginMfaRequired,
    /// Credential revoked by the user
    Logout,
    /// Throttled endpoint answered 401
    FailedAttempt,

    // MFA lifecycle
    /// Secret generated or reused, awaiting confirmation
    MfaSetupStarted,
    /// Setup confirmed with a valid code
    MfaEnabled,
    /// MFA turned off and secret cleared
    MfaDisabled,
    /// Login code accepted
    MfaVerificationSuccess,
    /// Login code rejected
    MfaVerificationFailed,

    // Password reset
    /// Password replaced through a reset
    PasswordResetCompleted,

    // Resource events
    /// Resource created
    ResourceCreated,
    /// Resource updated
    ResourceUpdated,
    /// Resource deleted
    ResourceDeleted,
    /// Resource read
    ResourceViewed,

    // Authorization events
    /// Access denied to resource
    AccessDenied,

    // Security events
    /// Throttle gate rejected the request
    RateLimitExceeded,
    /// Policy violation reported by the host application
    SecurityViolation,
    /// Threat detector raised an alert
    SecurityAlertRaised,

    // Degradation
    /// Durable audit write failed, event kept in the log stream only
    AuditStoreUnavailable,
    /// A field was stored or returned in plaintext because the cipher failed
    FieldEncryptionDegraded,
    /// Encryption key shorter than 32 bytes
    WeakEncryptionKey,
}

impl SecurityEvent {
    /// Every event, in declaration order
    pub const ALL: [SecurityEvent; 22] = [
        Self::LoginSuccess,
        Self::LoginFailed,
        Self::LoginMfaRequired,
        Self::Logout,
        Self::FailedAttempt,
        Self::MfaSetupStarted,
        Self::MfaEnabled,
        Self::MfaDisabled,
        Self::MfaVerificationSuccess,
        Self::MfaVerificationFailed,
        Self::PasswordResetCompleted,
        Self::ResourceCreated,
        Self::ResourceUpdated,
        Self::ResourceDeleted,
        Self::ResourceViewed,
        Self::AccessDenied,
        Self::RateLimitExceeded,
        Self::SecurityViolation,
        Self::SecurityAlertRaised,
        Self::AuditStoreUnavailable,
        Self::FieldEncryptionDegraded,
        Self::WeakEncryptionKey,
    ];

    /// Get the event category for filtering/grouping
    pub fn category(&self) -> &'static str {
        match self {
            Self::LoginSuccess
            | Self::LoginFailed
            | Self::LoginMfaRequired
            | Self::Logout
            | Self::FailedAttempt
            | Self::MfaSetupStarted
            | Self::MfaEnabled
            | Self::MfaDisabled
            | Self::MfaVerificationSuccess
            | Self::MfaVerificationFailed
            | Self::PasswordResetCompleted => "authentication",

            Self::AccessDenied => "authorization",

            Self::ResourceCreated
            | Self::ResourceUpdated
            | Self::ResourceDeleted
            | Self::ResourceViewed => "resource",

            Self::RateLimitExceeded
            | Self::SecurityViolation
            | Self::SecurityAlertRaised => "security",

            Self::AuditStoreUnavailable
            | Self::FieldEncryptionDegraded
            | Self::WeakEncryptionKey => "system",
        }
    }

    /// Get the severity level for the event
    pub fn severity(&self) -> Severity {
        match self {
            // Critical - immediate attention required
            Self::SecurityViolation | Self::SecurityAlertRaised => Severity::Critical,

            // High - security-relevant failures
            Self::LoginFailed
            | Self::FailedAttempt
            | Self::MfaVerificationFailed
            | Self::AccessDenied
            | Self::RateLimitExceeded
            | Self::AuditStoreUnavailable
            | Self::FieldEncryptionDegraded
            | Self::WeakEncryptionKey => Severity::High,

            // Medium - important state changes
            Self::LoginSuccess
            | Self::MfaEnabled
            | Self::MfaDisabled
            | Self::PasswordResetCompleted
            | Self::ResourceDeleted => Severity::Medium,

            // Low - routine operations
            Self::LoginMfaRequired
            | Self::Logout
            | Self::MfaSetupStarted
            | Self::MfaVerificationSuccess
            | Self::ResourceCreated
            | Self::ResourceUpdated
            | Self::ResourceViewed => Severity::Low,
        }
    }

    /// Get the event name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::LoginMfaRequired => "login_mfa_required",
            Self::Logout => "logout",
            Self::FailedAttempt => "failed_attempt",
            Self::MfaSetupStarted => "mfa_setup_started",
            Self::MfaEnabled => "mfa_enabled",
            Self::MfaDisabled => "mfa_disabled",
            Self::MfaVerificationSuccess => "mfa_verification_success",
            Self::MfaVerificationFailed => "mfa_verification_failed",
            Self::PasswordResetCompleted => "password_reset_completed",
            Self::ResourceCreated => "create",
            Self::ResourceUpdated => "update",
            Self::ResourceDeleted => "delete",
            Self::ResourceViewed => "view",
            Self::AccessDenied => "access_denied",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::SecurityViolation => "security_violation",
            Self::SecurityAlertRaised => "security_alert",
            Self::AuditStoreUnavailable => "audit_store_unavailable",
            Self::FieldEncryptionDegraded => "field_encryption_degraded",
            Self::WeakEncryptionKey => "weak_encryption_key",
        }
    }

    /// The action string persisted in the audit trail.
    ///
    /// Authentication events are namespaced under `auth.`; everything else
    /// uses the bare name.
    pub fn action(&self) -> String {
        if self.category() == "authentication" {
            format!("auth.{}", self.name())
        } else {
            self.name().to_string()
        }
    }

    /// Reverse lookup from a persisted action string
    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.action() == action)
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine operations
    Low,
    /// Important state changes
    Medium,
    /// Security-relevant failures
    High,
    /// Immediate attention required
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Log a security event with structured fields.
///
/// Emits under the `security` target at the level implied by the event's
/// severity, and always includes:
/// - `security_event`: Event type name
/// - `category`: Event category
/// - `severity`: Event severity level
///
/// # Examples
///
/// ```ignore
/// security_event!(
///     SecurityEvent::RateLimitExceeded,
///     ip_address = %client_ip,
///     endpoint = "/api/login",
///     "Rate limit exceeded"
/// );
/// ```
#[macro_export]
macro_rules! security_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let severity = event.severity();
        let category = event.category();
        let event_name = event.name();

        match severity {
            $crate::observability::Severity::Critical => {
                ::tracing::error!(
                    target: "security",
                    security_event = event_name,
                    category = category,
                    severity = "critical",
                    $($field)*
                );
            }
            $crate::observability::Severity::High => {
                ::tracing::warn!(
                    target: "security",
                    security_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::observability::Severity::Medium => {
                ::tracing::info!(
                    target: "security",
                    security_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::observability::Severity::Low => {
                ::tracing::debug!(
                    target: "security",
                    security_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

pub use security_event;
