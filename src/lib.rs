//! # eventguard
//!
//! Security substrate for an event-management backend built on Axum.
//!
//! ## Features
//!
//! - **Field Encryption**: AES-256-GCM envelopes for designated entity
//!   attributes, applied at an explicit load/save boundary
//! - **Audit Trail**: append-only security log with windowed queries and
//!   headline statistics
//! - **Threat Detection**: grouped-threshold rules over the audit trail,
//!   routed to log channels by severity
//! - **Auth Throttling**: per ip/identity/route attempt counting with a
//!   `429` gate for login and MFA endpoints
//! - **TOTP MFA**: RFC 6238 secret lifecycle and password login step-up
//! - **Structured Logging**: `tracing` with pretty, JSON or compact output
//!
//! ## Quick Start
//!
//! ```ignore
//! use eventguard::integration::SecurityServices;
//! use eventguard::observability::{init, ObservabilityConfig};
//! use eventguard::SecurityConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init(&ObservabilityConfig::from_env())?;
//!
//!     let services = SecurityServices::builder(SecurityConfig::from_env(), Arc::new(MyVerifier))
//!         .audit_store(Arc::new(JsonlAuditStore::new("storage/audit.jsonl")))
//!         .build();
//!
//!     let alerts = services.detector.check_security_alerts();
//!     services.detector.send_alerts(&alerts);
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod audit;
mod clock;
mod config;
mod crypto;
pub mod detection;
pub mod encryption;
pub mod error;
pub mod integration;
pub mod login;
pub mod mfa;
pub mod observability;
mod parse;
pub mod rate_limit;
pub mod testing;

// Re-exports
pub use accounts::{Account, AccountRepository};
pub use audit::{Actor, AuditEvent, AuditRecord, AuditTrail, RequestContext, SecurityStats};
pub use clock::{Clock, SystemClock};
pub use config::{SecurityConfig, SecurityConfigBuilder};
pub use crypto::{constant_time_eq, constant_time_str_eq};
pub use detection::{AlertSeverity, SecurityAlert, ThreatDetector};
pub use encryption::{DecodePolicy, FieldCipher, FieldCodec};
pub use error::{CipherError, CodecError, LoginError, MfaError, StoreError};
pub use login::{LoginOutcome, LoginService, StepUpTicket};
pub use mfa::{MfaAuthenticator, MfaState, Totp};
pub use observability::{ObservabilityConfig, ObservabilityConfigBuilder, SecurityEvent};
pub use parse::parse_duration;
pub use rate_limit::{AuthThrottle, GateDecision, RateLimiter, ThrottlePolicy};
