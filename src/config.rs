//! Security configuration
//!
//! Provides a builder-pattern configuration for the security services.

use std::fmt;
use std::time::Duration;

use crate::encryption::{DecodePolicy, FieldCipher};
use crate::mfa::Totp;
use crate::parse::parse_duration;
use crate::login::StepUpPolicy;
use crate::rate_limit::ThrottlePolicy;

/// Security configuration for field encryption, auth throttling, MFA and
/// threat detection.
///
/// # Example
///
/// ```ignore
/// use eventguard::SecurityConfig;
///
/// // Load from environment variables
/// let config = SecurityConfig::from_env();
///
/// // Or build programmatically
/// let config = SecurityConfig::builder()
///     .field_key("0123456789abcdef0123456789abcdef")
///     .throttle(10, Duration::from_secs(60))
///     .mfa_issuer("Event Manager")
///     .build();
/// ```
#[derive(Clone)]
pub struct SecurityConfig {
    /// Dedicated field encryption key
    pub field_key: Option<String>,

    /// Application key, used when no field key is set
    pub app_key: Option<String>,

    /// Behavior on a field that fails to decrypt
    pub decode_policy: DecodePolicy,

    /// Attempts per throttle key per window
    pub throttle_max_attempts: u64,

    /// Throttle window
    pub throttle_window: Duration,

    /// Issuer shown in authenticator apps
    pub mfa_issuer: String,

    /// TOTP steps accepted either side of now
    pub mfa_window_steps: u64,

    /// Lifetime of a step-up ticket issued after the password check
    pub mfa_ticket_ttl: Duration,

    /// External QR renderer; no QR URL is produced when unset
    pub qr_render_url: Option<String>,

    /// Look-back window for threat detection rules
    pub alert_window: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            field_key: None,
            app_key: None,
            decode_policy: DecodePolicy::Passthrough,
            throttle_max_attempts: 5,
            throttle_window: Duration::from_secs(15 * 60),
            mfa_issuer: "Event Manager".to_string(),
            mfa_window_steps: 2,
            mfa_ticket_ttl: Duration::from_secs(5 * 60),
            qr_render_url: None,
            alert_window: Duration::from_secs(60 * 60),
        }
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("SecurityConfig")
            .field("field_key", &redact(&self.field_key))
            .field("app_key", &redact(&self.app_key))
            .field("decode_policy", &self.decode_policy)
            .field("throttle_max_attempts", &self.throttle_max_attempts)
            .field("throttle_window", &self.throttle_window)
            .field("mfa_issuer", &self.mfa_issuer)
            .field("mfa_window_steps", &self.mfa_window_steps)
            .field("mfa_ticket_ttl", &self.mfa_ticket_ttl)
            .field("qr_render_url", &self.qr_render_url)
            .field("alert_window", &self.alert_window)
            .finish()
    }
}

impl SecurityConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DB_FIELD_ENCRYPTION_KEY`: field encryption key (falls back to `APP_KEY`)
    /// - `APP_KEY`: application key, optionally `base64:`-prefixed
    /// - `FIELD_DECRYPT_POLICY`: "passthrough" or "strict" (default: "passthrough")
    /// - `AUTH_THROTTLE_MAX_ATTEMPTS`: attempts per window (default: 5)
    /// - `AUTH_THROTTLE_WINDOW`: e.g., "15m", "900s" (default: "15m")
    /// - `MFA_ISSUER`: authenticator app label (default: "Event Manager")
    /// - `MFA_WINDOW_STEPS`: TOTP steps either side of now (default: 2)
    /// - `MFA_TICKET_TTL`: step-up ticket lifetime, e.g., "5m" (default: "5m")
    /// - `QR_RENDER_URL`: external QR endpoint (default: unset)
    /// - `SECURITY_ALERT_WINDOW`: e.g., "1h" (default: "1h")
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let decode_policy = var("FIELD_DECRYPT_POLICY")
            .and_then(|s| DecodePolicy::from_name(&s))
            .unwrap_or(defaults.decode_policy);

        let throttle_max_attempts = var("AUTH_THROTTLE_MAX_ATTEMPTS")
            .and_then(|s| s.trim().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.throttle_max_attempts);

        let throttle_window = var("AUTH_THROTTLE_WINDOW")
            .and_then(|s| parse_duration(&s))
            .unwrap_or(defaults.throttle_window);

        let mfa_issuer = var("MFA_ISSUER").unwrap_or(defaults.mfa_issuer);

        let mfa_window_steps = var("MFA_WINDOW_STEPS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.mfa_window_steps);

        let mfa_ticket_ttl = var("MFA_TICKET_TTL")
            .and_then(|s| parse_duration(&s))
            .unwrap_or(defaults.mfa_ticket_ttl);

        let alert_window = var("SECURITY_ALERT_WINDOW")
            .and_then(|s| parse_duration(&s))
            .unwrap_or(defaults.alert_window);

        Self {
            field_key: var("DB_FIELD_ENCRYPTION_KEY"),
            app_key: var("APP_KEY"),
            decode_policy,
            throttle_max_attempts,
            throttle_window,
            mfa_issuer,
            mfa_window_steps,
            mfa_ticket_ttl,
            qr_render_url: var("QR_RENDER_URL"),
            alert_window,
        }
    }

    /// Create a new builder for programmatic configuration.
    pub fn builder() -> SecurityConfigBuilder {
        SecurityConfigBuilder::default()
    }

    /// Field cipher for the configured key material
    pub fn cipher(&self) -> FieldCipher {
        FieldCipher::from_key_sources(self.field_key.as_deref(), self.app_key.as_deref())
    }

    /// Auth gate policy
    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            max_attempts: self.throttle_max_attempts,
            window: self.throttle_window,
        }
    }

    /// MFA step-up policy. Code attempts share the auth gate's budget.
    pub fn step_up_policy(&self) -> StepUpPolicy {
        StepUpPolicy {
            ticket_ttl: self.mfa_ticket_ttl,
            max_attempts: self.throttle_max_attempts,
            window: self.throttle_window,
        }
    }

    /// TOTP parameters. The window is capped at [`MAX_WINDOW`](crate::mfa::MAX_WINDOW) steps.
    pub fn totp(&self) -> Totp {
        Totp::with_window(self.mfa_window_steps)
    }
}

/// Builder for SecurityConfig
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    config: SecurityConfig,
}

impl SecurityConfigBuilder {
    /// Set the field encryption key.
    pub fn field_key(mut self, key: impl Into<String>) -> Self {
        self.config.field_key = Some(key.into());
        self
    }

    /// Set the application key fallback.
    pub fn app_key(mut self, key: impl Into<String>) -> Self {
        self.config.app_key = Some(key.into());
        self
    }

    /// Set the decrypt-failure policy.
    pub fn decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.config.decode_policy = policy;
        self
    }

    /// Set auth throttling parameters.
    pub fn throttle(mut self, max_attempts: u64, window: Duration) -> Self {
        self.config.throttle_max_attempts = max_attempts;
        self.config.throttle_window = window;
        self
    }

    /// Set the authenticator app issuer.
    pub fn mfa_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.mfa_issuer = issuer.into();
        self
    }

    /// Set the TOTP acceptance window in steps.
    pub fn mfa_window_steps(mut self, steps: u64) -> Self {
        self.config.mfa_window_steps = steps;
        self
    }

    /// Set the step-up ticket lifetime.
    pub fn mfa_ticket_ttl(mut self, ttl: Duration) -> Self {
        self.config.mfa_ticket_ttl = ttl;
        self
    }

    /// Produce QR image URLs through an external renderer.
    pub fn qr_render_url(mut self, url: impl Into<String>) -> Self {
        self.config.qr_render_url = Some(url.into());
        self
    }

    /// Set the threat detection look-back window.
    pub fn alert_window(mut self, window: Duration) -> Self {
        self.config.alert_window = window;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SecurityConfig {
        self.config
    }
}
