//! TOTP Multi-Factor Authentication
//!
//! Time-based one-time codes per RFC 6238 (HMAC-SHA1, 30 second step,
//! 6 digits) and the per-account secret lifecycle:
//!
//! ```text
//! NoMfa --begin_setup--> SetupPending --confirm_setup--> Enabled --disable--> NoMfa
//! ```
//!
//! `Enabled` is only reachable by confirming a pending setup with a valid
//! code. Repeating `begin_setup` before confirmation reuses the pending
//! secret so an authenticator app scanned earlier keeps working.
//!
//! # Usage
//!
//! ```ignore
//! use eventguard::mfa::MfaAuthenticator;
//!
//! let setup = mfa.begin_setup(&mut account, &ctx)?;
//! render_qr(setup.provisioning_uri.as_str());
//!
//! mfa.confirm_setup(&mut account, "123456", &ctx)?;
//! assert!(mfa.verify_login(&account, "654321")?);
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use url::form_urlencoded;

use crate::accounts::{Account, AccountRepository};
use crate::audit::{Actor, AuditTrail, Metadata, RequestContext};
use crate::clock::{Clock, SystemClock};
use crate::crypto::{constant_time_str_eq, random_bytes};
use crate::error::MfaError;
use crate::observability::SecurityEvent;

type HmacSha1 = Hmac<Sha1>;

/// Secret length in bytes (160 bits)
const SECRET_BYTES: usize = 20;

// ============================================================================
// TOTP
// ============================================================================

/// Shortest accepted code length
pub const MIN_DIGITS: u32 = 6;

/// Longest accepted code length
pub const MAX_DIGITS: u32 = 8;

/// Widest acceptance window, in steps either side of now
pub const MAX_WINDOW: u64 = 10;

/// RFC 6238 code generator and verifier.
///
/// Parameters are clamped on construction: 6 to 8 digits, at most
/// [`MAX_WINDOW`] steps either side, and a step of at least one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totp {
    step_secs: u64,
    digits: u32,
    window: u64,
}

impl Default for Totp {
    fn default() -> Self {
        Self {
            step_secs: 30,
            digits: 6,
            window: 2,
        }
    }
}

impl Totp {
    /// Custom parameters, clamped to the supported ranges
    pub fn new(step_secs: u64, digits: u32, window: u64) -> Self {
        Self {
            step_secs: step_secs.max(1),
            digits: digits.clamp(MIN_DIGITS, MAX_DIGITS),
            window: window.min(MAX_WINDOW),
        }
    }

    /// Default parameters with a custom acceptance window
    pub fn with_window(window: u64) -> Self {
        let defaults = Self::default();
        Self::new(defaults.step_secs, defaults.digits, window)
    }

    /// Step length in seconds
    pub fn step_secs(&self) -> u64 {
        self.step_secs
    }

    /// Code length
    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// Steps accepted either side of the current one
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Generate a fresh base32 secret
    pub fn generate_secret() -> String {
        BASE32_NOPAD.encode(&random_bytes::<SECRET_BYTES>())
    }

    /// Decode a base32 secret, tolerating lowercase, spaces and padding
    pub fn decode_secret(secret: &str) -> Result<Vec<u8>, MfaError> {
        let cleaned: String = secret
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if cleaned.is_empty() {
            return Err(MfaError::MalformedSecret);
        }
        BASE32_NOPAD
            .decode(cleaned.as_bytes())
            .map_err(|_| MfaError::MalformedSecret)
    }

    fn counter_at(&self, at: DateTime<Utc>) -> u64 {
        u64::try_from(at.timestamp()).unwrap_or(0) / self.step_secs
    }

    fn hotp(&self, key: &[u8], counter: u64) -> Result<String, MfaError> {
        let mut mac = HmacSha1::new_from_slice(key).map_err(|_| MfaError::MalformedSecret)?;
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let offset = usize::from(digest[digest.len() - 1] & 0x0f);
        let binary = u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]);
        let code = binary % 10u32.pow(self.digits);

        Ok(format!("{:0width$}", code, width = self.digits as usize))
    }

    /// Code for a secret at a point in time
    pub fn code_at(&self, secret: &str, at: DateTime<Utc>) -> Result<String, MfaError> {
        let key = Self::decode_secret(secret)?;
        self.hotp(&key, self.counter_at(at))
    }

    /// Whether `code` matches any step within the window around `at`.
    ///
    /// Codes are compared in constant time.
    pub fn verify(&self, secret: &str, code: &str, at: DateTime<Utc>) -> Result<bool, MfaError> {
        let key = Self::decode_secret(secret)?;
        let code = code.trim();
        if code.len() != self.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }

        let current = self.counter_at(at);
        let first = current.saturating_sub(self.window);
        let last = current.saturating_add(self.window);

        let mut matched = false;
        for counter in first..=last {
            matched |= constant_time_str_eq(&self.hotp(&key, counter)?, code);
        }
        Ok(matched)
    }
}

// ============================================================================
// Provisioning
// ============================================================================

/// `otpauth://totp/Issuer:label?secret=...&issuer=...`
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningUri(String);

fn raw_url_encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

impl ProvisioningUri {
    /// Build the URI an authenticator app scans
    pub fn new(issuer: &str, label: &str, secret: &str) -> Self {
        Self(format!(
            "otpauth://totp/{}?secret={}&issuer={}",
            raw_url_encode(&format!("{}:{}", issuer, label)),
            secret,
            raw_url_encode(issuer)
        ))
    }

    /// The URI
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL of an external QR renderer for this URI
    pub fn qr_url(&self, render_base: &str) -> String {
        let separator = if render_base.contains('?') { '&' } else { '?' };
        format!(
            "{}{}size=200x200&data={}",
            render_base,
            separator,
            form_urlencoded::byte_serialize(self.0.as_bytes()).collect::<String>()
        )
    }
}

impl fmt::Debug for ProvisioningUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProvisioningUri([REDACTED])")
    }
}

impl fmt::Display for ProvisioningUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returned by [`MfaAuthenticator::begin_setup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaSetup {
    /// Base32 secret for manual entry
    pub secret: String,
    /// URI for the authenticator app
    pub provisioning_uri: ProvisioningUri,
    /// QR image URL, when a renderer is configured
    pub qr_code_url: Option<String>,
}

// ============================================================================
// Credential state
// ============================================================================

/// MFA lifecycle state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaState {
    /// No secret on file
    NoMfa,
    /// Secret generated, awaiting a confirming code
    SetupPending,
    /// Step-up required at login
    Enabled,
}

/// The MFA fields of an account
#[derive(Clone, PartialEq, Eq)]
pub struct MfaCredential {
    /// Owning account id
    pub owner_id: Option<i64>,
    /// Base32 secret (plaintext in memory, encrypted at rest)
    pub secret: Option<String>,
    /// Whether MFA is enabled
    pub enabled: bool,
}

impl MfaCredential {
    /// Credential view of an account
    pub fn of(account: &Account) -> Self {
        Self {
            owner_id: account.id,
            secret: account.mfa_secret.clone(),
            enabled: account.mfa_enabled,
        }
    }

    /// Lifecycle state
    pub fn state(&self) -> MfaState {
        match (&self.secret, self.enabled) {
            (Some(_), true) => MfaState::Enabled,
            (Some(_), false) => MfaState::SetupPending,
            (None, _) => MfaState::NoMfa,
        }
    }
}

impl fmt::Debug for MfaCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaCredential")
            .field("owner_id", &self.owner_id)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ============================================================================
// Authenticator
// ============================================================================

/// Drives the MFA lifecycle and verifies login codes
#[derive(Clone)]
pub struct MfaAuthenticator {
    accounts: AccountRepository,
    trail: AuditTrail,
    clock: Arc<dyn Clock>,
    totp: Totp,
    issuer: String,
    qr_render_url: Option<String>,
}

impl MfaAuthenticator {
    /// Create an authenticator with the default TOTP parameters
    pub fn new(accounts: AccountRepository, trail: AuditTrail, issuer: impl Into<String>) -> Self {
        Self {
            accounts,
            trail,
            clock: Arc::new(SystemClock),
            totp: Totp::default(),
            issuer: issuer.into(),
            qr_render_url: None,
        }
    }

    /// Use an explicit clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override TOTP parameters
    pub fn with_totp(mut self, totp: Totp) -> Self {
        self.totp = totp;
        self
    }

    /// Produce QR image URLs through an external renderer
    pub fn with_qr_render_url(mut self, url: impl Into<String>) -> Self {
        self.qr_render_url = Some(url.into());
        self
    }

    /// Current state of an account
    pub fn state(&self, account: &Account) -> MfaState {
        MfaCredential::of(account).state()
    }

    /// Start (or resume) setup. Generates and stores a secret if the
    /// account has none; otherwise reuses the pending one. MFA stays off
    /// until [`confirm_setup`](Self::confirm_setup).
    pub fn begin_setup(&self, account: &mut Account, ctx: &RequestContext) -> Result<MfaSetup, MfaError> {
        let secret = match self.state(account) {
            MfaState::Enabled => return Err(MfaError::AlreadyEnabled),
            MfaState::SetupPending => account.mfa_secret.clone().unwrap_or_default(),
            MfaState::NoMfa => {
                let secret = Totp::generate_secret();
                account.mfa_secret = Some(secret.clone());
                account.mfa_enabled = false;
                self.accounts.save(account)?;
                secret
            }
        };

        self.trail.log_auth(
            SecurityEvent::MfaSetupStarted,
            &actor(account),
            Metadata::new(),
            ctx,
        );

        let provisioning_uri = ProvisioningUri::new(&self.issuer, &account.email, &secret);
        let qr_code_url = self
            .qr_render_url
            .as_deref()
            .map(|base| provisioning_uri.qr_url(base));

        Ok(MfaSetup {
            secret,
            provisioning_uri,
            qr_code_url,
        })
    }

    /// Enable MFA after checking a code against the pending secret
    pub fn confirm_setup(
        &self,
        account: &mut Account,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<(), MfaError> {
        let secret = match self.state(account) {
            MfaState::NoMfa => return Err(MfaError::NotConfigured),
            MfaState::Enabled => return Err(MfaError::AlreadyEnabled),
            MfaState::SetupPending => account.mfa_secret.clone().unwrap_or_default(),
        };

        if !self.totp.verify(&secret, code, self.clock.now())? {
            return Err(MfaError::VerificationFailed);
        }

        account.mfa_enabled = true;
        self.accounts.save(account)?;
        self.trail
            .log_auth(SecurityEvent::MfaEnabled, &actor(account), Metadata::new(), ctx);
        Ok(())
    }

    /// Turn MFA off after checking a code; the secret is cleared
    pub fn disable(&self, account: &mut Account, code: &str, ctx: &RequestContext) -> Result<(), MfaError> {
        let secret = account.mfa_secret.clone().ok_or(MfaError::NotConfigured)?;

        if !self.totp.verify(&secret, code, self.clock.now())? {
            return Err(MfaError::VerificationFailed);
        }

        account.mfa_enabled = false;
        account.mfa_secret = None;
        self.accounts.save(account)?;
        self.trail
            .log_auth(SecurityEvent::MfaDisabled, &actor(account), Metadata::new(), ctx);
        Ok(())
    }

    /// Check a login code. Never changes account state.
    pub fn verify_login(&self, account: &Account, code: &str) -> Result<bool, MfaError> {
        if !account.mfa_enabled {
            return Err(MfaError::NotEnabled);
        }
        let secret = account.mfa_secret.as_deref().ok_or(MfaError::NotConfigured)?;
        self.totp.verify(secret, code, self.clock.now())
    }
}

fn actor(account: &Account) -> Actor {
    Actor {
        id: account.id,
        email: Some(account.email.clone()),
    }
}
