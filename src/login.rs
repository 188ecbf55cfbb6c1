//! Password Login with TOTP Step-Up
//!
//! Couples credential checks to the MFA lifecycle:
//!
//! - unknown email or wrong password: [`LoginError::InvalidCredentials`]
//!   and an `auth.login_failed` audit row
//! - correct password, MFA enabled: [`LoginOutcome::MfaRequired`] with a
//!   single-use [`StepUpTicket`], never a token
//! - correct password, MFA off: [`LoginOutcome::Authenticated`]
//!
//! With MFA enabled the only way to a token is [`LoginService::verify_mfa`]
//! with the ticket from a successful password check and a valid code.
//! Tickets expire after [`StepUpPolicy::ticket_ttl`] and are bound to one
//! account. Code attempts are budgeted per account; once the budget is
//! spent the ticket is dropped and further attempts are refused before any
//! code is checked.
//!
//! Password hashing and token storage stay with the host application
//! through the [`PasswordVerifier`] and [`TokenIssuer`] traits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;

use crate::accounts::{Account, AccountRepository};
use crate::audit::{Actor, AuditEvent, AuditTrail, Metadata, RequestContext};
use crate::clock::{Clock, SystemClock};
use crate::crypto::{random_bytes, sha256_hex};
use crate::error::{LoginError, MfaError};
use crate::mfa::MfaAuthenticator;
use crate::observability::SecurityEvent;
use crate::rate_limit::{ceil_secs, HitOutcome, RateLimiter};

/// Checks a submitted password against a stored hash
pub trait PasswordVerifier: Send + Sync {
    /// Whether `password` matches `hash`
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Issues and revokes access credentials
pub trait TokenIssuer: Send + Sync {
    /// Issue a credential for an authenticated account
    fn issue(&self, account: &Account) -> AccessToken;

    /// Revoke a credential. The default does nothing.
    fn revoke(&self, _token: &AccessToken) {}
}

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Token value for the response body
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Issues `<account id>|<64 hex chars>` tokens from the OS RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenIssuer;

impl TokenIssuer for RandomTokenIssuer {
    fn issue(&self, account: &Account) -> AccessToken {
        let secret = hex::encode(random_bytes::<32>());
        match account.id {
            Some(id) => AccessToken(format!("{}|{}", id, secret)),
            None => AccessToken(secret),
        }
    }
}

// ============================================================================
// Step-Up Tickets
// ============================================================================

/// Proof of a successful password check, exchanged for a token together
/// with a TOTP code
#[derive(Clone, PartialEq, Eq)]
pub struct StepUpTicket(String);

impl StepUpTicket {
    fn generate() -> Self {
        Self(hex::encode(random_bytes::<32>()))
    }

    /// Ticket value for the response body
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StepUpTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StepUpTicket([REDACTED])")
    }
}

/// A ticket awaiting its TOTP code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStepUp {
    /// Account the password was checked for
    pub account_id: i64,
    /// When the ticket was issued
    pub issued_at: DateTime<Utc>,
    /// When the ticket stops being accepted
    pub expires_at: DateTime<Utc>,
    /// Wrong codes submitted with this ticket
    pub failures: u64,
}

/// Outstanding step-up tickets, keyed by the SHA-256 of the ticket value.
///
/// `take` must remove atomically so a ticket is only ever held by one
/// verification at a time.
pub trait StepUpStore: Send + Sync {
    /// Store a pending ticket
    fn insert(&self, digest: String, pending: PendingStepUp);

    /// Remove and return a pending ticket
    fn take(&self, digest: &str) -> Option<PendingStepUp>;
}

/// In-process [`StepUpStore`]
#[derive(Default)]
pub struct InMemoryStepUpStore {
    tickets: Mutex<HashMap<String, PendingStepUp>>,
}

impl InMemoryStepUpStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding tickets, expired ones included
    pub fn len(&self) -> usize {
        self.tickets.lock().len()
    }

    /// Whether no tickets are outstanding
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StepUpStore for InMemoryStepUpStore {
    fn insert(&self, digest: String, pending: PendingStepUp) {
        let mut tickets = self.tickets.lock();
        if tickets.len() > 1024 {
            tickets.retain(|_, t| t.expires_at > pending.issued_at);
        }
        tickets.insert(digest, pending);
    }

    fn take(&self, digest: &str) -> Option<PendingStepUp> {
        self.tickets.lock().remove(digest)
    }
}

/// Ticket lifetime and code attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepUpPolicy {
    /// How long a ticket is accepted after the password check
    pub ticket_ttl: Duration,
    /// Code attempts per account per window, and per ticket
    pub max_attempts: u64,
    /// Attempt budget window
    pub window: Duration,
}

impl Default for StepUpPolicy {
    fn default() -> Self {
        Self {
            ticket_ttl: Duration::from_secs(5 * 60),
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

fn step_up_key(account_id: i64) -> String {
    format!("mfa-step-up|{}", account_id)
}

// ============================================================================
// Login Service
// ============================================================================

/// An authenticated account and its new credential
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// The account
    pub account: Account,
    /// Credential to hand back to the client
    pub token: AccessToken,
}

/// Result of a successful password check
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Logged in
    Authenticated(Authenticated),
    /// Password accepted; a TOTP code is required before a token is issued
    MfaRequired {
        /// Account awaiting step-up
        account_id: i64,
        /// Ticket to present with the code
        ticket: StepUpTicket,
    },
}

impl LoginOutcome {
    /// The issued token, if any
    pub fn token(&self) -> Option<&AccessToken> {
        match self {
            Self::Authenticated(auth) => Some(&auth.token),
            Self::MfaRequired { .. } => None,
        }
    }

    /// The step-up ticket, if a code is still needed
    pub fn ticket(&self) -> Option<&StepUpTicket> {
        match self {
            Self::Authenticated(_) => None,
            Self::MfaRequired { ticket, .. } => Some(ticket),
        }
    }

    /// Whether a TOTP code is still needed
    pub fn requires_mfa(&self) -> bool {
        matches!(self, Self::MfaRequired { .. })
    }
}

/// Password login, MFA step-up and logout
#[derive(Clone)]
pub struct LoginService {
    accounts: AccountRepository,
    mfa: MfaAuthenticator,
    trail: AuditTrail,
    passwords: Arc<dyn PasswordVerifier>,
    tokens: Arc<dyn TokenIssuer>,
    tickets: Arc<dyn StepUpStore>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    policy: StepUpPolicy,
}

impl LoginService {
    /// Create a login service with in-memory tickets and attempt counters
    /// on the system clock
    pub fn new(
        accounts: AccountRepository,
        mfa: MfaAuthenticator,
        trail: AuditTrail,
        passwords: Arc<dyn PasswordVerifier>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            accounts,
            mfa,
            trail,
            passwords,
            tokens,
            tickets: Arc::new(InMemoryStepUpStore::new()),
            limiter: RateLimiter::in_memory(),
            clock: Arc::new(SystemClock),
            policy: StepUpPolicy::default(),
        }
    }

    /// Use an explicit clock for ticket expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Count code attempts in a shared limiter
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Keep tickets in a custom store
    pub fn with_ticket_store(mut self, tickets: Arc<dyn StepUpStore>) -> Self {
        self.tickets = tickets;
        self
    }

    /// Override ticket lifetime and attempt budget
    pub fn with_policy(mut self, policy: StepUpPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active step-up policy
    pub fn policy(&self) -> StepUpPolicy {
        self.policy
    }

    /// Check an email and password
    pub fn login(
        &self,
        email: &str,
        password: &str,
        ctx: &RequestContext,
    ) -> Result<LoginOutcome, LoginError> {
        let account = match self.accounts.find_by_email(email)? {
            Some(account) if self.passwords.verify(password, &account.password_hash) => account,
            _ => {
                let mut metadata = Metadata::new();
                metadata.insert("email".into(), json!(email));
                metadata.insert("ip".into(), json!(ctx.ip));
                self.trail
                    .log_auth(SecurityEvent::LoginFailed, &Actor::anonymous(), metadata, ctx);
                return Err(LoginError::InvalidCredentials);
            }
        };

        let actor = actor(&account);
        if account.mfa_enabled {
            let account_id = account.id.ok_or(LoginError::InvalidCredentials)?;
            let ticket = self.issue_ticket(account_id);
            self.trail
                .log_auth(SecurityEvent::LoginMfaRequired, &actor, Metadata::new(), ctx);
            return Ok(LoginOutcome::MfaRequired { account_id, ticket });
        }

        let token = self.tokens.issue(&account);
        self.trail
            .log_auth(SecurityEvent::LoginSuccess, &actor, token_created(), ctx);

        Ok(LoginOutcome::Authenticated(Authenticated { account, token }))
    }

    fn issue_ticket(&self, account_id: i64) -> StepUpTicket {
        let ticket = StepUpTicket::generate();
        let issued_at = self.clock.now();
        let ttl = chrono::Duration::from_std(self.policy.ticket_ttl).unwrap_or(chrono::Duration::zero());
        self.tickets.insert(
            sha256_hex(ticket.as_str().as_bytes()),
            PendingStepUp {
                account_id,
                issued_at,
                expires_at: issued_at.checked_add_signed(ttl).unwrap_or(issued_at),
                failures: 0,
            },
        );
        ticket
    }

    /// Complete a step-up login with the ticket from [`login`](Self::login)
    /// and a TOTP code.
    ///
    /// The ticket is taken out of the store before anything else is checked.
    /// A wrong code puts it back while attempts remain; success, an error or
    /// an exhausted budget drops it. A missing, expired or reused ticket is
    /// [`LoginError::InvalidCredentials`].
    pub fn verify_mfa(
        &self,
        ticket: &str,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<Authenticated, LoginError> {
        let digest = sha256_hex(ticket.as_bytes());
        let pending = match self.tickets.take(&digest) {
            Some(pending) if pending.expires_at > self.clock.now() => pending,
            _ => {
                self.trail.log_auth(
                    SecurityEvent::MfaVerificationFailed,
                    &Actor::anonymous(),
                    reason("invalid_ticket"),
                    ctx,
                );
                return Err(LoginError::InvalidCredentials);
            }
        };

        let account = self
            .accounts
            .load(pending.account_id)?
            .ok_or(LoginError::InvalidCredentials)?;
        let actor = actor(&account);

        let key = step_up_key(pending.account_id);
        let max = self.policy.max_attempts;
        if let HitOutcome::Rejected {
            attempts,
            retry_after,
        } = self.limiter.attempt(&key, max, self.policy.window)
        {
            let retry_after_secs = ceil_secs(retry_after);
            crate::security_event!(
                SecurityEvent::RateLimitExceeded,
                ip_address = %ctx.ip,
                user_id = pending.account_id,
                attempts = attempts,
                retry_after = retry_after_secs,
                "MFA step-up attempts exhausted"
            );
            self.trail.record(
                AuditEvent::from(SecurityEvent::RateLimitExceeded)
                    .actor(&actor)
                    .meta("email", account.email.as_str())
                    .meta("endpoint", "mfa_step_up")
                    .meta("attempts", attempts)
                    .meta("retry_after", retry_after_secs),
                ctx,
            );
            return Err(LoginError::TooManyAttempts { retry_after_secs });
        }

        if !self.mfa.verify_login(&account, code)? {
            let failures = pending.failures + 1;
            let remaining = self.limiter.remaining(&key, max).min(max.saturating_sub(failures));
            if remaining > 0 {
                self.tickets.insert(digest, PendingStepUp { failures, ..pending });
            }

            let mut metadata = Metadata::new();
            metadata.insert("email".into(), json!(account.email));
            metadata.insert("remaining_attempts".into(), json!(remaining));
            self.trail
                .log_auth(SecurityEvent::MfaVerificationFailed, &actor, metadata, ctx);
            return Err(MfaError::VerificationFailed.into());
        }

        self.limiter.clear(&key);
        let token = self.tokens.issue(&account);
        self.trail
            .log_auth(SecurityEvent::MfaVerificationSuccess, &actor, token_created(), ctx);

        Ok(Authenticated { account, token })
    }

    /// Revoke a credential and record the logout
    pub fn logout(&self, account: &Account, token: &AccessToken, ctx: &RequestContext) {
        self.trail
            .log_auth(SecurityEvent::Logout, &actor(account), Metadata::new(), ctx);
        self.tokens.revoke(token);
    }
}

fn actor(account: &Account) -> Actor {
    Actor {
        id: account.id,
        email: Some(account.email.clone()),
    }
}

fn token_created() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("token_created".into(), json!(true));
    metadata
}

fn reason(reason: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("reason".into(), json!(reason));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;
    use crate::encryption::{EncryptedRepository, FieldCipher, FieldCodec, InMemoryRecordStore};
    use crate::mfa::Totp;
    use crate::rate_limit::InMemoryCounterStore;
    use crate::testing::{ManualClock, StaticPasswordVerifier};

    struct Fixture {
        login: LoginService,
        mfa: MfaAuthenticator,
        accounts: AccountRepository,
        audit: Arc<InMemoryAuditStore>,
        tickets: Arc<InMemoryStepUpStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let codec = Arc::new(FieldCodec::with_builtin_schemas(FieldCipher::new("login-key")));
        let accounts = AccountRepository::new(EncryptedRepository::new(
            codec,
            Arc::new(InMemoryRecordStore::new()),
        ));
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(InMemoryAuditStore::new());
        let trail = AuditTrail::with_clock(audit.clone(), clock.clone());
        let mfa = MfaAuthenticator::new(accounts.clone(), trail.clone(), "Event Manager")
            .with_clock(clock.clone());
        let tickets = Arc::new(InMemoryStepUpStore::new());

        accounts
            .save(&mut Account::new("Alice", "alice@example.com", "correct-horse"))
            .unwrap();

        let login = LoginService::new(
            accounts.clone(),
            mfa.clone(),
            trail,
            Arc::new(StaticPasswordVerifier),
            Arc::new(RandomTokenIssuer),
        )
        .with_clock(clock.clone())
        .with_ticket_store(tickets.clone())
        .with_limiter(RateLimiter::new(Arc::new(InMemoryCounterStore::with_clock(
            clock.clone(),
        ))));

        Fixture {
            login,
            mfa,
            accounts,
            audit,
            tickets,
            clock,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("1.2.3.4", "test")
    }

    fn actions(f: &Fixture) -> Vec<String> {
        f.audit.records().into_iter().map(|r| r.action).collect()
    }

    fn enable_mfa(f: &Fixture) -> Account {
        let mut account = f.accounts.find_by_email("alice@example.com").unwrap().unwrap();
        let setup = f.mfa.begin_setup(&mut account, &ctx()).unwrap();
        let code = Totp::default().code_at(&setup.secret, f.clock.now()).unwrap();
        f.mfa.confirm_setup(&mut account, &code, &ctx()).unwrap();
        account
    }

    fn current_code(f: &Fixture, account: &Account) -> String {
        Totp::default()
            .code_at(account.mfa_secret.as_deref().unwrap(), f.clock.now())
            .unwrap()
    }

    fn wrong_code(valid: &str) -> &'static str {
        if valid == "000000" {
            "111111"
        } else {
            "000000"
        }
    }

    fn password_step(f: &Fixture) -> String {
        let outcome = f.login.login("alice@example.com", "correct-horse", &ctx()).unwrap();
        outcome.ticket().unwrap().as_str().to_string()
    }

    #[test]
    fn test_login_without_mfa_issues_token() {
        let f = fixture();
        let outcome = f.login.login("Alice@Example.com", "correct-horse", &ctx()).unwrap();
        let token = outcome.token().unwrap();
        assert!(token.as_str().starts_with("1|"));
        assert!(outcome.ticket().is_none());
        assert_eq!(actions(&f), ["auth.login_success"]);
        assert_eq!(f.audit.records()[0].metadata["token_created"], true);
    }

    #[test]
    fn test_invalid_credentials_are_indistinguishable() {
        let f = fixture();
        assert!(matches!(
            f.login.login("alice@example.com", "wrong", &ctx()),
            Err(LoginError::InvalidCredentials)
        ));
        assert!(matches!(
            f.login.login("nobody@example.com", "correct-horse", &ctx()),
            Err(LoginError::InvalidCredentials)
        ));

        let records = f.audit.records();
        assert_eq!(actions(&f), ["auth.login_failed", "auth.login_failed"]);
        assert_eq!(records[1].metadata["email"], "nobody@example.com");
        assert_eq!(records[1].user_id, None);
    }

    #[test]
    fn test_mfa_enabled_login_requires_step_up() {
        let f = fixture();
        let account = enable_mfa(&f);

        let outcome = f.login.login("alice@example.com", "correct-horse", &ctx()).unwrap();
        assert!(outcome.requires_mfa());
        assert!(outcome.token().is_none());
        assert!(!format!("{:?}", outcome).contains(outcome.ticket().unwrap().as_str()));

        let ticket = outcome.ticket().unwrap().as_str();
        let auth = f.login.verify_mfa(ticket, &current_code(&f, &account), &ctx()).unwrap();
        assert_eq!(auth.account.id, account.id);
        assert!(f.tickets.is_empty());

        let actions = actions(&f);
        assert_eq!(
            &actions[actions.len() - 2..],
            ["auth.login_mfa_required", "auth.mfa_verification_success"]
        );
    }

    #[test]
    fn test_valid_code_without_password_step_is_refused() {
        let f = fixture();
        let account = enable_mfa(&f);
        let code = current_code(&f, &account);

        assert!(matches!(
            f.login.verify_mfa("", &code, &ctx()),
            Err(LoginError::InvalidCredentials)
        ));
        assert!(matches!(
            f.login.verify_mfa("alice@example.com", &code, &ctx()),
            Err(LoginError::InvalidCredentials)
        ));

        let records = f.audit.records();
        let last = records.last().unwrap();
        assert_eq!(last.action, "auth.mfa_verification_failed");
        assert_eq!(last.metadata["reason"], "invalid_ticket");
    }

    #[test]
    fn test_ticket_is_single_use() {
        let f = fixture();
        let account = enable_mfa(&f);
        let ticket = password_step(&f);
        let code = current_code(&f, &account);

        f.login.verify_mfa(&ticket, &code, &ctx()).unwrap();
        assert!(matches!(
            f.login.verify_mfa(&ticket, &code, &ctx()),
            Err(LoginError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_expired_ticket_is_refused() {
        let f = fixture();
        let account = enable_mfa(&f);
        let ticket = password_step(&f);

        f.clock.advance(f.login.policy().ticket_ttl);
        let code = current_code(&f, &account);
        assert!(matches!(
            f.login.verify_mfa(&ticket, &code, &ctx()),
            Err(LoginError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_wrong_code_keeps_ticket_for_retry() {
        let f = fixture();
        let account = enable_mfa(&f);
        let ticket = password_step(&f);
        let valid = current_code(&f, &account);

        assert!(matches!(
            f.login.verify_mfa(&ticket, wrong_code(&valid), &ctx()),
            Err(LoginError::Mfa(MfaError::VerificationFailed))
        ));
        let records = f.audit.records();
        let last = records.last().unwrap();
        assert_eq!(last.action, "auth.mfa_verification_failed");
        assert_eq!(last.metadata["remaining_attempts"], 4);

        let auth = f.login.verify_mfa(&ticket, &valid, &ctx()).unwrap();
        assert_eq!(auth.account.id, account.id);
    }

    #[test]
    fn test_step_up_attempts_are_budgeted_per_account() {
        let f = fixture();
        let account = enable_mfa(&f);
        let ticket = password_step(&f);
        let valid = current_code(&f, &account);

        for _ in 0..5 {
            assert!(matches!(
                f.login.verify_mfa(&ticket, wrong_code(&valid), &ctx()),
                Err(LoginError::Mfa(MfaError::VerificationFailed))
            ));
        }
        // Budget spent: the ticket is gone
        assert!(f.tickets.is_empty());
        assert!(matches!(
            f.login.verify_mfa(&ticket, &valid, &ctx()),
            Err(LoginError::InvalidCredentials)
        ));

        // A fresh password step does not reset the budget, and the valid
        // code is refused before it is checked
        let fresh = password_step(&f);
        match f.login.verify_mfa(&fresh, &valid, &ctx()) {
            Err(LoginError::TooManyAttempts { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 900)
            }
            other => panic!("expected throttling, got {:?}", other.map(|a| a.account.id)),
        }
        assert_eq!(actions(&f).last().map(String::as_str), Some("rate_limit_exceeded"));
        assert!(!actions(&f).contains(&"auth.mfa_verification_success".to_string()));

        f.clock.advance(Duration::from_secs(900));
        let ticket = password_step(&f);
        let code = current_code(&f, &account);
        assert!(f.login.verify_mfa(&ticket, &code, &ctx()).is_ok());
    }

    #[test]
    fn test_verify_mfa_after_mfa_disabled() {
        let f = fixture();
        let mut account = enable_mfa(&f);
        let ticket = password_step(&f);
        let code = current_code(&f, &account);
        f.mfa.disable(&mut account, &code, &ctx()).unwrap();

        assert!(matches!(
            f.login.verify_mfa(&ticket, &code, &ctx()),
            Err(LoginError::Mfa(MfaError::NotEnabled))
        ));
    }

    #[test]
    fn test_logout_is_audited() {
        let f = fixture();
        let outcome = f.login.login("alice@example.com", "correct-horse", &ctx()).unwrap();
        let LoginOutcome::Authenticated(auth) = outcome else {
            panic!("expected a token");
        };
        f.login.logout(&auth.account, &auth.token, &ctx());
        assert_eq!(actions(&f).last().map(String::as_str), Some("auth.logout"));
        assert!(!format!("{:?}", auth.token).contains(auth.token.as_str()));
    }
}
