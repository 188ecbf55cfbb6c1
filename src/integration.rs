//! Service Wiring
//!
//! Builds every security service once from a [`SecurityConfig`] so the host
//! application can inject them where needed. Nothing here is global: two
//! `SecurityServices` built from different configs are fully independent.
//!
//! # Quick Start
//!
//! ```ignore
//! use eventguard::integration::SecurityServices;
//! use eventguard::SecurityConfig;
//!
//! let services = SecurityServices::builder(SecurityConfig::from_env(), Arc::new(BcryptVerifier))
//!     .audit_store(Arc::new(JsonlAuditStore::new("storage/audit.jsonl")))
//!     .build();
//!
//! let auth_routes = Router::new()
//!     .route("/api/login", post(login))
//!     .layer(axum::middleware::from_fn_with_state(
//!         services.throttle.clone(),
//!         throttle_auth_middleware,
//!     ))
//!     .with_state(services.clone());
//! ```
//!
//! Backends not set on the builder default to the in-memory stores, the
//! system clock and [`RandomTokenIssuer`].

use std::sync::Arc;

use crate::accounts::AccountRepository;
use crate::audit::{AuditStore, AuditTrail, InMemoryAuditStore};
use crate::clock::{Clock, SystemClock};
use crate::config::SecurityConfig;
use crate::detection::{builtin_rules, ThreatDetector};
use crate::encryption::{EncryptedRepository, FieldCodec, InMemoryRecordStore, RecordStore};
use crate::login::{
    InMemoryStepUpStore, LoginService, PasswordVerifier, RandomTokenIssuer, StepUpStore, TokenIssuer,
};
use crate::mfa::MfaAuthenticator;
use crate::rate_limit::{AuthThrottle, CounterStore, InMemoryCounterStore, RateLimiter};

/// The security services of one application
#[derive(Clone)]
pub struct SecurityServices {
    /// Configuration the services were built from
    pub config: Arc<SecurityConfig>,
    /// Field codec for encrypted attributes
    pub codec: Arc<FieldCodec>,
    /// Repository over the row store, through the codec
    pub repository: EncryptedRepository,
    /// User accounts
    pub accounts: AccountRepository,
    /// Audit trail
    pub trail: AuditTrail,
    /// Threat detection over the audit trail
    pub detector: Arc<ThreatDetector>,
    /// Auth endpoint gate
    pub throttle: AuthThrottle,
    /// MFA lifecycle
    pub mfa: MfaAuthenticator,
    /// Password login with step-up
    pub login: LoginService,
}

impl SecurityServices {
    /// Start building services from a config and a password verifier
    pub fn builder(
        config: SecurityConfig,
        passwords: Arc<dyn PasswordVerifier>,
    ) -> SecurityServicesBuilder {
        SecurityServicesBuilder {
            config,
            passwords,
            tokens: None,
            records: None,
            audit: None,
            counters: None,
            step_ups: None,
            clock: None,
        }
    }
}

/// Builder for [`SecurityServices`]
pub struct SecurityServicesBuilder {
    config: SecurityConfig,
    passwords: Arc<dyn PasswordVerifier>,
    tokens: Option<Arc<dyn TokenIssuer>>,
    records: Option<Arc<dyn RecordStore>>,
    audit: Option<Arc<dyn AuditStore>>,
    counters: Option<Arc<dyn CounterStore>>,
    step_ups: Option<Arc<dyn StepUpStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SecurityServicesBuilder {
    /// Use a custom token issuer
    pub fn token_issuer(mut self, tokens: Arc<dyn TokenIssuer>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Use a custom row store
    pub fn record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Use a custom audit store
    pub fn audit_store(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Use a custom counter store
    pub fn counter_store(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Use a custom store for MFA step-up tickets
    pub fn step_up_store(mut self, step_ups: Arc<dyn StepUpStore>) -> Self {
        self.step_ups = Some(step_ups);
        self
    }

    /// Use an explicit clock for the trail, MFA checks and the default
    /// counter store
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Wire the services
    pub fn build(self) -> SecurityServices {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let codec = Arc::new(
            FieldCodec::with_builtin_schemas(config.cipher()).with_policy(config.decode_policy),
        );
        let records = self
            .records
            .unwrap_or_else(|| Arc::new(InMemoryRecordStore::new()));
        let repository = EncryptedRepository::new(codec.clone(), records);
        let accounts = AccountRepository::new(repository.clone());

        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(InMemoryAuditStore::new()));
        let trail = AuditTrail::with_clock(audit, clock.clone());

        let detector = Arc::new(ThreatDetector::with_rules(
            trail.clone(),
            builtin_rules(config.alert_window),
        ));

        let counters = self
            .counters
            .unwrap_or_else(|| Arc::new(InMemoryCounterStore::with_clock(clock.clone())));
        let limiter = RateLimiter::new(counters);
        let throttle = AuthThrottle::new(limiter.clone(), config.throttle_policy(), trail.clone());

        let mut mfa = MfaAuthenticator::new(accounts.clone(), trail.clone(), config.mfa_issuer.clone())
            .with_clock(clock.clone())
            .with_totp(config.totp());
        if let Some(url) = &config.qr_render_url {
            mfa = mfa.with_qr_render_url(url.clone());
        }

        let tokens = self.tokens.unwrap_or_else(|| Arc::new(RandomTokenIssuer));
        let step_ups = self
            .step_ups
            .unwrap_or_else(|| Arc::new(InMemoryStepUpStore::new()));
        let login = LoginService::new(
            accounts.clone(),
            mfa.clone(),
            trail.clone(),
            self.passwords,
            tokens,
        )
        .with_clock(clock)
        .with_limiter(limiter)
        .with_ticket_store(step_ups)
        .with_policy(config.step_up_policy());

        SecurityServices {
            config: Arc::new(config),
            codec,
            repository,
            accounts,
            trail,
            detector,
            throttle,
            mfa,
            login,
        }
    }
}
