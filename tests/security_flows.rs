//! End-to-end flows across the security services

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eventguard::audit::{InMemoryAuditStore, RequestContext};
use eventguard::detection::AlertSeverity;
use eventguard::encryption::{FieldCipher, InMemoryRecordStore, RecordStore};
use eventguard::integration::SecurityServices;
use eventguard::mfa::Totp;
use eventguard::rate_limit::{HitOutcome, InMemoryCounterStore, RateLimiter};
use eventguard::testing::{seed_failed_logins, ManualClock, StaticPasswordVerifier};
use eventguard::{Account, Clock, LoginError, LoginOutcome, MfaError, SecurityConfig};

struct Harness {
    services: SecurityServices,
    records: Arc<InMemoryRecordStore>,
    audit: Arc<InMemoryAuditStore>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let records = Arc::new(InMemoryRecordStore::new());
    let audit = Arc::new(InMemoryAuditStore::new());
    let clock = Arc::new(ManualClock::default());
    let config = SecurityConfig::builder()
        .field_key("0123456789abcdef0123456789abcdef")
        .build();

    let services = SecurityServices::builder(config, Arc::new(StaticPasswordVerifier))
        .record_store(records.clone())
        .audit_store(audit.clone())
        .clock(clock.clone())
        .build();

    Harness {
        services,
        records,
        audit,
        clock,
    }
}

fn ctx(ip: &str) -> RequestContext {
    RequestContext::new(ip, "integration-test")
}

#[test]
fn cipher_round_trips_and_passes_empty_values() {
    let cipher = FieldCipher::new("0123456789abcdef0123456789abcdef");
    for value in ["alice@example.com", "ünïcødé ✓", "a"] {
        let stored = cipher.encrypt(value).unwrap();
        assert_ne!(stored, value);
        assert_eq!(cipher.decrypt(&stored).unwrap(), value);
    }
    assert_eq!(cipher.encrypt("").unwrap(), "");
    assert_eq!(cipher.encrypt_field(None).unwrap(), None);
}

#[test]
fn encode_for_write_is_idempotent() {
    let h = harness();
    let mut row = serde_json::Map::new();
    row.insert("email".into(), "alice@example.com".into());
    row.insert("name".into(), "Alice".into());

    let once = h.services.codec.encode_for_write("users", row).unwrap();
    let twice = h.services.codec.encode_for_write("users", once.clone()).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once["name"], "Alice");
}

#[test]
fn accounts_are_encrypted_at_rest_and_found_by_email() {
    let h = harness();
    let mut account = Account::new("Alice", "alice@example.com", "pw");
    let id = h.services.accounts.save(&mut account).unwrap();

    let raw = h.records.get("users", id).unwrap().unwrap();
    assert!(FieldCipher::is_encrypted(raw["email"].as_str().unwrap()));

    let found = h.services.accounts.find_by_email("ALICE@example.com").unwrap().unwrap();
    assert_eq!(found.id, Some(id));
    assert_eq!(found.email, "alice@example.com");
}

#[test]
fn limiter_admits_five_then_rejects_until_window_passes() {
    let clock = Arc::new(ManualClock::default());
    let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::with_clock(clock.clone())));
    let window = Duration::from_secs(900);

    for _ in 0..5 {
        assert!(!limiter.too_many_attempts("k", 5));
        limiter.hit("k", window);
    }
    assert!(limiter.too_many_attempts("k", 5));
    assert!(limiter.available_in("k") <= 900);

    clock.advance(Duration::from_secs(901));
    assert!(!limiter.too_many_attempts("k", 5));
    assert_eq!(limiter.attempts("k"), 0);
}

#[test]
fn parallel_attempts_never_exceed_the_limit() {
    let limiter = Arc::new(RateLimiter::in_memory());
    let max = 16;

    let handles: Vec<_> = (0..max * 2)
        .map(|_| {
            let limiter = limiter.clone();
            thread::spawn(move || {
                matches!(
                    limiter.attempt("fresh", max, Duration::from_secs(60)),
                    HitOutcome::Admitted { .. }
                )
            })
        })
        .collect();

    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count() as u64;
    assert_eq!(admitted, max);
}

#[test]
fn five_failed_logins_raise_one_high_alert() {
    let h = harness();
    seed_failed_logins(&h.services.trail, "1.2.3.4", 5);

    let alerts = h.services.detector.check_security_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "multiple_failed_logins");
    assert_eq!(alerts[0].severity, AlertSeverity::High);
    assert_eq!(alerts[0].evidence_total(), 5);
    assert_eq!(
        alerts[0].evidence[0].get(eventguard::audit::Dimension::Ip),
        Some("1.2.3.4")
    );
}

#[test]
fn four_failed_logins_raise_nothing() {
    let h = harness();
    seed_failed_logins(&h.services.trail, "1.2.3.4", 4);
    assert!(h.services.detector.check_security_alerts().is_empty());
}

#[test]
fn failed_logins_outside_window_are_ignored() {
    let h = harness();
    seed_failed_logins(&h.services.trail, "1.2.3.4", 5);
    h.clock.advance(Duration::from_secs(61 * 60));
    assert!(h.services.detector.check_security_alerts().is_empty());
}

#[test]
fn totp_tolerates_one_step_but_not_six() {
    let totp = Totp::default();
    let secret = Totp::generate_secret();
    let t = ManualClock::default().now();
    let code = totp.code_at(&secret, t).unwrap();

    assert!(totp.verify(&secret, &code, t).unwrap());
    assert!(totp.verify(&secret, &code, t + chrono::Duration::seconds(30)).unwrap());
    assert!(totp.verify(&secret, &code, t - chrono::Duration::seconds(30)).unwrap());
    assert!(!totp.verify(&secret, &code, t + chrono::Duration::seconds(180)).unwrap());
}

#[test]
fn mfa_login_only_issues_a_token_after_a_valid_code() {
    let h = harness();
    let mut account = Account::new("Alice", "alice@example.com", "pw");
    h.services.accounts.save(&mut account).unwrap();

    let setup = h.services.mfa.begin_setup(&mut account, &ctx("10.0.0.1")).unwrap();
    let code = Totp::default().code_at(&setup.secret, h.clock.now()).unwrap();
    h.services
        .mfa
        .confirm_setup(&mut account, &code, &ctx("10.0.0.1"))
        .unwrap();

    let stored = h.records.get("users", account.id.unwrap()).unwrap().unwrap();
    assert!(FieldCipher::is_encrypted(stored["mfa_secret"].as_str().unwrap()));

    let outcome = h
        .services
        .login
        .login("alice@example.com", "pw", &ctx("10.0.0.1"))
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::MfaRequired { .. }));
    assert!(outcome.token().is_none());
    let ticket = outcome.ticket().unwrap().as_str().to_string();

    let wrong = if code == "000000" { "111111" } else { "000000" };
    assert!(matches!(
        h.services.login.verify_mfa(&ticket, wrong, &ctx("10.0.0.1")),
        Err(LoginError::Mfa(MfaError::VerificationFailed))
    ));

    h.clock.advance(Duration::from_secs(30));
    let code = Totp::default().code_at(&setup.secret, h.clock.now()).unwrap();
    let auth = h
        .services
        .login
        .verify_mfa(&ticket, &code, &ctx("10.0.0.1"))
        .unwrap();
    assert!(!auth.token.as_str().is_empty());

    let stats = h.services.trail.security_stats(24).unwrap();
    assert_eq!(stats.mfa_enabled, 1);
    let actions: Vec<_> = h.audit.records().into_iter().map(|r| r.action).collect();
    assert!(actions.contains(&"auth.mfa_verification_failed".to_string()));
    assert!(actions.contains(&"auth.mfa_verification_success".to_string()));
}

#[test]
fn valid_code_alone_never_yields_a_token() {
    let h = harness();
    let mut account = Account::new("Alice", "alice@example.com", "pw");
    h.services.accounts.save(&mut account).unwrap();
    let setup = h.services.mfa.begin_setup(&mut account, &ctx("10.0.0.1")).unwrap();
    let code = Totp::default().code_at(&setup.secret, h.clock.now()).unwrap();
    h.services
        .mfa
        .confirm_setup(&mut account, &code, &ctx("10.0.0.1"))
        .unwrap();

    for ticket in ["", "alice@example.com", "deadbeef"] {
        assert!(matches!(
            h.services.login.verify_mfa(ticket, &code, &ctx("6.6.6.6")),
            Err(LoginError::InvalidCredentials)
        ));
    }
    let actions: Vec<_> = h.audit.records().into_iter().map(|r| r.action).collect();
    assert!(!actions.contains(&"auth.mfa_verification_success".to_string()));
}

#[test]
fn step_up_codes_are_limited_per_account() {
    let h = harness();
    let mut account = Account::new("Alice", "alice@example.com", "pw");
    h.services.accounts.save(&mut account).unwrap();
    let setup = h.services.mfa.begin_setup(&mut account, &ctx("10.0.0.1")).unwrap();
    let code = Totp::default().code_at(&setup.secret, h.clock.now()).unwrap();
    h.services
        .mfa
        .confirm_setup(&mut account, &code, &ctx("10.0.0.1"))
        .unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let login = || {
        let outcome = h
            .services
            .login
            .login("alice@example.com", "pw", &ctx("10.0.0.1"))
            .unwrap();
        outcome.ticket().unwrap().as_str().to_string()
    };

    let ticket = login();
    for _ in 0..5 {
        assert!(h.services.login.verify_mfa(&ticket, wrong, &ctx("10.0.0.1")).is_err());
    }
    assert!(matches!(
        h.services.login.verify_mfa(&login(), &code, &ctx("10.0.0.1")),
        Err(LoginError::TooManyAttempts { .. })
    ));
}
