//! Error taxonomy
//!
//! Every error in this crate is non-fatal by construction. The components
//! that raise them pick an explicit degradation (pass-through, log-only, a
//! structured result) instead of aborting the request:
//!
//! | Error | Raised by | Degradation |
//! |-------|-----------|-------------|
//! | [`CipherError::Configuration`] | field cipher | value passes through unencrypted, warning logged |
//! | [`CipherError::Decryption`] | field cipher | stored value returned unchanged (per field) |
//! | [`StoreError::Unavailable`] | audit / record stores | audit degrades to log-only |
//! | [`MfaError::VerificationFailed`] | MFA | returned to caller as a value |
//! | [`LoginError::TooManyAttempts`] | MFA step-up | step-up ticket dropped, caller retries later |
//!
//! The auth gate never produces an error; it returns a
//! [`GateDecision`](crate::rate_limit::GateDecision).

use thiserror::Error;

/// Field cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    /// No key material configured (`DB_FIELD_ENCRYPTION_KEY` / `APP_KEY`)
    #[error("field encryption key is not configured")]
    Configuration,

    /// Tag mismatch or malformed envelope
    #[error("field decryption failed: {0}")]
    Decryption(String),

    /// The plaintext could not be sealed
    #[error("field encryption failed")]
    Encryption,
}

/// Persistence errors from audit and record stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing store unreachable or refused the write
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Row could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error from a file-backed store
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("{entity} #{id} not found")]
    NotFound {
        /// Entity type (table name)
        entity: String,
        /// Row id
        id: i64,
    },
}

/// Transparent field codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// A field failed to decrypt under the strict decode policy
    #[error("failed to decode field `{field}`: {source}")]
    Decode {
        /// Attribute name
        field: String,
        /// Underlying cipher failure
        #[source]
        source: CipherError,
    },

    /// A field failed to encrypt for a reason other than missing key material
    #[error("failed to encode field `{field}`: {source}")]
    Encode {
        /// Attribute name
        field: String,
        /// Underlying cipher failure
        #[source]
        source: CipherError,
    },

    /// Entity could not be mapped to or from its attribute map
    #[error("entity mapping error: {0}")]
    Mapping(#[from] serde_json::Error),

    /// Underlying store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// MFA lifecycle errors
#[derive(Debug, Error)]
pub enum MfaError {
    /// Account does not exist
    #[error("account not found")]
    AccountNotFound,

    /// No secret on file; setup has not been started
    #[error("MFA is not set up for this account")]
    NotConfigured,

    /// Setup requested for an account that already has MFA enabled
    #[error("MFA is already enabled for this account")]
    AlreadyEnabled,

    /// MFA is not enabled, so a login code cannot be checked
    #[error("MFA is not enabled for this account")]
    NotEnabled,

    /// Submitted code does not match the stored secret
    #[error("invalid one-time code")]
    VerificationFailed,

    /// Stored secret is not valid base32
    #[error("stored MFA secret is malformed")]
    MalformedSecret,

    /// Credential could not be loaded or saved
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Login flow errors
#[derive(Debug, Error)]
pub enum LoginError {
    /// Unknown account or wrong password (deliberately indistinguishable)
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Step-up code attempts for the account are used up
    #[error("too many verification attempts, retry in {retry_after_secs} seconds")]
    TooManyAttempts {
        /// Seconds until the attempt budget resets
        retry_after_secs: u64,
    },

    /// Step-up verification failed
    #[error(transparent)]
    Mfa(#[from] MfaError),

    /// Account lookup failed
    #[error(transparent)]
    Codec(#[from] CodecError),
}
