//! Unified error types for the signing pipeline
//!
//! Every stage fails fast with a tagged [`WalletError`]; the tag
//! ([`ErrorCode`]) tells the caller which stage failed and whether a
//! retry of the whole operation makes sense.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for all pipeline operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl WalletError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Construction
    pub fn invalid_utxo(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidUtxoReference, msg)
    }

    pub fn invalid_destination(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDestination, msg)
    }

    pub fn fee_exceeds_amount(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::FeeExceedsAmount, msg)
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAmount, msg)
    }

    pub fn script_construction(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ScriptConstructionFailed, msg)
    }

    // Device
    pub fn device_not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeviceNotFound, msg)
    }

    pub fn provisioning_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProvisioningFailed, msg)
    }

    pub fn key_not_provisioned(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::KeyNotProvisioned, msg)
    }

    pub fn authentication_required(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthenticationRequired, msg)
    }

    pub fn presence_timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UserPresenceTimeout, msg)
    }

    pub fn signing_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SigningFailed, msg)
    }

    // Encoding and output
    pub fn no_inputs(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoInputs, msg)
    }

    pub fn encoding_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::EncodingFailed, msg)
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, msg)
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, msg)
    }

    pub fn verification_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::VerificationFailed, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    /// Whether re-invoking the whole signing operation may succeed.
    ///
    /// Only operator-side conditions qualify: a missed touch or a PIN
    /// problem. Nothing in the pipeline retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::UserPresenceTimeout | ErrorCode::AuthenticationRequired
        )
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for WalletError {}

/// Error codes, grouped by the stage that raises them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Construction
    InvalidUtxoReference,
    InvalidDestination,
    FeeExceedsAmount,
    InvalidAmount,
    ScriptConstructionFailed,

    // Device
    DeviceNotFound,
    ProvisioningFailed,
    KeyNotProvisioned,
    AuthenticationRequired,
    UserPresenceTimeout,
    SigningFailed,

    // Encoding
    NoInputs,
    EncodingFailed,
    VerificationFailed,

    // Output
    SerializationError,
    ParseError,

    // Ambient
    InvalidConfig,
    Internal,
}

/// Result type alias for pipeline operations
pub type WalletResult<T> = Result<T, WalletError>;

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::new(ErrorCode::InvalidConfig, e.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::new(ErrorCode::InvalidConfig, e.to_string())
    }
}
