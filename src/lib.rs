//! YubiWallet Core Library
//!
//! Signs single-input, single-output Bitcoin-style transactions with an
//! RSA-2048 key that never leaves a PIV hardware token.
//!
//! # Architecture
//!
//! This crate provides:
//! - **tx**: transaction construction, signature encoding, wire serialization
//! - **device**: hardware signing devices (YubiKey PIV and an in-memory fake)
//! - **utils**: configuration and structured logging
//!
//! The pipeline runs in four stages: [`tx::construct`] builds the unsigned
//! transaction and its digest, a [`device::DeviceSession`] signs the digest,
//! [`tx::attach`] binds signature and public key to the input, and
//! [`tx::to_wire_format`] renders the broadcast-ready hex.
//!
//! # Security
//!
//! The device session is scoped: it is opened right before signing and
//! closed when dropped, on success and on every error path. All inputs are
//! validated before the token is touched.
//!
//! # Example
//!
//! ```rust,ignore
//! use yubiwallet::{sign_transaction, SignerConfig, SpendRequest, YubiKeyDevice};
//!
//! let config = SignerConfig::default();
//! let device = YubiKeyDevice::new(&config)?;
//! let request = SpendRequest {
//!     utxo_hash: "aa".repeat(32),
//!     utxo_index: 0,
//!     destination: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into(),
//!     amount: 100_000,
//!     fee: 1_000,
//! };
//! let wire = sign_transaction(&device, &request, config.network)?;
//! println!("{}", wire);
//! ```

pub mod device;
pub mod error;
pub mod tx;
pub mod types;
pub mod utils;

pub use device::{DeviceSession, HardwareSigningDevice, MemoryDevice, YubiKeyDevice};
pub use error::{ErrorCode, WalletError, WalletResult};
pub use types::*;
pub use utils::config::SignerConfig;

use bitcoin::Network;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;

/// Discover the token and provision a fresh key in its configured slot.
///
/// Destructive: any key already in the slot is replaced. Returns the new
/// public key.
pub fn initialize_device<D: HardwareSigningDevice>(device: &D) -> WalletResult<RsaPublicKey> {
    let public_key = with_session(device, |session| {
        let key = session.provision_key()?;
        session.public_key(&key)
    })
    .inspect_err(|e| log_error!("lib", "Device initialization failed", code = format!("{:?}", e.code)))?;

    log_info!("lib", "Device initialized", key_bits = public_key.n().bits());
    Ok(public_key)
}

/// Run the whole pipeline for one spend and return the wire transaction.
///
/// The request is validated before the device is opened, so malformed
/// input never causes device interaction. The first failure aborts the
/// remaining stages.
pub fn sign_transaction<D: HardwareSigningDevice>(
    device: &D,
    request: &SpendRequest,
    network: Network,
) -> WalletResult<WireTransaction> {
    let (unsigned, digest) = tx::construct(
        &request.utxo_hash,
        request.utxo_index,
        &request.destination,
        request.amount,
        request.fee,
        network,
    )?;

    let (signature, public_key) = with_session(device, |session| {
        let key = session.key_handle();
        let signature = session.sign(&key, &digest)?;
        let public_key = session.public_key(&key)?;
        Ok((signature, public_key))
    })
    .inspect_err(|e| log_warn!("lib", "Device signing failed", code = format!("{:?}", e.code)))?;

    let authorized = tx::attach(&unsigned, &signature, &public_key)?;
    tx::verify_authorization(&authorized, &public_key)?;
    tx::to_wire_format(&authorized)
}

/// Open a session, run `f`, and close the session whatever `f` returns.
fn with_session<D, T, F>(device: &D, f: F) -> WalletResult<T>
where
    D: HardwareSigningDevice,
    F: FnOnce(&mut D::Session) -> WalletResult<T>,
{
    let mut session = device.discover()?;
    f(&mut session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InjectedFailure;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::RsaPrivateKey;

    const TEST_KEY_PEM: &str = include_str!("../tests/fixtures/rsa2048.pem");

    fn request(amount: i64, fee: i64) -> SpendRequest {
        SpendRequest {
            utxo_hash: "aa".repeat(32),
            utxo_index: 0,
            destination: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string(),
            amount,
            fee,
        }
    }

    fn device() -> MemoryDevice {
        MemoryDevice::new()
            .with_key(Slot::Authentication, RsaPrivateKey::from_pkcs8_pem(TEST_KEY_PEM).unwrap())
            .with_fixed_salt([0x5a; 32])
    }

    #[test]
    fn test_sign_transaction_closes_session() {
        let device = device();
        let wire = sign_transaction(&device, &request(100_000, 1_000), Network::Bitcoin).unwrap();

        assert_eq!(wire.as_str().len(), 643 * 2);
        assert_eq!(device.stats().opens, 1);
        assert_eq!(device.stats().closes, 1);
        assert!(!device.is_open());
    }

    #[test]
    fn test_invalid_request_never_opens_device() {
        let device = device();
        let err = sign_transaction(&device, &request(500, 1_000), Network::Bitcoin).unwrap_err();

        assert_eq!(err.code, ErrorCode::FeeExceedsAmount);
        assert_eq!(device.stats().opens, 0);
        assert_eq!(device.stats().device_calls, 0);
    }

    #[test]
    fn test_device_failure_still_closes() {
        let device = device().fail_with(InjectedFailure::PresenceTimeout);
        let err = sign_transaction(&device, &request(100_000, 1_000), Network::Bitcoin).unwrap_err();

        assert_eq!(err.code, ErrorCode::UserPresenceTimeout);
        assert!(err.is_retryable());
        assert_eq!(device.stats().opens, device.stats().closes);
    }

    #[test]
    fn test_initialize_device_provisions_slot() {
        let device = MemoryDevice::new().with_seed(11);
        let public_key = initialize_device(&device).unwrap();

        let mut session = device.discover().unwrap();
        let handle = session.key_handle();
        assert_eq!(session.public_key(&handle).unwrap(), public_key);
    }
}
