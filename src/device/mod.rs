//! Hardware Signing Devices
//!
//! A signing device is opened exclusively for one scoped session. The
//! session owns the hardware handle and closes it when dropped, so every
//! exit path (success, `?` propagation, panic unwinding) releases the token.
//!
//! Two backends implement the same capability:
//! - [`YubiKeyDevice`]: a PIV token reached over PC/SC
//! - [`MemoryDevice`]: a deterministic in-process fake for tests
//!
//! Both sign the same way: the digest is EMSA-PSS encoded on the host
//! ([`pss`]) and the token performs the raw RSA private-key operation.

pub mod memory;
pub mod pss;
pub mod yubikey;

pub use self::memory::{DeviceStats, InjectedFailure, MemoryDevice};
pub use self::yubikey::YubiKeyDevice;

use crate::error::WalletResult;
use crate::types::{KeyHandle, Signature, SigningDigest};
use rsa::RsaPublicKey;

/// RSA modulus size every provisioned key uses
pub const KEY_BITS: usize = 2048;

/// A token that can be located and opened for exclusive use
pub trait HardwareSigningDevice {
    type Session: DeviceSession;

    /// Find the attached token and open it.
    ///
    /// Fails with `DeviceNotFound` when nothing matches or the open
    /// itself fails. The returned session closes the token on drop.
    fn discover(&self) -> WalletResult<Self::Session>;
}

/// Operations available while a token is open
pub trait DeviceSession {
    /// Handle for the slot this session is configured to use.
    fn key_handle(&self) -> KeyHandle;

    /// Generate a fresh RSA-2048 key requiring PIN and touch on every use.
    ///
    /// Overwrites whatever the slot held before.
    fn provision_key(&mut self) -> WalletResult<KeyHandle>;

    /// Public half of the key in `key`'s slot.
    fn public_key(&mut self, key: &KeyHandle) -> WalletResult<RsaPublicKey>;

    /// RSA-PSS/SHA-256 signature over `digest`, which is used as the
    /// message hash as-is. May block until the operator touches the token.
    fn sign(&mut self, key: &KeyHandle, digest: &SigningDigest) -> WalletResult<Signature>;
}
