//! In-memory signing token
//!
//! Behaves like a PIV token with one RSA slot per [`Slot`], but keeps the
//! keys in process memory. Deterministic: key generation draws from a
//! seeded ChaCha20 stream and the PSS salt can be pinned. Every open,
//! close and device call is counted so callers can check session
//! discipline, and failures can be injected at each stage.

use super::{pss, DeviceSession, HardwareSigningDevice, KEY_BITS};
use crate::error::{WalletError, WalletResult};
use crate::types::{KeyHandle, Signature, SigningDigest, Slot};
use crate::utils::config::DEFAULT_PIN;
use crate::{log_debug, log_warn};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use subtle::ConstantTimeEq;

/// Failure the fake token raises on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// `discover` finds nothing
    NotFound,
    /// Key generation errors out
    ProvisioningFails,
    /// The operator never touches the token
    PresenceTimeout,
    /// The card rejects the private-key operation
    SigningFails,
    /// Reading the slot's public key fails even though the slot holds a key
    PublicKeyUnreadable,
}

/// Counters observed by tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub opens: usize,
    pub closes: usize,
    pub device_calls: usize,
    pub signatures: usize,
}

struct MemoryToken {
    token_pin: String,
    presented_pin: String,
    slot: Slot,
    keys: HashMap<Slot, RsaPrivateKey>,
    fixed_salt: Option<[u8; pss::SALT_LEN]>,
    failure: Option<InjectedFailure>,
    session_open: bool,
    stats: DeviceStats,
    rng: ChaCha20Rng,
}

/// Deterministic fake token
#[derive(Clone)]
pub struct MemoryDevice {
    token: Arc<Mutex<MemoryToken>>,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDevice {
    /// Attached token with empty slots and the factory PIN.
    pub fn new() -> Self {
        Self {
            token: Arc::new(Mutex::new(MemoryToken {
                token_pin: DEFAULT_PIN.to_string(),
                presented_pin: DEFAULT_PIN.to_string(),
                slot: Slot::default(),
                keys: HashMap::new(),
                fixed_salt: None,
                failure: None,
                session_open: false,
                stats: DeviceStats::default(),
                rng: ChaCha20Rng::seed_from_u64(0),
            })),
        }
    }

    /// Pre-load `key` into `slot` and make it the slot sessions use.
    pub fn with_key(self, slot: Slot, key: RsaPrivateKey) -> Self {
        {
            let mut token = self.lock();
            token.keys.insert(slot, key);
            token.slot = slot;
        }
        self
    }

    /// Slot sessions use for provisioning and signing.
    pub fn with_slot(self, slot: Slot) -> Self {
        self.lock().slot = slot;
        self
    }

    /// PIN the operator presents; differs from the token PIN to simulate a typo.
    pub fn with_presented_pin(self, pin: impl Into<String>) -> Self {
        self.lock().presented_pin = pin.into();
        self
    }

    /// Use a constant PSS salt so signatures are byte-for-byte reproducible.
    pub fn with_fixed_salt(self, salt: [u8; pss::SALT_LEN]) -> Self {
        self.lock().fixed_salt = Some(salt);
        self
    }

    /// Seed for key generation and random salts.
    pub fn with_seed(self, seed: u64) -> Self {
        self.lock().rng = ChaCha20Rng::seed_from_u64(seed);
        self
    }

    pub fn fail_with(self, failure: InjectedFailure) -> Self {
        self.lock().failure = Some(failure);
        self
    }

    pub fn stats(&self) -> DeviceStats {
        self.lock().stats
    }

    pub fn is_open(&self) -> bool {
        self.lock().session_open
    }

    fn lock(&self) -> MutexGuard<'_, MemoryToken> {
        // A panic while holding the lock only happens in a failing test
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HardwareSigningDevice for MemoryDevice {
    type Session = MemorySession;

    fn discover(&self) -> WalletResult<MemorySession> {
        let mut token = self.lock();

        if token.failure == Some(InjectedFailure::NotFound) {
            return Err(WalletError::device_not_found("No attached token matches the reader filter")
                .with_details("memory"));
        }
        if token.session_open {
            return Err(WalletError::device_not_found("Token is already opened by another session"));
        }

        token.session_open = true;
        token.stats.opens += 1;
        let slot = token.slot;
        log_debug!("device::memory", "Session opened", slot = slot);

        Ok(MemorySession {
            device: self.clone(),
            slot,
        })
    }
}

/// Open session on a [`MemoryDevice`]; closes on drop
pub struct MemorySession {
    device: MemoryDevice,
    slot: Slot,
}

impl MemorySession {
    fn token(&self) -> MutexGuard<'_, MemoryToken> {
        let mut token = self.device.lock();
        token.stats.device_calls += 1;
        token
    }
}

impl DeviceSession for MemorySession {
    fn key_handle(&self) -> KeyHandle {
        KeyHandle::in_slot(self.slot)
    }

    fn provision_key(&mut self) -> WalletResult<KeyHandle> {
        let mut token = self.token();

        if token.failure == Some(InjectedFailure::ProvisioningFails) {
            return Err(WalletError::provisioning_failed("Failed to generate key")
                .with_details("injected failure"));
        }

        let key = RsaPrivateKey::new(&mut token.rng, KEY_BITS)
            .map_err(|e| WalletError::provisioning_failed("Failed to generate key").with_details(e.to_string()))?;
        token.keys.insert(self.slot, key);

        log_debug!("device::memory", "Key provisioned", slot = self.slot);
        Ok(KeyHandle::in_slot(self.slot))
    }

    fn public_key(&mut self, key: &KeyHandle) -> WalletResult<RsaPublicKey> {
        let token = self.token();

        if token.failure == Some(InjectedFailure::PublicKeyUnreadable) {
            return Err(WalletError::key_not_provisioned("Slot key is unreadable")
                .with_details("injected failure"));
        }

        token
            .keys
            .get(&key.slot())
            .map(RsaPrivateKey::to_public_key)
            .ok_or_else(|| {
                WalletError::key_not_provisioned("Slot holds no key").with_details(key.slot().to_string())
            })
    }

    fn sign(&mut self, key: &KeyHandle, digest: &SigningDigest) -> WalletResult<Signature> {
        let mut token = self.token();

        let private_key = token.keys.get(&key.slot()).cloned().ok_or_else(|| {
            WalletError::key_not_provisioned("Slot holds no key").with_details(key.slot().to_string())
        })?;

        let pin_ok: bool = token.token_pin.as_bytes().ct_eq(token.presented_pin.as_bytes()).into();
        if !pin_ok {
            log_warn!("device::memory", "PIN rejected", slot = key.slot());
            return Err(WalletError::authentication_required("PIN verification failed"));
        }

        match token.failure {
            Some(InjectedFailure::PresenceTimeout) => {
                return Err(WalletError::presence_timeout("Touch was not confirmed in time"));
            }
            Some(InjectedFailure::SigningFails) => {
                return Err(WalletError::signing_failed("Private key operation failed")
                    .with_details("injected failure"));
            }
            _ => {}
        }

        let salt = match token.fixed_salt {
            Some(salt) => salt,
            None => {
                let mut salt = [0u8; pss::SALT_LEN];
                token.rng.fill_bytes(&mut salt);
                salt
            }
        };

        let block = pss::encode(digest.as_bytes(), &salt, private_key.n().bits())?;
        let raw = raw_private_op(&private_key, &block);
        token.stats.signatures += 1;

        Ok(Signature::from_bytes(raw))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut token = self.device.lock();
        token.session_open = false;
        token.stats.closes += 1;
        log_debug!("device::memory", "Session closed", slot = self.slot);
    }
}

/// `block^d mod n`, left-padded to the modulus length.
fn raw_private_op(key: &RsaPrivateKey, block: &[u8]) -> Vec<u8> {
    let raw = BigUint::from_bytes_be(block).modpow(key.d(), key.n()).to_bytes_be();
    let mut out = vec![0u8; key.size().saturating_sub(raw.len())];
    out.extend_from_slice(&raw);
    out
}
