//! Signer Configuration
//!
//! Settings for locating the hardware token, unlocking its key and
//! checking destination addresses. Defaults match a factory-fresh token
//! on mainnet; a JSON file and then command-line flags are layered on top.

use crate::error::{WalletError, WalletResult};
use crate::types::Slot;
use bitcoin::Network;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Factory PIN of a PIV token
pub const DEFAULT_PIN: &str = "123456";

/// Device family matched against reader names when no filter is given
pub const DEFAULT_READER_FILTER: &str = "yubikey";

/// PIV management keys are 3DES, 24 bytes
pub const MANAGEMENT_KEY_LEN: usize = 24;

/// Runtime configuration for the signing pipeline
pub struct SignerConfig {
    /// Case-insensitive substring a reader name must contain
    pub reader_filter: String,
    /// Slot holding the signing key
    pub slot: Slot,
    /// PIN presented before every signature
    pub pin: SecretString,
    /// Hex management key for provisioning; factory key when unset
    pub management_key: Option<Zeroizing<String>>,
    /// Network destination addresses must belong to
    pub network: Network,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            reader_filter: DEFAULT_READER_FILTER.to_string(),
            slot: Slot::default(),
            pin: SecretString::from(DEFAULT_PIN.to_string()),
            management_key: None,
            network: Network::Bitcoin,
        }
    }
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("reader_filter", &self.reader_filter)
            .field("slot", &self.slot)
            .field("pin", &"[REDACTED]")
            .field("management_key", &self.management_key.as_ref().map(|_| "[REDACTED]"))
            .field("network", &self.network)
            .finish()
    }
}

/// On-disk shape; every field optional so files only name what they change
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    reader_filter: Option<String>,
    slot: Option<Slot>,
    pin: Option<String>,
    management_key: Option<String>,
    network: Option<String>,
}

impl SignerConfig {
    pub fn from_json_str(json: &str) -> WalletResult<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let mut config = Self::default();

        if let Some(filter) = file.reader_filter {
            config.reader_filter = filter;
        }
        if let Some(slot) = file.slot {
            config.slot = slot;
        }
        if let Some(pin) = file.pin {
            config.pin = SecretString::from(pin);
        }
        if let Some(key) = file.management_key {
            config.management_key = Some(Zeroizing::new(key));
        }
        if let Some(network) = file.network {
            config.network = parse_network(&network)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> WalletResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            WalletError::invalid_config("Failed to read config file")
                .with_details(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_reader_filter(mut self, filter: impl Into<String>) -> Self {
        self.reader_filter = filter.into();
        self
    }

    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = SecretString::from(pin.into());
        self
    }

    pub fn with_management_key(mut self, key_hex: impl Into<String>) -> Self {
        self.management_key = Some(Zeroizing::new(key_hex.into()));
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Check PIN length and management key shape before any device I/O.
    pub fn validate(&self) -> WalletResult<()> {
        if self.reader_filter.trim().is_empty() {
            return Err(WalletError::invalid_config("Reader filter must not be empty"));
        }

        let pin_len = self.pin.expose_secret().len();
        if !(6..=8).contains(&pin_len) {
            return Err(WalletError::invalid_config("PIN must be 6 to 8 characters")
                .with_details(format!("got {} characters", pin_len)));
        }

        self.management_key_bytes()?;
        Ok(())
    }

    /// Decoded management key, or `None` for the factory default.
    pub fn management_key_bytes(&self) -> WalletResult<Option<Zeroizing<[u8; MANAGEMENT_KEY_LEN]>>> {
        let Some(key_hex) = self.management_key.as_ref() else {
            return Ok(None);
        };

        let decoded = Zeroizing::new(
            hex::decode(key_hex.trim())
                .map_err(|_| WalletError::invalid_config("Management key is not valid hex"))?,
        );
        let mut key = Zeroizing::new([0u8; MANAGEMENT_KEY_LEN]);
        if decoded.len() != MANAGEMENT_KEY_LEN {
            return Err(WalletError::invalid_config("Management key must be 24 bytes")
                .with_details(format!("got {} bytes", decoded.len())));
        }
        key.copy_from_slice(&decoded);
        Ok(Some(key))
    }
}

/// Parse a network name; `mainnet` is accepted as an alias of `bitcoin`.
pub fn parse_network(name: &str) -> WalletResult<Network> {
    let normalized = name.trim().to_lowercase();
    if normalized == "mainnet" {
        return Ok(Network::Bitcoin);
    }
    Network::from_str(&normalized)
        .map_err(|e| WalletError::invalid_config("Unknown network").with_details(e.to_string()))
}
