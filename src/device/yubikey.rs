//! YubiKey PIV backend
//!
//! Talks to the token's PIV applet over PC/SC. The card holds an RSA-2048
//! key generated on-device with PIN-always and touch-always policies; the
//! host pads the digest and the card performs the raw private-key operation.

use super::{pss, DeviceSession, HardwareSigningDevice, KEY_BITS};
use crate::error::{WalletError, WalletResult};
use crate::types::{KeyHandle, KeyPolicy, Signature, SigningDigest, Slot};
use crate::utils::config::{SignerConfig, MANAGEMENT_KEY_LEN};
use crate::{log_debug, log_info, log_warn};
use ::yubikey::piv::{self, AlgorithmId, SlotId};
use ::yubikey::{reader::Context, MgmKey, PinPolicy, TouchPolicy, YubiKey};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::der::Encode;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

/// PIV token located by reader name
pub struct YubiKeyDevice {
    reader_filter: String,
    slot: Slot,
    pin: SecretString,
    management_key: Option<Zeroizing<[u8; MANAGEMENT_KEY_LEN]>>,
}

impl YubiKeyDevice {
    pub fn new(config: &SignerConfig) -> WalletResult<Self> {
        config.validate()?;
        Ok(Self {
            reader_filter: config.reader_filter.to_lowercase(),
            slot: config.slot,
            pin: SecretString::from(config.pin.expose_secret().to_string()),
            management_key: config.management_key_bytes()?,
        })
    }
}

impl HardwareSigningDevice for YubiKeyDevice {
    type Session = YubiKeySession;

    fn discover(&self) -> WalletResult<YubiKeySession> {
        let mut context = Context::open().map_err(|e| {
            WalletError::device_not_found("PC/SC service unavailable").with_details(e.to_string())
        })?;
        let readers = context.iter().map_err(|e| {
            WalletError::device_not_found("Failed to list smart card readers").with_details(e.to_string())
        })?;

        for reader in readers {
            let name = reader.name().to_string();
            if !name.to_lowercase().contains(&self.reader_filter) {
                log_debug!("device::yubikey", "Skipping reader", reader = name);
                continue;
            }

            let yubikey = reader.open().map_err(|e| {
                WalletError::device_not_found("Failed to open token")
                    .with_details(format!("{}: {}", name, e))
            })?;

            log_info!("device::yubikey", "Session opened", reader = name, slot = self.slot);
            return Ok(YubiKeySession {
                yubikey,
                reader: name,
                slot: self.slot,
                pin: SecretString::from(self.pin.expose_secret().to_string()),
                management_key: self.management_key.clone(),
                provisioned: None,
            });
        }

        Err(WalletError::device_not_found("No attached token matches the reader filter")
            .with_details(self.reader_filter.clone()))
    }
}

/// Open PIV session; the card handle is released on drop
pub struct YubiKeySession {
    yubikey: YubiKey,
    reader: String,
    slot: Slot,
    pin: SecretString,
    management_key: Option<Zeroizing<[u8; MANAGEMENT_KEY_LEN]>>,
    provisioned: Option<RsaPublicKey>,
}

impl YubiKeySession {
    fn management_key(&self) -> WalletResult<MgmKey> {
        match self.management_key.as_ref() {
            Some(bytes) => MgmKey::new(**bytes).map_err(|e| {
                WalletError::invalid_config("Management key rejected").with_details(e.to_string())
            }),
            None => Ok(MgmKey::default()),
        }
    }
}

impl DeviceSession for YubiKeySession {
    fn key_handle(&self) -> KeyHandle {
        KeyHandle::in_slot(self.slot)
    }

    fn provision_key(&mut self) -> WalletResult<KeyHandle> {
        let management_key = self.management_key()?;
        self.yubikey
            .authenticate(management_key)
            .map_err(|e| provisioning_error("Management key authentication failed", e))?;

        let spki = piv::generate(
            &mut self.yubikey,
            slot_id(self.slot),
            AlgorithmId::Rsa2048,
            pin_policy(KeyPolicy::STRICT),
            touch_policy(KeyPolicy::STRICT),
        )
        .map_err(|e| provisioning_error("Failed to generate key", e))?;

        let der = spki.to_der().map_err(|e| {
            WalletError::provisioning_failed("Token returned a malformed public key").with_details(e.to_string())
        })?;
        self.provisioned = Some(decode_public_key(&der)?);

        log_info!("device::yubikey", "Key provisioned", slot = self.slot);
        Ok(KeyHandle::in_slot(self.slot))
    }

    fn public_key(&mut self, key: &KeyHandle) -> WalletResult<RsaPublicKey> {
        if key.slot() == self.slot {
            if let Some(public_key) = self.provisioned.as_ref() {
                return Ok(public_key.clone());
            }
        }

        let metadata = piv::metadata(&mut self.yubikey, slot_id(key.slot())).map_err(|e| {
            WalletError::key_not_provisioned("Slot holds no key")
                .with_details(format!("{}: {}", key.slot(), e))
        })?;
        let spki = metadata.public.ok_or_else(|| {
            WalletError::key_not_provisioned("Slot holds no key").with_details(key.slot().to_string())
        })?;
        let der = spki
            .to_der()
            .map_err(|e| WalletError::key_not_provisioned("Slot key is unreadable").with_details(e.to_string()))?;

        decode_public_key(&der)
    }

    fn sign(&mut self, key: &KeyHandle, digest: &SigningDigest) -> WalletResult<Signature> {
        let public_key = self.public_key(key)?;
        let mod_bits = public_key.n().bits();
        if mod_bits != KEY_BITS {
            return Err(WalletError::key_not_provisioned("Slot key is not RSA-2048")
                .with_details(format!("{} bits", mod_bits)));
        }

        self.yubikey
            .verify_pin(self.pin.expose_secret().as_bytes())
            .map_err(pin_error)?;

        let mut salt = [0u8; pss::SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let block = Zeroizing::new(pss::encode(digest.as_bytes(), &salt, mod_bits)?);

        log_debug!("device::yubikey", "Waiting for touch", slot = key.slot(), digest = digest);
        let raw = piv::sign_data(&mut self.yubikey, &block, AlgorithmId::Rsa2048, slot_id(key.slot()))
            .map_err(sign_error)?;

        Ok(Signature::from_bytes(raw.to_vec()))
    }
}

impl Drop for YubiKeySession {
    fn drop(&mut self) {
        log_debug!("device::yubikey", "Session closed", reader = self.reader);
    }
}

fn slot_id(slot: Slot) -> SlotId {
    match slot {
        Slot::Authentication => SlotId::Authentication,
        Slot::Signature => SlotId::Signature,
        Slot::KeyManagement => SlotId::KeyManagement,
        Slot::CardAuthentication => SlotId::CardAuthentication,
    }
}

fn pin_policy(policy: KeyPolicy) -> PinPolicy {
    if policy.pin_always {
        PinPolicy::Always
    } else {
        PinPolicy::Once
    }
}

fn touch_policy(policy: KeyPolicy) -> TouchPolicy {
    if policy.touch_always {
        TouchPolicy::Always
    } else {
        TouchPolicy::Never
    }
}

fn decode_public_key(der: &[u8]) -> WalletResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| {
        WalletError::key_not_provisioned("Slot does not hold an RSA key").with_details(e.to_string())
    })
}

fn provisioning_error(message: &str, e: ::yubikey::Error) -> WalletError {
    WalletError::provisioning_failed(message).with_details(e.to_string())
}

fn pin_error(e: ::yubikey::Error) -> WalletError {
    match e {
        ::yubikey::Error::WrongPin { tries } => {
            log_warn!("device::yubikey", "PIN rejected", tries_left = tries);
            WalletError::authentication_required("PIN verification failed")
                .with_details(format!("{} tries left", tries))
        }
        ::yubikey::Error::PinLocked => WalletError::authentication_required("PIN is blocked"),
        other => WalletError::authentication_required("PIN verification failed").with_details(other.to_string()),
    }
}

/// The PIN is already verified when `sign_data` runs, so an authentication
/// status here means the touch was never confirmed.
fn sign_error(e: ::yubikey::Error) -> WalletError {
    match e {
        ::yubikey::Error::AuthenticationError => {
            WalletError::presence_timeout("Touch was not confirmed in time")
        }
        other => WalletError::signing_failed("Private key operation failed").with_details(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_slot_mapping() {
        assert_eq!(slot_id(Slot::Authentication), SlotId::Authentication);
        assert_eq!(slot_id(Slot::Signature), SlotId::Signature);
        assert_eq!(slot_id(Slot::KeyManagement), SlotId::KeyManagement);
        assert_eq!(slot_id(Slot::CardAuthentication), SlotId::CardAuthentication);
    }

    #[test]
    fn test_strict_policy_requires_pin_and_touch() {
        assert!(matches!(pin_policy(KeyPolicy::STRICT), PinPolicy::Always));
        assert!(matches!(touch_policy(KeyPolicy::STRICT), TouchPolicy::Always));
    }

    #[test]
    fn test_pin_errors_need_authentication() {
        let err = pin_error(::yubikey::Error::WrongPin { tries: 2 });
        assert_eq!(err.code, ErrorCode::AuthenticationRequired);
        assert_eq!(err.details.as_deref(), Some("2 tries left"));
        assert_eq!(pin_error(::yubikey::Error::PinLocked).code, ErrorCode::AuthenticationRequired);
    }

    #[test]
    fn test_sign_errors() {
        assert_eq!(
            sign_error(::yubikey::Error::AuthenticationError).code,
            ErrorCode::UserPresenceTimeout
        );
        assert_eq!(sign_error(::yubikey::Error::GenericError).code, ErrorCode::SigningFailed);
    }

    #[test]
    fn test_invalid_config_rejected_before_io() {
        let config = SignerConfig::default().with_pin("12");
        assert_eq!(YubiKeyDevice::new(&config).err().unwrap().code, ErrorCode::InvalidConfig);
    }

    #[test]
    #[ignore = "requires an attached YubiKey with factory PIN and management key"]
    fn test_hardware_provision_and_sign() {
        use rsa::Pss;
        use sha2::Sha256;

        let device = YubiKeyDevice::new(&SignerConfig::default().with_slot(Slot::Signature)).unwrap();
        let mut session = device.discover().unwrap();
        let handle = session.provision_key().unwrap();
        let public_key = session.public_key(&handle).unwrap();

        let digest = SigningDigest::from_bytes([0x42; 32]);
        let signature = session.sign(&handle, &digest).unwrap();
        public_key
            .verify(Pss::new::<Sha256>(), digest.as_bytes(), signature.as_bytes())
            .unwrap();
    }
}
