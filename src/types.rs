//! Shared types for the signing pipeline
//!
//! All data structures that cross module boundaries are defined here.
//! Transaction values are immutable once built; each stage consumes one
//! and hands a new one to the next.

use crate::error::{WalletError, WalletResult};
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Spend Reference
// =============================================================================

/// The single prior output consumed by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtxoReference {
    prior_hash: [u8; 32],
    output_index: u32,
}

impl UtxoReference {
    /// Decode a reference from a 64-character hex hash.
    ///
    /// The bytes are used in the order given, without the display-order
    /// reversal applied to txids.
    pub fn from_hex(hash_hex: &str, output_index: u32) -> WalletResult<Self> {
        let bytes = hex::decode(hash_hex)
            .map_err(|e| WalletError::invalid_utxo("UTXO hash is not valid hex").with_details(e.to_string()))?;

        let prior_hash: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            WalletError::invalid_utxo("UTXO hash must be exactly 32 bytes")
                .with_details(format!("got {} bytes", bytes.len()))
        })?;

        Ok(Self { prior_hash, output_index })
    }

    pub fn prior_hash(&self) -> &[u8; 32] {
        &self.prior_hash
    }

    pub fn output_index(&self) -> u32 {
        self.output_index
    }

    pub fn to_outpoint(&self) -> OutPoint {
        OutPoint::new(Txid::from_byte_array(self.prior_hash), self.output_index)
    }

    pub(crate) fn from_outpoint(outpoint: &OutPoint) -> Self {
        Self {
            prior_hash: outpoint.txid.to_byte_array(),
            output_index: outpoint.vout,
        }
    }
}

impl fmt::Display for UtxoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.prior_hash), self.output_index)
    }
}

// =============================================================================
// Digest and Signature
// =============================================================================

/// SHA-256 over the canonical bytes of an unsigned transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningDigest([u8; 32]);

impl SigningDigest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SigningDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Raw signature bytes as returned by a signing device
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

// =============================================================================
// Key Slots
// =============================================================================

/// PIV slot holding the signing key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Slot {
    /// 9a
    #[default]
    Authentication,
    /// 9c
    Signature,
    /// 9d
    KeyManagement,
    /// 9e
    CardAuthentication,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self {
            Slot::Authentication => "9a",
            Slot::Signature => "9c",
            Slot::KeyManagement => "9d",
            Slot::CardAuthentication => "9e",
        };
        f.write_str(id)
    }
}

impl std::str::FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "9a" | "authentication" => Ok(Slot::Authentication),
            "9c" | "signature" => Ok(Slot::Signature),
            "9d" | "key-management" => Ok(Slot::KeyManagement),
            "9e" | "card-authentication" => Ok(Slot::CardAuthentication),
            _ => Err(format!("Unknown PIV slot: {}", s)),
        }
    }
}

/// Opaque reference to a hardware-resident key.
///
/// Carries no key material, only where the key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    slot: Slot,
}

impl KeyHandle {
    /// Refer to a key previously provisioned into `slot`.
    pub fn in_slot(slot: Slot) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }
}

/// Key generation policy applied at provisioning time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    pub pin_always: bool,
    pub touch_always: bool,
}

impl KeyPolicy {
    /// PIN and touch on every use of the key.
    pub const STRICT: KeyPolicy = KeyPolicy {
        pin_always: true,
        touch_always: true,
    };
}

// =============================================================================
// Spend Request
// =============================================================================

/// Everything the operator supplies to spend one output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRequest {
    /// Hex hash of the transaction that created the output, byte order as given
    pub utxo_hash: String,
    pub utxo_index: u32,
    /// Destination address
    pub destination: String,
    /// Value of the spent output, in the smallest unit
    pub amount: i64,
    pub fee: i64,
}

// =============================================================================
// Transactions
// =============================================================================

/// A single-input, single-output transaction without authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub(crate) tx: Transaction,
}

impl UnsignedTransaction {
    /// The spent output, if the transaction has an input.
    pub fn input(&self) -> Option<UtxoReference> {
        self.tx
            .input
            .first()
            .map(|txin| UtxoReference::from_outpoint(&txin.previous_output))
    }

    /// Value locked to the destination, in the smallest unit.
    pub fn output_amount(&self) -> Option<i64> {
        self.tx.output.first().map(|out| out.value.to_sat() as i64)
    }

    pub fn locking_script(&self) -> Option<&ScriptBuf> {
        self.tx.output.first().map(|out| &out.script_pubkey)
    }

    pub fn as_transaction(&self) -> &Transaction {
        &self.tx
    }
}

/// An unsigned transaction whose sole input carries its unlocking payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedTransaction {
    pub(crate) tx: Transaction,
}

impl AuthorizedTransaction {
    pub fn unlocking_script(&self) -> &ScriptBuf {
        &self.tx.input[0].script_sig
    }

    pub fn input(&self) -> UtxoReference {
        UtxoReference::from_outpoint(&self.tx.input[0].previous_output)
    }

    pub fn output_amount(&self) -> i64 {
        self.tx.output[0].value.to_sat() as i64
    }

    pub fn locking_script(&self) -> &ScriptBuf {
        &self.tx.output[0].script_pubkey
    }

    pub fn as_transaction(&self) -> &Transaction {
        &self.tx
    }
}

/// Broadcast-ready lowercase hex encoding of an authorized transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    hex: String,
    txid: String,
}

impl WireTransaction {
    pub(crate) fn new(hex: String, txid: String) -> Self {
        Self { hex, txid }
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    pub fn into_string(self) -> String {
        self.hex
    }

    /// Transaction id in display (reversed) byte order.
    pub fn txid(&self) -> &str {
        &self.txid
    }
}

impl fmt::Display for WireTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_utxo_reference_keeps_byte_order() {
        let hash = format!("01{}", "00".repeat(31));
        let utxo = UtxoReference::from_hex(&hash, 7).unwrap();
        assert_eq!(utxo.prior_hash()[0], 0x01);
        assert_eq!(utxo.output_index(), 7);

        let outpoint = utxo.to_outpoint();
        assert_eq!(outpoint.txid.to_byte_array()[0], 0x01);
        assert_eq!(outpoint.vout, 7);
    }

    #[test]
    fn test_utxo_reference_rejects_bad_hex() {
        let err = UtxoReference::from_hex(&"zz".repeat(32), 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUtxoReference);

        let err = UtxoReference::from_hex(&"aa".repeat(31), 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUtxoReference);
        assert_eq!(err.details.as_deref(), Some("got 31 bytes"));

        let err = UtxoReference::from_hex("abc", 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUtxoReference);
    }

    #[test]
    fn test_utxo_reference_rejects_padding() {
        for padded in [format!(" {}", "aa".repeat(32)), format!("{}\n", "aa".repeat(32))] {
            let err = UtxoReference::from_hex(&padded, 0).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidUtxoReference);
        }
    }

    #[test]
    fn test_slot_parsing() {
        assert_eq!("9a".parse::<Slot>().unwrap(), Slot::Authentication);
        assert_eq!("Signature".parse::<Slot>().unwrap(), Slot::Signature);
        assert_eq!("key_management".parse::<Slot>().unwrap(), Slot::KeyManagement);
        assert!("9f".parse::<Slot>().is_err());
        assert_eq!(Slot::default().to_string(), "9a");
    }

    #[test]
    fn test_signature_debug_hides_bytes() {
        let sig = Signature::from_bytes(vec![0xde, 0xad]);
        assert_eq!(format!("{:?}", sig), "Signature(2 bytes)");
    }
}
