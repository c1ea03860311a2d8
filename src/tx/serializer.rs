//! Wire Serializer
//!
//! Canonical consensus encoding of an authorized transaction, rendered as
//! lowercase hex, and the matching parser for checking what was produced.

use crate::error::{WalletError, WalletResult};
use crate::log_info;
use crate::types::*;
use bitcoin::consensus::encode;
use bitcoin::Transaction;

/// Encode `transaction` into its broadcast-ready hex form.
pub fn to_wire_format(transaction: &AuthorizedTransaction) -> WalletResult<WireTransaction> {
    let tx = transaction.as_transaction();
    if tx.input.is_empty() || tx.output.is_empty() {
        return Err(WalletError::serialization("Refusing to serialize a transaction without inputs or outputs"));
    }

    let mut bytes = Vec::with_capacity(tx.total_size());
    encode::Encodable::consensus_encode(tx, &mut bytes)
        .map_err(|e| WalletError::serialization("Failed to serialize transaction").with_details(e.to_string()))?;

    let wire = WireTransaction::new(hex::encode(&bytes), tx.compute_txid().to_string());
    log_info!(
        "tx::serializer",
        "Transaction ready to broadcast",
        txid = wire.txid(),
        size = bytes.len(),
    );
    Ok(wire)
}

/// Decode a wire hex string back into a transaction.
pub fn parse_wire_format(raw_hex: &str) -> WalletResult<Transaction> {
    let raw_bytes = hex::decode(raw_hex.trim())
        .map_err(|e| WalletError::parse_error("Invalid hex").with_details(e.to_string()))?;

    encode::deserialize(&raw_bytes)
        .map_err(|e| WalletError::parse_error("Invalid transaction").with_details(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::tx::{attach, construct};
    use bitcoin::Network;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::RsaPrivateKey;

    const TEST_KEY_PEM: &str = include_str!("../../tests/fixtures/rsa2048.pem");

    fn authorized() -> AuthorizedTransaction {
        let key = RsaPrivateKey::from_pkcs8_pem(TEST_KEY_PEM).unwrap().to_public_key();
        let (tx, _) = construct(
            &"aa".repeat(32),
            0,
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            100_000,
            1_000,
            Network::Bitcoin,
        )
        .unwrap();
        attach(&tx, &Signature::from_bytes(vec![0x42; 256]), &key).unwrap()
    }

    #[test]
    fn test_wire_format_is_lowercase_hex() {
        let wire = to_wire_format(&authorized()).unwrap();
        assert!(wire.as_str().chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert!(wire.as_str().starts_with("01000000"));
        assert!(wire.as_str().ends_with("00000000"));
    }

    #[test]
    fn test_serialize_twice_is_identical() {
        let tx = authorized();
        assert_eq!(to_wire_format(&tx).unwrap(), to_wire_format(&tx).unwrap());
    }

    #[test]
    fn test_parse_round_trip() {
        let tx = authorized();
        let wire = to_wire_format(&tx).unwrap();
        let parsed = parse_wire_format(wire.as_str()).unwrap();

        assert_eq!(&parsed, tx.as_transaction());
        assert_eq!(parsed.compute_txid().to_string(), wire.txid());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_wire_format("xyz").unwrap_err().code, ErrorCode::ParseError);
        assert_eq!(parse_wire_format("0100").unwrap_err().code, ErrorCode::ParseError);
    }
}
