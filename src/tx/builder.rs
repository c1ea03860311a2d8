//! Transaction Builder
//!
//! Constructs the unsigned single-input, single-output transaction and the
//! digest handed to the signing device. Pure: never touches a device.

use crate::error::{WalletError, WalletResult};
use crate::types::*;
use crate::{log_debug, log_info, log_warn};
use bitcoin::{
    absolute::LockTime, consensus::encode, transaction::Version, Address, Amount, Network,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Build the unsigned transaction spending `utxo_hash:utxo_index` to
/// `destination`, locking `amount - fee`.
///
/// Validation order is fixed: UTXO hash, then amounts, then destination.
pub fn construct(
    utxo_hash: &str,
    utxo_index: u32,
    destination: &str,
    amount: i64,
    fee: i64,
    network: Network,
) -> WalletResult<(UnsignedTransaction, SigningDigest)> {
    let utxo = UtxoReference::from_hex(utxo_hash, utxo_index).inspect_err(|e| {
        log_warn!("tx::builder", "Rejected UTXO reference", reason = e.message);
    })?;

    let output_amount = output_amount(amount, fee)?;
    let locking_script = locking_script(destination, network)?;

    let tx = Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: utxo.to_outpoint(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(output_amount as u64),
            script_pubkey: locking_script,
        }],
    };

    let digest = signing_digest(&tx);

    log_info!(
        "tx::builder",
        "Unsigned transaction built",
        utxo = utxo,
        destination = destination,
        output_amount = output_amount,
        digest = digest,
    );

    Ok((UnsignedTransaction { tx }, digest))
}

/// SHA-256 over the canonical serialization of the unsigned transaction.
pub fn signing_digest(tx: &Transaction) -> SigningDigest {
    let bytes = encode::serialize(tx);
    log_debug!("tx::builder", "Hashing unsigned transaction", size = bytes.len());
    SigningDigest::from_bytes(Sha256::digest(&bytes).into())
}

fn output_amount(amount: i64, fee: i64) -> WalletResult<i64> {
    if amount < 0 || fee < 0 {
        return Err(WalletError::invalid_amount("Amount and fee must not be negative")
            .with_details(format!("amount={} fee={}", amount, fee)));
    }

    if amount <= fee {
        return Err(WalletError::fee_exceeds_amount("Fee exceeds amount")
            .with_details(format!("amount={} fee={}", amount, fee)));
    }

    Ok(amount - fee)
}

fn locking_script(destination: &str, network: Network) -> WalletResult<ScriptBuf> {
    let address = Address::from_str(destination)
        .map_err(|e| WalletError::invalid_destination("Invalid recipient address").with_details(e.to_string()))?
        .require_network(network)
        .map_err(|e| {
            WalletError::invalid_destination("Recipient address is for another network")
                .with_details(e.to_string())
        })?;

    if !address.is_spend_standard() {
        return Err(WalletError::script_construction(
            "Recipient address does not map to a standard locking script",
        )
        .with_details(destination.to_string()));
    }

    Ok(address.script_pubkey())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const GENESIS_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn utxo_hash() -> String {
        "aa".repeat(32)
    }

    #[test]
    fn test_construct_locks_amount_minus_fee() {
        let (tx, _) = construct(&utxo_hash(), 0, GENESIS_ADDRESS, 100_000, 1_000, Network::Bitcoin).unwrap();

        assert_eq!(tx.output_amount(), Some(99_000));
        assert_eq!(tx.as_transaction().input.len(), 1);
        assert_eq!(tx.as_transaction().output.len(), 1);
        assert!(tx.as_transaction().input[0].script_sig.is_empty());
        assert_eq!(
            hex::encode(tx.locking_script().unwrap().as_bytes()),
            "76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac"
        );
    }

    #[test]
    fn test_digest_is_sha256_of_canonical_bytes() {
        let (tx, digest) = construct(&utxo_hash(), 0, GENESIS_ADDRESS, 100_000, 1_000, Network::Bitcoin).unwrap();

        let bytes = encode::serialize(tx.as_transaction());
        assert_eq!(
            hex::encode(&bytes),
            "0100000001aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\
             0000000000ffffffff01b8820100000000001976a91462e907b15cbf27d5425399ebf6f0fb50\
             ebb88f1888ac00000000"
        );
        assert_eq!(
            digest.to_hex(),
            "be0220769dddb83bd8284f39c7c68be9cea3eb31b2681c07876065f8d7603639"
        );
    }

    #[test]
    fn test_construct_is_deterministic() {
        let first = construct(&utxo_hash(), 3, GENESIS_ADDRESS, 5_000, 100, Network::Bitcoin).unwrap();
        let second = construct(&utxo_hash(), 3, GENESIS_ADDRESS, 5_000, 100, Network::Bitcoin).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fee_exceeds_amount() {
        let err = construct(&utxo_hash(), 0, GENESIS_ADDRESS, 500, 1_000, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::FeeExceedsAmount);

        let err = construct(&utxo_hash(), 0, GENESIS_ADDRESS, 1_000, 1_000, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::FeeExceedsAmount);
    }

    #[test]
    fn test_negative_values_rejected() {
        let err = construct(&utxo_hash(), 0, GENESIS_ADDRESS, 1_000, -1, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAmount);
    }

    #[test]
    fn test_utxo_checked_before_destination() {
        let err = construct("not-hex", 0, "garbage", 500, 1_000, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUtxoReference);
    }

    #[test]
    fn test_fee_checked_before_destination() {
        let err = construct(&utxo_hash(), 0, "garbage", 500, 1_000, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::FeeExceedsAmount);
    }

    #[test]
    fn test_invalid_destination() {
        let err = construct(&utxo_hash(), 0, "garbage", 100_000, 1_000, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDestination);
    }

    #[test]
    fn test_whitespace_is_not_stripped() {
        let padded_hash = format!("  {}\n", utxo_hash());
        let err = construct(&padded_hash, 0, GENESIS_ADDRESS, 100_000, 1_000, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUtxoReference);

        let padded_address = format!(" {}\t", GENESIS_ADDRESS);
        let err = construct(&utxo_hash(), 0, &padded_address, 100_000, 1_000, Network::Bitcoin).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDestination);
    }

    #[test]
    fn test_destination_network_mismatch() {
        let err = construct(&utxo_hash(), 0, GENESIS_ADDRESS, 100_000, 1_000, Network::Testnet).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDestination);
    }

    #[test]
    fn test_segwit_destination() {
        let (tx, _) = construct(
            &utxo_hash(),
            1,
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            10_000,
            500,
            Network::Bitcoin,
        )
        .unwrap();
        assert!(tx.locking_script().unwrap().is_p2wpkh());
        assert_eq!(tx.input().unwrap().output_index(), 1);
    }
}
