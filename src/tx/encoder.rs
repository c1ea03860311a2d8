//! Signature Encoder
//!
//! Binds a device signature and the signer's public key to the sole input
//! of an unsigned transaction. Pure data transformation.

use crate::error::{WalletError, WalletResult};
use crate::tx::builder::signing_digest;
use crate::types::*;
use crate::{log_debug, log_info};
use bitcoin::script::{Instruction, PushBytesBuf};
use bitcoin::ScriptBuf;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pss, RsaPublicKey};
use sha2::Sha256;

/// Largest single data push a script may carry.
pub const MAX_PUSH_SIZE: usize = 520;

/// Attach `signature` and `public_key` as the unlocking payload of the
/// transaction's sole input.
///
/// The payload is two pushes: the raw signature, then the SPKI DER
/// encoding of the public key.
pub fn attach(
    transaction: &UnsignedTransaction,
    signature: &Signature,
    public_key: &RsaPublicKey,
) -> WalletResult<AuthorizedTransaction> {
    if transaction.tx.input.is_empty() {
        return Err(WalletError::no_inputs("Transaction has no inputs to attach"));
    }

    let key_der = encode_public_key(public_key)?;
    let unlocking_script = ScriptBuf::builder()
        .push_slice(push_bytes("signature", signature.as_bytes())?)
        .push_slice(push_bytes("public key", &key_der)?)
        .into_script();

    log_debug!(
        "tx::encoder",
        "Unlocking payload assembled",
        signature_len = signature.len(),
        key_len = key_der.len(),
        script_len = unlocking_script.len(),
    );

    let mut tx = transaction.tx.clone();
    tx.input[0].script_sig = unlocking_script;

    log_info!("tx::encoder", "Signature attached", inputs = tx.input.len());
    Ok(AuthorizedTransaction { tx })
}

/// SubjectPublicKeyInfo DER encoding of an RSA public key.
pub fn encode_public_key(public_key: &RsaPublicKey) -> WalletResult<Vec<u8>> {
    public_key
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| WalletError::encoding_failed("Failed to encode public key").with_details(e.to_string()))
}

/// Check an authorized transaction offline.
///
/// The embedded key must equal `expected_key` and the embedded signature
/// must verify as RSA-PSS/SHA-256 over the digest of the transaction with
/// its unlocking payload removed.
pub fn verify_authorization(
    authorized: &AuthorizedTransaction,
    expected_key: &RsaPublicKey,
) -> WalletResult<()> {
    let (signature, key_der) = split_payload(authorized.unlocking_script())?;

    let embedded_key = RsaPublicKey::from_public_key_der(&key_der).map_err(|e| {
        WalletError::verification_failed("Embedded public key does not decode").with_details(e.to_string())
    })?;
    if &embedded_key != expected_key {
        return Err(WalletError::verification_failed(
            "Embedded public key does not match the signing key",
        ));
    }

    let mut unsigned = authorized.tx.clone();
    unsigned.input[0].script_sig = ScriptBuf::new();
    let digest = signing_digest(&unsigned);

    expected_key
        .verify(Pss::new::<Sha256>(), digest.as_bytes(), &signature)
        .map_err(|e| {
            WalletError::verification_failed("Signature does not verify against the transaction digest")
                .with_details(e.to_string())
        })?;

    log_debug!("tx::encoder", "Authorization verified", digest = digest);
    Ok(())
}

/// Split an unlocking payload into its signature and key pushes.
pub fn split_payload(script: &ScriptBuf) -> WalletResult<(Vec<u8>, Vec<u8>)> {
    let mut pushes = Vec::with_capacity(2);
    for instruction in script.instructions() {
        match instruction {
            Ok(Instruction::PushBytes(bytes)) => pushes.push(bytes.as_bytes().to_vec()),
            Ok(Instruction::Op(op)) => {
                return Err(WalletError::verification_failed("Unlocking payload contains an opcode")
                    .with_details(op.to_string()))
            }
            Err(e) => {
                return Err(WalletError::verification_failed("Unlocking payload is malformed")
                    .with_details(e.to_string()))
            }
        }
    }

    match <[Vec<u8>; 2]>::try_from(pushes) {
        Ok([signature, key]) => Ok((signature, key)),
        Err(pushes) => Err(WalletError::verification_failed("Unlocking payload must hold two pushes")
            .with_details(format!("found {}", pushes.len()))),
    }
}

fn push_bytes(what: &str, data: &[u8]) -> WalletResult<PushBytesBuf> {
    if data.len() > MAX_PUSH_SIZE {
        return Err(WalletError::encoding_failed(format!("{} exceeds the script push limit", what))
            .with_details(format!("{} > {} bytes", data.len(), MAX_PUSH_SIZE)));
    }
    PushBytesBuf::try_from(data.to_vec())
        .map_err(|e| WalletError::encoding_failed(format!("Failed to push {}", what)).with_details(e.to_string()))
}
