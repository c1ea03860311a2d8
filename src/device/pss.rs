//! EMSA-PSS encoding (RFC 8017, section 9.1.1) with SHA-256 and MGF1-SHA-256.
//!
//! PIV tokens only perform the raw RSA operation, so the padding is
//! applied on the host before the block is sent to the card.

use crate::error::WalletError;
use sha2::{Digest, Sha256};

/// Salt length, equal to the SHA-256 output size
pub const SALT_LEN: usize = 32;

const HASH_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum PssError {
    #[error("modulus of {0} bits is too small for PSS over SHA-256")]
    ModulusTooSmall(usize),
}

impl From<PssError> for WalletError {
    fn from(e: PssError) -> Self {
        WalletError::signing_failed("Failed to pad digest").with_details(e.to_string())
    }
}

/// Encode `m_hash` into a block of exactly `ceil(mod_bits / 8)` bytes,
/// ready for the raw private-key operation.
pub fn encode(m_hash: &[u8; HASH_LEN], salt: &[u8; SALT_LEN], mod_bits: usize) -> Result<Vec<u8>, PssError> {
    let em_bits = mod_bits.saturating_sub(1);
    let em_len = em_bits.div_ceil(8);
    let block_len = mod_bits.div_ceil(8);

    if em_len < HASH_LEN + SALT_LEN + 2 {
        return Err(PssError::ModulusTooSmall(mod_bits));
    }

    let h: [u8; HASH_LEN] = Sha256::new()
        .chain_update([0u8; 8])
        .chain_update(m_hash)
        .chain_update(salt)
        .finalize()
        .into();

    let db_len = em_len - HASH_LEN - 1;
    let mut db = vec![0u8; db_len];
    db[db_len - SALT_LEN - 1] = 0x01;
    db[db_len - SALT_LEN..].copy_from_slice(salt);

    for (byte, mask) in db.iter_mut().zip(mgf1(&h, db_len)) {
        *byte ^= mask;
    }
    db[0] &= 0xff >> (8 * em_len - em_bits);

    let mut block = Vec::with_capacity(block_len);
    block.resize(block_len - em_len, 0);
    block.extend_from_slice(&db);
    block.extend_from_slice(&h);
    block.push(0xbc);
    Ok(block)
}

fn mgf1(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + HASH_LEN);
    let mut counter: u32 = 0;
    while out.len() < len {
        let chunk = Sha256::new()
            .chain_update(seed)
            .chain_update(counter.to_be_bytes())
            .finalize();
        out.extend_from_slice(&chunk);
        counter += 1;
    }
    out.truncate(len);
    out
}
