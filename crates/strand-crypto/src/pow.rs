//! Proof-of-work stamps gating peer identities.
//!
//! A stamp is a 24-byte nonce attached to a public key. The identity is
//! acceptable when `BLAKE3(public_key ‖ stamp)` starts with at least
//! `target_bits` zero bits. Stamps are mined once per identity and sent
//! in cleartext inside the connection message.

use crate::POW_STAMP_SIZE;
use crate::keys::PublicKey;

/// A mined proof-of-work stamp for one public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWorkStamp([u8; POW_STAMP_SIZE]);

impl ProofOfWorkStamp {
    /// The all-zero stamp, where mining starts.
    pub const ZERO: Self = Self([0u8; POW_STAMP_SIZE]);

    /// Construct from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; POW_STAMP_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; POW_STAMP_SIZE] {
        &self.0
    }

    /// Mine a stamp for `public_key` meeting `target_bits`.
    ///
    /// Walks the stamp space by big-endian increment from zero. Expected
    /// work is `2^target_bits` hashes; targets above ~30 bits take
    /// minutes.
    #[must_use]
    pub fn generate(public_key: &PublicKey, target_bits: f64) -> Self {
        let mut stamp = Self::ZERO;
        loop {
            if check_proof_of_work(public_key, &stamp, target_bits) {
                return stamp;
            }
            stamp = stamp.next();
        }
    }

    fn next(&self) -> Self {
        let mut bytes = self.0;
        for byte in bytes.iter_mut().rev() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }
        Self(bytes)
    }
}

impl std::fmt::Debug for ProofOfWorkStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProofOfWorkStamp({})", hex::encode(self.0))
    }
}

/// Check that `stamp` proves enough work for `public_key`.
///
/// A target of `0.0` accepts every stamp.
#[must_use]
pub fn check_proof_of_work(
    public_key: &PublicKey,
    stamp: &ProofOfWorkStamp,
    target_bits: f64,
) -> bool {
    if target_bits <= 0.0 {
        return true;
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(public_key.as_bytes());
    hasher.update(stamp.as_bytes());
    let hash = hasher.finalize();

    u32::try_from(target_bits.ceil() as i64)
        .map(|required| leading_zero_bits(hash.as_bytes()) >= required)
        .unwrap_or(false)
}

fn leading_zero_bits(bytes: &[u8; 32]) -> u32 {
    let mut count = 0;
    for byte in bytes {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros();
            break;
        }
    }
    count
}
