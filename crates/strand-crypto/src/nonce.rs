//! Message nonces and deterministic nonce derivation.
//!
//! Each direction of a connection carries its own 192-bit counter nonce.
//! The initial pair is derived from the two cleartext handshake frames so
//! that both peers compute mirrored `(local, remote)` values without any
//! further exchange. Every sealed chunk advances the relevant counter by
//! exactly one.

use crate::NONCE_SIZE;
use crate::error::CryptoError;
use crate::random::fill_random;

/// Direction tag for the initiator-to-responder nonce derivation
const CONTEXT_INIT_TO_RESP: &[u8] = b"strand v1 nonce init->resp";

/// Direction tag for the responder-to-initiator nonce derivation
const CONTEXT_RESP_TO_INIT: &[u8] = b"strand v1 nonce resp->init";

/// A 24-byte XChaCha20-Poly1305 nonce, treated as a big-endian counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

/// The initial `(local, remote)` nonces of one side of a connection.
#[derive(Clone, Copy, Debug)]
pub struct NoncePair {
    /// Nonce for chunks this side sends
    pub local: Nonce,
    /// Nonce for chunks this side receives
    pub remote: Nonce,
}

impl Nonce {
    /// The all-zero nonce.
    pub const ZERO: Self = Self([0u8; NONCE_SIZE]);

    /// Construct from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Generate a random nonce (used as the handshake nonce seed).
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; NONCE_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// The successor nonce: this value plus one as a big-endian
    /// 192-bit integer, wrapping on overflow.
    #[must_use]
    pub fn increment(&self) -> Self {
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

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

/// Derive the initial nonce pair from the two cleartext handshake frames.
///
/// The frames are ordered as (initiator, responder) regardless of which
/// side derives, so the two peers obtain mirrored pairs: one side's
/// `local` is the other side's `remote`, and the two directions never
/// share a nonce.
#[must_use]
pub fn generate_nonces(incoming: bool, sent_msg: &[u8], recv_msg: &[u8]) -> NoncePair {
    let (init_msg, resp_msg) = if incoming {
        (recv_msg, sent_msg)
    } else {
        (sent_msg, recv_msg)
    };

    let mut hasher = blake3::Hasher::new();
    hasher.update(&(init_msg.len() as u64).to_be_bytes());
    hasher.update(init_msg);
    hasher.update(resp_msg);
    let seed = hasher.finalize();

    let init_to_resp = derive_nonce(seed.as_bytes(), CONTEXT_INIT_TO_RESP);
    let resp_to_init = derive_nonce(seed.as_bytes(), CONTEXT_RESP_TO_INIT);

    if incoming {
        NoncePair {
            local: resp_to_init,
            remote: init_to_resp,
        }
    } else {
        NoncePair {
            local: init_to_resp,
            remote: resp_to_init,
        }
    }
}

fn derive_nonce(seed: &[u8; 32], context: &[u8]) -> Nonce {
    let mut hasher = blake3::Hasher::new_keyed(seed);
    hasher.update(context);
    let mut bytes = [0u8; NONCE_SIZE];
    hasher.finalize_xof().fill(&mut bytes);
    Nonce(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_low_byte() {
        let nonce = Nonce::ZERO.increment();
        let mut expected = [0u8; NONCE_SIZE];
        expected[NONCE_SIZE - 1] = 1;
        assert_eq!(nonce.as_bytes(), &expected);
    }

    #[test]
    fn test_increment_carries() {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[NONCE_SIZE - 1] = 0xFF;
        bytes[NONCE_SIZE - 2] = 0xFF;
        let nonce = Nonce::from_bytes(bytes).increment();

        let mut expected = [0u8; NONCE_SIZE];
        expected[NONCE_SIZE - 3] = 1;
        assert_eq!(nonce.as_bytes(), &expected);
    }

    #[test]
    fn test_increment_wraps() {
        let nonce = Nonce::from_bytes([0xFF; NONCE_SIZE]).increment();
        assert_eq!(nonce, Nonce::ZERO);
    }

    #[test]
    fn test_increment_sequence_distinct() {
        let mut nonce = Nonce::ZERO;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(nonce));
            nonce = nonce.increment();
        }
    }

    #[test]
    fn test_generate_nonces_mirrored() {
        let sent = b"initiator connection frame";
        let recv = b"responder connection frame";

        let outgoing = generate_nonces(false, sent, recv);
        let incoming = generate_nonces(true, recv, sent);

        assert_eq!(outgoing.local, incoming.remote);
        assert_eq!(outgoing.remote, incoming.local);
    }

    #[test]
    fn test_generate_nonces_directions_distinct() {
        let pair = generate_nonces(false, b"one frame", b"other frame");
        assert_ne!(pair.local, pair.remote);
    }

    #[test]
    fn test_generate_nonces_depend_on_frames() {
        let a = generate_nonces(false, b"frame a", b"frame b");
        let b = generate_nonces(false, b"frame a", b"frame c");
        assert_ne!(a.local, b.local);
        assert_ne!(a.remote, b.remote);
    }
}
