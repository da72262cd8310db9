//! Error types for STRAND cryptographic primitives.

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD authentication or decryption failed
    #[error("decryption failed")]
    DecryptionFailed,

    /// OS random number generation failed
    #[error("random generation failed")]
    RandomFailed,

    /// Peer public key is a low-order curve point
    #[error("low-order public key")]
    LowOrderPoint,
}
