//! # STRAND Crypto
//!
//! Cryptographic primitives for the STRAND session layer.
//!
//! This crate provides:
//! - X25519 channel key agreement (`precompute`)
//! - Deterministic per-direction nonce derivation from the handshake
//! - XChaCha20-Poly1305 secretbox with detached tags and in-place buffers
//! - Proof-of-work stamps gating peer identities
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Hash / KDF | BLAKE3 | 128-bit collision |
//! | Identity PoW | BLAKE3 leading zero bits | configurable |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod keys;
pub mod nonce;
pub mod pow;
pub mod random;
pub mod secretbox;

pub use error::CryptoError;
pub use keys::{ChannelKey, Keypair, PeerId, PublicKey, SecretKey, precompute};
pub use nonce::{Nonce, NoncePair, generate_nonces};
pub use pow::{ProofOfWorkStamp, check_proof_of_work};

/// X25519 public/secret key size
pub const KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size
pub const TAG_SIZE: usize = 16;

/// XChaCha20-Poly1305 nonce size
pub const NONCE_SIZE: usize = 24;

/// Proof-of-work stamp size
pub const POW_STAMP_SIZE: usize = 24;

/// Peer id size (BLAKE3 output)
pub const PEER_ID_SIZE: usize = 32;
