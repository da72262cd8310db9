//! X25519 identity keys and channel key agreement.
//!
//! Every node carries a long-lived X25519 keypair. The peer id is the
//! BLAKE3 hash of the public key. Two peers derive the same symmetric
//! channel key from `precompute(local_secret, remote_public)`.

use crate::error::CryptoError;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain separation context for channel key derivation
const CHANNEL_KEY_CONTEXT: &str = "strand v1 channel key";

/// X25519 secret key (32 bytes), zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// A long-lived identity keypair.
#[derive(Clone)]
pub struct Keypair {
    /// Public half, sent in cleartext during the handshake
    pub public: PublicKey,
    /// Secret half, never leaves the process
    pub secret: SecretKey,
}

/// Peer id: BLAKE3 hash of the public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

/// Symmetric key shared by the two ends of one connection.
///
/// Read-only after the handshake; the secretbox operations in
/// [`crate::secretbox`] borrow it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChannelKey(pub(crate) [u8; 32]);

impl SecretKey {
    /// Generate a new random secret key with RFC 7748 clamping.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Derive the public key from this secret key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Export as bytes. The returned bytes are the raw secret key.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = SecretKey::generate(rng);
        let public = secret.public_key();
        Self { public, secret }
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Hash this key into the peer id it identifies.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId(*blake3::hash(self.0.as_bytes()).as_bytes())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0.as_bytes()[..8]))
    }
}

impl PeerId {
    /// Construct from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl ChannelKey {
    /// Construct from raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // key material stays out of logs
        f.write_str("ChannelKey(..)")
    }
}

/// Derive the symmetric channel key for one connection.
///
/// Runs X25519 between the local secret and the remote public key, then
/// a context-separated BLAKE3 KDF over the shared point. Both ends obtain
/// the same key.
///
/// # Errors
///
/// Returns [`CryptoError::LowOrderPoint`] when the remote key is a
/// low-order curve point and the exchange would yield a known secret.
pub fn precompute(secret: &SecretKey, remote: &PublicKey) -> Result<ChannelKey, CryptoError> {
    let shared = secret.0.diffie_hellman(&remote.0);
    if shared.as_bytes() == &[0u8; 32] {
        return Err(CryptoError::LowOrderPoint);
    }
    Ok(ChannelKey(blake3::derive_key(
        CHANNEL_KEY_CONTEXT,
        shared.as_bytes(),
    )))
}

impl PartialEq for ChannelKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ChannelKey {}
