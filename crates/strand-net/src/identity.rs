//! The process-wide node identity.

use strand_crypto::{Keypair, PeerId, ProofOfWorkStamp, PublicKey, SecretKey};

/// A long-lived keypair with its mined proof-of-work stamp.
///
/// Loaded or generated once per process and immutable afterwards.
#[derive(Clone)]
pub struct Identity {
    /// Hash of the public key
    pub peer_id: PeerId,
    /// Public half, sent during handshakes
    pub public_key: PublicKey,
    /// Secret half
    pub secret_key: SecretKey,
    /// Stamp proving work on the public key
    pub proof_of_work_stamp: ProofOfWorkStamp,
}

impl Identity {
    /// Generate a fresh identity, mining a stamp for `target_bits`.
    ///
    /// Expected mining work is `2^target_bits` hashes; production
    /// targets take a while, tests use small ones.
    #[must_use]
    pub fn generate(target_bits: f64) -> Self {
        let keypair = Keypair::generate(&mut rand_core::OsRng);
        let proof_of_work_stamp = ProofOfWorkStamp::generate(&keypair.public, target_bits);
        Self::from_keypair(keypair, proof_of_work_stamp)
    }

    /// Assemble from existing key material.
    #[must_use]
    pub fn from_keypair(keypair: Keypair, proof_of_work_stamp: ProofOfWorkStamp) -> Self {
        Self {
            peer_id: keypair.public.peer_id(),
            public_key: keypair.public,
            secret_key: keypair.secret,
            proof_of_work_stamp,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .field("public_key", &self.public_key)
            .finish()
    }
}
