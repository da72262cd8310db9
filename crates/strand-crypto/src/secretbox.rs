//! XChaCha20-Poly1305 secretbox with detached tags.
//!
//! Chunk framing keeps the 16-byte tag separate from the ciphertext and
//! reuses one buffer for plaintext and ciphertext, so the operations here
//! are in-place and allocation-free.

use crate::TAG_SIZE;
use crate::error::CryptoError;
use crate::keys::ChannelKey;
use crate::nonce::Nonce;
use chacha20poly1305::{
    AeadInPlace, KeyInit, Tag, XChaCha20Poly1305,
};

impl ChannelKey {
    /// Encrypt `buf` in place under `nonce`, returning the detached tag.
    pub fn seal_in_place(
        &self,
        nonce: &Nonce,
        buf: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        let tag = cipher
            .encrypt_in_place_detached(nonce.as_bytes().into(), b"", buf)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(tag.into())
    }

    /// Authenticate and decrypt `buf` in place under `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] when the tag does not
    /// verify; the buffer contents are unspecified in that case.
    pub fn open_in_place(
        &self,
        nonce: &Nonce,
        tag: &[u8; TAG_SIZE],
        buf: &mut [u8],
    ) -> Result<(), CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt_in_place_detached(
                nonce.as_bytes().into(),
                b"",
                buf,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
