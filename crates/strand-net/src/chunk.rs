//! Authenticated, length-framed chunk I/O.
//!
//! Everything after the handshake travels in chunks:
//!
//! ```text
//! len:u16 BE ‖ tag:16 ‖ ciphertext:(len-16)
//! ```
//!
//! Each direction carries its own counter nonce, advanced exactly once
//! per chunk. The counter moves *before* the cipher output is used, so a
//! failure mid-operation can never reuse a nonce.

use crate::error::NetError;
use strand_crypto::{ChannelKey, Nonce, NoncePair, TAG_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes of the chunk length field.
pub const CHUNK_LEN_FIELD: usize = 2;

/// Largest chunk representable on the wire.
pub const MAX_CHUNK_LEN: usize = u16::MAX as usize;

/// Framing overhead per chunk: length field plus authentication tag.
pub const CHUNK_EXTRA_BYTES: usize = CHUNK_LEN_FIELD + TAG_SIZE;

/// Largest plaintext a single chunk can carry.
pub const MAX_PLAINTEXT_LEN: usize = MAX_CHUNK_LEN - CHUNK_EXTRA_BYTES;

/// Validate a configured chunk size, in wire bytes per chunk.
///
/// # Errors
///
/// Returns [`NetError::InvalidChunksSize`] outside
/// `[CHUNK_EXTRA_BYTES + 1, MAX_CHUNK_LEN]`.
pub fn check_binary_chunks_size(size: usize) -> Result<(), NetError> {
    let min = CHUNK_EXTRA_BYTES + 1;
    if size >= min && size <= MAX_CHUNK_LEN {
        Ok(())
    } else {
        Err(NetError::InvalidChunksSize {
            value: size,
            min,
            max: MAX_CHUNK_LEN,
        })
    }
}

/// Full crypto state of a connection, as established by the handshake.
#[derive(Clone)]
pub struct CryptoState {
    /// Shared symmetric key, read-only after the handshake
    pub key: ChannelKey,
    /// Counter for chunks we send
    pub local_nonce: Nonce,
    /// Counter for chunks we receive
    pub remote_nonce: Nonce,
}

/// The writer's half of the crypto state.
pub struct WriteCrypto {
    key: ChannelKey,
    local_nonce: Nonce,
}

/// The reader's half of the crypto state.
pub struct ReadCrypto {
    key: ChannelKey,
    remote_nonce: Nonce,
}

impl CryptoState {
    /// Assemble from a channel key and the handshake nonce pair.
    #[must_use]
    pub fn new(key: ChannelKey, nonces: NoncePair) -> Self {
        Self {
            key,
            local_nonce: nonces.local,
            remote_nonce: nonces.remote,
        }
    }

    /// Partition into reader- and writer-owned halves.
    ///
    /// After the split each nonce counter has exactly one owner, so the
    /// two worker tasks never contend on crypto state.
    #[must_use]
    pub fn split(self) -> (ReadCrypto, WriteCrypto) {
        (
            ReadCrypto {
                key: self.key.clone(),
                remote_nonce: self.remote_nonce,
            },
            WriteCrypto {
                key: self.key,
                local_nonce: self.local_nonce,
            },
        )
    }

    /// Encrypt and write one chunk, advancing the local nonce.
    pub async fn write_chunk<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        msg: &[u8],
    ) -> Result<(), NetError> {
        write_chunk(writer, &self.key, &mut self.local_nonce, msg).await
    }

    /// Read and decrypt one chunk, advancing the remote nonce.
    pub async fn read_chunk<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Vec<u8>, NetError> {
        read_chunk(reader, &self.key, &mut self.remote_nonce).await
    }
}

impl WriteCrypto {
    /// Encrypt and write one chunk, advancing the local nonce.
    pub async fn write_chunk<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        msg: &[u8],
    ) -> Result<(), NetError> {
        write_chunk(writer, &self.key, &mut self.local_nonce, msg).await
    }

    /// The nonce the next chunk will use.
    #[must_use]
    pub fn local_nonce(&self) -> Nonce {
        self.local_nonce
    }
}

impl ReadCrypto {
    /// Read and decrypt one chunk, advancing the remote nonce.
    pub async fn read_chunk<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Vec<u8>, NetError> {
        read_chunk(reader, &self.key, &mut self.remote_nonce).await
    }

    /// The nonce the next chunk will be opened with.
    #[must_use]
    pub fn remote_nonce(&self) -> Nonce {
        self.remote_nonce
    }
}

/// Encrypt `msg` under the next value of `nonce` and write one chunk.
///
/// The chunk is assembled in one buffer and handed to the stream with a
/// single write.
///
/// # Errors
///
/// Fails with [`NetError::InvalidMessageSize`] before touching the
/// stream or the nonce when `msg` exceeds [`MAX_PLAINTEXT_LEN`].
pub async fn write_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    key: &ChannelKey,
    nonce: &mut Nonce,
    msg: &[u8],
) -> Result<(), NetError> {
    if msg.len() > MAX_PLAINTEXT_LEN {
        return Err(NetError::InvalidMessageSize { size: msg.len() });
    }

    // advance before encrypting so a failure past this point cannot
    // reuse the nonce
    let chunk_nonce = *nonce;
    *nonce = chunk_nonce.increment();

    let body_len = (TAG_SIZE + msg.len()) as u16;
    let mut buf = Vec::with_capacity(CHUNK_EXTRA_BYTES + msg.len());
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.extend_from_slice(&[0u8; TAG_SIZE]);
    buf.extend_from_slice(msg);

    let tag = key.seal_in_place(&chunk_nonce, &mut buf[CHUNK_EXTRA_BYTES..])?;
    buf[CHUNK_LEN_FIELD..CHUNK_EXTRA_BYTES].copy_from_slice(&tag);

    writer.write_all(&buf).await.map_err(NetError::from_io)?;
    Ok(())
}

/// Read one chunk and decrypt it under the next value of `nonce`.
///
/// # Errors
///
/// Fails with [`NetError::InvalidIncomingCiphertextSize`] when the
/// announced length cannot hold a tag, and [`NetError::Decipher`] when
/// authentication fails; the nonce advances either way.
pub async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    key: &ChannelKey,
    nonce: &mut Nonce,
) -> Result<Vec<u8>, NetError> {
    let mut len_bytes = [0u8; CHUNK_LEN_FIELD];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(NetError::from_io)?;
    let len = u16::from_be_bytes(len_bytes) as usize;

    if len < TAG_SIZE {
        return Err(NetError::InvalidIncomingCiphertextSize { size: len });
    }

    let mut tag = [0u8; TAG_SIZE];
    reader
        .read_exact(&mut tag)
        .await
        .map_err(NetError::from_io)?;

    let mut body = vec![0u8; len - TAG_SIZE];
    reader
        .read_exact(&mut body)
        .await
        .map_err(NetError::from_io)?;

    // advance before the verification result is consumed
    let chunk_nonce = *nonce;
    *nonce = chunk_nonce.increment();

    key.open_in_place(&chunk_nonce, &tag, &mut body)
        .map_err(|_| NetError::Decipher)?;
    Ok(body)
}
