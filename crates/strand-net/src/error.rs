//! Error types for the STRAND session layer.
//!
//! One sum type carries the whole taxonomy so the handshake can classify
//! failures (`Myself`, `NotEnoughProofOfWork`, ...) without overloading a
//! generic I/O error.

use crate::messages::NackMotive;
use crate::point::{IdPoint, Point};
use strand_crypto::{CryptoError, PeerId};
use thiserror::Error;

/// Session layer errors
#[derive(Debug, Error)]
pub enum NetError {
    /// Outgoing message exceeds the chunk payload limit
    #[error("invalid message size: {size} bytes")]
    InvalidMessageSize {
        /// Plaintext length that was rejected
        size: usize,
    },

    /// Incoming chunk shorter than an authentication tag
    #[error("invalid incoming ciphertext size: {size} bytes")]
    InvalidIncomingCiphertextSize {
        /// Wire length that was rejected
        size: usize,
    },

    /// Configured chunk size outside the representable range
    #[error("invalid chunks size: {value} not in [{min}, {max}]")]
    InvalidChunksSize {
        /// Rejected configuration value
        value: usize,
        /// Smallest accepted chunk size
        min: usize,
        /// Largest accepted chunk size
        max: usize,
    },

    /// Chunk failed authentication or decryption
    #[error("failed to decipher incoming chunk")]
    Decipher,

    /// Remote identity does not meet the proof-of-work target
    #[error("not enough proof of work for peer {0}")]
    NotEnoughProofOfWork(PeerId),

    /// The remote presented our own identity
    #[error("connected to ourselves at {0}")]
    Myself(IdPoint),

    /// Ack exchange failed authentication
    #[error("invalid authentication during ack exchange")]
    InvalidAuth,

    /// Incoming bytes could not be decoded
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Outgoing value could not be encoded
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Encoded value does not have the size its frame announces
    #[error("unexpected size of encoded value")]
    UnexpectedSizeOfEncodedValue,

    /// Decoded buffer left trailing bytes
    #[error("unexpected size of decoded buffer")]
    UnexpectedSizeOfDecodedBuffer,

    /// The connection is closed
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer dropped the socket during the ack exchange
    #[error("socket connection rejected by peer")]
    RejectedSocketConnection,

    /// The peer answered the handshake with a nack
    #[error("rejected by nack ({motive})")]
    RejectedByNack {
        /// Why the peer refused the connection
        motive: NackMotive,
        /// Alternative points the peer suggested instead, when its
        /// version supports lists
        alternatives: Option<Vec<Point>>,
    },

    /// Cryptographic primitive failure outside chunk deciphering
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Classify an I/O error the way the session layer reports it:
    /// end-of-stream is a closed connection, everything else passes
    /// through.
    #[must_use]
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_connection_closed() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(NetError::from_io(err), NetError::ConnectionClosed));
    }

    #[test]
    fn test_other_io_errors_pass_through() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(NetError::from_io(err), NetError::Io(_)));
    }
}
