//! Streaming message encode/decode abstraction.
//!
//! The reader accumulates decrypted chunk payloads in one buffer and asks
//! the codec for complete messages; a message may span several chunks and
//! a chunk may complete at most one message boundary at a time. The codec
//! never sees chunk boundaries.

use crate::error::NetError;

/// Outcome of one decode attempt over the accumulation buffer.
#[derive(Debug)]
pub enum Decoded<M> {
    /// A full message was available at the front of the buffer.
    Complete {
        /// The decoded message
        msg: M,
        /// Bytes consumed from the front of the buffer; always nonzero
        consumed: usize,
    },
    /// The buffer does not yet hold a complete message.
    Incomplete,
}

/// A typed message encoding over the encrypted channel.
pub trait Codec: Clone + Send + Sync + 'static {
    /// The message type this codec carries.
    type Msg: Send + 'static;

    /// Append the wire form of `msg` to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encoding`] when the value cannot be
    /// represented on the wire.
    fn encode(&self, msg: &Self::Msg, out: &mut Vec<u8>) -> Result<(), NetError>;

    /// Try to decode one message from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Decoding`] when the buffer prefix can never
    /// become a valid message; `Incomplete` when more bytes may fix it.
    fn decode(&self, buf: &[u8]) -> Result<Decoded<Self::Msg>, NetError>;
}

/// The trivial one-byte codec for the unit message.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnitCodec;

impl Codec for UnitCodec {
    type Msg = ();

    fn encode(&self, _msg: &(), out: &mut Vec<u8>) -> Result<(), NetError> {
        out.push(0);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<Decoded<()>, NetError> {
        match buf.first() {
            None => Ok(Decoded::Incomplete),
            Some(0) => Ok(Decoded::Complete {
                msg: (),
                consumed: 1,
            }),
            Some(tag) => Err(NetError::Decoding(format!("bad unit tag {tag:#04x}"))),
        }
    }
}

/// Length-prefixed raw byte payloads: `len:u32 BE ‖ bytes`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Msg = Vec<u8>;

    fn encode(&self, msg: &Vec<u8>, out: &mut Vec<u8>) -> Result<(), NetError> {
        let len = u32::try_from(msg.len())
            .map_err(|_| NetError::Encoding(format!("payload of {} bytes", msg.len())))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(msg);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<Decoded<Vec<u8>>, NetError> {
        if buf.len() < 4 {
            return Ok(Decoded::Incomplete);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Ok(Decoded::Incomplete);
        }
        Ok(Decoded::Complete {
            msg: buf[4..4 + len].to_vec(),
            consumed: 4 + len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_roundtrip() {
        let mut buf = Vec::new();
        UnitCodec.encode(&(), &mut buf).unwrap();
        assert_eq!(buf, [0]);

        match UnitCodec.decode(&buf).unwrap() {
            Decoded::Complete { consumed, .. } => assert_eq!(consumed, 1),
            Decoded::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn test_unit_empty_is_incomplete() {
        assert!(matches!(
            UnitCodec.decode(&[]).unwrap(),
            Decoded::Incomplete
        ));
    }

    #[test]
    fn test_unit_bad_tag() {
        assert!(UnitCodec.decode(&[7]).is_err());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let mut buf = Vec::new();
        BytesCodec.encode(&payload, &mut buf).unwrap();

        match BytesCodec.decode(&buf).unwrap() {
            Decoded::Complete { msg, consumed } => {
                assert_eq!(msg, payload);
                assert_eq!(consumed, buf.len());
            }
            Decoded::Incomplete => panic!("expected complete"),
        }
    }

    #[test]
    fn test_bytes_incomplete_prefix() {
        let payload = vec![9u8; 100];
        let mut buf = Vec::new();
        BytesCodec.encode(&payload, &mut buf).unwrap();

        for cut in 0..buf.len() {
            assert!(matches!(
                BytesCodec.decode(&buf[..cut]).unwrap(),
                Decoded::Incomplete
            ));
        }
    }

    #[test]
    fn test_bytes_back_to_back_messages() {
        let mut buf = Vec::new();
        BytesCodec.encode(&vec![1u8; 3], &mut buf).unwrap();
        BytesCodec.encode(&vec![2u8; 5], &mut buf).unwrap();

        let Decoded::Complete { msg, consumed } = BytesCodec.decode(&buf).unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(msg, vec![1u8; 3]);

        let Decoded::Complete { msg, .. } = BytesCodec.decode(&buf[consumed..]).unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(msg, vec![2u8; 5]);
    }
}
