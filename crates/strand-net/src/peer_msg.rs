//! The concrete peer-to-peer message set.
//!
//! The session layer is generic over its codec; the answerer and the
//! maintenance loop operate on this instantiation. Control messages
//! drive the peer pool, `Message` carries opaque application payloads.
//!
//! Wire form: `tag:u8` then a tag-specific body, big-endian throughout.

use crate::codec::{Codec, Decoded};
use crate::error::NetError;
use crate::point::Point;
use strand_crypto::{PEER_ID_SIZE, PeerId};

/// Wire tag for [`PeerMessage::Bootstrap`].
const TAG_BOOTSTRAP: u8 = 0x01;
/// Wire tag for [`PeerMessage::Advertise`].
const TAG_ADVERTISE: u8 = 0x02;
/// Wire tag for [`PeerMessage::SwapRequest`].
const TAG_SWAP_REQUEST: u8 = 0x03;
/// Wire tag for [`PeerMessage::SwapAck`].
const TAG_SWAP_ACK: u8 = 0x04;
/// Wire tag for [`PeerMessage::Message`].
const TAG_MESSAGE: u8 = 0x05;

/// Most points one advertise message may carry.
pub const MAX_ADVERTISED_POINTS: usize = 100;

/// A message between two peers.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PeerMessage {
    /// Ask the peer for contactable points
    Bootstrap,
    /// Offer the peer a list of contactable points
    Advertise(Vec<Point>),
    /// Propose that the peer replace one of its connections with
    /// `point`, identified by `peer_id`
    SwapRequest {
        /// The point to contact instead
        point: Point,
        /// The identity expected there
        peer_id: PeerId,
    },
    /// Accept a swap proposal, counter-offering one of our peers
    SwapAck {
        /// The point we offer in exchange
        point: Point,
        /// The identity expected there
        peer_id: PeerId,
    },
    /// Opaque application payload
    Message(Vec<u8>),
}

/// The codec carrying [`PeerMessage`] over a session.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerMessageCodec;

impl Codec for PeerMessageCodec {
    type Msg = PeerMessage;

    fn encode(&self, msg: &PeerMessage, out: &mut Vec<u8>) -> Result<(), NetError> {
        match msg {
            PeerMessage::Bootstrap => out.push(TAG_BOOTSTRAP),
            PeerMessage::Advertise(points) => {
                if points.len() > MAX_ADVERTISED_POINTS {
                    return Err(NetError::Encoding(format!(
                        "advertise with {} points",
                        points.len()
                    )));
                }
                out.push(TAG_ADVERTISE);
                out.extend_from_slice(&(points.len() as u16).to_be_bytes());
                for point in points {
                    point.encode(out);
                }
            }
            PeerMessage::SwapRequest { point, peer_id } => {
                out.push(TAG_SWAP_REQUEST);
                point.encode(out);
                out.extend_from_slice(peer_id.as_bytes());
            }
            PeerMessage::SwapAck { point, peer_id } => {
                out.push(TAG_SWAP_ACK);
                point.encode(out);
                out.extend_from_slice(peer_id.as_bytes());
            }
            PeerMessage::Message(payload) => {
                let len = u32::try_from(payload.len()).map_err(|_| {
                    NetError::Encoding(format!("payload of {} bytes", payload.len()))
                })?;
                out.push(TAG_MESSAGE);
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(payload);
            }
        }
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<Decoded<PeerMessage>, NetError> {
        let Some((&tag, rest)) = buf.split_first() else {
            return Ok(Decoded::Incomplete);
        };
        match tag {
            TAG_BOOTSTRAP => Ok(Decoded::Complete {
                msg: PeerMessage::Bootstrap,
                consumed: 1,
            }),
            TAG_ADVERTISE => {
                if rest.len() < 2 {
                    return Ok(Decoded::Incomplete);
                }
                let count = u16::from_be_bytes([rest[0], rest[1]]) as usize;
                if count > MAX_ADVERTISED_POINTS {
                    return Err(NetError::Decoding(format!("advertise with {count} points")));
                }
                let mut points = Vec::with_capacity(count);
                let mut cursor = &rest[2..];
                for _ in 0..count {
                    match Point::decode(cursor)? {
                        None => return Ok(Decoded::Incomplete),
                        Some((point, used)) => {
                            points.push(point);
                            cursor = &cursor[used..];
                        }
                    }
                }
                Ok(Decoded::Complete {
                    msg: PeerMessage::Advertise(points),
                    consumed: buf.len() - cursor.len(),
                })
            }
            TAG_SWAP_REQUEST | TAG_SWAP_ACK => {
                let Some((point, used)) = Point::decode(rest)? else {
                    return Ok(Decoded::Incomplete);
                };
                let cursor = &rest[used..];
                if cursor.len() < PEER_ID_SIZE {
                    return Ok(Decoded::Incomplete);
                }
                let mut id = [0u8; PEER_ID_SIZE];
                id.copy_from_slice(&cursor[..PEER_ID_SIZE]);
                let peer_id = PeerId::from_bytes(id);

                let consumed = 1 + used + PEER_ID_SIZE;
                let msg = if tag == TAG_SWAP_REQUEST {
                    PeerMessage::SwapRequest { point, peer_id }
                } else {
                    PeerMessage::SwapAck { point, peer_id }
                };
                Ok(Decoded::Complete { msg, consumed })
            }
            TAG_MESSAGE => {
                if rest.len() < 4 {
                    return Ok(Decoded::Incomplete);
                }
                let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
                if rest.len() < 4 + len {
                    return Ok(Decoded::Incomplete);
                }
                Ok(Decoded::Complete {
                    msg: PeerMessage::Message(rest[4..4 + len].to_vec()),
                    consumed: 1 + 4 + len,
                })
            }
            other => Err(NetError::Decoding(format!("bad message tag {other:#04x}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &PeerMessage) {
        let mut buf = Vec::new();
        PeerMessageCodec.encode(msg, &mut buf).unwrap();

        match PeerMessageCodec.decode(&buf).unwrap() {
            Decoded::Complete { msg: decoded, consumed } => {
                assert_eq!(&decoded, msg);
                assert_eq!(consumed, buf.len());
            }
            Decoded::Incomplete => panic!("expected complete decode"),
        }
    }

    fn point(last: u8) -> Point {
        Point::new(format!("10.0.0.{last}").parse().unwrap(), 9732)
    }

    #[test]
    fn test_bootstrap_roundtrip() {
        roundtrip(&PeerMessage::Bootstrap);
    }

    #[test]
    fn test_advertise_roundtrip() {
        roundtrip(&PeerMessage::Advertise(vec![point(1), point(2), point(3)]));
        roundtrip(&PeerMessage::Advertise(Vec::new()));
    }

    #[test]
    fn test_swap_roundtrips() {
        let peer_id = PeerId::from_bytes([9u8; 32]);
        roundtrip(&PeerMessage::SwapRequest {
            point: point(4),
            peer_id,
        });
        roundtrip(&PeerMessage::SwapAck {
            point: point(5),
            peer_id,
        });
    }

    #[test]
    fn test_application_message_roundtrip() {
        roundtrip(&PeerMessage::Message(vec![0xAB; 4096]));
        roundtrip(&PeerMessage::Message(Vec::new()));
    }

    #[test]
    fn test_truncated_prefixes_are_incomplete() {
        let mut buf = Vec::new();
        PeerMessageCodec
            .encode(
                &PeerMessage::Advertise(vec![point(1), point(2)]),
                &mut buf,
            )
            .unwrap();

        for cut in 0..buf.len() {
            assert!(matches!(
                PeerMessageCodec.decode(&buf[..cut]).unwrap(),
                Decoded::Incomplete
            ));
        }
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert!(PeerMessageCodec.decode(&[0xEE]).is_err());
    }

    #[test]
    fn test_advertise_count_capped() {
        let mut buf = vec![TAG_ADVERTISE];
        buf.extend_from_slice(&500u16.to_be_bytes());
        assert!(PeerMessageCodec.decode(&buf).is_err());
    }
}
