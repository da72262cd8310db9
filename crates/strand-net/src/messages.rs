//! Handshake payloads: connection message, metadata, ack.
//!
//! These are the only messages with a fixed, hand-rolled wire form; the
//! application message set above them is pluggable via [`crate::codec`].
//! All multi-byte integers are big-endian.

use crate::error::NetError;
use crate::point::Point;
use strand_crypto::{KEY_SIZE, NONCE_SIZE, Nonce, POW_STAMP_SIZE, ProofOfWorkStamp, PublicKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Capability bit: the peer understands `Nack` with an alternative list.
pub const P2P_VERSION_NACK_WITH_LIST: u16 = 0b1;

/// Most alternative points a nack may carry.
pub const MAX_NACK_PEERS: usize = 100;

/// Wire tag for [`AckMessage::Ack`].
const TAG_ACK: u8 = 0;
/// Wire tag for [`AckMessage::Nack`].
const TAG_NACK: u8 = 1;
/// Wire tag for [`AckMessage::NackV0`].
const TAG_NACK_V0: u8 = 255;

/// The protocol version a peer announces during the handshake.
///
/// `p2p_version` is a capability bitmap; future capabilities extend it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Version {
    /// Name of the chain this node follows
    pub chain_name: String,
    /// Distributed database protocol revision
    pub distributed_db_version: u16,
    /// Session layer capability bitmap
    pub p2p_version: u16,
}

impl Version {
    /// Whether the peer understands `Nack` with an alternative list.
    #[must_use]
    pub fn supports_nack_with_list(&self) -> bool {
        self.p2p_version & P2P_VERSION_NACK_WITH_LIST != 0
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), NetError> {
        let name = self.chain_name.as_bytes();
        let len = u16::try_from(name.len())
            .map_err(|_| NetError::Encoding(format!("chain name of {} bytes", name.len())))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&self.distributed_db_version.to_be_bytes());
        out.extend_from_slice(&self.p2p_version.to_be_bytes());
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), NetError> {
        if buf.len() < 2 {
            return Err(NetError::Decoding("truncated version".into()));
        }
        let name_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let total = 2 + name_len + 4;
        if buf.len() < total {
            return Err(NetError::Decoding("truncated version".into()));
        }
        let chain_name = std::str::from_utf8(&buf[2..2 + name_len])
            .map_err(|e| NetError::Decoding(format!("chain name is not utf-8: {e}")))?
            .to_owned();
        let rest = &buf[2 + name_len..];
        Ok((
            Self {
                chain_name,
                distributed_db_version: u16::from_be_bytes([rest[0], rest[1]]),
                p2p_version: u16::from_be_bytes([rest[2], rest[3]]),
            },
            total,
        ))
    }
}

/// The cleartext handshake payload.
///
/// Sent by both sides before any key material exists; its exact wire
/// bytes also seed the per-direction nonces.
#[derive(Clone, Debug)]
pub struct ConnectionMessage {
    /// Port the sender listens on; `None` when it accepts no inbound
    /// connections (wire sentinel 0)
    pub port: Option<u16>,
    /// Sender's long-lived public key
    pub public_key: PublicKey,
    /// Proof-of-work stamp for that key
    pub proof_of_work_stamp: ProofOfWorkStamp,
    /// Random seed mixed into nonce derivation
    pub message_nonce: Nonce,
    /// Announced protocol version
    pub version: Version,
}

impl ConnectionMessage {
    /// Fixed-size prefix of the body: port, key, stamp, nonce.
    const FIXED_LEN: usize = 2 + KEY_SIZE + POW_STAMP_SIZE + NONCE_SIZE;

    fn encode_body(&self) -> Result<Vec<u8>, NetError> {
        let mut out = Vec::with_capacity(Self::FIXED_LEN + 16);
        out.extend_from_slice(&self.port.unwrap_or(0).to_be_bytes());
        out.extend_from_slice(self.public_key.as_bytes());
        out.extend_from_slice(self.proof_of_work_stamp.as_bytes());
        out.extend_from_slice(self.message_nonce.as_bytes());
        self.version.encode(&mut out)?;
        Ok(out)
    }

    fn decode_body(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() < Self::FIXED_LEN {
            return Err(NetError::Decoding("truncated connection message".into()));
        }
        let port = match u16::from_be_bytes([buf[0], buf[1]]) {
            0 => None,
            port => Some(port),
        };

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&buf[2..2 + KEY_SIZE]);
        let mut offset = 2 + KEY_SIZE;

        let mut stamp = [0u8; POW_STAMP_SIZE];
        stamp.copy_from_slice(&buf[offset..offset + POW_STAMP_SIZE]);
        offset += POW_STAMP_SIZE;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[offset..offset + NONCE_SIZE]);
        offset += NONCE_SIZE;

        let (version, consumed) = Version::decode(&buf[offset..])?;
        if offset + consumed != buf.len() {
            return Err(NetError::UnexpectedSizeOfDecodedBuffer);
        }

        Ok(Self {
            port,
            public_key: PublicKey::from_bytes(key),
            proof_of_work_stamp: ProofOfWorkStamp::from_bytes(stamp),
            message_nonce: Nonce::from_bytes(nonce),
            version,
        })
    }

    /// Write the cleartext frame (`len:u16 BE ‖ body`) and return the
    /// exact bytes that went on the wire.
    pub async fn write_frame<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
    ) -> Result<Vec<u8>, NetError> {
        let body = self.encode_body()?;
        let len = u16::try_from(body.len()).map_err(|_| NetError::UnexpectedSizeOfEncodedValue)?;

        let mut frame = Vec::with_capacity(2 + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);

        writer.write_all(&frame).await.map_err(NetError::from_io)?;
        Ok(frame)
    }

    /// Read one cleartext frame and return the parsed message together
    /// with the exact bytes it occupied on the wire.
    pub async fn read_frame<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<(Self, Vec<u8>), NetError> {
        let mut len_bytes = [0u8; 2];
        reader
            .read_exact(&mut len_bytes)
            .await
            .map_err(NetError::from_io)?;
        let len = u16::from_be_bytes(len_bytes) as usize;

        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(NetError::from_io)?;

        let msg = Self::decode_body(&body)?;

        let mut frame = Vec::with_capacity(2 + len);
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&body);
        Ok((msg, frame))
    }
}

/// Per-connection metadata, exchanged encrypted right after key
/// derivation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ConnMetadata {
    /// The peer does not want mempool traffic
    pub disable_mempool: bool,
    /// The peer is a private node and must not be advertised
    pub private_node: bool,
}

impl ConnMetadata {
    /// Encode as the two-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; 2] {
        [u8::from(self.disable_mempool), u8::from(self.private_node)]
    }

    /// Decode from one decrypted metadata chunk.
    ///
    /// # Errors
    ///
    /// Fails when the chunk is not exactly two bytes of flags.
    pub fn decode(buf: &[u8]) -> Result<Self, NetError> {
        if buf.len() != 2 {
            return Err(NetError::UnexpectedSizeOfDecodedBuffer);
        }
        let flag = |byte: u8, what: &str| match byte {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(NetError::Decoding(format!("bad {what} flag {other:#04x}"))),
        };
        Ok(Self {
            disable_mempool: flag(buf[0], "disable_mempool")?,
            private_node: flag(buf[1], "private_node")?,
        })
    }
}

/// Why a peer refused a connection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NackMotive {
    /// Legacy nack without a reason
    NoMotive,
    /// The peer is saturated
    TooManyConnections,
    /// The peer follows a different chain
    UnknownChainName,
    /// The peer no longer speaks this session protocol
    DeprecatedP2pVersion,
    /// The peer no longer speaks this distributed db protocol
    DeprecatedDistributedDbVersion,
    /// The peer already has a session with this identity
    AlreadyConnected,
}

impl NackMotive {
    fn to_u16(self) -> u16 {
        match self {
            Self::NoMotive => 0,
            Self::TooManyConnections => 1,
            Self::UnknownChainName => 2,
            Self::DeprecatedP2pVersion => 3,
            Self::DeprecatedDistributedDbVersion => 4,
            Self::AlreadyConnected => 5,
        }
    }

    fn from_u16(value: u16) -> Result<Self, NetError> {
        match value {
            0 => Ok(Self::NoMotive),
            1 => Ok(Self::TooManyConnections),
            2 => Ok(Self::UnknownChainName),
            3 => Ok(Self::DeprecatedP2pVersion),
            4 => Ok(Self::DeprecatedDistributedDbVersion),
            5 => Ok(Self::AlreadyConnected),
            other => Err(NetError::Decoding(format!("bad nack motive {other}"))),
        }
    }
}

impl std::fmt::Display for NackMotive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoMotive => "no motive",
            Self::TooManyConnections => "too many connections",
            Self::UnknownChainName => "unknown chain name",
            Self::DeprecatedP2pVersion => "deprecated p2p version",
            Self::DeprecatedDistributedDbVersion => "deprecated distributed db version",
            Self::AlreadyConnected => "already connected",
        };
        f.write_str(text)
    }
}

/// Handshake acknowledgement: accept, or refuse with an optional
/// alternative peer list.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AckMessage {
    /// Accept the connection
    Ack,
    /// Refuse, telling the peer why and where else to try
    Nack {
        /// Why the connection is refused
        motive: NackMotive,
        /// Up to [`MAX_NACK_PEERS`] other points worth contacting
        potential_peers: Vec<Point>,
    },
    /// Legacy refusal without a reason
    NackV0,
}

impl AckMessage {
    /// Encode into the single-chunk wire form.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), NetError> {
        match self {
            Self::Ack => out.push(TAG_ACK),
            Self::NackV0 => out.push(TAG_NACK_V0),
            Self::Nack {
                motive,
                potential_peers,
            } => {
                out.push(TAG_NACK);
                out.extend_from_slice(&motive.to_u16().to_be_bytes());
                let peers = &potential_peers[..potential_peers.len().min(MAX_NACK_PEERS)];
                out.extend_from_slice(&(peers.len() as u16).to_be_bytes());
                for point in peers {
                    point.encode(out);
                }
            }
        }
        Ok(())
    }

    /// Decode from one decrypted chunk, consuming it entirely.
    pub fn decode(buf: &[u8]) -> Result<Self, NetError> {
        let (&tag, rest) = buf
            .split_first()
            .ok_or_else(|| NetError::Decoding("empty ack".into()))?;
        match tag {
            TAG_ACK if rest.is_empty() => Ok(Self::Ack),
            TAG_NACK_V0 if rest.is_empty() => Ok(Self::NackV0),
            TAG_ACK | TAG_NACK_V0 => Err(NetError::UnexpectedSizeOfDecodedBuffer),
            TAG_NACK => {
                if rest.len() < 4 {
                    return Err(NetError::Decoding("truncated nack".into()));
                }
                let motive = NackMotive::from_u16(u16::from_be_bytes([rest[0], rest[1]]))?;
                let count = u16::from_be_bytes([rest[2], rest[3]]) as usize;
                if count > MAX_NACK_PEERS {
                    return Err(NetError::Decoding(format!("nack with {count} peers")));
                }

                let mut peers = Vec::with_capacity(count);
                let mut cursor = &rest[4..];
                for _ in 0..count {
                    let (point, consumed) = Point::decode(cursor)?
                        .ok_or_else(|| NetError::Decoding("truncated nack peer list".into()))?;
                    peers.push(point);
                    cursor = &cursor[consumed..];
                }
                if !cursor.is_empty() {
                    return Err(NetError::UnexpectedSizeOfDecodedBuffer);
                }
                Ok(Self::Nack {
                    motive,
                    potential_peers: peers,
                })
            }
            other => Err(NetError::Decoding(format!("bad ack tag {other:#04x}"))),
        }
    }
}
