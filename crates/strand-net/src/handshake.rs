//! Connection establishment: authenticate, then accept or nack.
//!
//! `authenticate` turns a raw stream into an [`AuthenticatedConnection`]:
//! connection messages are exchanged in cleartext, the remote identity is
//! gated on proof-of-work, the channel key and the per-direction nonces
//! are derived, and metadata is exchanged over the freshly encrypted
//! channel. The caller then either promotes the connection to a
//! [`Session`] with [`accept`], or refuses it with [`nack`].

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use strand_crypto::{Nonce, check_proof_of_work, generate_nonces, precompute};

use crate::cancel::Canceler;
use crate::chunk::CryptoState;
use crate::codec::Codec;
use crate::error::NetError;
use crate::identity::Identity;
use crate::messages::{AckMessage, ConnMetadata, ConnectionMessage, MAX_NACK_PEERS, NackMotive, Version};
use crate::point::{IdPoint, Point};
use crate::session::{ConnectionConfig, Session};
use crate::RawStream;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Everything the handshake learned about the remote end.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    /// Hash of the remote public key
    pub peer_id: strand_crypto::PeerId,
    /// The version the remote announced
    pub announced_version: Version,
    /// Whether the remote dialed us
    pub incoming: bool,
    /// Remote address plus its listening port, when known
    pub id_point: IdPoint,
    /// Port of the remote socket itself
    pub remote_socket_port: u16,
    /// Whether the remote declared itself private
    pub private_node: bool,
    /// Metadata we sent
    pub local_metadata: ConnMetadata,
    /// Metadata the remote sent
    pub remote_metadata: ConnMetadata,
}

/// A stream that has completed the handshake but not yet exchanged Ack.
///
/// Consumed by [`accept`] or [`nack`].
pub struct AuthenticatedConnection<S> {
    pub(crate) stream: S,
    pub(crate) info: ConnectionInfo,
    pub(crate) crypto: CryptoState,
    pub(crate) conn_id: u64,
}

impl<S> AuthenticatedConnection<S> {
    /// What the handshake learned about the remote.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }
}

async fn with_cancel<T>(
    canceler: &Canceler,
    fut: impl Future<Output = Result<T, NetError>>,
) -> Result<T, NetError> {
    tokio::select! {
        _ = canceler.canceled() => Err(NetError::ConnectionClosed),
        result = fut => result,
    }
}

/// Establish an authenticated connection over `stream`.
///
/// On any failure the stream is closed and the error keeps its original
/// classification: [`NetError::Myself`] for a self-connection,
/// [`NetError::NotEnoughProofOfWork`] for a weak identity,
/// [`NetError::Decoding`] for malformed frames.
#[allow(clippy::too_many_arguments)]
pub async fn authenticate<S: RawStream>(
    mut stream: S,
    pow_target: f64,
    incoming: bool,
    remote_addr: IpAddr,
    remote_socket_port: u16,
    advertised_port: Option<u16>,
    identity: &Identity,
    announced_version: Version,
    local_metadata: ConnMetadata,
    canceler: &Canceler,
) -> Result<AuthenticatedConnection<S>, NetError> {
    let outcome = authenticate_inner(
        &mut stream,
        pow_target,
        incoming,
        remote_addr,
        remote_socket_port,
        advertised_port,
        identity,
        announced_version,
        local_metadata,
        canceler,
    )
    .await;

    match outcome {
        Ok((info, crypto)) => {
            trace!(peer = %info.peer_id, incoming, "handshake complete");
            Ok(AuthenticatedConnection {
                stream,
                info,
                crypto,
                conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            })
        }
        Err(err) => {
            debug!(%err, incoming, "handshake failed");
            let _ = stream.shutdown().await;
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn authenticate_inner<S: RawStream>(
    stream: &mut S,
    pow_target: f64,
    incoming: bool,
    remote_addr: IpAddr,
    remote_socket_port: u16,
    advertised_port: Option<u16>,
    identity: &Identity,
    announced_version: Version,
    local_metadata: ConnMetadata,
    canceler: &Canceler,
) -> Result<(ConnectionInfo, CryptoState), NetError> {
    let message_nonce = Nonce::random()?;
    let conn_msg = ConnectionMessage {
        port: advertised_port,
        public_key: identity.public_key,
        proof_of_work_stamp: identity.proof_of_work_stamp,
        message_nonce,
        version: announced_version,
    };

    let sent_msg = with_cancel(canceler, conn_msg.write_frame(stream)).await?;
    let (remote_msg, recv_msg) =
        with_cancel(canceler, ConnectionMessage::read_frame(stream)).await?;

    let remote_peer_id = remote_msg.public_key.peer_id();
    let remote_listening_port = if incoming {
        remote_msg.port
    } else {
        Some(remote_socket_port)
    };
    let id_point = IdPoint::new(remote_addr, remote_listening_port);

    if remote_peer_id == identity.peer_id {
        return Err(NetError::Myself(id_point));
    }
    if !check_proof_of_work(
        &remote_msg.public_key,
        &remote_msg.proof_of_work_stamp,
        pow_target,
    ) {
        return Err(NetError::NotEnoughProofOfWork(remote_peer_id));
    }

    let channel_key = precompute(&identity.secret_key, &remote_msg.public_key)?;
    let nonces = generate_nonces(incoming, &sent_msg, &recv_msg);
    let mut crypto = CryptoState::new(channel_key, nonces);

    // encrypted metadata exchange
    with_cancel(canceler, crypto.write_chunk(stream, &local_metadata.encode())).await?;
    let meta_chunk = with_cancel(canceler, crypto.read_chunk(stream)).await?;
    let remote_metadata = ConnMetadata::decode(&meta_chunk)?;

    let info = ConnectionInfo {
        peer_id: remote_peer_id,
        announced_version: remote_msg.version,
        incoming,
        id_point,
        remote_socket_port,
        private_node: remote_metadata.private_node,
        local_metadata,
        remote_metadata,
    };
    Ok((info, crypto))
}

/// Refuse an authenticated connection and close its stream.
///
/// Peers that announced [`crate::messages::P2P_VERSION_NACK_WITH_LIST`]
/// receive the motive and up to 100 alternative points; older peers get
/// the bare legacy nack. Write errors are swallowed: the peer learns
/// nothing either way.
pub async fn nack<S: RawStream>(
    mut conn: AuthenticatedConnection<S>,
    motive: NackMotive,
    mut alternatives: Vec<Point>,
) {
    let message = if conn.info.announced_version.supports_nack_with_list() {
        alternatives.truncate(MAX_NACK_PEERS);
        AckMessage::Nack {
            motive,
            potential_peers: alternatives,
        }
    } else {
        AckMessage::NackV0
    };

    debug!(peer = %conn.info.peer_id, %motive, "refusing connection");
    let mut buf = Vec::new();
    if message.encode(&mut buf).is_ok() {
        let _ = conn.crypto.write_chunk(&mut conn.stream, &buf).await;
    }
    let _ = conn.stream.shutdown().await;
}

async fn ack_exchange<S: RawStream>(
    stream: &mut S,
    crypto: &mut CryptoState,
) -> Result<AckMessage, NetError> {
    let mut buf = Vec::new();
    AckMessage::Ack.encode(&mut buf)?;
    crypto.write_chunk(stream, &buf).await?;
    let chunk = crypto.read_chunk(stream).await?;
    AckMessage::decode(&chunk)
}

/// Exchange Acks and promote the connection to a running [`Session`].
///
/// Failures during the round-trip close the stream and are remapped:
/// a dropped socket becomes [`NetError::RejectedSocketConnection`], a
/// decipher failure becomes [`NetError::InvalidAuth`], and a peer nack
/// becomes [`NetError::RejectedByNack`].
pub async fn accept<S: RawStream, C: Codec>(
    mut conn: AuthenticatedConnection<S>,
    codec: C,
    config: ConnectionConfig,
    canceler: &Canceler,
) -> Result<Session<C>, NetError> {
    config.validate()?;

    let outcome = with_cancel(canceler, ack_exchange(&mut conn.stream, &mut conn.crypto)).await;
    match outcome {
        Ok(AckMessage::Ack) => Ok(Session::spawn(conn, codec, config)),
        Ok(AckMessage::NackV0) => {
            let _ = conn.stream.shutdown().await;
            Err(NetError::RejectedByNack {
                motive: NackMotive::NoMotive,
                alternatives: None,
            })
        }
        Ok(AckMessage::Nack {
            motive,
            potential_peers,
        }) => {
            let _ = conn.stream.shutdown().await;
            Err(NetError::RejectedByNack {
                motive,
                alternatives: Some(potential_peers),
            })
        }
        Err(err) => {
            let _ = conn.stream.shutdown().await;
            Err(match err {
                NetError::ConnectionClosed => NetError::RejectedSocketConnection,
                NetError::Decipher => NetError::InvalidAuth,
                other => other,
            })
        }
    }
}
