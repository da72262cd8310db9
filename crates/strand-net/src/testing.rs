//! Shared helpers for in-crate tests: in-memory connected session pairs.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::DuplexStream;

use crate::cancel::Canceler;
use crate::codec::Codec;
use crate::handshake::{AuthenticatedConnection, accept, authenticate};
use crate::identity::Identity;
use crate::messages::{ConnMetadata, P2P_VERSION_NACK_WITH_LIST, Version};
use crate::peer_msg::PeerMessageCodec;
use crate::point::Point;
use crate::pool::PeerConnection;
use crate::session::{ConnectionConfig, Session};

pub(crate) fn version() -> Version {
    Version {
        chain_name: "STRAND_TEST".into(),
        distributed_db_version: 1,
        p2p_version: P2P_VERSION_NACK_WITH_LIST,
    }
}

pub(crate) async fn authenticated_pair(
    meta_a: ConnMetadata,
    meta_b: ConnMetadata,
) -> (
    AuthenticatedConnection<DuplexStream>,
    AuthenticatedConnection<DuplexStream>,
) {
    let a = Identity::generate(0.0);
    let b = Identity::generate(0.0);
    let (left, right) = tokio::io::duplex(1 << 18);
    let addr: IpAddr = "127.0.0.1".parse().unwrap();
    let canceler = Canceler::new();

    let (conn_a, conn_b) = tokio::join!(
        authenticate(
            left, 0.0, false, addr, 19732, Some(9732), &a, version(), meta_a, &canceler,
        ),
        authenticate(
            right, 0.0, true, addr, 19733, Some(9733), &b, version(), meta_b, &canceler,
        ),
    );
    (conn_a.unwrap(), conn_b.unwrap())
}

pub(crate) async fn session_pair<C: Codec>(
    codec: C,
    config: ConnectionConfig,
) -> (Session<C>, Session<C>) {
    let (conn_a, conn_b) = authenticated_pair(ConnMetadata::default(), ConnMetadata::default()).await;
    let canceler = Canceler::new();
    let (session_a, session_b) = tokio::join!(
        accept(conn_a, codec.clone(), config.clone(), &canceler),
        accept(conn_b, codec, config, &canceler),
    );
    (session_a.unwrap(), session_b.unwrap())
}

/// A registered-side connection plus the remote session driving it.
pub(crate) async fn peer_pair(
    point: Point,
    trusted: bool,
    remote_private: bool,
) -> (Arc<PeerConnection>, Session<PeerMessageCodec>) {
    let remote_meta = ConnMetadata {
        disable_mempool: false,
        private_node: remote_private,
    };
    let (conn_a, conn_b) = authenticated_pair(ConnMetadata::default(), remote_meta).await;
    let canceler = Canceler::new();
    let (session_a, session_b) = tokio::join!(
        accept(
            conn_a,
            PeerMessageCodec,
            ConnectionConfig::default(),
            &canceler
        ),
        accept(
            conn_b,
            PeerMessageCodec,
            ConnectionConfig::default(),
            &canceler
        ),
    );
    (
        Arc::new(PeerConnection::new(session_a.unwrap(), point, trusted)),
        session_b.unwrap(),
    )
}

pub(crate) fn point(last_octet: u8) -> Point {
    Point::new(format!("10.9.0.{last_octet}").parse().unwrap(), 9732)
}
