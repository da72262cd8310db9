//! Shared helpers for the STRAND integration suite.

use std::net::IpAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use strand_net::codec::Codec;
use strand_net::handshake::{AuthenticatedConnection, accept, authenticate};
use strand_net::messages::{ConnMetadata, P2P_VERSION_NACK_WITH_LIST, Version};
use strand_net::session::{ConnectionConfig, Session};
use strand_net::{Canceler, Identity, NetError};

/// Install a tracing subscriber when `STRAND_TEST_LOG` is set, so a
/// failing scenario can be rerun with worker logs.
pub fn init_tracing() {
    if std::env::var_os("STRAND_TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// The version every test peer announces.
pub fn test_version() -> Version {
    Version {
        chain_name: "STRAND_TEST".into(),
        distributed_db_version: 1,
        p2p_version: P2P_VERSION_NACK_WITH_LIST,
    }
}

/// Loopback address used by every in-memory connection.
pub fn loopback() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

/// Run the handshake between two identities over the given stream pair.
pub async fn authenticate_pair_over(
    left: DuplexStream,
    right: DuplexStream,
    a: &Identity,
    b: &Identity,
    pow_target: f64,
) -> (
    Result<AuthenticatedConnection<DuplexStream>, NetError>,
    Result<AuthenticatedConnection<DuplexStream>, NetError>,
) {
    let canceler = Canceler::new();
    tokio::join!(
        authenticate(
            left,
            pow_target,
            false,
            loopback(),
            19732,
            Some(9732),
            a,
            test_version(),
            ConnMetadata::default(),
            &canceler,
        ),
        authenticate(
            right,
            pow_target,
            true,
            loopback(),
            19733,
            Some(9733),
            b,
            test_version(),
            ConnMetadata::default(),
            &canceler,
        ),
    )
}

/// Run the handshake between two identities over an in-memory pipe.
pub async fn authenticate_pair(
    a: &Identity,
    b: &Identity,
    pow_target: f64,
) -> (
    Result<AuthenticatedConnection<DuplexStream>, NetError>,
    Result<AuthenticatedConnection<DuplexStream>, NetError>,
) {
    let (left, right) = tokio::io::duplex(1 << 18);
    authenticate_pair_over(left, right, a, b, pow_target).await
}

/// A fully established session pair over an in-memory pipe.
pub async fn session_pair<C: Codec>(
    codec: C,
    config: ConnectionConfig,
) -> (Session<C>, Session<C>) {
    let a = Identity::generate(0.0);
    let b = Identity::generate(0.0);
    let (conn_a, conn_b) = authenticate_pair(&a, &b, 0.0).await;

    let canceler = Canceler::new();
    let (session_a, session_b) = tokio::join!(
        accept(conn_a.unwrap(), codec.clone(), config.clone(), &canceler),
        accept(conn_b.unwrap(), codec, config, &canceler),
    );
    (session_a.unwrap(), session_b.unwrap())
}

/// Wire a frame-aware relay between two endpoints.
///
/// Everything on this wire is `len:u16 BE ‖ body` (the handshake frame
/// and every chunk alike), so the relay forwards whole frames and lets
/// `tamper_a_to_b` rewrite the body of each left-to-right frame, indexed
/// from zero, before it goes out.
pub fn spawn_frame_relay<F>(tamper_a_to_b: F) -> (DuplexStream, DuplexStream)
where
    F: FnMut(usize, &mut Vec<u8>) + Send + 'static,
{
    let (endpoint_a, inner_a) = tokio::io::duplex(1 << 18);
    let (endpoint_b, inner_b) = tokio::io::duplex(1 << 18);

    let (a_read, a_write) = tokio::io::split(inner_a);
    let (b_read, b_write) = tokio::io::split(inner_b);

    tokio::spawn(forward_frames(a_read, b_write, Some(tamper_a_to_b)));
    tokio::spawn(forward_frames(
        b_read,
        a_write,
        None::<fn(usize, &mut Vec<u8>)>,
    ));

    (endpoint_a, endpoint_b)
}

async fn forward_frames<R, W, F>(mut from: R, mut to: W, mut tamper: Option<F>)
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
    F: FnMut(usize, &mut Vec<u8>),
{
    let mut index = 0usize;
    loop {
        let mut len_bytes = [0u8; 2];
        if from.read_exact(&mut len_bytes).await.is_err() {
            break;
        }
        let len = u16::from_be_bytes(len_bytes) as usize;
        let mut body = vec![0u8; len];
        if from.read_exact(&mut body).await.is_err() {
            break;
        }

        if let Some(tamper) = tamper.as_mut() {
            tamper(index, &mut body);
        }
        index += 1;

        let out_len = (body.len() as u16).to_be_bytes();
        if to.write_all(&out_len).await.is_err() {
            break;
        }
        if to.write_all(&body).await.is_err() {
            break;
        }
    }
    let _ = to.shutdown().await;
}
