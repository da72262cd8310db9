//! # STRAND Net
//!
//! The authenticated, encrypted peer-to-peer session layer: everything
//! between a raw byte stream and a typed message channel, plus the
//! process-wide loop that keeps the peer set inside configured bounds.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Maintenance (process-wide)                     │
//! │   keeps active connections inside [min_threshold, max_threshold]│
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Answerer (per connection)                       │
//! │   reacts to Advertise / Bootstrap / Swap control messages       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  Session = Reader + Writer                      │
//! │   bounded byte-accounted queues, one task per direction         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        Handshake                                │
//! │   connection message, PoW gate, key agreement, Ack/Nack         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                       Crypto frame                              │
//! │   len ‖ tag ‖ ciphertext chunks, per-direction counter nonces   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`chunk`]: authenticated length-framed chunk I/O
//! - [`codec`]: streaming message encode/decode abstraction
//! - [`messages`]: handshake payloads (connection message, ack, metadata)
//! - [`peer_msg`]: the concrete peer-to-peer protocol message set
//! - [`handshake`]: authenticate / accept / nack
//! - [`reader`], [`writer`]: per-connection worker tasks
//! - [`session`]: the public message API of one connection
//! - [`queue`]: bounded queues with byte accounting
//! - [`cancel`]: shared cancellation with run-once hooks
//! - [`pool`]: known points and active connections
//! - [`answerer`]: per-message control reactions
//! - [`maintenance`]: the connection-count control loop
//! - [`identity`], [`point`], [`trigger`], [`event`], [`error`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod answerer;
pub mod cancel;
pub mod chunk;
pub mod codec;
pub mod error;
pub mod event;
pub mod handshake;
pub mod identity;
pub mod maintenance;
pub mod messages;
pub mod peer_msg;
pub mod point;
pub mod pool;
pub mod queue;
pub mod reader;
pub mod session;
pub mod trigger;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::Canceler;
pub use error::NetError;
pub use handshake::{AuthenticatedConnection, ConnectionInfo, accept, authenticate, nack};
pub use identity::Identity;
pub use maintenance::{Bounds, Maintenance, MaintenanceConfig};
pub use messages::{AckMessage, ConnMetadata, ConnectionMessage, NackMotive, Version};
pub use peer_msg::PeerMessage;
pub use point::{IdPoint, Point};
pub use session::{ConnectionConfig, Session};

use tokio::io::{AsyncRead, AsyncWrite};

/// The raw bidirectional byte stream under one connection.
///
/// Delivered reliably and in order by the scheduler; typically a TCP
/// socket, an in-memory duplex pipe in tests.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> RawStream for T {}
