//! The public surface of one running connection.
//!
//! A [`Session`] owns the authenticated connection plus its reader and
//! writer workers. Reading and writing go through bounded byte-accounted
//! queues; closing is idempotent and leaves every further operation
//! failing with [`NetError::ConnectionClosed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::RawStream;
use crate::cancel::Canceler;
use crate::chunk::{CHUNK_EXTRA_BYTES, MAX_CHUNK_LEN, check_binary_chunks_size};
use crate::codec::Codec;
use crate::error::NetError;
use crate::handshake::{AuthenticatedConnection, ConnectionInfo};
use crate::queue::BoundedQueue;
use crate::reader::{self, Reader};
use crate::writer::{self, Writer};

/// Queue and framing parameters of one connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Byte budget of the inbound message queue; `None` is unbounded
    pub incoming_message_queue_bytes: Option<usize>,
    /// Byte budget of the outbound message queue; `None` is unbounded
    pub outgoing_message_queue_bytes: Option<usize>,
    /// Wire bytes per chunk, including framing overhead
    pub binary_chunks_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            incoming_message_queue_bytes: None,
            outgoing_message_queue_bytes: None,
            binary_chunks_size: MAX_CHUNK_LEN,
        }
    }
}

impl ConnectionConfig {
    /// Validate at the configuration boundary; everything downstream
    /// trusts the value.
    pub fn validate(&self) -> Result<(), NetError> {
        check_binary_chunks_size(self.binary_chunks_size)
    }

    /// Plaintext bytes each chunk may carry.
    #[must_use]
    pub(crate) fn plaintext_chunk_size(&self) -> usize {
        self.binary_chunks_size - CHUNK_EXTRA_BYTES
    }
}

/// Traffic counters of one session.
#[derive(Default)]
pub(crate) struct SessionCounters {
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) bytes_received: AtomicU64,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_received: AtomicU64,
}

/// A snapshot of one session's traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStat {
    /// Wire bytes sent, excluding length prefixes
    pub bytes_sent: u64,
    /// Wire bytes received, excluding length prefixes
    pub bytes_received: u64,
    /// Messages fully handed to the stream
    pub messages_sent: u64,
    /// Messages decoded off the stream
    pub messages_received: u64,
}

/// An authenticated connection promoted to a running reader+writer pair.
pub struct Session<C: Codec> {
    info: ConnectionInfo,
    conn_id: u64,
    codec: C,
    chunk_size: usize,
    reader: Reader<C::Msg>,
    writer: Writer,
    canceler: Canceler,
    counters: Arc<SessionCounters>,
    closed: AtomicBool,
}

impl<C: Codec> Session<C> {
    /// Start the reader and writer workers over an accepted connection.
    pub(crate) fn spawn<S: RawStream>(
        conn: AuthenticatedConnection<S>,
        codec: C,
        config: ConnectionConfig,
    ) -> Self {
        let AuthenticatedConnection {
            stream,
            info,
            crypto,
            conn_id,
        } = conn;

        let canceler = Canceler::new();
        let counters = Arc::new(SessionCounters::default());
        let inbound: BoundedQueue<reader::InboundItem<C::Msg>> =
            BoundedQueue::new(config.incoming_message_queue_bytes);
        let outbound: BoundedQueue<writer::OutboundItem> =
            BoundedQueue::new(config.outgoing_message_queue_bytes);

        // tripping the canceler closes both queues and completes every
        // pending sync notifier; the reader queue closes gracefully so a
        // terminal error item stays readable
        {
            let inbound = inbound.clone();
            let outbound = outbound.clone();
            canceler.on_cancel(move || {
                inbound.close();
                for (_chunks, notifier) in outbound.wipe() {
                    if let Some(tx) = notifier {
                        let _ = tx.send(Err(NetError::ConnectionClosed));
                    }
                }
            });
        }

        let (read_crypto, write_crypto) = crypto.split();
        let (read_half, write_half) = tokio::io::split(stream);

        let reader = reader::spawn(
            read_half,
            read_crypto,
            codec.clone(),
            inbound,
            canceler.clone(),
            counters.clone(),
        );
        let writer = writer::spawn(
            write_half,
            write_crypto,
            outbound,
            canceler.clone(),
            counters.clone(),
        );

        debug!(peer = %info.peer_id, incoming = info.incoming, "session started");
        Self {
            info,
            conn_id,
            codec,
            chunk_size: config.plaintext_chunk_size(),
            reader,
            writer,
            canceler,
            counters,
            closed: AtomicBool::new(false),
        }
    }

    /// What the handshake learned about the remote.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Snapshot the traffic counters.
    #[must_use]
    pub fn stat(&self) -> SessionStat {
        SessionStat {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
        }
    }

    /// Whether two handles wrap the same underlying stream.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }

    fn check_open(&self) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            Err(NetError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Receive the next message, blocking until one is available.
    ///
    /// Returns the message with its wire size.
    ///
    /// # Errors
    ///
    /// Fails with the reader's terminal error, or
    /// [`NetError::ConnectionClosed`] once the session is closed.
    pub async fn read(&self) -> Result<(usize, C::Msg), NetError> {
        self.check_open()?;
        match self.reader.queue.pop().await {
            Ok(Ok(item)) => Ok(item),
            Ok(Err(err)) => Err(err),
            Err(_closed) => Err(NetError::ConnectionClosed),
        }
    }

    /// Receive the next message if one is already queued.
    ///
    /// # Errors
    ///
    /// Same as [`Session::read`].
    pub fn read_now(&self) -> Result<Option<(usize, C::Msg)>, NetError> {
        self.check_open()?;
        match self.reader.queue.try_pop() {
            Ok(Some(Ok(item))) => Ok(Some(item)),
            Ok(Some(Err(err))) => Err(err),
            Ok(None) => Ok(None),
            Err(_closed) => Err(NetError::ConnectionClosed),
        }
    }

    fn encode_message(&self, msg: &C::Msg) -> Result<Vec<Vec<u8>>, NetError> {
        let mut buf = Vec::new();
        self.codec.encode(msg, &mut buf)?;
        Ok(writer::split_into_chunks(&buf, self.chunk_size))
    }

    /// Enqueue a message, waiting for queue room. Completion means
    /// enqueued, not written.
    pub async fn write(&self, msg: &C::Msg) -> Result<(), NetError> {
        self.check_open()?;
        let chunks = self.encode_message(msg)?;
        let size = writer::outbound_size(&chunks, false);
        self.writer
            .queue
            .push((chunks, None), size)
            .await
            .map_err(|_| NetError::ConnectionClosed)
    }

    /// Enqueue a message without waiting: `Ok(true)` when accepted,
    /// `Ok(false)` when the queue budget is exhausted.
    pub fn write_now(&self, msg: &C::Msg) -> Result<bool, NetError> {
        self.check_open()?;
        let chunks = self.encode_message(msg)?;
        let size = writer::outbound_size(&chunks, false);
        self.writer
            .queue
            .try_push((chunks, None), size)
            .map_err(|_| NetError::ConnectionClosed)
    }

    /// Enqueue a message and wait until its last chunk has been handed
    /// to the stream.
    pub async fn write_sync(&self, msg: &C::Msg) -> Result<(), NetError> {
        self.check_open()?;
        let chunks = self.encode_message(msg)?;
        self.enqueue_sync(chunks).await
    }

    /// Bypass the codec: pre-split `bytes` into chunks and wait for them
    /// to be written. Intended for tests.
    pub async fn raw_write_sync(&self, bytes: &[u8]) -> Result<(), NetError> {
        self.check_open()?;
        let chunks = writer::split_into_chunks(bytes, self.chunk_size);
        self.enqueue_sync(chunks).await
    }

    async fn enqueue_sync(&self, chunks: Vec<Vec<u8>>) -> Result<(), NetError> {
        let (tx, rx) = oneshot::channel();
        let size = writer::outbound_size(&chunks, true);
        self.writer
            .queue
            .push((chunks, Some(tx)), size)
            .await
            .map_err(|_| NetError::ConnectionClosed)?;
        rx.await.map_err(|_| NetError::ConnectionClosed)?
    }

    /// Close the session. Idempotent.
    ///
    /// With `wait`, the outbound queue is closed first and the writer
    /// drains its backlog before the connection is torn down; without
    /// it, pending writes are dropped and their notifiers complete with
    /// [`NetError::ConnectionClosed`].
    pub async fn close(&self, wait: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(peer = %self.info.peer_id, wait, "closing session");

        if wait {
            self.writer.queue.close();
            self.join(&self.writer.worker).await;
        }
        self.canceler.cancel();
        self.join(&self.writer.worker).await;
        self.join(&self.reader.worker).await;
    }

    async fn join(&self, slot: &std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>) {
        let handle = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl<C: Codec> Drop for Session<C> {
    fn drop(&mut self) {
        // a dropped session must not leak its workers
        if !self.closed.load(Ordering::Acquire) {
            self.canceler.cancel();
        }
    }
}

impl<C: Codec> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", &self.info.peer_id)
            .field("conn_id", &self.conn_id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
