//! The per-connection writer worker.
//!
//! One task per connection pops pre-chunked messages off the bounded
//! outbound queue, encrypts and writes them in order, and completes any
//! attached sync notifier once the last chunk has been handed to the
//! stream. The worker is the sole owner of the write half, so the raw
//! stream is shut down exactly once, on its single exit path.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

use strand_crypto::TAG_SIZE;

use crate::RawStream;
use crate::cancel::Canceler;
use crate::chunk::WriteCrypto;
use crate::error::NetError;
use crate::queue::{BoundedQueue, ITEM_OVERHEAD, NOTIFIER_SURCHARGE};
use crate::session::SessionCounters;

/// Completion channel for `write_sync`.
pub(crate) type SyncNotifier = oneshot::Sender<Result<(), NetError>>;

/// What the writer queue carries: the chunks of one message, each at
/// most the configured chunk size, plus an optional sync notifier.
pub(crate) type OutboundItem = (Vec<Vec<u8>>, Option<SyncNotifier>);

/// The writer half of a session: outbound queue, shared canceler and the
/// worker task draining them.
pub struct Writer {
    pub(crate) queue: BoundedQueue<OutboundItem>,
    pub(crate) canceler: Canceler,
    pub(crate) worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Writer {
    /// Stop the worker by tripping the shared canceler.
    pub fn shutdown(&self) {
        self.canceler.cancel();
    }
}

/// Split an encoded message into plaintext chunk payloads.
///
/// The empty message still occupies one (empty) chunk, so it remains
/// visible on the wire.
pub(crate) fn split_into_chunks(bytes: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return vec![Vec::new()];
    }
    bytes.chunks(chunk_size).map(<[u8]>::to_vec).collect()
}

/// Queue accounting for one outbound item: fixed overhead, payload
/// bytes, and a surcharge when a notifier rides along.
pub(crate) fn outbound_size(chunks: &[Vec<u8>], has_notifier: bool) -> usize {
    let payload: usize = chunks.iter().map(Vec::len).sum();
    let surcharge = if has_notifier { NOTIFIER_SURCHARGE } else { 0 };
    ITEM_OVERHEAD + payload + surcharge
}

pub(crate) fn spawn<S: RawStream>(
    mut write_half: WriteHalf<S>,
    mut crypto: WriteCrypto,
    queue: BoundedQueue<OutboundItem>,
    canceler: Canceler,
    counters: Arc<SessionCounters>,
) -> Writer {
    let worker = {
        let queue = queue.clone();
        let canceler = canceler.clone();
        tokio::spawn(async move {
            worker_loop(&mut write_half, &mut crypto, &queue, &canceler, &counters).await;
            let _ = write_half.shutdown().await;
            trace!("writer worker stopped");
        })
    };
    Writer {
        queue,
        canceler,
        worker: std::sync::Mutex::new(Some(worker)),
    }
}

async fn worker_loop<S: RawStream>(
    write_half: &mut WriteHalf<S>,
    crypto: &mut WriteCrypto,
    queue: &BoundedQueue<OutboundItem>,
    canceler: &Canceler,
    counters: &SessionCounters,
) {
    loop {
        tokio::task::yield_now().await;

        let item = tokio::select! {
            _ = canceler.canceled() => return,
            item = queue.pop() => item,
        };
        let Ok((chunks, notifier)) = item else {
            // closed queue: backlog flushed, normal termination
            return;
        };

        let mut outcome = Ok(());
        for chunk in &chunks {
            let written = tokio::select! {
                _ = canceler.canceled() => Err(NetError::ConnectionClosed),
                written = crypto.write_chunk(write_half, chunk) => written,
            };
            match written {
                Ok(()) => {
                    counters
                        .bytes_sent
                        .fetch_add((chunk.len() + TAG_SIZE) as u64, Ordering::Relaxed);
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        match outcome {
            Ok(()) => {
                counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                if let Some(tx) = notifier {
                    let _ = tx.send(Ok(()));
                }
            }
            Err(err) => {
                trace!(%err, "writer worker stopping on error");
                if let Some(tx) = notifier {
                    let _ = tx.send(Err(NetError::ConnectionClosed));
                }
                canceler.cancel();
                return;
            }
        }
    }
}
