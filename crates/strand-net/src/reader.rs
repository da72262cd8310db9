//! The per-connection reader worker.
//!
//! One task per connection pulls chunks off the stream, feeds the codec's
//! accumulation buffer and pushes completed messages into the bounded
//! inbound queue. Cancellation and a closed queue are normal termination;
//! any other failure pushes one terminal error item (best-effort) and
//! trips the shared canceler.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::io::ReadHalf;
use tokio::task::JoinHandle;
use tracing::trace;

use strand_crypto::TAG_SIZE;

use crate::RawStream;
use crate::cancel::Canceler;
use crate::chunk::ReadCrypto;
use crate::codec::{Codec, Decoded};
use crate::error::NetError;
use crate::queue::{BoundedQueue, ITEM_OVERHEAD};
use crate::session::SessionCounters;

/// What the reader queue carries: a decoded message with its wire size,
/// or one terminal error.
pub(crate) type InboundItem<M> = Result<(usize, M), NetError>;

/// The reader half of a session: inbound queue, shared canceler and the
/// worker task feeding them.
pub struct Reader<M: Send + 'static> {
    pub(crate) queue: BoundedQueue<InboundItem<M>>,
    pub(crate) canceler: Canceler,
    pub(crate) worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<M: Send + 'static> Reader<M> {
    /// Stop the worker by tripping the shared canceler.
    pub fn shutdown(&self) {
        self.canceler.cancel();
    }
}

pub(crate) fn spawn<S: RawStream, C: Codec>(
    mut read_half: ReadHalf<S>,
    mut crypto: ReadCrypto,
    codec: C,
    queue: BoundedQueue<InboundItem<C::Msg>>,
    canceler: Canceler,
    counters: Arc<SessionCounters>,
) -> Reader<C::Msg> {
    let worker = {
        let queue = queue.clone();
        let canceler = canceler.clone();
        tokio::spawn(async move {
            let outcome = worker_loop(
                &mut read_half,
                &mut crypto,
                &codec,
                &queue,
                &canceler,
                &counters,
            )
            .await;
            if let Err(err) = outcome {
                if !canceler.is_canceled() {
                    trace!(%err, "reader worker stopping on error");
                    let _ = queue.try_push(Err(err), ITEM_OVERHEAD);
                    canceler.cancel();
                }
            }
            trace!("reader worker stopped");
        })
    };
    Reader {
        queue,
        canceler,
        worker: std::sync::Mutex::new(Some(worker)),
    }
}

async fn worker_loop<S: RawStream, C: Codec>(
    read_half: &mut ReadHalf<S>,
    crypto: &mut ReadCrypto,
    codec: &C,
    queue: &BoundedQueue<InboundItem<C::Msg>>,
    canceler: &Canceler,
    counters: &SessionCounters,
) -> Result<(), NetError> {
    let mut acc: Vec<u8> = Vec::new();
    let mut chunks_spanned = 0usize;

    loop {
        tokio::task::yield_now().await;

        let chunk = tokio::select! {
            _ = canceler.canceled() => return Ok(()),
            chunk = crypto.read_chunk(read_half) => chunk?,
        };
        chunks_spanned += 1;
        acc.extend_from_slice(&chunk);

        loop {
            match codec.decode(&acc)? {
                Decoded::Incomplete => break,
                Decoded::Complete { msg, consumed } => {
                    if consumed == 0 {
                        return Err(NetError::Decoding("codec consumed nothing".into()));
                    }
                    acc.drain(..consumed);

                    // wire size: plaintext plus one tag per chunk the
                    // message spanned; length prefixes are not counted
                    let size = consumed + TAG_SIZE * chunks_spanned.max(1);
                    chunks_spanned = 0;
                    counters.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
                    counters.messages_received.fetch_add(1, Ordering::Relaxed);

                    let pushed = tokio::select! {
                        _ = canceler.canceled() => return Ok(()),
                        pushed = queue.push(Ok((size, msg)), size + ITEM_OVERHEAD) => pushed,
                    };
                    if pushed.is_err() {
                        // closed queue is normal termination
                        return Ok(());
                    }
                }
            }
        }
    }
}
