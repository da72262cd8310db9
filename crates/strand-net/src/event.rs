//! Best-effort event reporting.
//!
//! Components emit typed events into an unbounded channel; emitting
//! never blocks and a missing or dropped receiver is never an error.

use crate::point::Point;
use strand_crypto::PeerId;
use tokio::sync::mpsc;

/// Everything the session layer reports upwards.
#[derive(Debug, Clone)]
pub enum Event {
    /// Active connections fell below the lower maintenance threshold
    TooFewConnections,
    /// Active connections rose above the upper maintenance threshold
    TooManyConnections,
    /// A previously unknown point entered the pool
    NewPoint(Point),
    /// A connection completed its handshake and was registered
    NewConnection(PeerId),
    /// A registered connection went away
    Disconnection(PeerId),
    /// We asked our peers for more contacts
    BootstrapSent {
        /// How many peers were asked
        recipients: usize,
    },
    /// A peer asked us for contacts
    BootstrapReceived {
        /// Who asked
        from: PeerId,
    },
    /// A peer advertised points to us
    AdvertiseReceived {
        /// Who advertised
        from: PeerId,
        /// How many points it sent
        count: usize,
    },
    /// An outbound advertise was dropped on a saturated queue
    AdvertiseDropped {
        /// The intended recipient
        to: PeerId,
    },
    /// We proposed a swap to a peer
    SwapRequestSent {
        /// The recipient
        to: PeerId,
    },
    /// A peer proposed a swap to us
    SwapRequestReceived {
        /// The proposer
        from: PeerId,
    },
    /// A swap proposal was ignored (linger, known point, no candidate)
    SwapRequestIgnored {
        /// The proposer
        from: PeerId,
    },
    /// We acknowledged a swap proposal
    SwapAckSent {
        /// The proposer being answered
        to: PeerId,
    },
    /// A peer acknowledged our swap proposal
    SwapAckReceived {
        /// The acknowledging peer
        from: PeerId,
    },
    /// A swap completed: new connection up, old one dropped
    SwapSuccess {
        /// The peer that drove the swap
        source: PeerId,
    },
    /// A swap attempt failed to connect
    SwapFailure {
        /// The peer that drove the swap
        source: PeerId,
    },
}

/// A clonable, never-blocking event emitter.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    /// Create a sink and the receiver draining it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit one event. Never blocks, never fails.
    pub fn emit(&self, event: Event) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers() {
        let (sink, mut rx) = EventSink::new();
        sink.emit(Event::TooFewConnections);
        assert!(matches!(rx.recv().await, Some(Event::TooFewConnections)));
    }

    #[test]
    fn test_emit_survives_dropped_receiver() {
        let (sink, rx) = EventSink::new();
        drop(rx);
        sink.emit(Event::TooManyConnections);
    }

    #[test]
    fn test_disabled_sink_swallows() {
        EventSink::disabled().emit(Event::TooFewConnections);
    }
}
