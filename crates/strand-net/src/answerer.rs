//! Per-connection reactions to control messages.
//!
//! Each connection's message loop hands non-application messages to an
//! [`Answerer`]. The private variant only reports; the default variant
//! drives the peer pool: advertises register points, bootstraps are
//! answered with known points, and swap proposals may replace one of our
//! connections with a peer-suggested alternative.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use strand_crypto::PeerId;

use crate::event::{Event, EventSink};
use crate::maintenance::SwapState;
use crate::peer_msg::{MAX_ADVERTISED_POINTS, PeerMessage};
use crate::point::Point;
use crate::pool::{ConnectHandler, PeerConnection, PeerPool, PointState};

/// How a connection reacts to control messages.
pub enum Answerer<H: ConnectHandler> {
    /// Report every control message and act on none of them.
    Private {
        /// Where the reports go
        events: EventSink,
    },
    /// Act on control messages.
    Default(DefaultAnswerer<H>),
}

/// The acting answerer: pool access plus the shared swap bookkeeping.
pub struct DefaultAnswerer<H: ConnectHandler> {
    pool: Arc<PeerPool>,
    connector: Arc<H>,
    swap_state: Arc<std::sync::Mutex<SwapState>>,
    swap_linger: Duration,
    events: EventSink,
}

impl<H: ConnectHandler> Answerer<H> {
    /// An answerer that acts on control messages.
    #[must_use]
    pub fn new(
        pool: Arc<PeerPool>,
        connector: Arc<H>,
        swap_state: Arc<std::sync::Mutex<SwapState>>,
        swap_linger: Duration,
        events: EventSink,
    ) -> Self {
        Self::Default(DefaultAnswerer {
            pool,
            connector,
            swap_state,
            swap_linger,
            events,
        })
    }

    /// An answerer that swallows everything.
    #[must_use]
    pub fn private(events: EventSink) -> Self {
        Self::Private { events }
    }

    /// Dispatch one inbound control message from `conn`.
    ///
    /// Returns `true` when the message was a control message (consumed),
    /// `false` for application payloads the caller should handle.
    pub async fn on_message(&self, conn: &Arc<PeerConnection>, msg: &PeerMessage) -> bool {
        let from = conn.peer_id();
        match self {
            Self::Private { events } => {
                let event = match msg {
                    PeerMessage::Bootstrap => Event::BootstrapReceived { from },
                    PeerMessage::Advertise(points) => Event::AdvertiseReceived {
                        from,
                        count: points.len(),
                    },
                    PeerMessage::SwapRequest { .. } => Event::SwapRequestReceived { from },
                    PeerMessage::SwapAck { .. } => Event::SwapAckReceived { from },
                    PeerMessage::Message(_) => return false,
                };
                events.emit(event);
                true
            }
            Self::Default(answerer) => match msg {
                PeerMessage::Bootstrap => {
                    answerer.on_bootstrap(conn).await;
                    true
                }
                PeerMessage::Advertise(points) => {
                    answerer.on_advertise(conn, points);
                    true
                }
                PeerMessage::SwapRequest { point, peer_id } => {
                    answerer.on_swap_request(conn, *point, *peer_id).await;
                    true
                }
                PeerMessage::SwapAck { point, peer_id } => {
                    answerer.on_swap_ack(conn, *point, *peer_id).await;
                    true
                }
                PeerMessage::Message(_) => false,
            },
        }
    }
}

impl<H: ConnectHandler> DefaultAnswerer<H> {
    fn on_advertise(&self, conn: &Arc<PeerConnection>, points: &[Point]) {
        self.events.emit(Event::AdvertiseReceived {
            from: conn.peer_id(),
            count: points.len(),
        });
        self.pool.register_list_of_new_points(points.iter().copied());
    }

    async fn on_bootstrap(&self, conn: &Arc<PeerConnection>) {
        self.events.emit(Event::BootstrapReceived {
            from: conn.peer_id(),
        });
        if conn.is_private() {
            // private peers asked not to be part of discovery
            return;
        }

        let points = self.pool.list_known_points(true, MAX_ADVERTISED_POINTS);
        match conn.session.write_now(&PeerMessage::Advertise(points)) {
            Ok(true) => {}
            Ok(false) => {
                trace!(peer = %conn.peer_id(), "advertise dropped on saturated queue");
                self.events.emit(Event::AdvertiseDropped {
                    to: conn.peer_id(),
                });
            }
            Err(_) => {}
        }
    }

    async fn on_swap_request(&self, conn: &Arc<PeerConnection>, new_point: Point, _peer: PeerId) {
        let from = conn.peer_id();
        self.events.emit(Event::SwapRequestReceived { from });

        if self.linger_active() {
            self.events.emit(Event::SwapRequestIgnored { from });
            return;
        }
        // a point we already track as live is not worth a swap
        let already_connected = self
            .pool
            .point_info(&new_point)
            .is_some_and(|info| !matches!(info.state, PointState::Disconnected));
        if already_connected {
            self.events.emit(Event::SwapRequestIgnored { from });
            return;
        }
        let Some(candidate) = self.pool.random_swappable_connection(Some(&from)) else {
            self.events.emit(Event::SwapRequestIgnored { from });
            return;
        };

        let ack = PeerMessage::SwapAck {
            point: candidate.point,
            peer_id: candidate.peer_id(),
        };
        if conn.session.write_now(&ack).unwrap_or(false) {
            self.events.emit(Event::SwapAckSent { to: from });
        }
        self.swap(from, new_point, candidate.peer_id()).await;
    }

    async fn on_swap_ack(&self, conn: &Arc<PeerConnection>, new_point: Point, _peer: PeerId) {
        let from = conn.peer_id();
        self.events.emit(Event::SwapAckReceived { from });

        let Some((_, proposed_peer_id)) = conn.pending_swap_request() else {
            return;
        };
        if self.pool.find_by_peer_id(&proposed_peer_id).is_some() {
            // the proposal resolved itself in the meantime
            return;
        }
        self.swap(from, new_point, proposed_peer_id).await;
    }

    /// Replace the connection to `replaced` with one to `new_point`.
    ///
    /// `latest_accepted_swap` moves first so concurrent proposals hit
    /// the linger; on failure it rewinds to `latest_successful_swap`.
    async fn swap(&self, source: PeerId, new_point: Point, replaced: PeerId) {
        {
            let mut state = self.lock_swap_state();
            state.latest_accepted_swap = Some(Instant::now());
        }
        self.pool.register_point(new_point);

        match self.connector.connect(new_point).await {
            Ok(_conn) => {
                {
                    let mut state = self.lock_swap_state();
                    state.latest_successful_swap = Some(Instant::now());
                }
                debug!(%new_point, "swap succeeded");
                self.events.emit(Event::SwapSuccess { source });

                if let Some(old) = self.pool.find_by_peer_id(&replaced) {
                    old.session.close(false).await;
                    self.pool.remove_connection(&replaced);
                }
            }
            Err(err) => {
                {
                    let mut state = self.lock_swap_state();
                    state.latest_accepted_swap = state.latest_successful_swap;
                }
                debug!(%new_point, %err, "swap failed");
                self.pool.record_miss(new_point);
                self.events.emit(Event::SwapFailure { source });
            }
        }
    }

    fn lock_swap_state(&self) -> std::sync::MutexGuard<'_, SwapState> {
        self.swap_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn linger_active(&self) -> bool {
        self.lock_swap_state()
            .linger_active(Instant::now(), self.swap_linger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;
    use crate::event::EventSink;
    use crate::session::Session;
    use crate::testing;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockConnector {
        pool: Arc<PeerPool>,
        fail: AtomicBool,
        dialed: AtomicUsize,
        // keeps the remote halves of fabricated sessions alive
        remotes: std::sync::Mutex<Vec<Session<crate::peer_msg::PeerMessageCodec>>>,
    }

    impl MockConnector {
        fn new(pool: Arc<PeerPool>) -> Arc<Self> {
            Arc::new(Self {
                pool,
                fail: AtomicBool::new(false),
                dialed: AtomicUsize::new(0),
                remotes: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    impl ConnectHandler for MockConnector {
        fn connect(
            &self,
            point: Point,
        ) -> impl Future<Output = Result<Arc<PeerConnection>, NetError>> + Send {
            async move {
                self.dialed.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    return Err(NetError::ConnectionClosed);
                }
                let (conn, remote) = testing::peer_pair(point, false, false).await;
                self.remotes.lock().unwrap().push(remote);
                self.pool.register_connection(conn.clone());
                Ok(conn)
            }
        }
    }

    fn make_pool() -> Arc<PeerPool> {
        Arc::new(PeerPool::new(
            crate::pool::PoolConfig::default(),
            Arc::new(crate::trigger::Triggers::new()),
            EventSink::disabled(),
        ))
    }

    fn make_answerer(
        pool: &Arc<PeerPool>,
        connector: &Arc<MockConnector>,
        linger: Duration,
    ) -> Answerer<MockConnector> {
        Answerer::new(
            pool.clone(),
            connector.clone(),
            Arc::new(std::sync::Mutex::new(SwapState::default())),
            linger,
            EventSink::disabled(),
        )
    }

    #[tokio::test]
    async fn test_advertise_registers_points() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(30));

        let (conn, _remote) = testing::peer_pair(testing::point(1), false, false).await;
        let points = vec![testing::point(2), testing::point(3)];

        let consumed = answerer
            .on_message(&conn, &PeerMessage::Advertise(points.clone()))
            .await;
        assert!(consumed);
        for point in points {
            assert!(pool.point_info(&point).is_some());
        }
    }

    #[tokio::test]
    async fn test_bootstrap_answers_with_known_points() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(30));
        pool.register_point(testing::point(4));

        let (conn, remote) = testing::peer_pair(testing::point(5), false, false).await;
        answerer.on_message(&conn, &PeerMessage::Bootstrap).await;

        let (_size, msg) = remote.read().await.unwrap();
        match msg {
            PeerMessage::Advertise(points) => assert!(points.contains(&testing::point(4))),
            other => panic!("expected advertise, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_from_private_peer_is_ignored() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(30));
        pool.register_point(testing::point(6));

        let (conn, remote) = testing::peer_pair(testing::point(7), false, true).await;
        answerer.on_message(&conn, &PeerMessage::Bootstrap).await;

        assert!(remote.read_now().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_application_payload_is_not_consumed() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(30));

        let (conn, _remote) = testing::peer_pair(testing::point(8), false, false).await;
        let consumed = answerer
            .on_message(&conn, &PeerMessage::Message(vec![1, 2, 3]))
            .await;
        assert!(!consumed);
    }

    #[tokio::test]
    async fn test_swap_request_acks_and_connects() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(30));

        // one swappable connection to offer in exchange
        let (existing, _r1) = testing::peer_pair(testing::point(9), false, false).await;
        let existing_id = existing.peer_id();
        pool.register_connection(existing.clone());

        let (proposer, proposer_remote) = testing::peer_pair(testing::point(10), false, false).await;
        let new_point = testing::point(11);
        answerer
            .on_message(
                &proposer,
                &PeerMessage::SwapRequest {
                    point: new_point,
                    peer_id: strand_crypto::PeerId::from_bytes([1u8; 32]),
                },
            )
            .await;

        // the proposer got our counter-offer
        let (_size, msg) = proposer_remote.read().await.unwrap();
        match msg {
            PeerMessage::SwapAck { point, peer_id } => {
                assert_eq!(point, testing::point(9));
                assert_eq!(peer_id, existing_id);
            }
            other => panic!("expected swap ack, got {other:?}"),
        }

        // the new point was dialed and the offered peer dropped
        assert_eq!(connector.dialed.load(Ordering::SeqCst), 1);
        assert!(pool.find_by_peer_id(&existing_id).is_none());
    }

    #[tokio::test]
    async fn test_swap_hysteresis_answers_once_within_linger() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(3600));

        let (existing, _r1) = testing::peer_pair(testing::point(12), false, false).await;
        pool.register_connection(existing);

        let (proposer, _remote) = testing::peer_pair(testing::point(13), false, false).await;
        let request = |point: Point| PeerMessage::SwapRequest {
            point,
            peer_id: strand_crypto::PeerId::from_bytes([2u8; 32]),
        };

        answerer
            .on_message(&proposer, &request(testing::point(14)))
            .await;
        answerer
            .on_message(&proposer, &request(testing::point(15)))
            .await;

        // the second proposal fell into the linger window
        assert_eq!(connector.dialed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_swap_failure_rewinds_accepted_timestamp() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        connector.fail.store(true, Ordering::SeqCst);

        let swap_state = Arc::new(std::sync::Mutex::new(SwapState::default()));
        let answerer: Answerer<MockConnector> = Answerer::new(
            pool.clone(),
            connector.clone(),
            swap_state.clone(),
            Duration::from_secs(3600),
            EventSink::disabled(),
        );

        let (existing, _r1) = testing::peer_pair(testing::point(16), false, false).await;
        let existing_id = existing.peer_id();
        pool.register_connection(existing);

        let (proposer, _remote) = testing::peer_pair(testing::point(17), false, false).await;
        answerer
            .on_message(
                &proposer,
                &PeerMessage::SwapRequest {
                    point: testing::point(18),
                    peer_id: strand_crypto::PeerId::from_bytes([3u8; 32]),
                },
            )
            .await;

        // failed swap: timestamps rewound, offered peer kept
        let state = swap_state.lock().unwrap();
        assert_eq!(state.latest_accepted_swap, state.latest_successful_swap);
        assert!(pool.find_by_peer_id(&existing_id).is_some());
    }

    #[tokio::test]
    async fn test_swap_ack_completes_our_proposal() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(3600));

        let (conn, _remote) = testing::peer_pair(testing::point(19), false, false).await;
        // we proposed a peer we are no longer connected to
        conn.record_swap_request(strand_crypto::PeerId::from_bytes([4u8; 32]));

        answerer
            .on_message(
                &conn,
                &PeerMessage::SwapAck {
                    point: testing::point(20),
                    peer_id: strand_crypto::PeerId::from_bytes([5u8; 32]),
                },
            )
            .await;

        assert_eq!(connector.dialed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_swap_ack_without_pending_request_is_ignored() {
        let pool = make_pool();
        let connector = MockConnector::new(pool.clone());
        let answerer = make_answerer(&pool, &connector, Duration::from_secs(3600));

        let (conn, _remote) = testing::peer_pair(testing::point(21), false, false).await;
        answerer
            .on_message(
                &conn,
                &PeerMessage::SwapAck {
                    point: testing::point(22),
                    peer_id: strand_crypto::PeerId::from_bytes([6u8; 32]),
                },
            )
            .await;

        assert_eq!(connector.dialed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_private_answerer_swallows_and_reports() {
        let (sink, mut rx) = EventSink::new();
        let answerer: Answerer<MockConnector> = Answerer::private(sink);

        let (conn, remote) = testing::peer_pair(testing::point(23), false, false).await;
        let consumed = answerer.on_message(&conn, &PeerMessage::Bootstrap).await;

        assert!(consumed);
        assert!(matches!(
            rx.recv().await,
            Some(Event::BootstrapReceived { .. })
        ));
        // no advertise went out
        assert!(remote.read_now().unwrap().is_none());
    }
}
