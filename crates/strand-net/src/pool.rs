//! The peer pool: known points and active connections.
//!
//! One pool per process, shared by every connection's answerer and by
//! the maintenance loop. Point bookkeeping (state, misses, reconnection
//! backoff, trust, bans) lives here; policy decisions stay with the
//! callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::seq::{IteratorRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use tracing::debug;

use strand_crypto::PeerId;

use crate::error::NetError;
use crate::event::{Event, EventSink};
use crate::peer_msg::PeerMessageCodec;
use crate::point::Point;
use crate::session::Session;
use crate::trigger::Triggers;

/// Where a known point currently stands.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PointState {
    /// An outgoing connection attempt is underway
    Requested,
    /// A connection is authenticating
    Accepted,
    /// A session is running with this peer
    Running(PeerId),
    /// No connection; the default for a freshly learned point
    #[default]
    Disconnected,
}

/// Everything the pool tracks about one point.
#[derive(Clone, Debug)]
pub struct PointInfo {
    /// Connection state
    pub state: PointState,
    /// When the last connection attempt failed, if any
    pub last_miss: Option<Instant>,
    /// Do not retry before this instant
    pub backoff_until: Option<Instant>,
    /// Next backoff to apply on a miss
    pub retry_delay: Duration,
    /// Configured as trustworthy; contactable even in private mode
    pub trusted: bool,
    /// Banned points are never contacted nor advertised
    pub banned: bool,
}

/// Backoff tuning for reconnection attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// First delay after a miss
    pub reconnect_backoff: Duration,
    /// Backoff ceiling; doubling stops here
    pub reconnect_backoff_max: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(30),
            reconnect_backoff_max: Duration::from_secs(600),
        }
    }
}

/// One registered connection: the session plus pool-side bookkeeping.
pub struct PeerConnection {
    /// The running session
    pub session: Session<PeerMessageCodec>,
    /// The point this connection goes to
    pub point: Point,
    /// Whether the point was configured as trusted
    pub trusted: bool,
    /// The swap proposal last sent on this connection, if any
    last_sent_swap_request: std::sync::Mutex<Option<(Instant, PeerId)>>,
}

impl PeerConnection {
    /// Wrap a session for registration.
    #[must_use]
    pub fn new(session: Session<PeerMessageCodec>, point: Point, trusted: bool) -> Self {
        Self {
            session,
            point,
            trusted,
            last_sent_swap_request: std::sync::Mutex::new(None),
        }
    }

    /// The remote identity.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.session.info().peer_id
    }

    /// Whether the remote declared itself private.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.session.info().private_node
    }

    pub(crate) fn record_swap_request(&self, proposed: PeerId) {
        let mut slot = self
            .last_sent_swap_request
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some((Instant::now(), proposed));
    }

    pub(crate) fn pending_swap_request(&self) -> Option<(Instant, PeerId)> {
        *self
            .last_sent_swap_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// Dials a point all the way to a registered connection.
///
/// Implementations are expected to authenticate, accept and register the
/// resulting connection into the pool before returning it.
pub trait ConnectHandler: Send + Sync + 'static {
    /// Connect to `point` and register the session.
    fn connect(
        &self,
        point: Point,
    ) -> impl Future<Output = Result<Arc<PeerConnection>, NetError>> + Send;
}

/// The process-wide registry of points and connections.
pub struct PeerPool {
    points: DashMap<Point, PointInfo>,
    connections: DashMap<PeerId, Arc<PeerConnection>>,
    triggers: Arc<Triggers>,
    events: EventSink,
    config: PoolConfig,
}

impl PeerPool {
    /// Create an empty pool wired to the given triggers and events.
    #[must_use]
    pub fn new(config: PoolConfig, triggers: Arc<Triggers>, events: EventSink) -> Self {
        Self {
            points: DashMap::new(),
            connections: DashMap::new(),
            triggers,
            events,
            config,
        }
    }

    fn default_point_info(&self) -> PointInfo {
        PointInfo {
            state: PointState::Disconnected,
            last_miss: None,
            backoff_until: None,
            retry_delay: self.config.reconnect_backoff,
            trusted: false,
            banned: false,
        }
    }

    /// Learn one point. Fires the new-point trigger when it was unknown.
    pub fn register_point(&self, point: Point) {
        let mut new = false;
        self.points.entry(point).or_insert_with(|| {
            new = true;
            self.default_point_info()
        });
        if new {
            debug!(%point, "new point");
            self.events.emit(Event::NewPoint(point));
            self.triggers.fire_new_point();
        }
    }

    /// Learn a batch of points, as received in an advertise message.
    pub fn register_list_of_new_points(&self, points: impl IntoIterator<Item = Point>) {
        for point in points {
            self.register_point(point);
        }
    }

    /// Mark a point as trusted.
    pub fn set_trusted(&self, point: Point) {
        self.points
            .entry(point)
            .or_insert_with(|| self.default_point_info())
            .trusted = true;
    }

    /// Ban a point: never contacted, never advertised.
    pub fn ban(&self, point: Point) {
        self.points
            .entry(point)
            .or_insert_with(|| self.default_point_info())
            .banned = true;
    }

    /// Whether a point is banned.
    #[must_use]
    pub fn banned(&self, point: &Point) -> bool {
        self.points.get(point).is_some_and(|info| info.banned)
    }

    /// Snapshot one point's bookkeeping.
    #[must_use]
    pub fn point_info(&self, point: &Point) -> Option<PointInfo> {
        self.points.get(point).map(|info| info.clone())
    }

    /// Mark a point as being dialed.
    pub fn set_requested(&self, point: Point) {
        self.points
            .entry(point)
            .or_insert_with(|| self.default_point_info())
            .state = PointState::Requested;
    }

    /// Mark a point as authenticating.
    pub fn set_accepted(&self, point: Point) {
        self.points
            .entry(point)
            .or_insert_with(|| self.default_point_info())
            .state = PointState::Accepted;
    }

    /// Record a failed connection attempt: stamps the miss and doubles
    /// the reconnection backoff up to the ceiling.
    pub fn record_miss(&self, point: Point) {
        let mut info = self
            .points
            .entry(point)
            .or_insert_with(|| self.default_point_info());
        let now = Instant::now();
        info.state = PointState::Disconnected;
        info.last_miss = Some(now);
        info.backoff_until = Some(now + info.retry_delay);
        info.retry_delay = (info.retry_delay * 2).min(self.config.reconnect_backoff_max);
    }

    /// Register a freshly accepted connection. Fires the new-peer
    /// trigger.
    pub fn register_connection(&self, conn: Arc<PeerConnection>) {
        let peer_id = conn.peer_id();
        {
            let mut info = self
                .points
                .entry(conn.point)
                .or_insert_with(|| self.default_point_info());
            info.state = PointState::Running(peer_id);
            info.backoff_until = None;
            info.retry_delay = self.config.reconnect_backoff;
        }
        self.connections.insert(peer_id, conn);
        self.events.emit(Event::NewConnection(peer_id));
        self.triggers.fire_new_peer();
    }

    /// Drop a connection from the registry, marking its point
    /// disconnected. Does not close the session.
    pub fn remove_connection(&self, peer_id: &PeerId) -> Option<Arc<PeerConnection>> {
        let (_, conn) = self.connections.remove(peer_id)?;
        if let Some(mut info) = self.points.get_mut(&conn.point) {
            info.state = PointState::Disconnected;
        }
        self.events.emit(Event::Disconnection(*peer_id));
        Some(conn)
    }

    /// The connection to `peer_id`, when one is registered.
    #[must_use]
    pub fn find_by_peer_id(&self, peer_id: &PeerId) -> Option<Arc<PeerConnection>> {
        self.connections.get(peer_id).map(|conn| conn.clone())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Identities of every registered connection.
    #[must_use]
    pub fn connected_peer_ids(&self) -> Vec<PeerId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of every registered connection.
    #[must_use]
    pub fn list_connections(&self) -> Vec<Arc<PeerConnection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Fold over the known points.
    pub fn fold_known_points<B>(&self, init: B, mut f: impl FnMut(B, Point, &PointInfo) -> B) -> B {
        let mut acc = init;
        for entry in self.points.iter() {
            acc = f(acc, *entry.key(), entry.value());
        }
        acc
    }

    /// Up to `limit` known points worth advertising: never banned, and
    /// never points reached through a private connection when
    /// `ignore_private` is set.
    #[must_use]
    pub fn list_known_points(&self, ignore_private: bool, limit: usize) -> Vec<Point> {
        self.points
            .iter()
            .filter(|entry| {
                let info = entry.value();
                if info.banned {
                    return false;
                }
                if ignore_private {
                    if let PointState::Running(peer_id) = info.state {
                        if self
                            .find_by_peer_id(&peer_id)
                            .is_some_and(|conn| conn.is_private())
                        {
                            return false;
                        }
                    }
                }
                true
            })
            .map(|entry| *entry.key())
            .take(limit)
            .collect()
    }

    /// A random connection eligible for swapping: never one that is both
    /// private and trusted, never `exclude`.
    #[must_use]
    pub fn random_swappable_connection(
        &self,
        exclude: Option<&PeerId>,
    ) -> Option<Arc<PeerConnection>> {
        self.connections
            .iter()
            .filter(|entry| {
                let conn = entry.value();
                !(conn.is_private() && conn.trusted)
                    && exclude.is_none_or(|peer| peer != entry.key())
            })
            .map(|entry| entry.value().clone())
            .choose(&mut rand::thread_rng())
    }

    /// Pick the `(point, peer_id)` of a random non-private connection to
    /// propose in a swap request, excluding the recipient itself.
    #[must_use]
    pub fn propose_swap_request(&self, recipient: &PeerId) -> Option<(Point, PeerId)> {
        self.connections
            .iter()
            .filter(|entry| entry.key() != recipient && !entry.value().is_private())
            .map(|entry| (entry.value().point, *entry.key()))
            .choose(&mut rand::thread_rng())
    }

    /// `count` distinct random connections eligible for disconnection:
    /// never ones that are both private and trusted.
    #[must_use]
    pub fn random_disconnectable_connections(&self, count: usize) -> Vec<Arc<PeerConnection>> {
        let eligible: Vec<Arc<PeerConnection>> = self
            .connections
            .iter()
            .filter(|entry| {
                let conn = entry.value();
                !(conn.is_private() && conn.trusted)
            })
            .map(|entry| entry.value().clone())
            .collect();
        eligible
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for PeerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPool")
            .field("known_points", &self.points.len())
            .field("active_connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn pool() -> PeerPool {
        PeerPool::new(
            PoolConfig::default(),
            Arc::new(Triggers::new()),
            EventSink::disabled(),
        )
    }

    #[tokio::test]
    async fn test_register_point_fires_trigger_once() {
        let triggers = Arc::new(Triggers::new());
        let pool = PeerPool::new(PoolConfig::default(), triggers.clone(), EventSink::disabled());

        pool.register_point(testing::point(1));
        triggers.wait_new_point().await;

        // re-registering must not fire again
        pool.register_point(testing::point(1));
        assert!(!pool.point_info(&testing::point(1)).unwrap().trusted);
    }

    #[test]
    fn test_record_miss_doubles_backoff() {
        let pool = pool();
        let point = testing::point(2);
        pool.register_point(point);

        pool.record_miss(point);
        let first = pool.point_info(&point).unwrap();
        assert!(first.last_miss.is_some());
        assert_eq!(first.retry_delay, PoolConfig::default().reconnect_backoff * 2);

        pool.record_miss(point);
        let second = pool.point_info(&point).unwrap();
        assert_eq!(
            second.retry_delay,
            PoolConfig::default().reconnect_backoff * 4
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let pool = pool();
        let point = testing::point(3);
        for _ in 0..16 {
            pool.record_miss(point);
        }
        assert_eq!(
            pool.point_info(&point).unwrap().retry_delay,
            PoolConfig::default().reconnect_backoff_max
        );
    }

    #[tokio::test]
    async fn test_register_connection_updates_point_state() {
        let pool = pool();
        let point = testing::point(4);
        let (conn, _remote) = testing::peer_pair(point, false, false).await;
        let peer_id = conn.peer_id();

        pool.register_connection(conn);
        assert_eq!(pool.active_connections(), 1);
        assert_eq!(
            pool.point_info(&point).unwrap().state,
            PointState::Running(peer_id)
        );

        let removed = pool.remove_connection(&peer_id).unwrap();
        assert_eq!(removed.peer_id(), peer_id);
        assert_eq!(pool.active_connections(), 0);
        assert_eq!(
            pool.point_info(&point).unwrap().state,
            PointState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_private_trusted_connections_are_not_swappable() {
        let pool = pool();
        let (conn, _remote) = testing::peer_pair(testing::point(5), true, true).await;
        pool.register_connection(conn);

        assert!(pool.random_swappable_connection(None).is_none());
        assert!(pool.random_disconnectable_connections(5).is_empty());
    }

    #[tokio::test]
    async fn test_propose_swap_request_excludes_recipient_and_private() {
        let pool = pool();
        let (conn_a, _ra) = testing::peer_pair(testing::point(6), false, false).await;
        let (conn_b, _rb) = testing::peer_pair(testing::point(7), false, true).await;
        let a_id = conn_a.peer_id();
        let b_id = conn_b.peer_id();
        pool.register_connection(conn_a);
        pool.register_connection(conn_b);

        // only the non-private a is proposable, and never to itself
        assert_eq!(pool.propose_swap_request(&a_id), None);
        assert_eq!(
            pool.propose_swap_request(&b_id),
            Some((testing::point(6), a_id))
        );
    }

    #[tokio::test]
    async fn test_list_known_points_hides_banned_and_private() {
        let pool = pool();
        pool.register_point(testing::point(8));
        pool.register_point(testing::point(9));
        pool.ban(testing::point(9));

        let (conn, _remote) = testing::peer_pair(testing::point(10), false, true).await;
        pool.register_connection(conn);

        let visible = pool.list_known_points(true, 100);
        assert!(visible.contains(&testing::point(8)));
        assert!(!visible.contains(&testing::point(9)));
        assert!(!visible.contains(&testing::point(10)));
    }
}
