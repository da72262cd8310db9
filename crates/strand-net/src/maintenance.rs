//! The connection-count control loop.
//!
//! One maintenance worker per process watches the pool and keeps the
//! number of live sessions between the configured thresholds: too few
//! and it contacts known points (asking peers for more when the pool
//! runs dry), too many and it disconnects a random excess. In between it
//! idles, proposing an occasional swap to keep the topology moving.

use std::collections::{BinaryHeap, HashSet};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace};

use crate::cancel::Canceler;
use crate::event::{Event, EventSink};
use crate::peer_msg::PeerMessage;
use crate::point::Point;
use crate::pool::{ConnectHandler, PeerPool, PointInfo, PointState};
use crate::trigger::Triggers;

/// The process-wide swap bookkeeping, owned by maintenance and read by
/// every connection's answerer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapState {
    /// When we last agreed to attempt a swap
    pub latest_accepted_swap: Option<Instant>,
    /// When a swap last completed
    pub latest_successful_swap: Option<Instant>,
}

impl SwapState {
    /// Whether a swap accepted or completed less than `linger` ago
    /// should suppress new proposals.
    #[must_use]
    pub fn linger_active(&self, now: Instant, linger: Duration) -> bool {
        self.latest_accepted_swap
            .max(self.latest_successful_swap)
            .is_some_and(|latest| now.duration_since(latest) < linger)
    }
}

/// Connection-count thresholds derived from `(min, expected, max)`.
///
/// The loop acts outside `[min_threshold, max_threshold]` and steers
/// back into `[min_target, max_target]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    /// Below this the loop contacts new peers
    pub min_threshold: usize,
    /// Lower steering target
    pub min_target: usize,
    /// Upper steering target
    pub max_target: usize,
    /// Above this the loop disconnects peers
    pub max_threshold: usize,
}

impl Bounds {
    /// Derive the four thresholds.
    ///
    /// # Panics
    ///
    /// Panics unless `min <= expected <= max`; the configuration is
    /// validated before the loop starts.
    #[must_use]
    pub fn new(min: usize, expected: usize, max: usize) -> Self {
        assert!(
            min <= expected && expected <= max,
            "connection bounds must satisfy min <= expected <= max"
        );
        Self {
            min_threshold: min + (expected - min) / 3,
            min_target: min + 2 * (expected - min) / 3,
            max_target: max - 2 * (max - expected) / 3,
            max_threshold: max - (max - expected) / 3,
        }
    }
}

/// Tuning of the maintenance loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Fewest connections worth running with
    pub min_connections: usize,
    /// The comfortable middle
    pub expected_connections: usize,
    /// Most connections worth keeping
    pub max_connections: usize,
    /// Idle time between maintenance passes
    pub maintenance_idle_time: Duration,
    /// How long to wait for contacts after asking for more
    pub time_between_looking_for_peers: Duration,
    /// Minimum spacing between accepted swaps
    pub swap_linger: Duration,
    /// Only contact trusted points, never look for more
    pub private_mode: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            min_connections: 10,
            expected_connections: 20,
            max_connections: 30,
            maintenance_idle_time: Duration::from_secs(120),
            time_between_looking_for_peers: Duration::from_secs(5),
            swap_linger: Duration::from_secs(30),
            private_mode: false,
        }
    }
}

/// A handle used to nudge an external discovery worker, when one runs.
#[derive(Default)]
pub struct DiscoveryHandle {
    wakeup: Notify,
}

impl DiscoveryHandle {
    /// Create an idle handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Nudge the discovery worker.
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    /// Resolve on the next nudge.
    pub async fn wait_wakeup(&self) {
        self.wakeup.notified().await;
    }
}

/// How one known point looks to a contact pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointClass {
    /// Never contact: banned, already handled, or untrusted in private
    /// mode
    Ignore,
    /// Known but not currently contactable
    Seen,
    /// Contactable, carrying its last miss time for ordering
    Candidate(Option<Instant>),
}

/// The connection maintenance worker.
pub struct Maintenance<H: ConnectHandler> {
    canceler: Canceler,
    config: MaintenanceConfig,
    bounds: Bounds,
    pool: Arc<PeerPool>,
    connector: Arc<H>,
    discovery: Option<Arc<DiscoveryHandle>>,
    triggers: Arc<Triggers>,
    events: EventSink,
    swap_state: Arc<std::sync::Mutex<SwapState>>,
    just_maintained: Notify,
    please_maintain: Notify,
}

impl<H: ConnectHandler> Maintenance<H> {
    /// Assemble the worker; call [`Maintenance::start`] to run it.
    #[must_use]
    pub fn new(
        config: MaintenanceConfig,
        pool: Arc<PeerPool>,
        connector: Arc<H>,
        discovery: Option<Arc<DiscoveryHandle>>,
        triggers: Arc<Triggers>,
        events: EventSink,
    ) -> Arc<Self> {
        let bounds = Bounds::new(
            config.min_connections,
            config.expected_connections,
            config.max_connections,
        );
        Arc::new(Self {
            canceler: Canceler::new(),
            config,
            bounds,
            pool,
            connector,
            discovery,
            triggers,
            events,
            swap_state: Arc::new(std::sync::Mutex::new(SwapState::default())),
            just_maintained: Notify::new(),
            please_maintain: Notify::new(),
        })
    }

    /// The derived thresholds.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// The swap bookkeeping shared with the answerers.
    #[must_use]
    pub fn swap_state(&self) -> Arc<std::sync::Mutex<SwapState>> {
        self.swap_state.clone()
    }

    /// Spawn the worker task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.worker_loop().await })
    }

    /// Ask for a maintenance pass without waiting for the idle timer.
    pub fn please_maintain(&self) {
        self.please_maintain.notify_one();
    }

    /// Resolve after the next pass that found the count inside the
    /// thresholds.
    pub async fn wait_just_maintained(&self) {
        self.just_maintained.notified().await;
    }

    /// Stop the worker.
    pub fn shutdown(&self) {
        self.canceler.cancel();
    }

    async fn worker_loop(&self) {
        info!(bounds = ?self.bounds, "maintenance started");
        loop {
            if self.canceler.is_canceled() {
                break;
            }

            let active = self.pool.active_connections();
            if active < self.bounds.min_threshold {
                debug!(active, min_threshold = self.bounds.min_threshold, "too few connections");
                self.events.emit(Event::TooFewConnections);
                let min_to_contact = self.bounds.min_target - active;
                let max_to_contact = self.bounds.max_target - active;
                let enough = self.try_to_contact(min_to_contact, max_to_contact).await;
                if !enough {
                    self.ask_for_more_contacts().await;
                }
            } else if active > self.bounds.max_threshold {
                debug!(active, max_threshold = self.bounds.max_threshold, "too many connections");
                self.events.emit(Event::TooManyConnections);
                self.disconnect_excess(active - self.bounds.max_target).await;
            } else {
                self.just_maintained.notify_waiters();
                if !self.config.private_mode {
                    self.send_swap_request();
                }
                tokio::select! {
                    _ = self.canceler.canceled() => break,
                    _ = tokio::time::sleep(self.config.maintenance_idle_time) => {}
                    _ = self.please_maintain.notified() => {}
                    _ = self.triggers.wait_too_few_connections() => {}
                    _ = self.triggers.wait_too_many_connections() => {}
                }
            }
        }
        info!("maintenance stopped");
    }

    /// Contact known candidates until `min` new connections succeeded or
    /// the candidate supply runs dry. Transient connect failures only
    /// count against the goal.
    async fn try_to_contact(&self, min: usize, max: usize) -> bool {
        let mut seen: HashSet<Point> = HashSet::new();
        let mut succeeded = 0usize;

        loop {
            if self.canceler.is_canceled() {
                return false;
            }
            let candidates = self.fetch_candidates(max.saturating_sub(succeeded), &mut seen);
            if candidates.is_empty() {
                return succeeded >= min;
            }
            trace!(count = candidates.len(), "contacting candidates");

            let mut dials: JoinSet<bool> = JoinSet::new();
            for point in candidates {
                self.pool.set_requested(point);
                let connector = self.connector.clone();
                let pool = self.pool.clone();
                dials.spawn(async move {
                    match connector.connect(point).await {
                        Ok(_) => true,
                        Err(err) => {
                            trace!(%point, %err, "contact failed");
                            pool.record_miss(point);
                            false
                        }
                    }
                });
            }
            while let Some(outcome) = dials.join_next().await {
                if matches!(outcome, Ok(true)) {
                    succeeded += 1;
                }
            }

            if succeeded >= min {
                return true;
            }
        }
    }

    /// Collect up to `max` contactable points, newest-miss first,
    /// marking everything classified as handled in `seen`.
    fn fetch_candidates(&self, max: usize, seen: &mut HashSet<Point>) -> Vec<Point> {
        if max == 0 {
            return Vec::new();
        }

        // min-heap over the kept set: pushing past `max` evicts the
        // oldest-missed candidate
        let mut kept: BinaryHeap<Reverse<(Option<Instant>, Point)>> = BinaryHeap::new();
        self.pool.fold_known_points((), |(), point, info| {
            match self.classify(point, info, seen) {
                PointClass::Ignore => {}
                PointClass::Seen => {
                    seen.insert(point);
                }
                PointClass::Candidate(last_miss) => {
                    seen.insert(point);
                    kept.push(Reverse((last_miss, point)));
                    if kept.len() > max {
                        kept.pop();
                    }
                }
            }
        });

        let mut candidates: Vec<(Option<Instant>, Point)> =
            kept.into_iter().map(|Reverse(entry)| entry).collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().map(|(_, point)| point).collect()
    }

    fn classify(&self, point: Point, info: &PointInfo, seen: &HashSet<Point>) -> PointClass {
        if info.banned || seen.contains(&point) || (self.config.private_mode && !info.trusted) {
            return PointClass::Ignore;
        }
        match info.state {
            PointState::Disconnected => match info.backoff_until {
                Some(until) if until > Instant::now() => PointClass::Seen,
                _ => PointClass::Candidate(info.last_miss),
            },
            _ => PointClass::Seen,
        }
    }

    /// The candidate supply ran dry: ask the network for more points,
    /// then wait for something to change.
    async fn ask_for_more_contacts(&self) {
        if self.config.private_mode {
            tokio::select! {
                _ = self.canceler.canceled() => {}
                _ = tokio::time::sleep(self.config.time_between_looking_for_peers) => {}
            }
            return;
        }

        let mut recipients = 0usize;
        for conn in self.pool.list_connections() {
            if !conn.is_private() && conn.session.write_now(&PeerMessage::Bootstrap).unwrap_or(false)
            {
                recipients += 1;
            }
        }
        debug!(recipients, "asked for more contacts");
        self.events.emit(Event::BootstrapSent { recipients });

        if let Some(discovery) = &self.discovery {
            discovery.wake();
        }

        tokio::select! {
            _ = self.canceler.canceled() => {}
            _ = self.triggers.wait_new_peer() => {}
            _ = self.triggers.wait_new_point() => {}
            _ = tokio::time::sleep(self.config.time_between_looking_for_peers) => {}
        }
    }

    /// Propose one swap on an idle tick: a random other connection's
    /// point, offered to a random swappable peer.
    fn send_swap_request(&self) {
        let Some(target) = self.pool.random_swappable_connection(None) else {
            return;
        };
        let Some((point, peer_id)) = self.pool.propose_swap_request(&target.peer_id()) else {
            return;
        };

        let request = PeerMessage::SwapRequest { point, peer_id };
        if target.session.write_now(&request).unwrap_or(false) {
            trace!(to = %target.peer_id(), %point, "swap request sent");
            target.record_swap_request(peer_id);
            self.events.emit(Event::SwapRequestSent {
                to: target.peer_id(),
            });
        }
    }

    /// Disconnect `excess` random connections in parallel, never
    /// touching ones that are both private and trusted.
    async fn disconnect_excess(&self, excess: usize) {
        let victims = self.pool.random_disconnectable_connections(excess);
        debug!(count = victims.len(), "disconnecting excess connections");

        let mut closes = JoinSet::new();
        for conn in victims {
            let pool = self.pool.clone();
            closes.spawn(async move {
                conn.session.close(false).await;
                pool.remove_connection(&conn.peer_id());
            });
        }
        while closes.join_next().await.is_some() {}
    }
}
