//! Wakeup triggers shared between the pool and the maintenance loop.
//!
//! Each trigger stores one pending wakeup, so a fire just before a wait
//! is not lost.

use tokio::sync::Notify;

/// The four maintenance wakeup conditions.
#[derive(Default)]
pub struct Triggers {
    new_peer: Notify,
    new_point: Notify,
    too_few_connections: Notify,
    too_many_connections: Notify,
}

impl Triggers {
    /// Create an idle trigger set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve when a new peer connection is registered.
    pub async fn wait_new_peer(&self) {
        self.new_peer.notified().await;
    }

    /// Resolve when a new point is learned.
    pub async fn wait_new_point(&self) {
        self.new_point.notified().await;
    }

    /// Resolve when someone observes too few connections.
    pub async fn wait_too_few_connections(&self) {
        self.too_few_connections.notified().await;
    }

    /// Resolve when someone observes too many connections.
    pub async fn wait_too_many_connections(&self) {
        self.too_many_connections.notified().await;
    }

    /// Signal a newly registered peer connection.
    pub fn fire_new_peer(&self) {
        self.new_peer.notify_one();
    }

    /// Signal a newly learned point.
    pub fn fire_new_point(&self) {
        self.new_point.notify_one();
    }

    /// Signal that the connection count looks too low.
    pub fn fire_too_few_connections(&self) {
        self.too_few_connections.notify_one();
    }

    /// Signal that the connection count looks too high.
    pub fn fire_too_many_connections(&self) {
        self.too_many_connections.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fire_then_wait_is_not_lost() {
        let triggers = Triggers::new();
        triggers.fire_new_point();
        triggers.wait_new_point().await;
    }

    #[tokio::test]
    async fn test_fire_wakes_waiter() {
        let triggers = Arc::new(Triggers::new());
        let t = triggers.clone();
        let waiter = tokio::spawn(async move { t.wait_new_peer().await });

        tokio::task::yield_now().await;
        triggers.fire_new_peer();
        waiter.await.unwrap();
    }
}
