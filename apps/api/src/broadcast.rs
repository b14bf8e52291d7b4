//! Status broadcaster — the one mutable shared structure in the service.
//!
//! Maintains one logical channel per authenticated user (events carry the
//! evaluation id, so a user's concurrent evaluations share a channel and
//! clients route by `evaluation_id`), plus a cancellation handle per
//! in-flight evaluation. Constructor-injected and explicitly shut down on
//! exit; transport adapters (the SSE route today) subscribe to the same
//! internal stream, so the orchestrator never sees the transport.
//!
//! Delivery is best-effort/at-most-once: events emitted before a client
//! subscribes are lost to that client, and there is no replay. Callers that
//! need the final result poll the evaluations API or use the pipeline
//! entry point's returned outcome.

use std::collections::HashMap;

use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::models::evaluation::StatusEvent;

/// Buffered events per user channel. A slow subscriber that falls more than
/// this far behind starts losing events (at-most-once, by design).
const CHANNEL_CAPACITY: usize = 64;

pub struct StatusBroadcaster {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<StatusEvent>>>,
    /// Per-evaluation cancel handle, tagged with the owning user so a cancel
    /// request can only reach that user's own runs.
    cancels: RwLock<HashMap<Uuid, (watch::Sender<bool>, Uuid)>>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
        }
    }

    /// Emits one event on the user's channel. Events from a single pipeline
    /// run are emitted from one task, so subscribers observe them in stage
    /// order. A channel with no subscribers drops the event and is pruned.
    pub async fn emit(&self, user_id: Uuid, event: StatusEvent) {
        debug!(
            evaluation_id = %event.evaluation_id,
            step = %event.step,
            "Broadcasting status event"
        );

        let delivered = {
            let channels = self.channels.read().await;
            match channels.get(&user_id) {
                Some(sender) => sender.send(event).is_ok(),
                None => false,
            }
        };

        if !delivered {
            // No live receivers: prune the stale sender, if any.
            let mut channels = self.channels.write().await;
            if let Some(sender) = channels.get(&user_id) {
                if sender.receiver_count() == 0 {
                    channels.remove(&user_id);
                }
            }
        }
    }

    /// Returns a receiver for the user's channel, creating it if needed.
    /// Token verification happens in the route layer before this is called.
    pub async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<StatusEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Registers a cancellation handle for an evaluation and returns the
    /// watch side the orchestrator polls at stage boundaries.
    pub async fn register_cancel(&self, evaluation_id: Uuid, user_id: Uuid) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.cancels.write().await.insert(evaluation_id, (tx, user_id));
        rx
    }

    /// Requests cancellation of an in-flight evaluation. Returns false when
    /// the evaluation is unknown, already finished, or owned by another user.
    pub async fn request_cancel(&self, evaluation_id: Uuid, user_id: Uuid) -> bool {
        let cancels = self.cancels.read().await;
        match cancels.get(&evaluation_id) {
            Some((tx, owner)) if *owner == user_id => tx.send(true).is_ok(),
            _ => false,
        }
    }

    /// Drops the cancellation handle once a run reaches a terminal state.
    pub async fn clear_cancel(&self, evaluation_id: Uuid) {
        self.cancels.write().await.remove(&evaluation_id);
    }

    /// Explicit lifecycle end: closes every channel and cancels every
    /// in-flight evaluation so the process can drain and exit.
    pub async fn shutdown(&self) {
        for (_, (tx, _)) in self.cancels.write().await.drain() {
            let _ = tx.send(true);
        }
        self.channels.write().await.clear();
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evaluation::Stage;

    fn event(evaluation_id: Uuid, step: Stage, progress: u8) -> StatusEvent {
        StatusEvent::in_progress(evaluation_id, step, progress, "test")
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_emission_order() {
        let broadcaster = StatusBroadcaster::new();
        let user_id = Uuid::new_v4();
        let evaluation_id = Uuid::new_v4();

        let mut rx = broadcaster.subscribe(user_id).await;
        broadcaster.emit(user_id, event(evaluation_id, Stage::Upload, 5)).await;
        broadcaster
            .emit(user_id, event(evaluation_id, Stage::ParsabilityCheck, 30))
            .await;

        assert_eq!(rx.recv().await.unwrap().step, Stage::Upload);
        assert_eq!(rx.recv().await.unwrap().step, Stage::ParsabilityCheck);
    }

    #[tokio::test]
    async fn test_emit_without_subscriber_is_lost_not_replayed() {
        let broadcaster = StatusBroadcaster::new();
        let user_id = Uuid::new_v4();

        broadcaster
            .emit(user_id, event(Uuid::new_v4(), Stage::Upload, 5))
            .await;

        // Subscribing afterwards must not yield the earlier event.
        let mut rx = broadcaster.subscribe(user_id).await;
        let evaluation_id = Uuid::new_v4();
        broadcaster
            .emit(user_id, event(evaluation_id, Stage::Parsing, 65))
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.evaluation_id, evaluation_id);
        assert_eq!(received.step, Stage::Parsing);
    }

    #[tokio::test]
    async fn test_users_have_independent_channels() {
        let broadcaster = StatusBroadcaster::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut alice_rx = broadcaster.subscribe(alice).await;
        let mut bob_rx = broadcaster.subscribe(bob).await;

        let alice_eval = Uuid::new_v4();
        broadcaster.emit(alice, event(alice_eval, Stage::Upload, 5)).await;

        assert_eq!(alice_rx.recv().await.unwrap().evaluation_id, alice_eval);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_roundtrip() {
        let broadcaster = StatusBroadcaster::new();
        let evaluation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let rx = broadcaster.register_cancel(evaluation_id, user_id).await;
        assert!(!*rx.borrow());

        assert!(broadcaster.request_cancel(evaluation_id, user_id).await);
        assert!(*rx.borrow());

        broadcaster.clear_cancel(evaluation_id).await;
        assert!(!broadcaster.request_cancel(evaluation_id, user_id).await);
    }

    #[tokio::test]
    async fn test_cancel_unknown_evaluation_returns_false() {
        let broadcaster = StatusBroadcaster::new();
        assert!(!broadcaster.request_cancel(Uuid::new_v4(), Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_cancel_by_non_owner_is_refused() {
        let broadcaster = StatusBroadcaster::new();
        let evaluation_id = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let rx = broadcaster.register_cancel(evaluation_id, owner).await;
        assert!(!broadcaster.request_cancel(evaluation_id, Uuid::new_v4()).await);
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn test_shutdown_closes_channels_and_cancels_runs() {
        let broadcaster = StatusBroadcaster::new();
        let user_id = Uuid::new_v4();
        let evaluation_id = Uuid::new_v4();

        let mut rx = broadcaster.subscribe(user_id).await;
        let cancel_rx = broadcaster.register_cancel(evaluation_id, user_id).await;

        broadcaster.shutdown().await;

        assert!(*cancel_rx.borrow());
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
