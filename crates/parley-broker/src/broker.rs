use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Notify};
use tracing::{debug, warn};

use parley_core::message::now_ms;
use parley_core::{HubEvent, Message, SenderKind};

use crate::error::BrokerError;

/// Default delivery priority when the message carries none.
fn default_priority(kind: SenderKind) -> i32 {
    match kind {
        SenderKind::User => 1_000,
        SenderKind::Agent => 0,
        SenderKind::System => 1_000,
    }
}

/// Heap entry: strict priority descending, enqueue order ascending on ties.
struct QueuedEntry {
    priority: i32,
    seq: u64,
    message: Message,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority pops first; equal priority falls back to
        // the earlier sequence number (FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct BrokerState {
    heap: BinaryHeap<QueuedEntry>,
    seq: u64,
    paused: bool,
}

/// Priority queue with a single cooperative processing loop.
///
/// `enqueue` is callable from any task; the `run` loop is the only consumer
/// and serializes delivery of ready messages to the orchestrator, yielding
/// for the processing quantum between deliveries so subscribers cannot be
/// starved by a burst.
pub struct MessageBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    events: broadcast::Sender<HubEvent>,
    quantum: Duration,
    max_queue: usize,
}

impl MessageBroker {
    pub fn new(max_queue: usize, quantum: Duration, events: broadcast::Sender<HubEvent>) -> Self {
        Self {
            state: Mutex::new(BrokerState {
                heap: BinaryHeap::new(),
                seq: 0,
                paused: false,
            }),
            notify: Notify::new(),
            events,
            quantum,
            max_queue,
        }
    }

    /// Insert a message, stamping its timestamp and resolving its priority
    /// (explicit argument > message field > sender-kind default).
    ///
    /// At capacity the message is dropped: a `broker-error` event is emitted
    /// and `QueueFull` returned.
    pub fn enqueue(
        &self,
        mut message: Message,
        explicit_priority: Option<i32>,
    ) -> Result<(), BrokerError> {
        if message.timestamp_ms == 0 {
            message.timestamp_ms = now_ms();
        }
        let priority = explicit_priority
            .or(message.priority)
            .unwrap_or_else(|| default_priority(message.sender_kind));
        message.priority = Some(priority);

        {
            let mut state = self.state.lock().unwrap();
            if state.heap.len() >= self.max_queue {
                warn!(
                    id = %message.id,
                    capacity = self.max_queue,
                    "broker queue full, dropping message"
                );
                let _ = self.events.send(HubEvent::BrokerError {
                    detail: format!("queue full, dropped message {}", message.id),
                });
                return Err(BrokerError::QueueFull {
                    capacity: self.max_queue,
                });
            }
            let seq = state.seq;
            state.seq += 1;
            state.heap.push(QueuedEntry {
                priority,
                seq,
                message,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Emit a broadcast event for a message that finished processing.
    /// Silently drops when nobody is subscribed.
    pub fn broadcast(&self, message: &Message, room_id: &str) {
        let _ = self.events.send(HubEvent::MessageBroadcast {
            message: message.clone(),
            room_id: room_id.to_string(),
        });
    }

    /// Halt delivery without dropping pending messages.
    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().unwrap().paused = false;
        self.notify.notify_one();
    }

    /// Drop all pending messages.
    pub fn clear(&self) {
        self.state.lock().unwrap().heap.clear();
    }

    /// Drop pending messages matching the predicate; returns how many went.
    pub fn remove<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Message) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let before = state.heap.len();
        state.heap.retain(|e| !predicate(&e.message));
        before - state.heap.len()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    fn pop_ready(&self) -> Option<Message> {
        let mut state = self.state.lock().unwrap();
        if state.paused {
            return None;
        }
        state.heap.pop().map(|e| e.message)
    }

    /// Processing loop: pops in priority-then-FIFO order, hands each message
    /// to the ready subscriber, and yields for the quantum between messages.
    /// Runs until `shutdown` broadcasts `true`.
    pub async fn run(
        self: Arc<Self>,
        ready_tx: mpsc::Sender<Message>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("broker loop started");
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("broker loop shutting down");
                        return;
                    }
                }
            }

            while let Some(message) = self.pop_ready() {
                let id = message.id.clone();
                if ready_tx.send(message).await.is_err() {
                    // Subscriber gone; surface the fault and keep draining so
                    // pause/clear semantics stay observable.
                    warn!(%id, "ready subscriber dropped message");
                    let _ = self.events.send(HubEvent::BrokerError {
                        detail: format!("ready subscriber rejected message {}", id),
                    });
                }
                tokio::time::sleep(self.quantum).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn test_broker(max_queue: usize) -> (Arc<MessageBroker>, broadcast::Receiver<HubEvent>) {
        let (events, rx) = broadcast::channel(64);
        let broker = Arc::new(MessageBroker::new(
            max_queue,
            Duration::from_millis(1),
            events,
        ));
        (broker, rx)
    }

    fn spawn_loop(
        broker: &Arc<MessageBroker>,
    ) -> (mpsc::Receiver<Message>, watch::Sender<bool>) {
        let (ready_tx, ready_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(broker.clone().run(ready_tx, stop_rx));
        (ready_rx, stop_tx)
    }

    async fn next(rx: &mut mpsc::Receiver<Message>) -> Message {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for ready message")
            .expect("ready channel closed")
    }

    #[tokio::test]
    async fn delivers_by_priority_then_fifo() {
        let (broker, _events) = test_broker(100);

        broker
            .enqueue(Message::user("user A", "first", "default"), None)
            .unwrap();
        broker
            .enqueue(Message::user("user B", "second", "default"), None)
            .unwrap();
        broker
            .enqueue(Message::agent("ai X", "third", "default"), None)
            .unwrap();

        let (mut ready_rx, _stop) = spawn_loop(&broker);
        assert_eq!(next(&mut ready_rx).await.sender, "user A");
        assert_eq!(next(&mut ready_rx).await.sender, "user B");
        assert_eq!(next(&mut ready_rx).await.sender, "ai X");
    }

    #[tokio::test]
    async fn explicit_priority_beats_defaults() {
        let (broker, _events) = test_broker(100);

        broker
            .enqueue(Message::user("low", "x", "default"), None)
            .unwrap();
        broker
            .enqueue(Message::agent("boosted", "y", "default"), Some(5_000))
            .unwrap();

        let (mut ready_rx, _stop) = spawn_loop(&broker);
        assert_eq!(next(&mut ready_rx).await.sender, "boosted");
        assert_eq!(next(&mut ready_rx).await.sender, "low");
    }

    #[tokio::test]
    async fn overflow_drops_and_emits_error() {
        let (broker, mut events) = test_broker(2);

        broker
            .enqueue(Message::user("a", "1", "default"), None)
            .unwrap();
        broker
            .enqueue(Message::user("b", "2", "default"), None)
            .unwrap();
        let err = broker.enqueue(Message::user("c", "3", "default"), None);
        assert!(matches!(err, Err(BrokerError::QueueFull { capacity: 2 })));
        assert_eq!(broker.pending(), 2);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, HubEvent::BrokerError { .. }));
    }

    #[tokio::test]
    async fn pause_gates_delivery_until_resume() {
        let (broker, _events) = test_broker(100);
        broker.pause();
        broker
            .enqueue(Message::user("a", "held", "default"), None)
            .unwrap();

        let (mut ready_rx, _stop) = spawn_loop(&broker);
        assert!(
            timeout(Duration::from_millis(50), ready_rx.recv())
                .await
                .is_err(),
            "paused broker must not deliver"
        );

        broker.resume();
        assert_eq!(next(&mut ready_rx).await.content, "held");
    }

    #[tokio::test]
    async fn remove_drops_matching_pending() {
        let (broker, _events) = test_broker(100);
        broker
            .enqueue(Message::user("a", "keep", "default"), None)
            .unwrap();
        broker
            .enqueue(Message::user("b", "drop me", "default"), None)
            .unwrap();
        broker
            .enqueue(Message::user("c", "drop me too", "default"), None)
            .unwrap();

        let removed = broker.remove(|m| m.content.starts_with("drop"));
        assert_eq!(removed, 2);
        assert_eq!(broker.pending(), 1);
    }

    #[tokio::test]
    async fn enqueue_stamps_timestamp_and_priority() {
        let (broker, _events) = test_broker(100);
        let mut m = Message::user("a", "x", "default");
        m.timestamp_ms = 0;
        broker.enqueue(m, None).unwrap();

        let (mut ready_rx, _stop) = spawn_loop(&broker);
        let delivered = next(&mut ready_rx).await;
        assert!(delivered.timestamp_ms > 0);
        assert_eq!(delivered.priority, Some(1_000));
    }
}
