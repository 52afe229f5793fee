use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use parley_core::MessageId;

/// The message that caused a reply to be scheduled.
#[derive(Debug, Clone)]
pub struct ResponseTrigger {
    pub message_id: MessageId,
    pub sender: String,
}

/// A scheduled generation task.
#[derive(Debug, Clone)]
pub struct QueuedResponse {
    pub agent_id: String,
    pub room_id: String,
    pub is_user_response: bool,
    pub is_mentioned: bool,
    /// Absent only for background rounds fired into an empty room.
    pub trigger: Option<ResponseTrigger>,
    pub scheduled_at: Instant,
}

/// Min-heap entry: earliest `scheduled_at` pops first, insertion order breaks
/// ties.
struct QueueEntry {
    seq: u64,
    task: QueuedResponse,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on both keys so BinaryHeap's max-heap yields the earliest
        // deadline, FIFO on ties.
        other
            .task
            .scheduled_at
            .cmp(&self.task.scheduled_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<QueueEntry>,
    active: usize,
    cleared: bool,
    seq: u64,
}

/// Time-ordered dispatch queue with a global concurrency cap.
///
/// The queue never holds a reference to the orchestrator: tasks leave
/// through an mpsc channel and the sleep state comes in through a probe
/// closure, both handed to [`ResponseQueue::run`]. When the head is due but
/// the hub is asleep or at capacity, the loop re-arms after the retry
/// interval instead of dropping the task.
pub struct ResponseQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_concurrent: usize,
    retry: Duration,
}

enum Step {
    Dispatch(QueuedResponse),
    WaitUntil(Instant),
    Idle,
}

impl ResponseQueue {
    pub fn new(max_concurrent: usize, retry: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                active: 0,
                cleared: false,
                seq: 0,
            }),
            notify: Notify::new(),
            max_concurrent,
            retry,
        }
    }

    /// Add one task. Returns false after `clear` (shutdown path).
    pub fn enqueue(&self, task: QueuedResponse) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.cleared {
                return false;
            }
            let seq = inner.seq;
            inner.seq += 1;
            inner.heap.push(QueueEntry { seq, task });
        }
        self.notify.notify_one();
        true
    }

    pub fn enqueue_batch(&self, tasks: Vec<QueuedResponse>) -> usize {
        let mut accepted = 0;
        for task in tasks {
            if self.enqueue(task) {
                accepted += 1;
            }
        }
        accepted
    }

    /// A dispatched generation finished (successfully or not); frees its
    /// concurrency slot and re-arms processing.
    pub fn on_complete(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.active = inner.active.saturating_sub(1);
        }
        self.notify.notify_one();
    }

    /// Drop all pending tasks and refuse new ones. In-flight dispatches are
    /// unaffected.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.heap.clear();
            inner.cleared = true;
        }
        self.notify.notify_one();
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().active
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    /// Dispatch loop. Waits for the head task's deadline, re-checks the
    /// sleeping probe and the concurrency cap at fire time, and sends due
    /// tasks through `dispatch_tx`. Runs until `shutdown` broadcasts `true`.
    pub async fn run(
        self: Arc<Self>,
        dispatch_tx: mpsc::Sender<QueuedResponse>,
        is_sleeping: Arc<dyn Fn() -> bool + Send + Sync>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("response queue loop started");
        loop {
            // Probe outside the state lock; the fire-time decision below uses
            // this freshest-available answer.
            let sleeping = is_sleeping();

            let step = {
                let mut inner = self.inner.lock().unwrap();
                if inner.heap.is_empty() || inner.active >= self.max_concurrent {
                    Step::Idle
                } else {
                    let head_at = inner.heap.peek().map(|e| e.task.scheduled_at);
                    match head_at {
                        Some(at) if at <= Instant::now() => {
                            if sleeping {
                                Step::WaitUntil(Instant::now() + self.retry)
                            } else {
                                let entry = inner.heap.pop().expect("peeked head exists");
                                inner.active += 1;
                                Step::Dispatch(entry.task)
                            }
                        }
                        Some(at) => Step::WaitUntil(at),
                        None => Step::Idle,
                    }
                }
            };

            match step {
                Step::Dispatch(task) => {
                    if dispatch_tx.send(task).await.is_err() {
                        warn!("dispatch receiver dropped, releasing slot");
                        self.on_complete();
                    }
                }
                Step::WaitUntil(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.notify.notified() => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                debug!("response queue shutting down");
                                return;
                            }
                        }
                    }
                }
                Step::Idle => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                debug!("response queue shutting down");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use tokio::time::timeout;

    fn task(agent_id: &str, at: Instant) -> QueuedResponse {
        QueuedResponse {
            agent_id: agent_id.to_string(),
            room_id: "default".to_string(),
            is_user_response: true,
            is_mentioned: false,
            trigger: None,
            scheduled_at: at,
        }
    }

    struct Running {
        queue: Arc<ResponseQueue>,
        rx: mpsc::Receiver<QueuedResponse>,
        sleeping: Arc<AtomicBool>,
        _stop: watch::Sender<bool>,
    }

    fn start(max_concurrent: usize, retry_ms: u64) -> Running {
        let queue = Arc::new(ResponseQueue::new(
            max_concurrent,
            Duration::from_millis(retry_ms),
        ));
        let (tx, rx) = mpsc::channel(32);
        let sleeping = Arc::new(AtomicBool::new(false));
        let probe = {
            let sleeping = sleeping.clone();
            Arc::new(move || sleeping.load(AtomicOrdering::Relaxed))
                as Arc<dyn Fn() -> bool + Send + Sync>
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(queue.clone().run(tx, probe, stop_rx));
        Running {
            queue,
            rx,
            sleeping,
            _stop: stop_tx,
        }
    }

    async fn next(rx: &mut mpsc::Receiver<QueuedResponse>) -> QueuedResponse {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for dispatch")
            .expect("dispatch channel closed")
    }

    #[tokio::test]
    async fn past_due_task_dispatches_immediately() {
        let mut r = start(2, 1_000);
        r.queue.enqueue(task("alice", Instant::now()));
        assert_eq!(next(&mut r.rx).await.agent_id, "alice");
    }

    #[tokio::test]
    async fn dispatch_follows_scheduled_order() {
        let mut r = start(4, 1_000);
        let now = Instant::now();
        r.queue.enqueue(task("later", now + Duration::from_millis(40)));
        r.queue.enqueue(task("sooner", now + Duration::from_millis(5)));
        assert_eq!(next(&mut r.rx).await.agent_id, "sooner");
        assert_eq!(next(&mut r.rx).await.agent_id, "later");
    }

    #[tokio::test]
    async fn concurrency_cap_holds_until_on_complete() {
        let mut r = start(2, 1_000);
        let now = Instant::now();
        for i in 0..5 {
            r.queue.enqueue(task(&format!("a{}", i), now));
        }

        assert_eq!(next(&mut r.rx).await.agent_id, "a0");
        assert_eq!(next(&mut r.rx).await.agent_id, "a1");
        assert_eq!(r.queue.active_count(), 2);
        assert!(
            timeout(Duration::from_millis(50), r.rx.recv()).await.is_err(),
            "third dispatch must wait for a free slot"
        );

        r.queue.on_complete();
        assert_eq!(next(&mut r.rx).await.agent_id, "a2");

        r.queue.on_complete();
        r.queue.on_complete();
        assert_eq!(next(&mut r.rx).await.agent_id, "a3");
        assert_eq!(next(&mut r.rx).await.agent_id, "a4");
    }

    #[tokio::test]
    async fn sleeping_gate_blocks_then_retries() {
        let mut r = start(2, 10);
        r.sleeping.store(true, AtomicOrdering::Relaxed);
        r.queue.enqueue(task("alice", Instant::now()));

        assert!(
            timeout(Duration::from_millis(50), r.rx.recv()).await.is_err(),
            "sleeping hub must not dispatch"
        );

        r.sleeping.store(false, AtomicOrdering::Relaxed);
        // The retry timer picks the task up without any new enqueue.
        assert_eq!(next(&mut r.rx).await.agent_id, "alice");
    }

    #[tokio::test]
    async fn clear_drops_pending_and_rejects_new() {
        let r = start(2, 1_000);
        r.queue
            .enqueue(task("alice", Instant::now() + Duration::from_secs(60)));
        assert_eq!(r.queue.pending(), 1);

        r.queue.clear();
        assert_eq!(r.queue.pending(), 0);
        assert!(!r.queue.enqueue(task("bob", Instant::now())));
    }

    #[tokio::test]
    async fn batch_enqueue_counts_accepted() {
        let r = start(2, 1_000);
        let now = Instant::now() + Duration::from_secs(60);
        let n = r
            .queue
            .enqueue_batch(vec![task("a", now), task("b", now), task("c", now)]);
        assert_eq!(n, 3);
        assert_eq!(r.queue.pending(), 3);
    }
}
