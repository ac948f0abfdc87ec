//! Event/Stream Bus (spec.md §4.A).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Duration};

use cortexos_types::{StreamEvent, StreamEventType};

/// Replay buffer size for pull subscribers reconnecting with a
/// `Last-Event-ID` (spec.md §4.A).
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15_000;

/// Thin wrapper over `tokio::sync::broadcast`, generalized over any typed
/// payload rather than one fixed event shape. No callback is invoked
/// synchronously here, so a misbehaving subscriber can never affect
/// another: each drains its own receiver independently.
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + 'static> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Publishes to every current subscriber. Returns 0 (not an error) when
    /// there are none -- a quiet bus is a normal state, not a failure.
    pub fn publish(&self, event: T) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

struct Inner {
    sequence: AtomicU64,
    buffer: Mutex<VecDeque<StreamEvent>>,
    buffer_capacity: usize,
    closed: AtomicBool,
}

/// Owns the single outward-facing event stream for one execution:
/// sequence assignment, a bounded ring buffer for replay, and fan-out to
/// push subscribers. `Engine` holds the sole instance and hands out
/// clones (cheap -- internal state is `Arc`-shared) rather than raw
/// mutable access, matching the single-writer rule in spec.md §5.
#[derive(Clone)]
pub struct StreamController {
    bus: EventBus<StreamEvent>,
    inner: Arc<Inner>,
}

impl StreamController {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            bus: EventBus::new(buffer_capacity.max(64)),
            inner: Arc::new(Inner {
                sequence: AtomicU64::new(0),
                buffer: Mutex::new(VecDeque::with_capacity(buffer_capacity)),
                buffer_capacity,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Idempotent: closing an already-closed controller is a no-op.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Assigns the next sequence number, appends to the replay buffer, and
    /// publishes to push subscribers. A no-op once closed.
    pub async fn emit(&self, event_type: StreamEventType, stage: Option<String>, data: Value) {
        if self.is_closed() {
            return;
        }
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let event = StreamEvent {
            event_type,
            stage,
            data,
            timestamp: Utc::now(),
            sequence,
        };

        let mut buffer = self.inner.buffer.lock().await;
        if buffer.len() >= self.inner.buffer_capacity {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
        drop(buffer);

        self.bus.publish(event);
    }

    pub fn subscribe_push(&self) -> broadcast::Receiver<StreamEvent> {
        self.bus.subscribe()
    }

    /// Events still held in the ring buffer with `sequence > from_sequence`.
    pub async fn replay_since(&self, from_sequence: u64) -> Vec<StreamEvent> {
        let buffer = self.inner.buffer.lock().await;
        buffer
            .iter()
            .filter(|e| e.sequence > from_sequence)
            .cloned()
            .collect()
    }

    /// Pull-subscriber stream: drains the buffer from `from_sequence`
    /// first, then switches to the live feed, skipping anything the buffer
    /// drain already yielded (P4 -- every consumer sees strictly
    /// increasing sequence numbers with no gaps it hasn't already seen).
    pub fn pull_stream(&self, from_sequence: u64) -> impl Stream<Item = StreamEvent> {
        let controller = self.clone();
        async_stream::stream! {
            let backlog = controller.replay_since(from_sequence).await;
            let mut last_sequence = from_sequence;
            for event in backlog {
                last_sequence = event.sequence;
                yield event;
            }

            let mut rx = controller.subscribe_push();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.sequence > last_sequence {
                            last_sequence = event.sequence;
                            yield event;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Spawns the heartbeat task; stops itself once the controller closes.
    pub fn spawn_heartbeat(&self, interval_ms: u64) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                if controller.is_closed() {
                    break;
                }
                controller
                    .emit(StreamEventType::Heartbeat, None, Value::Null)
                    .await;
            }
        })
    }
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn sequence_numbers_are_monotonically_increasing() {
        let controller = StreamController::new(16);
        for _ in 0..5 {
            controller
                .emit(StreamEventType::StageProgress, None, Value::Null)
                .await;
        }
        let events = controller.replay_since(0).await;
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn emit_after_close_is_a_no_op() {
        let controller = StreamController::new(16);
        controller.close();
        controller
            .emit(StreamEventType::StageProgress, None, Value::Null)
            .await;
        assert!(controller.replay_since(0).await.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let controller = StreamController::new(16);
        controller.close();
        controller.close();
        assert!(controller.is_closed());
    }

    #[tokio::test]
    async fn ring_buffer_drops_oldest_past_capacity() {
        let controller = StreamController::new(2);
        for _ in 0..5 {
            controller
                .emit(StreamEventType::StageProgress, None, Value::Null)
                .await;
        }
        let events = controller.replay_since(0).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 3);
        assert_eq!(events[1].sequence, 4);
    }

    #[tokio::test]
    async fn pull_stream_replays_backlog_then_live_events() {
        let controller = StreamController::new(16);
        controller
            .emit(StreamEventType::StageEnter, None, Value::Null)
            .await;
        controller
            .emit(StreamEventType::StageExit, None, Value::Null)
            .await;

        let stream = controller.pull_stream(0);
        tokio::pin!(stream);

        let first = stream.next().await.unwrap();
        assert_eq!(first.sequence, 0);
        let second = stream.next().await.unwrap();
        assert_eq!(second.sequence, 1);

        controller
            .emit(StreamEventType::Heartbeat, None, Value::Null)
            .await;
        let third = stream.next().await.unwrap();
        assert_eq!(third.sequence, 2);
    }
}
