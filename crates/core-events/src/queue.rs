//! Bounded dispatch queue between the engine (single producer) and the
//! OS-side injector (single consumer).
//!
//! Policy: the producer never blocks. `try_enqueue` on a full queue drops the
//! offered event, increments the drop counter, and returns false; preserving
//! frame latency is preferred over lossless delivery because a stalled
//! injector would otherwise back the whole ingress pipeline up. The consumer
//! may wait a small budget for the next event (internal lock + condvar
//! signal). `reset` purges the ring; `complete()` wakes the egress for a
//! final drain and shuts it down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::{DispatchEvent, EVENTS_EMITTED, EgressPort};

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    dropped_full: AtomicU64,
    suppressed_typing_disabled: AtomicU64,
    dequeued: AtomicU64,
    purged: AtomicU64,
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueMetrics {
    pub depth: usize,
    pub enqueued: u64,
    pub dropped_full: u64,
    pub suppressed_typing_disabled: u64,
    pub dequeued: u64,
    pub purged: u64,
}

#[derive(Debug, Default)]
struct Inner {
    buf: VecDeque<DispatchEvent>,
    completed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    signal: Condvar,
    counters: QueueCounters,
    capacity: usize,
}

/// Engine-side handle.
pub struct QueueProducer {
    shared: Arc<Shared>,
}

/// Injector-side handle.
pub struct QueueConsumer {
    shared: Arc<Shared>,
}

/// Constructor namespace; the queue itself lives in its two handles.
pub struct DispatchQueue;

impl DispatchQueue {
    pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity.max(1)),
                completed: false,
            }),
            signal: Condvar::new(),
            counters: QueueCounters::default(),
            capacity: capacity.max(1),
        });
        (
            QueueProducer {
                shared: shared.clone(),
            },
            QueueConsumer { shared },
        )
    }
}

impl QueueProducer {
    /// Offer an event without blocking. Returns false (and counts a drop)
    /// when the queue is full or already completed.
    pub fn try_enqueue(&self, event: DispatchEvent) -> bool {
        let mut inner = self.shared.inner.lock().expect("queue lock");
        if inner.completed {
            trace!(target: "queue", kind = event.kind.as_str(), "enqueue_after_complete");
            return false;
        }
        if inner.buf.len() >= self.shared.capacity {
            let drops = self
                .shared
                .counters
                .dropped_full
                .fetch_add(1, Ordering::Relaxed)
                + 1;
            warn!(
                target: "queue",
                kind = event.kind.as_str(),
                drops,
                capacity = self.shared.capacity,
                "queue_full_drop"
            );
            return false;
        }
        inner.buf.push_back(event);
        drop(inner);
        self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        EVENTS_EMITTED.fetch_add(1, Ordering::Relaxed);
        self.shared.signal.notify_one();
        true
    }

    /// Count an event that was suppressed before it reached the queue
    /// (typing disabled). Kept here so the metrics snapshot is one-stop.
    pub fn note_suppressed_typing_disabled(&self) {
        self.shared
            .counters
            .suppressed_typing_disabled
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Drop everything currently queued (engine reset).
    pub fn purge(&self) {
        let mut inner = self.shared.inner.lock().expect("queue lock");
        let purged = inner.buf.len() as u64;
        inner.buf.clear();
        drop(inner);
        if purged > 0 {
            self.shared.counters.purged.fetch_add(purged, Ordering::Relaxed);
            debug!(target: "queue", purged, "queue_purged");
        }
    }

    /// Mark the queue complete: the egress drains the residue and stops;
    /// later enqueues are refused.
    pub fn complete(&self) {
        let mut inner = self.shared.inner.lock().expect("queue lock");
        inner.completed = true;
        drop(inner);
        self.shared.signal.notify_all();
        debug!(target: "queue", "producer_complete");
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.shared.metrics()
    }
}

impl QueueConsumer {
    /// Wait up to `budget` for the next event. Returns `None` on timeout or
    /// once the queue is completed and empty.
    pub fn try_dequeue(&self, budget: Duration) -> Option<DispatchEvent> {
        let mut inner = self.shared.inner.lock().expect("queue lock");
        let deadline = std::time::Instant::now() + budget;
        loop {
            if let Some(ev) = inner.buf.pop_front() {
                self.shared.counters.dequeued.fetch_add(1, Ordering::Relaxed);
                return Some(ev);
            }
            if inner.completed {
                return None;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, timeout) = self
                .shared
                .signal
                .wait_timeout(inner, deadline - now)
                .expect("queue lock");
            inner = guard;
            if timeout.timed_out() && inner.buf.is_empty() {
                return None;
            }
        }
    }

    pub fn completed(&self) -> bool {
        self.shared.inner.lock().expect("queue lock").completed
    }

    /// Drain everything currently queued without waiting.
    pub fn drain(&self) -> Vec<DispatchEvent> {
        let mut inner = self.shared.inner.lock().expect("queue lock");
        let out: Vec<_> = inner.buf.drain(..).collect();
        drop(inner);
        self.shared
            .counters
            .dequeued
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        out
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.shared.metrics()
    }
}

impl Shared {
    fn metrics(&self) -> QueueMetrics {
        let depth = self.inner.lock().expect("queue lock").buf.len();
        QueueMetrics {
            depth,
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped_full: self.counters.dropped_full.load(Ordering::Relaxed),
            suppressed_typing_disabled: self
                .counters
                .suppressed_typing_disabled
                .load(Ordering::Relaxed),
            dequeued: self.counters.dequeued.load(Ordering::Relaxed),
            purged: self.counters.purged.load(Ordering::Relaxed),
        }
    }
}

/// Spawn the egress thread: drains the queue into the injector until the
/// queue completes and empties. The wait budget bounds shutdown latency.
pub fn spawn_egress<P: EgressPort>(
    consumer: QueueConsumer,
    mut port: P,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("g2k-egress".into())
        .spawn(move || {
            let budget = Duration::from_millis(25);
            loop {
                match consumer.try_dequeue(budget) {
                    Some(ev) => port.inject(ev),
                    None => {
                        if consumer.completed() {
                            for ev in consumer.drain() {
                                port.inject(ev);
                            }
                            break;
                        }
                    }
                }
            }
            debug!(target: "queue", "egress_stopped");
        })
        .expect("spawn egress thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModFlags, Side, keycode};
    use std::sync::Mutex as StdMutex;

    fn tap(n: u64) -> DispatchEvent {
        DispatchEvent::key_tap(n, Side::Left, keycode::VK_ANSI_A, ModFlags::empty(), "a")
    }

    #[test]
    fn enqueue_dequeue_preserves_order() {
        let (tx, rx) = DispatchQueue::bounded(8);
        for n in 0..5 {
            assert!(tx.try_enqueue(tap(n)));
        }
        for n in 0..5 {
            let ev = rx.try_dequeue(Duration::from_millis(10)).unwrap();
            assert_eq!(ev.ticks, n);
        }
        assert!(rx.try_dequeue(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn full_queue_drops_newest_and_counts() {
        let (tx, rx) = DispatchQueue::bounded(2);
        assert!(tx.try_enqueue(tap(0)));
        assert!(tx.try_enqueue(tap(1)));
        assert!(!tx.try_enqueue(tap(2)));
        assert!(!tx.try_enqueue(tap(3)));
        let m = tx.metrics();
        assert_eq!(m.enqueued, 2);
        assert_eq!(m.dropped_full, 2);
        assert_eq!(m.depth, 2);
        // Oldest events survived.
        assert_eq!(rx.try_dequeue(Duration::from_millis(1)).unwrap().ticks, 0);
        assert_eq!(rx.try_dequeue(Duration::from_millis(1)).unwrap().ticks, 1);
    }

    #[test]
    fn purge_empties_ring_and_counts() {
        let (tx, rx) = DispatchQueue::bounded(8);
        for n in 0..5 {
            tx.try_enqueue(tap(n));
        }
        tx.purge();
        assert_eq!(tx.metrics().depth, 0);
        assert_eq!(tx.metrics().purged, 5);
        assert!(rx.try_dequeue(Duration::from_millis(1)).is_none());
        // Queue remains usable after a purge.
        assert!(tx.try_enqueue(tap(9)));
        assert_eq!(rx.try_dequeue(Duration::from_millis(1)).unwrap().ticks, 9);
    }

    #[test]
    fn suppression_counter_is_visible_to_both_sides() {
        let (tx, rx) = DispatchQueue::bounded(2);
        tx.note_suppressed_typing_disabled();
        tx.note_suppressed_typing_disabled();
        assert_eq!(tx.metrics().suppressed_typing_disabled, 2);
        assert_eq!(rx.metrics().suppressed_typing_disabled, 2);
    }

    #[test]
    fn complete_rejects_further_enqueues() {
        let (tx, rx) = DispatchQueue::bounded(4);
        assert!(tx.try_enqueue(tap(0)));
        tx.complete();
        assert!(!tx.try_enqueue(tap(1)));
        assert!(rx.completed());
        assert_eq!(rx.drain().len(), 1);
    }

    #[test]
    fn consumer_wakes_on_signal_not_timeout() {
        let (tx, rx) = DispatchQueue::bounded(4);
        let handle = std::thread::spawn(move || rx.try_dequeue(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(tx.try_enqueue(tap(7)));
        let got = handle.join().unwrap();
        assert_eq!(got.unwrap().ticks, 7);
    }

    #[test]
    fn egress_thread_drains_then_stops_on_complete() {
        struct Sink(Arc<StdMutex<Vec<u64>>>);
        impl EgressPort for Sink {
            fn inject(&mut self, event: DispatchEvent) {
                self.0.lock().unwrap().push(event.ticks);
            }
        }
        let (tx, rx) = DispatchQueue::bounded(16);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let handle = spawn_egress(rx, Sink(seen.clone()));
        for n in 0..10 {
            assert!(tx.try_enqueue(tap(n)));
        }
        tx.complete();
        handle.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
