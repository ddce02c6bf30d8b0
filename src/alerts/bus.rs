// =============================================================================
// Subscription Bus — fan-out of alerts to live subscribers
// =============================================================================
//
// One producer (the alert generator, via the scanner) feeds independent
// bounded queues, one per subscriber. A slow subscriber loses its oldest
// pending alert rather than blocking the producer; the loss is surfaced to
// that subscriber as a Dropped marker and counted. The bus also retains a
// ring of the latest 100 alerts for the REST surface.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::alerts::Alert;
use crate::types::{AlertKind, AlertPriority};

/// Bounded depth of each subscriber queue.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 32;

/// Alerts retained for `recent()` and mark-read.
const RING_CAPACITY: usize = 100;

/// Per-subscriber delivery filter. Empty criteria accept everything.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub symbols: Option<Vec<String>>,
    pub kinds: Option<Vec<AlertKind>>,
    pub min_priority: Option<AlertPriority>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(symbols) = &self.symbols {
            if !symbols.iter().any(|s| s.eq_ignore_ascii_case(&alert.symbol)) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&alert.kind) {
                return false;
            }
        }
        if let Some(min) = self.min_priority {
            if alert.priority < min {
                return false;
            }
        }
        true
    }
}

/// What a subscriber pulls off its stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Alert(Alert),
    /// `count` alerts were discarded because the queue was full.
    Dropped { count: u64 },
}

struct SubscriberQueue {
    pending: Mutex<VecDeque<Alert>>,
    /// Drops since the subscriber last drained; reported before the next
    /// alert so the loss is visible in-stream.
    dropped_pending: AtomicU64,
    notify: Notify,
    closed: AtomicBool,
}

struct Subscriber {
    id: u64,
    filter: AlertFilter,
    queue: Arc<SubscriberQueue>,
}

pub struct AlertBus {
    subscribers: RwLock<Vec<Subscriber>>,
    ring: RwLock<VecDeque<Alert>>,
    next_subscriber_id: AtomicU64,
    total_dropped: AtomicU64,
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            ring: RwLock::new(VecDeque::with_capacity(RING_CAPACITY)),
            next_subscriber_id: AtomicU64::new(1),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Publish one alert: append to the ring and offer it to every matching
    /// subscriber without ever blocking.
    pub fn publish(&self, alert: Alert) {
        {
            let mut ring = self.ring.write();
            ring.push_back(alert.clone());
            while ring.len() > RING_CAPACITY {
                ring.pop_front();
            }
        }

        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            if subscriber.queue.closed.load(Ordering::Relaxed) {
                continue;
            }
            if !subscriber.filter.matches(&alert) {
                continue;
            }

            {
                let mut pending = subscriber.queue.pending.lock();
                if pending.len() >= SUBSCRIBER_QUEUE_DEPTH {
                    pending.pop_front();
                    subscriber.queue.dropped_pending.fetch_add(1, Ordering::Relaxed);
                    let total = self.total_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        subscriber = subscriber.id,
                        total_dropped = total,
                        "subscriber queue full, oldest alert dropped"
                    );
                }
                pending.push_back(alert.clone());
            }
            subscriber.queue.notify.notify_one();
        }
    }

    /// Register a subscriber; the returned stream unsubscribes on drop.
    pub fn subscribe(self: &Arc<Self>, filter: AlertFilter) -> AlertStream {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            pending: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_QUEUE_DEPTH)),
            dropped_pending: AtomicU64::new(0),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        self.subscribers.write().push(Subscriber {
            id,
            filter,
            queue: queue.clone(),
        });
        debug!(subscriber = id, "alert subscriber registered");

        AlertStream {
            id,
            queue,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
        debug!(subscriber = id, "alert subscriber removed");
    }

    /// The newest `limit` retained alerts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.ring.read().iter().rev().take(limit).cloned().collect()
    }

    /// Mark a retained alert as read. Returns false for unknown ids.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut ring = self.ring.write();
        match ring.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.read = true;
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn dropped_total(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    fn pending_total(&self) -> usize {
        self.subscribers
            .read()
            .iter()
            .map(|s| s.queue.pending.lock().len())
            .sum()
    }

    /// Wait for subscriber queues to empty, up to `max_wait`. Called on
    /// shutdown so pending alerts reach their subscribers before exit.
    pub async fn drain(&self, max_wait: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + max_wait;
        while self.pending_total() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    pending = self.pending_total(),
                    "bus drain timed out with alerts still queued"
                );
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }
}

/// Receiving half of a subscription. Dropping it unsubscribes.
pub struct AlertStream {
    id: u64,
    queue: Arc<SubscriberQueue>,
    bus: std::sync::Weak<AlertBus>,
}

impl AlertStream {
    /// Next event for this subscriber. Dropped markers are delivered before
    /// newer alerts so the gap is visible where it happened.
    pub async fn recv(&mut self) -> BusEvent {
        loop {
            let dropped = self.queue.dropped_pending.swap(0, Ordering::Relaxed);
            if dropped > 0 {
                return BusEvent::Dropped { count: dropped };
            }

            if let Some(alert) = self.queue.pending.lock().pop_front() {
                return BusEvent::Alert(alert);
            }

            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking variant used by the drain path and tests.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        let dropped = self.queue.dropped_pending.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            return Some(BusEvent::Dropped { count: dropped });
        }
        self.queue.pending.lock().pop_front().map(BusEvent::Alert)
    }
}

impl Drop for AlertStream {
    fn drop(&mut self) {
        self.queue.closed.store(true, Ordering::Relaxed);
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn alert(symbol: &str, kind: AlertKind, priority: AlertPriority) -> Alert {
        Alert::new(symbol, kind, priority, "test alert")
    }

    #[tokio::test]
    async fn subscriber_receives_published_alerts_in_order() {
        let bus = Arc::new(AlertBus::new());
        let mut stream = bus.subscribe(AlertFilter::default());

        bus.publish(alert("NIFTY50", AlertKind::BosEntry, AlertPriority::High));
        bus.publish(alert("BANKNIFTY", AlertKind::TrendChange, AlertPriority::Medium));

        match stream.recv().await {
            BusEvent::Alert(a) => assert_eq!(a.symbol, "NIFTY50"),
            other => panic!("expected alert, got {other:?}"),
        }
        match stream.recv().await {
            BusEvent::Alert(a) => assert_eq!(a.symbol, "BANKNIFTY"),
            other => panic!("expected alert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn filters_are_per_subscriber() {
        let bus = Arc::new(AlertBus::new());
        let mut only_nifty = bus.subscribe(AlertFilter {
            symbols: Some(vec!["NIFTY50".into()]),
            ..AlertFilter::default()
        });
        let mut high_only = bus.subscribe(AlertFilter {
            min_priority: Some(AlertPriority::High),
            ..AlertFilter::default()
        });

        bus.publish(alert("BANKNIFTY", AlertKind::BosEntry, AlertPriority::High));
        bus.publish(alert("NIFTY50", AlertKind::TrendChange, AlertPriority::Medium));

        // only_nifty skips the BANKNIFTY alert entirely.
        match only_nifty.try_recv() {
            Some(BusEvent::Alert(a)) => assert_eq!(a.symbol, "NIFTY50"),
            other => panic!("expected NIFTY50 alert, got {other:?}"),
        }
        // high_only sees only the High alert.
        match high_only.try_recv() {
            Some(BusEvent::Alert(a)) => assert_eq!(a.symbol, "BANKNIFTY"),
            other => panic!("expected BANKNIFTY alert, got {other:?}"),
        }
        assert!(high_only.try_recv().is_none());
    }

    #[tokio::test]
    async fn kind_filter() {
        let bus = Arc::new(AlertBus::new());
        let mut stream = bus.subscribe(AlertFilter {
            kinds: Some(vec![AlertKind::FvgMitigated]),
            ..AlertFilter::default()
        });

        bus.publish(alert("X", AlertKind::BosEntry, AlertPriority::High));
        bus.publish(alert("X", AlertKind::FvgMitigated, AlertPriority::Medium));

        match stream.try_recv() {
            Some(BusEvent::Alert(a)) => assert_eq!(a.kind, AlertKind::FvgMitigated),
            other => panic!("expected FVG alert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_marks() {
        let bus = Arc::new(AlertBus::new());
        let mut stream = bus.subscribe(AlertFilter::default());

        for i in 0..(SUBSCRIBER_QUEUE_DEPTH + 3) {
            bus.publish(alert(
                &format!("SYM{i}"),
                AlertKind::PriceAlert,
                AlertPriority::Low,
            ));
        }

        // The marker arrives first and accounts for all three losses.
        match stream.recv().await {
            BusEvent::Dropped { count } => assert_eq!(count, 3),
            other => panic!("expected dropped marker, got {other:?}"),
        }
        // The oldest three alerts are gone.
        match stream.recv().await {
            BusEvent::Alert(a) => assert_eq!(a.symbol, "SYM3"),
            other => panic!("expected SYM3, got {other:?}"),
        }
        assert_eq!(bus.dropped_total(), 3);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let bus = Arc::new(AlertBus::new());
        let mut fast = bus.subscribe(AlertFilter::default());
        let _slow = bus.subscribe(AlertFilter::default());

        for i in 0..(SUBSCRIBER_QUEUE_DEPTH + 5) {
            bus.publish(alert(
                &format!("SYM{i}"),
                AlertKind::PriceAlert,
                AlertPriority::Low,
            ));
            // Fast subscriber keeps draining.
            while fast.try_recv().is_some() {}
        }

        // The fast subscriber never lost anything; its marker counter is 0.
        assert!(fast.try_recv().is_none());
        assert_eq!(bus.dropped_total(), 5);
    }

    #[tokio::test]
    async fn ring_caps_at_one_hundred() {
        let bus = Arc::new(AlertBus::new());
        for i in 0..130 {
            bus.publish(alert(
                &format!("SYM{i}"),
                AlertKind::PriceAlert,
                AlertPriority::Low,
            ));
        }

        let recent = bus.recent(200);
        assert_eq!(recent.len(), 100);
        // Newest first.
        assert_eq!(recent[0].symbol, "SYM129");
        assert_eq!(recent[99].symbol, "SYM30");

        let limited = bus.recent(10);
        assert_eq!(limited.len(), 10);
        assert_eq!(limited[0].symbol, "SYM129");
    }

    #[tokio::test]
    async fn mark_read_round_trip() {
        let bus = Arc::new(AlertBus::new());
        let a = alert("NIFTY50", AlertKind::BosEntry, AlertPriority::High);
        let id = a.id.clone();
        bus.publish(a);

        assert!(!bus.recent(1)[0].read);
        assert!(bus.mark_read(&id));
        assert!(bus.recent(1)[0].read);
        assert!(!bus.mark_read("no-such-id"));
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let bus = Arc::new(AlertBus::new());
        let stream = bus.subscribe(AlertFilter::default());
        assert_eq!(bus.subscriber_count(), 1);
        drop(stream);
        assert_eq!(bus.subscriber_count(), 0);

        // Publishing with no subscribers only feeds the ring.
        bus.publish(alert("X", AlertKind::PriceAlert, AlertPriority::Low));
        assert_eq!(bus.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn drain_returns_once_queues_empty() {
        let bus = Arc::new(AlertBus::new());
        let mut stream = bus.subscribe(AlertFilter::default());
        bus.publish(alert("X", AlertKind::PriceAlert, AlertPriority::Low));

        let drainer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.drain(std::time::Duration::from_secs(1)).await })
        };

        // Consume the pending alert so the drain completes.
        let _ = stream.recv().await;
        drainer.await.unwrap();
    }
}
