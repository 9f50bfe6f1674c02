//! Security event collector: fan-out and buffering.

use argus_core::SecurityEvent;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

/// Error returned by a listener; caught at the dispatch boundary and
/// never propagated to the collector, its siblings, or the producer.
#[derive(Debug, Error)]
#[error("Listener error: {0}")]
pub struct ListenerError(pub String);

/// A consumer of the collector's event stream.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Listener name, used in error logs.
    fn name(&self) -> &str;

    /// Handles one event. Runs before the event is buffered.
    async fn on_event(&self, event: &SecurityEvent) -> Result<(), ListenerError>;
}

/// Destination for buffered events when the buffer flushes.
#[async_trait]
pub trait EventDrain: Send + Sync {
    /// Persists one batch of events.
    async fn drain(&self, events: Vec<SecurityEvent>);
}

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Buffer flushes once this many events accumulate. Timer-driven
    /// flushes come from the runtime's scheduled task.
    pub buffer_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
        }
    }
}

/// Counters describing collector activity.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Events accepted.
    pub events_received: u64,
    /// Events handed to the drain.
    pub events_drained: u64,
    /// Listener errors caught at the dispatch boundary.
    pub listener_errors: u64,
}

/// Single logical stream of security events.
///
/// Each reported event is dispatched synchronously to every subscribed
/// listener, in subscription order, *before* being appended to the
/// buffer. A listener therefore always observes an event before anything
/// else can read it from the drain.
pub struct SecurityEventCollector {
    config: CollectorConfig,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    drain: RwLock<Option<Arc<dyn EventDrain>>>,
    buffer: Mutex<Vec<SecurityEvent>>,
    stats: Mutex<CollectorStats>,
}

impl SecurityEventCollector {
    /// Creates a collector with no listeners and no drain.
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            listeners: RwLock::new(Vec::new()),
            drain: RwLock::new(None),
            buffer: Mutex::new(Vec::new()),
            stats: Mutex::new(CollectorStats::default()),
        }
    }

    /// Subscribes a listener. Dispatch order follows subscription order.
    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Sets the drain receiving flushed batches.
    pub async fn set_drain(&self, drain: Arc<dyn EventDrain>) {
        *self.drain.write().await = Some(drain);
    }

    /// Reports one event: fan-out first, then buffering.
    ///
    /// A listener error is caught, logged, and counted; it never blocks
    /// the remaining listeners or prevents the event from being buffered.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn report_event(&self, event: SecurityEvent) {
        let listeners = self.listeners.read().await.clone();
        for listener in &listeners {
            if let Err(e) = listener.on_event(&event).await {
                warn!(listener = %listener.name(), "Listener failed: {}", e);
                self.stats.lock().await.listener_errors += 1;
            }
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(event);
            buffer.len() >= self.config.buffer_capacity
        };
        self.stats.lock().await.events_received += 1;

        if should_flush {
            self.flush().await;
        }
    }

    /// Flushes the buffer to the drain. With no drain configured the
    /// batch is dropped: every listener has already observed it.
    pub async fn flush(&self) {
        let batch: Vec<SecurityEvent> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        let count = batch.len() as u64;
        debug!(count, "Flushing event buffer");
        if let Some(drain) = self.drain.read().await.clone() {
            drain.drain(batch).await;
        }
        self.stats.lock().await.events_drained += count;
    }

    /// Returns a snapshot of the collector counters.
    pub async fn stats(&self) -> CollectorStats {
        self.stats.lock().await.clone()
    }

    /// Number of events currently buffered.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::{SecurityEventType, Severity};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    struct CountingListener {
        name: String,
        seen: AtomicU64,
        fail: bool,
    }

    impl CountingListener {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: AtomicU64::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl EventListener for CountingListener {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_event(&self, _event: &SecurityEvent) -> Result<(), ListenerError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ListenerError("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingDrain {
        batches: StdMutex<Vec<Vec<SecurityEvent>>>,
    }

    #[async_trait]
    impl EventDrain for RecordingDrain {
        async fn drain(&self, events: Vec<SecurityEvent>) {
            self.batches.lock().unwrap().push(events);
        }
    }

    fn event() -> SecurityEvent {
        SecurityEvent::new(SecurityEventType::DataAccess, Severity::Info)
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_listeners() {
        let collector = SecurityEventCollector::new(CollectorConfig::default());
        let a = CountingListener::new("a", false);
        let b = CountingListener::new("b", false);
        collector.subscribe(a.clone()).await;
        collector.subscribe(b.clone()).await;

        collector.report_event(event()).await;
        assert_eq!(a.seen.load(Ordering::SeqCst), 1);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_siblings_or_buffering() {
        let collector = SecurityEventCollector::new(CollectorConfig::default());
        let failing = CountingListener::new("failing", true);
        let healthy = CountingListener::new("healthy", false);
        collector.subscribe(failing.clone()).await;
        collector.subscribe(healthy.clone()).await;

        collector.report_event(event()).await;

        assert_eq!(healthy.seen.load(Ordering::SeqCst), 1);
        assert_eq!(collector.buffered().await, 1);
        let stats = collector.stats().await;
        assert_eq!(stats.listener_errors, 1);
        assert_eq!(stats.events_received, 1);
    }

    #[tokio::test]
    async fn test_buffer_flushes_to_drain_on_capacity() {
        let collector = SecurityEventCollector::new(CollectorConfig { buffer_capacity: 3 });
        let drain = Arc::new(RecordingDrain::default());
        collector.set_drain(drain.clone()).await;

        for _ in 0..3 {
            collector.report_event(event()).await;
        }

        let batches = drain.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        drop(batches);
        assert_eq!(collector.buffered().await, 0);
    }

    #[tokio::test]
    async fn test_listeners_observe_before_drain() {
        // With capacity 1 every event flushes immediately; the listener
        // still sees it before the drain does.
        struct OrderListener {
            log: Arc<StdMutex<Vec<&'static str>>>,
        }
        #[async_trait]
        impl EventListener for OrderListener {
            fn name(&self) -> &str {
                "order"
            }
            async fn on_event(&self, _: &SecurityEvent) -> Result<(), ListenerError> {
                self.log.lock().unwrap().push("listener");
                Ok(())
            }
        }
        struct OrderDrain {
            log: Arc<StdMutex<Vec<&'static str>>>,
        }
        #[async_trait]
        impl EventDrain for OrderDrain {
            async fn drain(&self, _: Vec<SecurityEvent>) {
                self.log.lock().unwrap().push("drain");
            }
        }

        let log = Arc::new(StdMutex::new(Vec::new()));
        let collector = SecurityEventCollector::new(CollectorConfig { buffer_capacity: 1 });
        collector
            .subscribe(Arc::new(OrderListener { log: log.clone() }))
            .await;
        collector
            .set_drain(Arc::new(OrderDrain { log: log.clone() }))
            .await;

        collector.report_event(event()).await;
        assert_eq!(*log.lock().unwrap(), vec!["listener", "drain"]);
    }

    #[tokio::test]
    async fn test_manual_flush_drains_partial_buffer() {
        let collector = SecurityEventCollector::new(CollectorConfig::default());
        let drain = Arc::new(RecordingDrain::default());
        collector.set_drain(drain.clone()).await;

        collector.report_event(event()).await;
        collector.report_event(event()).await;
        collector.flush().await;

        assert_eq!(drain.batches.lock().unwrap()[0].len(), 2);
        assert_eq!(collector.stats().await.events_drained, 2);
    }
}
