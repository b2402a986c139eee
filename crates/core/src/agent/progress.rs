//! # Progress Reporter
//!
//! Sinks that carry [`ProgressEvent`]s out of a run. Emitting never blocks
//! and never fails: a slow or vanished observer loses events, the run
//! carries on.
//!
//! - [`ChannelSink`] - per-request channel feeding the SSE response
//! - [`ObserverRegistry`] - session-keyed websocket observers
//! - [`FanoutSink`] - both at once

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::{ProgressEvent, StreamFrame};

/// Buffered events per websocket observer before events are dropped
const OBSERVER_BUFFER: usize = 256;

/// Receives progress events for one run
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Forwards events into a per-request frame channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamFrame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamFrame>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: &ProgressEvent) {
        // Receiver gone means the client left; cancellation handles the rest
        let _ = self.tx.send(event.clone().into());
    }
}

struct Observer {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

/// Live observers keyed by chat session id
pub struct ObserverRegistry {
    observers: DashMap<String, Vec<Observer>>,
    next_id: AtomicU64,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            observers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to a session's events
    pub fn register(&self, session_id: &str) -> (u64, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .entry(session_id.to_string())
            .or_default()
            .push(Observer { id, tx });
        tracing::debug!(session_id, observer = id, "observer registered");
        (id, rx)
    }

    pub fn unregister(&self, session_id: &str, id: u64) {
        let mut emptied = false;
        if let Some(mut observers) = self.observers.get_mut(session_id) {
            observers.retain(|o| o.id != id);
            emptied = observers.is_empty();
        }
        if emptied {
            self.observers.remove_if(session_id, |_, v| v.is_empty());
        }
        tracing::debug!(session_id, observer = id, "observer unregistered");
    }

    /// Deliver to every observer of the session, pruning closed ones
    pub fn publish(&self, session_id: &str, event: &ProgressEvent) {
        let mut emptied = false;
        if let Some(mut observers) = self.observers.get_mut(session_id) {
            observers.retain(|o| match o.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(session_id, observer = o.id, "observer lagging, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
            emptied = observers.is_empty();
        }
        // The shard guard above is released before touching the map again
        if emptied {
            self.observers.remove_if(session_id, |_, v| v.is_empty());
        }
    }

    pub fn observer_count(&self, session_id: &str) -> usize {
        self.observers.get(session_id).map_or(0, |o| o.len())
    }

    /// Sink publishing to one session's observers
    pub fn sink(self: &Arc<Self>, session_id: &str) -> Arc<dyn ProgressSink> {
        Arc::new(SessionSink {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
        })
    }
}

pub struct SessionSink {
    registry: Arc<ObserverRegistry>,
    session_id: String,
}

impl ProgressSink for SessionSink {
    fn emit(&self, event: &ProgressEvent) {
        self.registry.publish(&self.session_id, event);
    }
}

/// Emits to every inner sink in order
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::pipeline::PipelineStage;

    #[tokio::test]
    async fn test_events_route_by_session() {
        let registry = Arc::new(ObserverRegistry::new());
        let (_, mut rx_a) = registry.register("a");
        let (_, mut rx_b) = registry.register("b");

        registry
            .sink("a")
            .emit(&ProgressEvent::start(PipelineStage::IntentParsing));

        let received = rx_a.recv().await.unwrap();
        assert_eq!(received.step(), "intent");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_closed_observers_are_pruned() {
        let registry = ObserverRegistry::new();
        let (_, rx) = registry.register("s");
        let (_, _keep) = registry.register("s");
        drop(rx);

        registry.publish("s", &ProgressEvent::start(PipelineStage::DiagramGen));
        assert_eq!(registry.observer_count("s"), 1);
    }

    #[test]
    fn test_unregister_removes_empty_session() {
        let registry = ObserverRegistry::new();
        let (id, _rx) = registry.register("s");
        registry.unregister("s", id);
        assert_eq!(registry.observer_count("s"), 0);
        // Publishing to nobody is a no-op
        registry.publish("s", &ProgressEvent::end(PipelineStage::DiagramGen));
    }

    #[test]
    fn test_full_observer_drops_without_blocking() {
        let registry = ObserverRegistry::new();
        let (_, _rx) = registry.register("s");
        for _ in 0..(OBSERVER_BUFFER + 10) {
            registry.publish("s", &ProgressEvent::chunk(PipelineStage::DocGen, "x"));
        }
        assert_eq!(registry.observer_count("s"), 1);
    }

    #[tokio::test]
    async fn test_fanout_reaches_channel_and_registry() {
        let registry = Arc::new(ObserverRegistry::new());
        let (_, mut observer) = registry.register("s");
        let (tx, mut frames) = mpsc::unbounded_channel();

        let fanout = FanoutSink::new(vec![Arc::new(ChannelSink::new(tx)), registry.sink("s")]);
        fanout.emit(&ProgressEvent::end(PipelineStage::Validating));

        assert!(matches!(
            frames.recv().await,
            Some(StreamFrame::Status { .. })
        ));
        assert!(observer.recv().await.is_some());
    }
}
