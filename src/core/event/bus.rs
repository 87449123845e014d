use super::events::{topics, EngineEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Event handler. Runs on its own task, so it must not assume ordering
/// relative to other handlers.
pub type Handler = Arc<dyn Fn(Arc<EngineEvent>) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process publish/subscribe.
///
/// `publish` spawns one task per matching handler and returns immediately.
/// Handler tasks are bounded by a semaphore; when no permit is free the
/// dispatch is dropped and counted rather than blocking the publisher.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(max_concurrent_handlers: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register `handler` for `topic`; `"*"` receives every event
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<EngineEvent>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("Subscribed handler {:?} to '{}'", id, topic);
        id
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        let Some(list) = handlers.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(topic);
        }
        removed
    }

    pub fn publish(&self, event: EngineEvent) {
        let topic = event.topic();
        let targets: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
            [topic, topics::WILDCARD]
                .iter()
                .filter_map(|t| handlers.get(*t))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let event = Arc::new(event);
        let runtime = tokio::runtime::Handle::try_current().ok();

        for handler in targets {
            let Some(runtime) = &runtime else {
                handler(Arc::clone(&event));
                continue;
            };

            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => {
                    let event = Arc::clone(&event);
                    runtime.spawn(async move {
                        let _permit = permit;
                        handler(event);
                    });
                }
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Event bus saturated, dropped dispatch of '{}'", topic);
                }
            }
        }
    }

    /// Dispatches dropped because every handler permit was taken
    pub fn dropped_dispatches(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        handlers.get(topic).map(Vec::len).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::state::SessionStatus;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn status_event(id: &str) -> EngineEvent {
        EngineEvent::status(id, SessionStatus::Idle, SessionStatus::Connecting)
    }

    #[tokio::test]
    async fn test_topic_and_wildcard_delivery() {
        let bus = EventBus::new(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx_wild = tx.clone();

        bus.subscribe(topics::SESSION_STATUS, move |e| {
            let _ = tx.send(("topic", e.session_id().map(str::to_string)));
        });
        bus.subscribe(topics::WILDCARD, move |e| {
            let _ = tx_wild.send(("wildcard", e.session_id().map(str::to_string)));
        });

        bus.publish(status_event("a"));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let item = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(item.0);
        }
        seen.sort();
        assert_eq!(seen, vec!["topic", "wildcard"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = bus.subscribe(topics::SESSION_STATUS, move |_| {
            let _ = tx.send(());
        });

        assert!(bus.unsubscribe(topics::SESSION_STATUS, id));
        assert!(!bus.unsubscribe(topics::SESSION_STATUS, id));
        bus.publish(status_event("a"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.handler_count(topics::SESSION_STATUS), 0);
    }

    #[tokio::test]
    async fn test_saturation_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);

        bus.subscribe(topics::SESSION_STATUS, move |_| {
            let _ = release_rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_millis(500));
        });

        bus.publish(status_event("a"));
        bus.publish(status_event("b"));

        assert_eq!(bus.dropped_dispatches(), 1);
        let _ = release_tx.send(());
    }

    #[test]
    fn test_publish_without_runtime_runs_inline() {
        let bus = EventBus::new(4);
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(topics::WILDCARD, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(status_event("a"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
