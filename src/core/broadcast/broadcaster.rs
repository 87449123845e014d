use super::observer::{ObserverHandle, Outbound};
use crate::core::event::EngineEvent;
use crate::domain::error::{CommHubError, CommHubResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct Subscriptions {
    observers: HashMap<String, Arc<ObserverHandle>>,
    by_session: HashMap<String, HashSet<String>>,
}

impl Subscriptions {
    fn evict(&mut self, observer_id: &str) -> Option<Arc<ObserverHandle>> {
        let handle = self.observers.remove(observer_id)?;
        self.by_session.retain(|_, observers| {
            observers.remove(observer_id);
            !observers.is_empty()
        });
        handle.disconnect();
        Some(handle)
    }
}

/// Fans session events out to subscribed observers.
///
/// Delivery is non-blocking: an observer whose queue is full is evicted from
/// every subscription and disconnected. `notify` enqueues while holding the
/// shared section, so an observer removed by an `unsubscribe` that returned
/// earlier never receives the event.
pub struct Broadcaster {
    state: RwLock<Subscriptions>,
    queue_capacity: usize,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: RwLock::new(Subscriptions::default()),
            queue_capacity,
        }
    }

    /// Register an observer and return its queue
    pub async fn register(&self, observer_id: Option<String>) -> (Arc<ObserverHandle>, mpsc::Receiver<Outbound>) {
        let id = observer_id.unwrap_or_else(ObserverHandle::generate_id);
        let (handle, rx) = ObserverHandle::new(id.clone(), self.queue_capacity);

        let mut state = self.state.write().await;
        if let Some(previous) = state.evict(&id) {
            debug!("Observer '{}' re-registered, dropping previous queue", previous.id());
        }
        state.observers.insert(id.clone(), Arc::clone(&handle));
        info!("Observer '{}' registered", id);
        (handle, rx)
    }

    /// Remove an observer from every subscription
    pub async fn remove_observer(&self, observer_id: &str) -> bool {
        let removed = self.state.write().await.evict(observer_id).is_some();
        if removed {
            info!("Observer '{}' removed", observer_id);
        }
        removed
    }

    pub async fn subscribe(&self, observer_id: &str, session_id: &str) -> CommHubResult<()> {
        let mut state = self.state.write().await;
        if !state.observers.contains_key(observer_id) {
            return Err(CommHubError::InvalidInput(format!(
                "unknown observer '{}'",
                observer_id
            )));
        }
        state
            .by_session
            .entry(session_id.to_string())
            .or_default()
            .insert(observer_id.to_string());
        debug!("Observer '{}' subscribed to '{}'", observer_id, session_id);
        Ok(())
    }

    pub async fn unsubscribe(&self, observer_id: &str, session_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(observers) = state.by_session.get_mut(session_id) else {
            return false;
        };
        let removed = observers.remove(observer_id);
        if observers.is_empty() {
            state.by_session.remove(session_id);
        }
        removed
    }

    /// Drop every subscription to `session_id`, returning the affected observers
    pub async fn unsubscribe_session(&self, session_id: &str) -> Vec<String> {
        let mut state = self.state.write().await;
        state
            .by_session
            .remove(session_id)
            .map(|observers| observers.into_iter().collect())
            .unwrap_or_default()
    }

    /// Enqueue `event` for every observer of `session_id`.
    /// Returns the number of observers it was delivered to.
    pub async fn notify(&self, session_id: &str, event: &EngineEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                error!("Failed to serialize event for '{}': {}", session_id, e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut slow = Vec::new();
        {
            let state = self.state.read().await;
            let Some(observers) = state.by_session.get(session_id) else {
                return 0;
            };
            for observer_id in observers {
                let Some(handle) = state.observers.get(observer_id) else {
                    continue;
                };
                if handle.send(Arc::clone(&payload)) {
                    delivered += 1;
                } else {
                    slow.push(observer_id.clone());
                }
            }
        }

        if !slow.is_empty() {
            let mut state = self.state.write().await;
            for observer_id in slow {
                if state.evict(&observer_id).is_some() {
                    warn!("Evicted slow observer '{}'", observer_id);
                }
            }
        }

        delivered
    }

    /// Send a raw reply to one observer
    pub async fn send_to(&self, observer_id: &str, payload: Outbound) -> bool {
        let delivered = {
            let state = self.state.read().await;
            match state.observers.get(observer_id) {
                Some(handle) => handle.send(payload),
                None => return false,
            }
        };
        if !delivered {
            self.state.write().await.evict(observer_id);
            warn!("Evicted slow observer '{}'", observer_id);
        }
        delivered
    }

    pub async fn subscribers(&self, session_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .by_session
            .get(session_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub async fn observer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.observers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn observer_count(&self) -> usize {
        self.state.read().await.observers.len()
    }

    /// Disconnect every observer
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        for handle in state.observers.values() {
            handle.disconnect();
        }
        state.observers.clear();
        state.by_session.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::state::SessionStatus;

    fn event(session: &str) -> EngineEvent {
        EngineEvent::status(session, SessionStatus::Idle, SessionStatus::Connecting)
    }

    #[tokio::test]
    async fn test_notify_reaches_subscribers_only() {
        let broadcaster = Broadcaster::new(8);
        let (a, mut rx_a) = broadcaster.register(Some("a".into())).await;
        let (_b, mut rx_b) = broadcaster.register(Some("b".into())).await;

        broadcaster.subscribe(a.id(), "s1").await.unwrap();
        assert_eq!(broadcaster.notify("s1", &event("s1")).await, 1);

        assert!(rx_a.try_recv().unwrap().contains("\"sessionId\":\"s1\""));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribed_observer_gets_nothing() {
        let broadcaster = Broadcaster::new(8);
        let (a, mut rx) = broadcaster.register(None).await;
        broadcaster.subscribe(a.id(), "s1").await.unwrap();

        assert!(broadcaster.unsubscribe(a.id(), "s1").await);
        assert_eq!(broadcaster.notify("s1", &event("s1")).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_observer() {
        let broadcaster = Broadcaster::new(1);
        let (slow, _rx_slow) = broadcaster.register(Some("slow".into())).await;
        let (fast, mut rx_fast) = broadcaster.register(Some("fast".into())).await;
        for session in ["s1", "s2"] {
            broadcaster.subscribe(slow.id(), session).await.unwrap();
        }
        broadcaster.subscribe(fast.id(), "s1").await.unwrap();

        assert_eq!(broadcaster.notify("s1", &event("s1")).await, 2);
        rx_fast.try_recv().unwrap();
        assert_eq!(broadcaster.notify("s1", &event("s1")).await, 1);

        assert!(slow.is_disconnected());
        assert_eq!(broadcaster.observer_count().await, 1);
        assert!(broadcaster.subscribers("s2").await.is_empty());
        assert_eq!(broadcaster.subscribers("s1").await, vec!["fast".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_requires_registration() {
        let broadcaster = Broadcaster::new(4);
        assert!(broadcaster.subscribe("ghost", "s1").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_unsubscribe_and_notify() {
        let broadcaster = Arc::new(Broadcaster::new(1024));
        let (handle, mut rx) = broadcaster.register(Some("obs".into())).await;
        broadcaster.subscribe(handle.id(), "s1").await.unwrap();

        let notifier = {
            let broadcaster = Arc::clone(&broadcaster);
            tokio::spawn(async move {
                for _ in 0..200 {
                    broadcaster.notify("s1", &event("s1")).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::task::yield_now().await;
        broadcaster.unsubscribe("obs", "s1").await;
        let drained_at_unsubscribe = {
            let mut n = 0;
            while rx.try_recv().is_ok() {
                n += 1;
            }
            n
        };
        notifier.await.unwrap();

        assert!(drained_at_unsubscribe <= 200);
        assert!(rx.try_recv().is_err());
    }
}
