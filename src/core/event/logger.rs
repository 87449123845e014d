use super::bus::{EventBus, SubscriptionId};
use super::events::{topics, EngineEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Audit trail of every published event, written through `tracing`
pub struct EventLogger {
    enabled: AtomicBool,
    /// Topics to log; empty means all
    interests: RwLock<HashSet<String>>,
}

impl EventLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            interests: RwLock::new(HashSet::new()),
        })
    }

    /// Subscribe to the wildcard topic of `bus`
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let logger = Arc::clone(self);
        bus.subscribe(topics::WILDCARD, move |event| logger.log(&event))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_interests<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut interests = self.interests.write().unwrap_or_else(|p| p.into_inner());
        *interests = topics.into_iter().map(Into::into).collect();
    }

    pub fn wants(&self, topic: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let interests = self.interests.read().unwrap_or_else(|p| p.into_inner());
        interests.is_empty() || interests.contains(topic)
    }

    fn log(&self, event: &EngineEvent) {
        let topic = event.topic();
        if !self.wants(topic) {
            return;
        }

        let session = event.session_id().unwrap_or("-");
        match event {
            EngineEvent::Error { code, message, .. } => {
                warn!(target: "commhub::events", topic, session, code, "{}", message)
            }
            EngineEvent::Message { direction, byte_length, .. } => {
                debug!(target: "commhub::events", topic, session, %direction, byte_length, "message")
            }
            EngineEvent::SessionStatusChanged { previous, status, .. } => {
                info!(target: "commhub::events", topic, session, "{} -> {}", previous, status)
            }
            other => info!(target: "commhub::events", topic, session, "{:?}", other),
        }
    }
}
