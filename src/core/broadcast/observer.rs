use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Serialized event or reply queued for one observer
pub type Outbound = Arc<String>;

/// Sending half of an observer's bounded outbound queue
#[derive(Debug)]
pub struct ObserverHandle {
    id: String,
    tx: mpsc::Sender<Outbound>,
    /// Cancelled when the observer is evicted or removed
    cancel: CancellationToken,
    delivered: AtomicU64,
}

impl ObserverHandle {
    pub fn new(id: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id: id.into(),
            tx,
            cancel: CancellationToken::new(),
            delivered: AtomicU64::new(0),
        });
        (handle, rx)
    }

    pub fn generate_id() -> String {
        format!("client_{}", Uuid::new_v4().simple())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue without waiting. `false` means the queue is full or closed.
    pub fn send(&self, message: Outbound) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_reports_full_queue() {
        let (handle, mut rx) = ObserverHandle::new("client_a", 2);
        assert!(handle.send(Arc::new("1".into())));
        assert!(handle.send(Arc::new("2".into())));
        assert!(!handle.send(Arc::new("3".into())));
        assert_eq!(handle.delivered(), 2);

        assert_eq!(rx.try_recv().unwrap().as_str(), "1");
        assert!(handle.send(Arc::new("4".into())));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (handle, rx) = ObserverHandle::new("client_b", 4);
        drop(rx);
        assert!(!handle.send(Arc::new("x".into())));
        assert!(handle.is_disconnected());
    }
}
