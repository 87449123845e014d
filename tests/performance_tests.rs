use commhub::core::broadcast::Broadcaster;
use commhub::{Direction, EngineEvent, EventBus, MessageRecord, SessionStatus, StoreManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Performance and stress tests
#[cfg(test)]
mod performance_tests {
    use super::*;

    #[test]
    fn test_sqlite_append_throughput() {
        let dir = TempDir::new().unwrap();
        let store = StoreManager::new(dir.path());

        let start = Instant::now();
        for i in 0..2_000u32 {
            let record = MessageRecord::capture(Direction::Received, &i.to_be_bytes(), true);
            store.append("tcpc_bulk", record).expect("append failed");
        }
        let elapsed = start.elapsed();

        assert_eq!(store.count("tcpc_bulk").unwrap(), 2_000);
        assert!(elapsed < Duration::from_secs(20), "Appends too slow: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_fan_out_to_many_observers() {
        let broadcaster = Broadcaster::new(1_024);
        let mut queues = Vec::new();
        for _ in 0..200 {
            let (observer, rx) = broadcaster.register(None).await;
            broadcaster.subscribe(observer.id(), "tcps_fan").await.unwrap();
            queues.push(rx);
        }

        let event = EngineEvent::status("tcps_fan", SessionStatus::Connecting, SessionStatus::Listening);
        let start = Instant::now();
        for _ in 0..100 {
            assert_eq!(broadcaster.notify("tcps_fan", &event).await, 200);
        }
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_secs(2), "Fan-out too slow: {:?}", elapsed);
        for rx in &mut queues {
            let mut received = 0;
            while rx.try_recv().is_ok() {
                received += 1;
            }
            assert_eq!(received, 100);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bus_accounts_for_every_publish() {
        let bus = Arc::new(EventBus::new(8));
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        bus.subscribe(commhub::topics::SESSION_STATUS, move |_| {
            std::thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let publishers: Vec<_> = (0..4)
            .map(|_| {
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    for _ in 0..250 {
                        bus.publish(EngineEvent::status("s", SessionStatus::Idle, SessionStatus::Connecting));
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.await.expect("publisher panicked");
        }

        // Every dispatch either runs or is counted as dropped.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let total = handled.load(Ordering::SeqCst) as u64 + bus.dropped_dispatches();
            if total == 1_000 {
                break;
            }
            assert!(Instant::now() < deadline, "only {} of 1000 dispatches settled", total);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
