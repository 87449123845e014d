use crate::core::communication::transport::ConnectionAdapter;
use crate::domain::config::TcpClientConfig;
use crate::domain::error::CommHubError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl From<&TcpClientConfig> for ReconnectPolicy {
    fn from(config: &TcpClientConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Idle,
    Reconnecting { attempt: u32 },
    Connected,
    Failed,
}

/// Progress reports from a running supervisor
#[async_trait]
pub trait ReconnectObserver: Send + Sync {
    /// Attempt `attempt` of `max` begins its delay
    async fn attempt_started(&self, attempt: u32, max: u32);

    /// Delay elapsed, dialing now
    async fn dialing(&self, attempt: u32);

    async fn attempt_failed(&self, attempt: u32, error: &CommHubError);

    async fn reconnected(&self, attempt: u32);

    /// Attempt budget exhausted. Reported exactly once per run.
    async fn exhausted(&self, attempts: u32);
}

struct Run {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Armed flag and active run, guarded together so `trigger` and `stop`
/// cannot interleave
struct RunSlot {
    armed: bool,
    run: Option<Run>,
}

/// Drives re-establishment of a dropped TCP-client link.
///
/// At most one run is active per session; triggering while reconnecting is a
/// no-op. `stop` cancels a pending delay, waits for the run to finish and
/// disarms the supervisor until the next `arm`.
pub struct ReconnectSupervisor {
    session_id: String,
    policy: ReconnectPolicy,
    state: Arc<Mutex<ReconnectState>>,
    slot: tokio::sync::Mutex<RunSlot>,
}

impl ReconnectSupervisor {
    pub fn new(session_id: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            session_id: session_id.into(),
            policy,
            state: Arc::new(Mutex::new(ReconnectState::Idle)),
            slot: tokio::sync::Mutex::new(RunSlot {
                armed: true,
                run: None,
            }),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn state(&self) -> ReconnectState {
        *lock_state(&self.state)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self.state(), ReconnectState::Reconnecting { .. })
    }

    /// Allow link losses to start runs again after a `stop`
    pub async fn arm(&self) {
        self.slot.lock().await.armed = true;
    }

    pub async fn is_armed(&self) -> bool {
        self.slot.lock().await.armed
    }

    /// Start a reconnect run unless one is already active or the supervisor
    /// is disarmed. Returns whether a new run was started.
    pub async fn trigger(
        &self,
        adapter: Arc<dyn ConnectionAdapter>,
        observer: Arc<dyn ReconnectObserver>,
    ) -> bool {
        let mut slot = self.slot.lock().await;
        if !slot.armed {
            debug!("Reconnect for '{}' suppressed, supervisor disarmed", self.session_id);
            return false;
        }
        {
            let mut state = lock_state(&self.state);
            if matches!(*state, ReconnectState::Reconnecting { .. }) {
                return false;
            }
            *state = ReconnectState::Reconnecting { attempt: 1 };
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_reconnect(
            self.session_id.clone(),
            self.policy,
            Arc::clone(&self.state),
            adapter,
            observer,
            cancel.clone(),
        ));

        if let Some(previous) = slot.run.replace(Run { cancel, task }) {
            // A finished run from an earlier disconnect.
            previous.cancel.cancel();
        }
        drop(slot);

        info!("Reconnect supervisor started for session '{}'", self.session_id);
        true
    }

    /// Disarm, cancel any active run and wait for it to exit
    pub async fn stop(&self) {
        let run = {
            let mut slot = self.slot.lock().await;
            slot.armed = false;
            slot.run.take()
        };
        if let Some(run) = run {
            run.cancel.cancel();
            if let Err(e) = run.task.await {
                warn!("Reconnect task for '{}' ended abnormally: {}", self.session_id, e);
            }
        }

        let mut state = lock_state(&self.state);
        if matches!(*state, ReconnectState::Reconnecting { .. }) {
            *state = ReconnectState::Idle;
        }
    }
}

fn lock_state(state: &Mutex<ReconnectState>) -> std::sync::MutexGuard<'_, ReconnectState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_reconnect(
    session_id: String,
    policy: ReconnectPolicy,
    state: Arc<Mutex<ReconnectState>>,
    adapter: Arc<dyn ConnectionAdapter>,
    observer: Arc<dyn ReconnectObserver>,
    cancel: CancellationToken,
) {
    let mut attempt = 0;

    loop {
        attempt += 1;
        if attempt > policy.max_attempts {
            *lock_state(&state) = ReconnectState::Failed;
            warn!(
                "Session '{}' gave up reconnecting after {} attempts",
                session_id, policy.max_attempts
            );
            observer.exhausted(policy.max_attempts).await;
            return;
        }

        *lock_state(&state) = ReconnectState::Reconnecting { attempt };
        observer.attempt_started(attempt, policy.max_attempts).await;

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Reconnect for '{}' cancelled during delay", session_id);
                *lock_state(&state) = ReconnectState::Idle;
                return;
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }

        observer.dialing(attempt).await;
        match adapter.open().await {
            Ok(()) if cancel.is_cancelled() => {
                let _ = adapter.close().await;
                *lock_state(&state) = ReconnectState::Idle;
                return;
            }
            Ok(()) => {
                *lock_state(&state) = ReconnectState::Connected;
                info!("Session '{}' reconnected on attempt {}", session_id, attempt);
                observer.reconnected(attempt).await;
                return;
            }
            Err(e) => {
                warn!("Reconnect attempt {} for '{}' failed: {}", attempt, session_id, e);
                observer.attempt_failed(attempt, &e).await;
                if cancel.is_cancelled() {
                    *lock_state(&state) = ReconnectState::Idle;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::registry::tests::StubAdapter;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Report {
        Started(u32),
        Failed(u32),
        Reconnected(u32),
        Exhausted(u32),
    }

    struct ChannelObserver(mpsc::UnboundedSender<Report>);

    #[async_trait]
    impl ReconnectObserver for ChannelObserver {
        async fn attempt_started(&self, attempt: u32, _max: u32) {
            let _ = self.0.send(Report::Started(attempt));
        }

        async fn dialing(&self, _attempt: u32) {}

        async fn attempt_failed(&self, attempt: u32, _error: &CommHubError) {
            let _ = self.0.send(Report::Failed(attempt));
        }

        async fn reconnected(&self, attempt: u32) {
            let _ = self.0.send(Report::Reconnected(attempt));
        }

        async fn exhausted(&self, attempts: u32) {
            let _ = self.0.send(Report::Exhausted(attempts));
        }
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_attempts,
        }
    }

    async fn wait_for_terminal(supervisor: &ReconnectSupervisor) {
        for _ in 0..200 {
            if !supervisor.is_reconnecting() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("supervisor never settled");
    }

    #[tokio::test]
    async fn test_exhausts_attempt_budget() {
        let adapter = Arc::new(StubAdapter::default());
        adapter.fail_open.store(true, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new("tcpc_test", policy(3));

        assert!(supervisor.trigger(adapter.clone(), Arc::new(ChannelObserver(tx))).await);

        let mut reports = Vec::new();
        loop {
            let report = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let done = matches!(report, Report::Exhausted(_));
            reports.push(report);
            if done {
                break;
            }
        }

        assert_eq!(supervisor.state(), ReconnectState::Failed);
        assert_eq!(adapter.opens.load(Ordering::SeqCst), 3);
        assert_eq!(
            reports,
            vec![
                Report::Started(1),
                Report::Failed(1),
                Report::Started(2),
                Report::Failed(2),
                Report::Started(3),
                Report::Failed(3),
                Report::Exhausted(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        let adapter = Arc::new(StubAdapter::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new("tcpc_test", policy(5));

        supervisor.trigger(adapter.clone(), Arc::new(ChannelObserver(tx))).await;
        wait_for_terminal(&supervisor).await;

        assert_eq!(supervisor.state(), ReconnectState::Connected);
        assert!(adapter.is_open());
        assert_eq!(rx.recv().await, Some(Report::Started(1)));
        assert_eq!(rx.recv().await, Some(Report::Reconnected(1)));
    }

    #[tokio::test]
    async fn test_trigger_while_reconnecting_is_noop() {
        let adapter = Arc::new(StubAdapter::default());
        adapter.fail_open.store(true, Ordering::SeqCst);
        let (tx, _rx) = mpsc::unbounded_channel();
        let observer: Arc<dyn ReconnectObserver> = Arc::new(ChannelObserver(tx));
        let supervisor = ReconnectSupervisor::new(
            "tcpc_test",
            ReconnectPolicy {
                delay: Duration::from_secs(5),
                max_attempts: 3,
            },
        );

        assert!(supervisor.trigger(adapter.clone(), observer.clone()).await);
        assert!(!supervisor.trigger(adapter.clone(), observer).await);

        supervisor.stop().await;
        assert_eq!(supervisor.state(), ReconnectState::Idle);
        assert_eq!(adapter.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_disarms_until_armed() {
        let adapter = Arc::new(StubAdapter::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let observer: Arc<dyn ReconnectObserver> = Arc::new(ChannelObserver(tx));
        let supervisor = ReconnectSupervisor::new("tcpc_test", policy(1));

        supervisor.stop().await;
        assert!(!supervisor.trigger(adapter.clone(), observer.clone()).await);
        assert_eq!(supervisor.state(), ReconnectState::Idle);

        supervisor.arm().await;
        assert!(supervisor.is_armed().await);
        assert!(supervisor.trigger(adapter, observer).await);
        wait_for_terminal(&supervisor).await;
        assert_eq!(supervisor.state(), ReconnectState::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_racing_trigger_leaves_no_run() {
        let adapter = Arc::new(StubAdapter::default());
        adapter.fail_open.store(true, Ordering::SeqCst);
        let (tx, _rx) = mpsc::unbounded_channel();
        let observer: Arc<dyn ReconnectObserver> = Arc::new(ChannelObserver(tx));
        let slow = ReconnectPolicy {
            delay: Duration::from_secs(30),
            max_attempts: 3,
        };

        for _ in 0..200 {
            let supervisor = Arc::new(ReconnectSupervisor::new("tcpc_race", slow));
            let trigger = {
                let supervisor = Arc::clone(&supervisor);
                let adapter: Arc<dyn ConnectionAdapter> = adapter.clone();
                let observer = Arc::clone(&observer);
                tokio::spawn(async move { supervisor.trigger(adapter, observer).await })
            };
            let stop = {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move { supervisor.stop().await })
            };
            let (started, stopped) = tokio::join!(trigger, stop);
            stopped.unwrap();
            let started = started.unwrap();

            // Whichever side won, nothing may keep retrying afterwards.
            assert!(!supervisor.is_reconnecting(), "run escaped stop (started: {})", started);
            assert!(!supervisor.is_armed().await);
            if started {
                // Trigger won the lock; stop must have cancelled that run.
                assert_eq!(supervisor.state(), ReconnectState::Idle);
            }
        }
        assert_eq!(adapter.opens.load(Ordering::SeqCst), 0);
    }
}
