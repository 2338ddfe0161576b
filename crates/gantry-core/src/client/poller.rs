use crate::client::http::ResourceSource;
use crate::poller::{PollConfig, PollDecision, PollState, RowGate, RowStatus};

use parking_lot::Mutex;
use std::sync::Arc;

/// Display status change for one dashboard row.
#[derive(Clone, Debug, PartialEq)]
pub struct RowUpdate {
    pub server_id: String,
    pub status: RowStatus,
}

/// Polls resource usage for one dashboard row while it is mounted.
///
/// At most one request is in flight: the next fetch is scheduled only after
/// the previous one settled. The task is aborted on unmount, on drop, and
/// whenever the row gate stops allowing polling.
pub struct ResourcePoller<S: ResourceSource> {
    server_id: String,
    source: Arc<S>,
    config: PollConfig,
    state: Arc<Mutex<PollState>>,
    gate: RowGate,
    runtime: tokio::runtime::Handle,
    event_tx: async_channel::Sender<RowUpdate>,
    task: Option<tokio::task::AbortHandle>,
}

impl<S: ResourceSource> ResourcePoller<S> {
    pub fn new(
        server_id: impl Into<String>,
        source: Arc<S>,
        config: PollConfig,
        runtime: tokio::runtime::Handle,
        event_tx: async_channel::Sender<RowUpdate>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            source,
            config,
            state: Arc::new(Mutex::new(PollState::new())),
            gate: RowGate::default(),
            runtime,
            event_tx,
            task: None,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn status(&self) -> RowStatus {
        self.state.lock().display(self.gate)
    }

    pub fn poll_state(&self) -> PollState {
        self.state.lock().clone()
    }

    pub fn is_polling(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start polling with an immediate fetch. No-op if already polling,
    /// degraded, or gated.
    pub fn mount(&mut self) {
        if self.is_polling() {
            return;
        }
        if !self.gate.allows_polling() {
            log::debug!("Not polling {}: row gated ({:?})", self.server_id, self.gate);
            return;
        }
        if self.state.lock().is_degraded() {
            log::debug!("Not polling {}: degraded until remount", self.server_id);
            return;
        }

        let task = self.runtime.spawn(poll_loop(
            self.server_id.clone(),
            self.source.clone(),
            self.config.clone(),
            self.state.clone(),
            self.gate,
            self.event_tx.clone(),
        ));
        self.task = Some(task.abort_handle());
    }

    fn stop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }

    /// Stop polling and forget failures, so the next mount starts fresh.
    pub fn unmount(&mut self) {
        self.stop();
        *self.state.lock() = PollState::new();
    }

    /// Manual refresh: unmount and mount again.
    pub fn remount(&mut self) {
        self.unmount();
        self.mount();
    }

    /// Update the row conditions. Polling stops as soon as the gate closes
    /// and resumes when it opens again. Gating keeps the failure count.
    pub fn set_gate(&mut self, gate: RowGate) {
        if gate == self.gate {
            return;
        }
        self.gate = gate;
        if gate.allows_polling() {
            self.mount();
        } else {
            self.stop();
        }
        let _ = self.event_tx.try_send(RowUpdate {
            server_id: self.server_id.clone(),
            status: self.status(),
        });
    }
}

impl<S: ResourceSource> Drop for ResourcePoller<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<S: ResourceSource>(
    server_id: String,
    source: Arc<S>,
    config: PollConfig,
    state: Arc<Mutex<PollState>>,
    gate: RowGate,
    event_tx: async_channel::Sender<RowUpdate>,
) {
    loop {
        let result = source.resource_usage(&server_id).await;

        let (decision, status) = {
            let mut state = state.lock();
            let decision = match result {
                Ok(stats) => state.record_success(stats, &config),
                Err(e) => {
                    log::warn!(
                        "Resource poll for {} failed ({} in a row): {}",
                        server_id,
                        state.failures() + 1,
                        e
                    );
                    state.record_failure(&config)
                }
            };
            (decision, state.display(gate))
        };

        let _ = event_tx.try_send(RowUpdate {
            server_id: server_id.clone(),
            status,
        });

        match decision {
            PollDecision::After(delay) => tokio::time::sleep(delay).await,
            PollDecision::Stop => {
                log::info!("Stopped polling {}", server_id);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ServerStats;
    use crate::error::{GantryError, Result};
    use crate::types::PowerState;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::time::Duration;
    use tokio::time::Instant;

    fn stats() -> ServerStats {
        ServerStats {
            status: Some(PowerState::Running),
            is_suspended: false,
            memory_usage_bytes: 0,
            cpu_usage_percent: 0.0,
            disk_usage_bytes: 0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            uptime_secs: 0,
        }
    }

    /// Replays scripted outcomes, then succeeds forever.
    struct Scripted {
        outcomes: Mutex<VecDeque<bool>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn offsets(&self, start: Instant) -> Vec<u64> {
            self.calls
                .lock()
                .iter()
                .map(|t| t.duration_since(start).as_secs())
                .collect()
        }
    }

    impl ResourceSource for Scripted {
        fn resource_usage(&self, _server_id: &str) -> impl Future<Output = Result<ServerStats>> + Send {
            self.calls.lock().push(Instant::now());
            let ok = self.outcomes.lock().pop_front().unwrap_or(true);
            async move {
                if ok {
                    Ok(stats())
                } else {
                    Err(GantryError::Status {
                        status: 500,
                        body: String::new(),
                    })
                }
            }
        }
    }

    fn poller(source: Arc<Scripted>) -> (ResourcePoller<Scripted>, async_channel::Receiver<RowUpdate>) {
        let (tx, rx) = async_channel::unbounded();
        let poller = ResourcePoller::new(
            "srv",
            source,
            PollConfig::default(),
            tokio::runtime::Handle::current(),
            tx,
        );
        (poller, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_every_30s() {
        let source = Scripted::new(&[]);
        let (mut poller, _rx) = poller(source.clone());
        let start = Instant::now();
        poller.mount();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(source.offsets(start), vec![0, 30, 60]);
        assert_eq!(poller.status(), RowStatus::Live(stats()));
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_retries_after_5s() {
        let source = Scripted::new(&[false, true]);
        let (mut poller, _rx) = poller(source.clone());
        let start = Instant::now();
        poller.mount();

        tokio::time::sleep(Duration::from_secs(36)).await;
        assert_eq!(source.offsets(start), vec![0, 5, 35]);
        assert_eq!(poller.poll_state().failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_degrade_until_remount() {
        let source = Scripted::new(&[false, false]);
        let (mut poller, rx) = poller(source.clone());
        let start = Instant::now();
        poller.mount();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.offsets(start), vec![0, 5]);
        assert_eq!(poller.status(), RowStatus::AssumeOffline);
        assert!(!poller.is_polling());

        let mut last = None;
        while let Ok(update) = rx.try_recv() {
            last = Some(update.status);
        }
        assert_eq!(last, Some(RowStatus::AssumeOffline));

        // Mounting again without unmounting first keeps the row degraded.
        poller.mount();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls.lock().len(), 2);

        let remounted = Instant::now();
        poller.remount();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(&source.offsets(remounted)[2..], &[0, 30]);
        assert_eq!(poller.status(), RowStatus::Live(stats()));
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_forgets_failures() {
        let source = Scripted::new(&[false, false]);
        let (mut poller, _rx) = poller(source.clone());
        poller.mount();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(poller.poll_state().failures(), 1);

        poller.unmount();
        assert_eq!(poller.poll_state().failures(), 0);
        poller.mount();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(source.calls.lock().len(), 2);
        assert_eq!(poller.poll_state().failures(), 1);
        assert!(!poller.poll_state().is_degraded());
        assert_ne!(poller.status(), RowStatus::AssumeOffline);
        assert!(poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn gate_keeps_failure_count() {
        let source = Scripted::new(&[false, false]);
        let (mut poller, _rx) = poller(source.clone());
        poller.mount();
        tokio::time::sleep(Duration::from_secs(1)).await;

        poller.set_gate(RowGate {
            transferring: true,
            ..Default::default()
        });
        assert_eq!(poller.poll_state().failures(), 1);

        poller.set_gate(RowGate::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(poller.poll_state().is_degraded());
        assert_eq!(poller.status(), RowStatus::AssumeOffline);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_cancels_pending_poll() {
        let source = Scripted::new(&[]);
        let (mut poller, _rx) = poller(source.clone());
        poller.mount();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.lock().len(), 1);

        poller.set_gate(RowGate {
            transferring: true,
            ..Default::default()
        });
        assert!(!poller.is_polling());
        assert_eq!(poller.status(), RowStatus::Transferring);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.calls.lock().len(), 1);

        poller.set_gate(RowGate::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_and_drop_stop_polling() {
        let source = Scripted::new(&[]);
        let (mut poller, _rx) = poller(source.clone());
        poller.mount();
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.unmount();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(source.calls.lock().len(), 1);

        poller.mount();
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(poller);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(source.calls.lock().len(), 2);
    }
}
