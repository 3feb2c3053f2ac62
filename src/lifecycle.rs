//! Mounting the orchestrator: initial refresh, the gated ticker, teardown,
//! and the source seam the HTTP layer reads from.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::info;

use crate::api::{parse_env_number, AnalyticsFetcher};
use crate::orchestrator::{
    DashboardSnapshot, DataOrchestrator, FilterUpdate, RefreshError, RefreshOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub gated_tick_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            gated_tick_ms: 1_000,
        }
    }
}

pub fn lifecycle_config_from_env() -> LifecycleConfig {
    let mut config = LifecycleConfig::default();
    if let Some(gated_tick_ms) = parse_env_number::<u64>("JOBDASH_GATED_TICK_MS") {
        if gated_tick_ms > 0 {
            config.gated_tick_ms = gated_tick_ms;
        }
    }
    config
}

/// What the dashboard routes need from a running dashboard.
pub trait DashboardSource: Send + Sync + 'static {
    fn snapshot(&self) -> DashboardSnapshot;

    /// Starts a manual full refresh. Returns false while one is loading.
    fn request_refresh(&self) -> bool;

    /// Returns true when the selection changed and a refresh was started.
    fn update_filters(&self, update: FilterUpdate) -> bool;

    fn shutdown(&self);
}

pub struct DashboardHandle<F: AnalyticsFetcher> {
    orchestrator: Arc<DataOrchestrator<F>>,
    timer: JoinHandle<()>,
}

impl<F: AnalyticsFetcher> DashboardHandle<F> {
    /// Starts the first full refresh and the gated ticker. Must be called
    /// inside a tokio runtime.
    pub fn mount(orchestrator: Arc<DataOrchestrator<F>>, config: LifecycleConfig) -> Self {
        let period = Duration::from_millis(config.gated_tick_ms.max(1));
        info!(
            component = "lifecycle",
            event = "dashboard.mount",
            gated_tick_ms = config.gated_tick_ms
        );

        spawn_full_refresh(&orchestrator);
        let timer = spawn_gated_timer(Arc::clone(&orchestrator), period);

        Self {
            orchestrator,
            timer,
        }
    }

    pub fn orchestrator(&self) -> &Arc<DataOrchestrator<F>> {
        &self.orchestrator
    }
}

impl<F: AnalyticsFetcher> Drop for DashboardHandle<F> {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

impl<F: AnalyticsFetcher> DashboardSource for DashboardHandle<F> {
    fn snapshot(&self) -> DashboardSnapshot {
        self.orchestrator.snapshot()
    }

    fn request_refresh(&self) -> bool {
        let Some(ticket) = self.orchestrator.begin_manual_refresh() else {
            return false;
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.run_ticket(ticket).await });
        true
    }

    fn update_filters(&self, update: FilterUpdate) -> bool {
        if !self.orchestrator.apply_filter_update(&update) {
            return false;
        }
        spawn_full_refresh(&self.orchestrator);
        true
    }

    /// Stops the ticker and invalidates every request still in flight.
    fn shutdown(&self) {
        self.timer.abort();
        let generation = self.orchestrator.invalidate();
        info!(
            component = "lifecycle",
            event = "dashboard.teardown",
            generation
        );
    }
}

pub fn spawn_full_refresh<F: AnalyticsFetcher>(
    orchestrator: &Arc<DataOrchestrator<F>>,
) -> JoinHandle<Result<RefreshOutcome, RefreshError>> {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move { orchestrator.full_refresh().await })
}

/// Fixed-rate ticker; the first tick fires one period after start. Each tick
/// runs in its own task so a slow gated request never delays the next tick.
pub fn spawn_gated_timer<F: AnalyticsFetcher>(
    orchestrator: Arc<DataOrchestrator<F>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator.gated_refresh().await;
            });
        }
    })
}
