//! Poll loop of one mounted dashboard.
//!
//! A [`DashboardController`] is created when a dashboard is mounted and torn
//! down when it is unmounted. While mounted it watches the settings store;
//! the first time stats display is switched on it starts a single repeating
//! timer that fetches server status, scales it and feeds the charts.
//! Aggregate database stats are fetched once on activation.
//!
//! Fetches are never awaited against teardown. Every continuation checks the
//! liveness flag once it holds the state write lock, so results that arrive
//! after unmount are dropped.

use crate::config::DashboardConfig;
use crate::metrics::Metrics;
use crate::series::ChartUpdates;
use crate::settings::{Settings, SettingsStore};
use crate::source::{DbStats, ServerStatus, StatsSource};
use crate::state::{now_millis, now_unix, DashboardState, PollState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PollTiming {
    pub poll_interval: Duration,
    /// Wait between a completed fetch and the chart update, giving the
    /// renderer time to lay out. No readiness signal exists to wait on.
    pub render_delay: Duration,
}

impl From<&DashboardConfig> for PollTiming {
    fn from(cfg: &DashboardConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            render_delay: cfg.render_delay,
        }
    }
}

#[derive(Default)]
struct PollSession {
    state: PollState,
    timer: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

struct Inner<S> {
    source: Arc<S>,
    settings: SettingsStore,
    metrics: Arc<Metrics>,
    timing: PollTiming,
    state: Arc<RwLock<DashboardState>>,
    alive: AtomicBool,
    /// Set while a read-triggered fetch runs, one flag per reader.
    status_refetch: AtomicBool,
    stats_refetch: AtomicBool,
    session: Mutex<PollSession>,
}

pub struct DashboardController<S: StatsSource> {
    inner: Arc<Inner<S>>,
}

impl<S: StatsSource> DashboardController<S> {
    /// Mounts a dashboard. Must be called inside a tokio runtime.
    pub fn mount(
        source: Arc<S>,
        settings: SettingsStore,
        metrics: Arc<Metrics>,
        timing: PollTiming,
    ) -> Self {
        let rx = settings.subscribe();
        let inner = Arc::new(Inner {
            source,
            settings,
            metrics,
            timing,
            state: Arc::new(RwLock::new(DashboardState::new(now_unix()))),
            alive: AtomicBool::new(false),
            status_refetch: AtomicBool::new(false),
            stats_refetch: AtomicBool::new(false),
            session: Mutex::new(PollSession::default()),
        });

        let watcher = tokio::spawn(watch_settings(inner.clone(), rx));
        inner.session().watcher = Some(watcher);
        debug!("dashboard mounted");

        Self { inner }
    }

    /// Starts polling. Does nothing when a timer already runs or the
    /// dashboard was unmounted; returns whether a timer was started.
    pub fn enable(&self) -> bool {
        self.inner.enable()
    }

    pub fn unmount(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        let mut session = self.inner.session();
        if session.state == PollState::Stopped {
            return;
        }
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }
        if let Some(watcher) = session.watcher.take() {
            watcher.abort();
        }
        session.state = PollState::Stopped;
        info!("dashboard unmounted, polling stopped");
    }

    pub fn poll_state(&self) -> PollState {
        self.inner.session().state
    }

    pub fn state(&self) -> Arc<RwLock<DashboardState>> {
        self.inner.state.clone()
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.inner.settings
    }

    /// Last server status. When none is cached and stats display is on, a
    /// fetch is started so a later read finds one. Reads made while that
    /// fetch runs do not start another.
    pub async fn server_status(&self) -> Option<ServerStatus> {
        let cached = self.inner.state.read().await.server_status.clone();
        if cached.is_none()
            && self.inner.should_refetch()
            && claim(&self.inner.status_refetch)
        {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.clone().poll_status().await;
                inner.status_refetch.store(false, Ordering::SeqCst);
            });
        }
        cached
    }

    /// Last aggregate stats, re-fetched on read like [`Self::server_status`].
    pub async fn db_stats(&self) -> Option<DbStats> {
        let cached = self.inner.state.read().await.db_stats.clone();
        if cached.is_none()
            && self.inner.should_refetch()
            && claim(&self.inner.stats_refetch)
        {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.clone().fetch_db_stats().await;
                inner.stats_refetch.store(false, Ordering::SeqCst);
            });
        }
        cached
    }
}

impl<S: StatsSource> Drop for DashboardController<S> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<S: StatsSource> Inner<S> {
    fn session(&self) -> MutexGuard<'_, PollSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Write access to the dashboard state, or `None` once unmounted. The
    /// flag is read under the lock: a writer queued behind a reader may
    /// resume after teardown.
    async fn live_state(&self) -> Option<RwLockWriteGuard<'_, DashboardState>> {
        let guard = self.state.write().await;
        self.is_alive().then_some(guard)
    }

    fn should_refetch(&self) -> bool {
        self.is_alive()
            && self
                .settings
                .current()
                .map(|s| s.show_db_stats)
                .unwrap_or(false)
    }

    fn on_settings(self: &Arc<Self>, settings: Settings) {
        {
            let mut session = self.session();
            if session.state == PollState::Idle {
                session.state = PollState::WaitingFirstEnable;
            }
        }
        if settings.show_db_stats {
            self.enable();
        }
    }

    fn enable(self: &Arc<Self>) -> bool {
        let mut session = self.session();
        if session.state == PollState::Stopped || session.timer.is_some() {
            return false;
        }

        self.alive.store(true, Ordering::SeqCst);
        session.timer = Some(tokio::spawn(self.clone().run_timer()));
        session.state = PollState::Active;
        drop(session);

        info!(
            interval_ms = self.timing.poll_interval.as_millis() as u64,
            "polling enabled"
        );
        tokio::spawn(self.clone().fetch_db_stats());
        true
    }

    async fn run_timer(self: Arc<Self>) {
        let period = self.timing.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.is_alive() {
                break;
            }
            // Each tick runs on its own so a slow reply does not shift the
            // cadence. Overlapping replies: last write wins.
            tokio::spawn(self.clone().poll_status());
        }
    }

    async fn poll_status(self: Arc<Self>) {
        self.metrics.inc_poll();
        let result = self.source.server_status().await;
        if !self.is_alive() {
            debug!("server status arrived after teardown, discarded");
            return;
        }

        let status = match result {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "could not fetch server status");
                self.metrics.inc_fetch_error("serverStatus");
                if let Some(mut state) = self.live_state().await {
                    state.fail_server_status(&err.to_string());
                }
                return;
            }
        };

        let unit = self.settings.current().and_then(|s| s.scale);
        let updates = ChartUpdates::from_status(&status, unit, now_millis());
        self.metrics.update_from_status(&status);
        match self.live_state().await {
            Some(mut state) => state.set_server_status(status, now_unix()),
            None => return,
        }

        time::sleep(self.timing.render_delay).await;
        if !self.is_alive() {
            debug!("dashboard unmounted before render, charts untouched");
            return;
        }

        let Some(mut state) = self.live_state().await else {
            debug!("dashboard unmounted while waiting for state, charts untouched");
            return;
        };
        let actions = state.apply_charts(updates);
        drop(state);
        for (chart, action) in actions {
            self.metrics.inc_render(chart.as_str(), action.as_str());
        }
    }

    async fn fetch_db_stats(self: Arc<Self>) {
        let result = self.source.db_stats().await;
        if !self.is_alive() {
            return;
        }

        let Some(mut state) = self.live_state().await else {
            return;
        };
        match result {
            Ok(stats) => state.set_db_stats(stats),
            Err(err) => {
                warn!(error = %err, "could not fetch db stats");
                self.metrics.inc_fetch_error("dbStats");
                state.fail_db_stats(&err.to_string());
            }
        }
    }
}

fn claim(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

async fn watch_settings<S: StatsSource>(
    inner: Arc<Inner<S>>,
    mut rx: watch::Receiver<Option<Settings>>,
) {
    loop {
        let current = *rx.borrow_and_update();
        if let Some(settings) = current {
            inner.on_settings(settings);
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk_write::BulkWriteOptions;
    use crate::scale::ScaleUnit;
    use crate::series::{ChartSet, PLACEHOLDER};
    use crate::source::{ConnectionsStatus, FetchError, MemStatus};
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    const TIMING: PollTiming = PollTiming {
        poll_interval: Duration::from_millis(3000),
        render_delay: Duration::from_millis(1000),
    };

    #[derive(Default)]
    struct FakeSource {
        status_calls: AtomicUsize,
        stats_calls: AtomicUsize,
        delay: Duration,
        failing: AtomicBool,
    }

    impl FakeSource {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    impl StatsSource for FakeSource {
        async fn db_stats(&self) -> Result<DbStats, FetchError> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            Ok(DbStats {
                data_size: Some(2048.0),
                ..DbStats::default()
            })
        }

        async fn server_status(&self) -> Result<ServerStatus, FetchError> {
            let n = self.status_calls.fetch_add(1, Ordering::SeqCst);
            time::sleep(self.delay).await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Remote("not master".to_string()));
            }
            Ok(ServerStatus {
                mem: Some(MemStatus {
                    virtual_mb: Some(100.0),
                    mapped_mb: Some(50.0),
                    resident_mb: Some(75.0),
                }),
                connections: Some(ConnectionsStatus {
                    current: Some(n as f64),
                    total_created: Some(10.0),
                    available: Some(100.0),
                }),
                ..ServerStatus::default()
            })
        }

        async fn bulk_write(
            &self,
            _collection: &str,
            _operations: &Value,
            _options: &BulkWriteOptions,
        ) -> Result<Value, FetchError> {
            Ok(Value::Null)
        }
    }

    fn enabled_settings() -> Settings {
        Settings {
            scale: None,
            show_db_stats: true,
        }
    }

    fn mount(source: Arc<FakeSource>, settings: SettingsStore) -> DashboardController<FakeSource> {
        let metrics = Metrics::new().expect("инициализация метрик");
        DashboardController::mount(source, settings, metrics, TIMING)
    }

    async fn advance_ms(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn activation_follows_settings() {
        let settings = SettingsStore::new();
        let source = Arc::new(FakeSource::default());
        let ctrl = mount(source.clone(), settings.clone());
        advance_ms(1).await;
        assert_eq!(ctrl.poll_state(), PollState::Idle);

        settings.publish(Settings {
            scale: None,
            show_db_stats: false,
        });
        advance_ms(1).await;
        assert_eq!(ctrl.poll_state(), PollState::WaitingFirstEnable);

        advance_ms(10_000).await;
        assert_eq!(source.status_calls(), 0);

        settings.publish(enabled_settings());
        advance_ms(1).await;
        assert_eq!(ctrl.poll_state(), PollState::Active);
        assert_eq!(source.stats_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_enable_keeps_a_single_timer() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::default());
        let ctrl = mount(source.clone(), settings.clone());
        advance_ms(1).await;
        assert_eq!(ctrl.poll_state(), PollState::Active);

        assert!(!ctrl.enable());
        settings.publish(enabled_settings());
        advance_ms(1).await;
        assert!(!ctrl.enable());

        advance_ms(3_500).await;
        assert_eq!(source.status_calls(), 1);
        advance_ms(3_000).await;
        assert_eq!(source.status_calls(), 2);
        assert_eq!(source.stats_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_discards_in_flight_fetch() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::with_delay(Duration::from_millis(2_000)));
        let ctrl = mount(source.clone(), settings);
        let state = ctrl.state();

        advance_ms(3_100).await;
        assert_eq!(source.status_calls(), 1);

        ctrl.unmount();
        assert_eq!(ctrl.poll_state(), PollState::Stopped);

        advance_ms(20_000).await;
        assert_eq!(source.status_calls(), 1);
        let guard = state.read().await;
        assert!(guard.server_status.is_none());
        assert_eq!(guard.charts, ChartSet::default());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_during_render_delay_leaves_charts_untouched() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::default());
        let ctrl = mount(source.clone(), settings);
        let state = ctrl.state();

        advance_ms(3_500).await;
        assert!(state.read().await.server_status.is_some());

        ctrl.unmount();
        advance_ms(5_000).await;
        assert_eq!(state.read().await.charts, ChartSet::default());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_feed_sliding_charts() {
        let settings = SettingsStore::new();
        settings.publish(Settings {
            scale: Some(ScaleUnit::MegaBytes),
            show_db_stats: true,
        });
        let source = Arc::new(FakeSource::default());
        let ctrl = mount(source.clone(), settings);
        let state = ctrl.state();

        advance_ms(12 * 3_000 + 1_500).await;
        assert_eq!(source.status_calls(), 12);

        let guard = state.read().await;
        assert_eq!(guard.charts.connections.len(), 10);
        assert_eq!(guard.charts.memory.len(), 12);
        let connections = guard.charts.connections.view();
        let active: Vec<f64> = connections.series[0].data.iter().map(|p| p.value).collect();
        assert_eq!(active, (2..12).map(|n| n as f64).collect::<Vec<_>>());
        assert_eq!(connections.caption.as_deref(), Some(", Available: 100"));

        let memory = guard.charts.memory.view();
        assert_eq!(memory.options.y_unit, Some("MB"));
        assert_eq!(memory.series[0].data[0].value, 100.0);

        let network = guard.charts.network.view();
        assert_eq!(network.placeholder, Some(PLACEHOLDER));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_clear_snapshot_and_polling_continues() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::default());
        let ctrl = mount(source.clone(), settings);
        let state = ctrl.state();

        advance_ms(3_500).await;
        assert!(state.read().await.server_status.is_some());

        source.failing.store(true, Ordering::SeqCst);
        advance_ms(3_000).await;
        {
            let guard = state.read().await;
            assert!(guard.server_status.is_none());
            assert_eq!(
                guard.status_error.as_deref(),
                Some("Successfully connected but, couldn't fetch server status: not master")
            );
        }

        source.failing.store(false, Ordering::SeqCst);
        advance_ms(3_000).await;
        assert_eq!(source.status_calls(), 3);
        assert!(state.read().await.server_status.is_some());
        assert_eq!(ctrl.poll_state(), PollState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn reading_missing_status_starts_a_fetch() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::default());
        let ctrl = mount(source.clone(), settings);
        advance_ms(1).await;

        assert!(ctrl.server_status().await.is_none());
        advance_ms(1).await;
        assert_eq!(source.status_calls(), 1);
        assert!(ctrl.server_status().await.is_some());

        let stats = ctrl.db_stats().await.unwrap();
        assert_eq!(stats.data_size, Some(2048.0));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_reads_share_one_fetch() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::with_delay(Duration::from_millis(2_000)));
        let ctrl = mount(source.clone(), settings);
        advance_ms(1).await;

        for _ in 0..5 {
            assert!(ctrl.server_status().await.is_none());
        }
        advance_ms(1).await;
        assert_eq!(source.status_calls(), 1);

        advance_ms(2_100).await;
        assert!(ctrl.server_status().await.is_some());
        assert_eq!(source.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_fetch_allows_the_next_one() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::with_delay(Duration::from_millis(500)));
        source.failing.store(true, Ordering::SeqCst);
        let ctrl = mount(source.clone(), settings);
        advance_ms(1).await;

        for _ in 0..3 {
            ctrl.server_status().await;
        }
        advance_ms(600).await;
        assert_eq!(source.status_calls(), 1);

        for _ in 0..3 {
            ctrl.server_status().await;
        }
        advance_ms(1).await;
        assert_eq!(source.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn render_queued_behind_reader_is_dropped_after_teardown() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let source = Arc::new(FakeSource::default());
        let ctrl = mount(source.clone(), settings);
        let state = ctrl.state();

        advance_ms(3_900).await;
        let reader = state.read().await;
        assert!(reader.server_status.is_some());
        // The render continuation wakes at 4000 ms and queues for the lock.
        advance_ms(200).await;
        ctrl.unmount();
        drop(reader);

        advance_ms(10).await;
        let guard = state.read().await;
        assert_eq!(guard.charts.memory.len(), 0);
        assert_eq!(guard.charts, ChartSet::default());
    }

    #[tokio::test(start_paused = true)]
    async fn controllers_do_not_share_charts() {
        let settings = SettingsStore::new();
        settings.publish(enabled_settings());
        let first_source = Arc::new(FakeSource::default());
        let second_source = Arc::new(FakeSource::default());
        let first = mount(first_source.clone(), settings.clone());
        let second = mount(second_source.clone(), settings);

        advance_ms(3_500).await;
        first.unmount();
        advance_ms(7_000).await;

        assert_eq!(first_source.status_calls(), 1);
        assert_eq!(second_source.status_calls(), 3);
        assert_eq!(first.state().read().await.charts.memory.len(), 0);
        assert_eq!(second.state().read().await.charts.memory.len(), 3);
        assert_eq!(second.poll_state(), PollState::Active);
    }
}
