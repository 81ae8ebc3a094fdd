use crate::scale::{format_size, ScaleUnit};
use crate::series::{ChartKind, ChartSet, ChartUpdates, RenderAction};
use crate::source::{DbStats, ServerStatus};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// Mounted, settings not loaded yet.
    #[default]
    Idle,
    /// Settings loaded, stats display switched off.
    WaitingFirstEnable,
    Active,
    Stopped,
}

/// Everything one mounted dashboard shows. Written only by its poll loop.
#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub started_at_unix: i64,
    pub last_poll_unix: Option<i64>,
    pub server_status: Option<ServerStatus>,
    pub db_stats: Option<DbStats>,
    pub status_error: Option<String>,
    pub stats_error: Option<String>,
    pub charts: ChartSet,
}

/// Aggregate sizes as display strings in the selected unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbStatsView {
    pub data_size: String,
    pub storage_size: String,
    pub index_size: String,
    pub file_size: String,
}

impl DbStatsView {
    pub fn new(stats: &DbStats, unit: Option<ScaleUnit>) -> Self {
        Self {
            data_size: format_size(stats.data_size, unit),
            storage_size: format_size(stats.storage_size, unit),
            index_size: format_size(stats.index_size, unit),
            file_size: format_size(stats.file_size, unit),
        }
    }
}

impl DashboardState {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn set_server_status(&mut self, status: ServerStatus, now_unix: i64) {
        self.server_status = Some(status);
        self.status_error = None;
        self.last_poll_unix = Some(now_unix);
    }

    /// Drops the cached snapshot so the next reader fetches again.
    pub fn fail_server_status(&mut self, message: &str) {
        self.server_status = None;
        self.status_error = Some(format!(
            "Successfully connected but, couldn't fetch server status: {message}"
        ));
    }

    pub fn set_db_stats(&mut self, stats: DbStats) {
        self.db_stats = Some(stats);
        self.stats_error = None;
    }

    pub fn fail_db_stats(&mut self, message: &str) {
        self.db_stats = None;
        self.stats_error = Some(format!("Couldn't execute dbStats: {message}"));
    }

    pub fn apply_charts(&mut self, updates: ChartUpdates) -> [(ChartKind, RenderAction); 4] {
        self.charts.apply(updates)
    }

    pub fn db_stats_view(&self, unit: Option<ScaleUnit>) -> Option<DbStatsView> {
        self.db_stats.as_ref().map(|s| DbStatsView::new(s, unit))
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
