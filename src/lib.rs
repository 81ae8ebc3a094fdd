//! Database server dashboard: polls a backend for server status and
//! aggregate stats, keeps bounded chart series, and runs bulk writes.

pub mod bulk_write;
pub mod config;
pub mod http;
pub mod metrics;
pub mod poller;
pub mod scale;
pub mod series;
pub mod settings;
pub mod source;
pub mod state;
