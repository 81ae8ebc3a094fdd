use crate::source::ServerStatus;
use crate::state::now_unix;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub dbdash_server_memory_megabytes: GaugeVec,
    pub dbdash_server_connections: GaugeVec,
    pub dbdash_server_network: GaugeVec,
    pub dbdash_server_opcounters: GaugeVec,
    pub dbdash_polls_total: Counter,
    pub dbdash_fetch_errors_total: CounterVec,
    pub dbdash_chart_renders_total: CounterVec,
    pub dbdash_bulk_writes_total: CounterVec,
    pub dbdash_last_poll_timestamp_seconds: Gauge,
    pub dbdash_uptime_seconds: Gauge,
    pub dbdash_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let dbdash_server_memory_megabytes = GaugeVec::new(
            opts!(
                "dbdash_server_memory_megabytes",
                "Last polled server memory in megabytes by kind (virtual, mapped, resident)"
            ),
            &["kind"],
        )?;
        let dbdash_server_connections = GaugeVec::new(
            opts!(
                "dbdash_server_connections",
                "Last polled connection counts by kind (current, total_created, available)"
            ),
            &["kind"],
        )?;
        let dbdash_server_network = GaugeVec::new(
            opts!(
                "dbdash_server_network",
                "Last polled network counters by kind (bytes_in, bytes_out, num_requests)"
            ),
            &["kind"],
        )?;
        let dbdash_server_opcounters = GaugeVec::new(
            opts!(
                "dbdash_server_opcounters",
                "Last polled operation counters by operation"
            ),
            &["op"],
        )?;
        let dbdash_polls_total = Counter::with_opts(opts!(
            "dbdash_polls_total",
            "Number of server status polls started"
        ))?;
        let dbdash_fetch_errors_total = CounterVec::new(
            opts!(
                "dbdash_fetch_errors_total",
                "Failed fetches by method"
            ),
            &["method"],
        )?;
        let dbdash_chart_renders_total = CounterVec::new(
            opts!(
                "dbdash_chart_renders_total",
                "Chart render actions by chart and action"
            ),
            &["chart", "action"],
        )?;
        let dbdash_bulk_writes_total = CounterVec::new(
            opts!(
                "dbdash_bulk_writes_total",
                "Bulk write submissions by outcome"
            ),
            &["outcome"],
        )?;
        let dbdash_last_poll_timestamp_seconds = Gauge::with_opts(opts!(
            "dbdash_last_poll_timestamp_seconds",
            "Unix timestamp of the last successful server status poll"
        ))?;
        let dbdash_uptime_seconds =
            Gauge::with_opts(opts!("dbdash_uptime_seconds", "Process uptime in seconds"))?;
        let dbdash_scrape_count_total = Counter::with_opts(opts!(
            "dbdash_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &dbdash_server_memory_megabytes)?;
        register(&registry, &dbdash_server_connections)?;
        register(&registry, &dbdash_server_network)?;
        register(&registry, &dbdash_server_opcounters)?;
        register(&registry, &dbdash_polls_total)?;
        register(&registry, &dbdash_fetch_errors_total)?;
        register(&registry, &dbdash_chart_renders_total)?;
        register(&registry, &dbdash_bulk_writes_total)?;
        register(&registry, &dbdash_last_poll_timestamp_seconds)?;
        register(&registry, &dbdash_uptime_seconds)?;
        register(&registry, &dbdash_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            dbdash_server_memory_megabytes,
            dbdash_server_connections,
            dbdash_server_network,
            dbdash_server_opcounters,
            dbdash_polls_total,
            dbdash_fetch_errors_total,
            dbdash_chart_renders_total,
            dbdash_bulk_writes_total,
            dbdash_last_poll_timestamp_seconds,
            dbdash_uptime_seconds,
            dbdash_scrape_count_total,
        }))
    }

    /// Mirrors the raw (unscaled) values of a snapshot. Families missing
    /// from the snapshot are dropped rather than left stale.
    pub fn update_from_status(&self, status: &ServerStatus) {
        self.dbdash_server_memory_megabytes.reset();
        self.dbdash_server_connections.reset();
        self.dbdash_server_network.reset();
        self.dbdash_server_opcounters.reset();

        if let Some(mem) = &status.mem {
            set_present(
                &self.dbdash_server_memory_megabytes,
                &[
                    ("virtual", mem.virtual_mb),
                    ("mapped", mem.mapped_mb),
                    ("resident", mem.resident_mb),
                ],
            );
        }
        if let Some(c) = &status.connections {
            set_present(
                &self.dbdash_server_connections,
                &[
                    ("current", c.current),
                    ("total_created", c.total_created),
                    ("available", c.available),
                ],
            );
        }
        if let Some(n) = &status.network {
            set_present(
                &self.dbdash_server_network,
                &[
                    ("bytes_in", n.bytes_in),
                    ("bytes_out", n.bytes_out),
                    ("num_requests", n.num_requests),
                ],
            );
        }
        if let Some(o) = &status.opcounters {
            set_present(
                &self.dbdash_server_opcounters,
                &[
                    ("insert", o.insert),
                    ("query", o.query),
                    ("update", o.update),
                    ("delete", o.delete),
                    ("getmore", o.getmore),
                ],
            );
        }

        self.dbdash_last_poll_timestamp_seconds
            .set(now_unix() as f64);
    }

    pub fn inc_poll(&self) {
        self.dbdash_polls_total.inc();
    }

    pub fn inc_fetch_error(&self, method: &str) {
        self.dbdash_fetch_errors_total
            .with_label_values(&[method])
            .inc();
    }

    pub fn inc_render(&self, chart: &str, action: &str) {
        self.dbdash_chart_renders_total
            .with_label_values(&[chart, action])
            .inc();
    }

    pub fn inc_bulk_write(&self, outcome: &str) {
        self.dbdash_bulk_writes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.dbdash_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.dbdash_uptime_seconds.set(uptime);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn set_present(vec: &GaugeVec, values: &[(&str, Option<f64>)]) {
    for (label, value) in values {
        if let Some(v) = value {
            vec.with_label_values(&[*label]).set(*v);
        }
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemStatus, OpCounters};

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().unwrap()).unwrap()
    }

    #[test]
    fn status_values_are_exported_by_label() {
        let metrics = Metrics::new().expect("инициализация метрик");
        metrics.update_from_status(&ServerStatus {
            mem: Some(MemStatus {
                virtual_mb: Some(100.0),
                mapped_mb: None,
                resident_mb: Some(75.0),
            }),
            opcounters: Some(OpCounters {
                insert: Some(3.0),
                ..OpCounters::default()
            }),
            ..ServerStatus::default()
        });

        let text = encoded(&metrics);
        assert!(text.contains(r#"dbdash_server_memory_megabytes{kind="virtual"} 100"#));
        assert!(text.contains(r#"dbdash_server_memory_megabytes{kind="resident"} 75"#));
        assert!(!text.contains(r#"kind="mapped""#));
        assert!(text.contains(r#"dbdash_server_opcounters{op="insert"} 3"#));
        assert!(text.contains("dbdash_uptime_seconds"));
    }

    #[test]
    fn missing_family_is_not_left_stale() {
        let metrics = Metrics::new().expect("инициализация метрик");
        metrics.update_from_status(&ServerStatus {
            opcounters: Some(OpCounters {
                query: Some(9.0),
                ..OpCounters::default()
            }),
            ..ServerStatus::default()
        });
        metrics.update_from_status(&ServerStatus::default());

        assert!(!encoded(&metrics).contains(r#"op="query""#));
    }

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new().expect("инициализация метрик");
        metrics.inc_bulk_write("ok");
        metrics.inc_bulk_write("ok");
        metrics.inc_fetch_error("serverStatus");
        metrics.inc_render("memory", "first_render");

        let text = encoded(&metrics);
        assert!(text.contains(r#"dbdash_bulk_writes_total{outcome="ok"} 2"#));
        assert!(text.contains(r#"dbdash_fetch_errors_total{method="serverStatus"} 1"#));
        assert!(text.lines().any(|l| l.starts_with("dbdash_chart_renders_total{")
            && l.contains(r#"chart="memory""#)
            && l.contains(r#"action="first_render""#)
            && l.ends_with(" 1")));
    }
}
