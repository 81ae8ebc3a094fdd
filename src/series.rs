use crate::scale::{round2, scale, Domain, ScaleUnit};
use crate::source::ServerStatus;
use serde::{Serialize, Serializer};
use std::collections::VecDeque;

pub const PLACEHOLDER: &str = "This feature is not supported on this platform (OS)";

const LINE_COLORS: [&str; 2] = ["#1ab394", "#ff0f0f"];
const THIRD_LINE_COLOR: &str = "#273be2";
const BAR_COLOR: &str = "#1ab394";
const OPCOUNTER_TICKS: [&str; 5] = ["Insert", "Query", "Update", "Delete", "Getmore"];

/// One sample. Serialized as `[timestamp, value]`, the shape chart
/// libraries take directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

impl Serialize for SeriesPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.timestamp_ms, self.value).serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub label: String,
    pub data: VecDeque<SeriesPoint>,
}

impl Series {
    pub fn single(label: impl Into<String>, point: SeriesPoint) -> Self {
        Self {
            label: label.into(),
            data: VecDeque::from([point]),
        }
    }
}

/// Fixed-capacity FIFO of named series. All series advance together, one
/// point per poll tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBuffer {
    capacity: usize,
    series: Vec<Series>,
}

impl SeriesBuffer {
    pub fn new(capacity: usize, mut initial: Vec<Series>) -> Self {
        for s in &mut initial {
            while s.data.len() > capacity {
                s.data.pop_front();
            }
        }
        Self {
            capacity,
            series: initial,
        }
    }

    /// Appends the incoming points to the series at the same position,
    /// evicting from the front so no series grows past the capacity.
    /// Existing labels are kept; incoming series with no counterpart are
    /// ignored.
    pub fn append(&mut self, incoming: Vec<Series>) {
        for (existing, new) in self.series.iter_mut().zip(incoming) {
            let mut new_points = new.data;
            while new_points.len() > self.capacity {
                new_points.pop_front();
            }
            while !existing.data.is_empty()
                && existing.data.len() + new_points.len() > self.capacity
            {
                existing.data.pop_front();
            }
            existing.data.extend(new_points);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.series.first().map(|s| s.data.len()).unwrap_or(0)
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Memory,
    Connections,
    Network,
    #[serde(rename = "opcounters")]
    OpCounters,
}

impl ChartKind {
    /// Retained points per series; `None` for charts replaced every tick.
    pub fn capacity(self) -> Option<usize> {
        match self {
            ChartKind::Memory | ChartKind::Network => Some(15),
            ChartKind::Connections => Some(10),
            ChartKind::OpCounters => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ChartKind::Memory => "Memory",
            ChartKind::Connections => "Connections",
            ChartKind::Network => "Network",
            ChartKind::OpCounters => "Operation Counters",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Memory => "memory",
            ChartKind::Connections => "connections",
            ChartKind::Network => "network",
            ChartKind::OpCounters => "opcounters",
        }
    }

    fn options(self) -> ChartOptions {
        match self {
            ChartKind::OpCounters => ChartOptions {
                chart_type: "bar",
                x_axis: XAxis::Categories {
                    ticks: OPCOUNTER_TICKS
                        .iter()
                        .enumerate()
                        .map(|(i, t)| (i as u32, *t))
                        .collect(),
                },
                y_unit: None,
                colors: vec![BAR_COLOR],
                legend_position: "ne",
            },
            ChartKind::Connections => ChartOptions {
                chart_type: "line",
                x_axis: XAxis::Time {
                    format: "HH:mm:ss",
                },
                y_unit: None,
                colors: LINE_COLORS.to_vec(),
                legend_position: "ne",
            },
            ChartKind::Memory | ChartKind::Network => {
                let mut colors = LINE_COLORS.to_vec();
                colors.push(THIRD_LINE_COLOR);
                ChartOptions {
                    chart_type: "line",
                    x_axis: XAxis::Time {
                        format: "HH:mm:ss",
                    },
                    y_unit: None,
                    colors,
                    legend_position: "ne",
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum XAxis {
    Time { format: &'static str },
    Categories { ticks: Vec<(u32, &'static str)> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartOptions {
    pub chart_type: &'static str,
    pub x_axis: XAxis,
    /// Suffix for y-axis ticks, e.g. `"MB"` renders `"120 MB"`.
    pub y_unit: Option<&'static str>,
    pub colors: Vec<&'static str>,
    pub legend_position: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderAction {
    FirstRender,
    Redraw,
    Placeholder,
}

impl RenderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderAction::FirstRender => "first_render",
            RenderAction::Redraw => "redraw",
            RenderAction::Placeholder => "placeholder",
        }
    }
}

/// Data for one chart from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartUpdate {
    pub series: Vec<Series>,
    pub y_unit: Option<&'static str>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum ChartBody {
    Empty,
    Placeholder,
    Lines(SeriesBuffer),
    Bars(Vec<Series>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    kind: ChartKind,
    body: ChartBody,
    options: ChartOptions,
    caption: Option<String>,
}

impl Chart {
    pub fn new(kind: ChartKind) -> Self {
        Self {
            kind,
            body: ChartBody::Empty,
            options: kind.options(),
            caption: None,
        }
    }

    pub fn kind(&self) -> ChartKind {
        self.kind
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.body, ChartBody::Lines(_) | ChartBody::Bars(_))
    }

    pub fn len(&self) -> usize {
        match &self.body {
            ChartBody::Lines(buf) => buf.len(),
            ChartBody::Bars(series) => series.first().map(|s| s.data.len()).unwrap_or(0),
            ChartBody::Empty | ChartBody::Placeholder => 0,
        }
    }

    /// Builds the chart from its first data, grows it on later ticks, or
    /// swaps it for the placeholder when the snapshot lacks this family.
    /// A placeholder drops the chart, so the next data renders it afresh.
    pub fn create_or_append(&mut self, update: Option<ChartUpdate>) -> RenderAction {
        let update = match update {
            Some(u) if !u.series.is_empty() => u,
            _ => {
                self.body = ChartBody::Placeholder;
                self.caption = None;
                return RenderAction::Placeholder;
            }
        };

        self.caption = update.caption;

        match &mut self.body {
            ChartBody::Lines(buf) => {
                buf.append(update.series);
                return RenderAction::Redraw;
            }
            ChartBody::Bars(series) => {
                *series = update.series;
                return RenderAction::Redraw;
            }
            ChartBody::Empty | ChartBody::Placeholder => {}
        }

        // y-axis formatting is fixed when the chart is first built.
        self.options.y_unit = update.y_unit;
        self.body = match self.kind.capacity() {
            Some(cap) => ChartBody::Lines(SeriesBuffer::new(cap, update.series)),
            None => ChartBody::Bars(update.series),
        };
        RenderAction::FirstRender
    }

    pub fn view(&self) -> ChartView {
        let (placeholder, series) = match &self.body {
            ChartBody::Empty => (None, Vec::new()),
            ChartBody::Placeholder => (Some(PLACEHOLDER), Vec::new()),
            ChartBody::Lines(buf) => (None, buf.series().to_vec()),
            ChartBody::Bars(series) => (None, series.clone()),
        };
        ChartView {
            kind: self.kind,
            title: self.kind.title(),
            placeholder,
            caption: self.caption.clone(),
            series,
            options: self.options.clone(),
        }
    }
}

/// What the chart renderer receives for one chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartView {
    pub kind: ChartKind,
    pub title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub series: Vec<Series>,
    pub options: ChartOptions,
}

/// Per-family chart data built from a single server status snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartUpdates {
    pub memory: Option<ChartUpdate>,
    pub connections: Option<ChartUpdate>,
    pub network: Option<ChartUpdate>,
    pub opcounters: Option<ChartUpdate>,
}

impl ChartUpdates {
    pub fn from_status(status: &ServerStatus, unit: Option<ScaleUnit>, now_ms: i64) -> Self {
        let memory = status.mem.as_ref().map(|mem| {
            let point = |raw: Option<f64>| {
                SeriesPoint::new(now_ms, scale(raw.unwrap_or(0.0), unit, Domain::Memory).value)
            };
            ChartUpdate {
                series: vec![
                    Series::single("Virtual", point(mem.virtual_mb)),
                    Series::single("Mapped", point(mem.mapped_mb)),
                    Series::single("Current", point(mem.resident_mb)),
                ],
                y_unit: Some(Domain::Memory.factor(unit).label),
                caption: None,
            }
        });

        let connections = status.connections.as_ref().map(|c| {
            let point = |raw: Option<f64>| SeriesPoint::new(now_ms, round2(raw.unwrap_or(0.0)));
            ChartUpdate {
                series: vec![
                    Series::single("Active", point(c.current)),
                    Series::single("Total Created", point(c.total_created)),
                ],
                y_unit: None,
                caption: Some(format!(", Available: {}", format_count(c.available))),
            }
        });

        let network = status.network.as_ref().map(|n| {
            let label = Domain::Network.factor(unit).label;
            let point = |raw: Option<f64>| {
                SeriesPoint::new(now_ms, scale(raw.unwrap_or(0.0), unit, Domain::Network).value)
            };
            ChartUpdate {
                series: vec![
                    Series::single(format!("Incoming {label}"), point(n.bytes_in)),
                    Series::single(format!("Outgoing {label}"), point(n.bytes_out)),
                    Series::single(
                        "Total Requests",
                        SeriesPoint::new(now_ms, n.num_requests.unwrap_or(0.0)),
                    ),
                ],
                y_unit: None,
                caption: None,
            }
        });

        let opcounters = status.opcounters.as_ref().map(|o| {
            let counts = [o.insert, o.query, o.update, o.delete, o.getmore]
                .into_iter()
                .enumerate()
                .map(|(i, v)| SeriesPoint::new(i as i64, v.unwrap_or(0.0)))
                .collect();
            ChartUpdate {
                series: vec![Series {
                    label: "Counts".to_string(),
                    data: counts,
                }],
                y_unit: None,
                caption: None,
            }
        });

        Self {
            memory,
            connections,
            network,
            opcounters,
        }
    }
}

fn format_count(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 => format!("{v:.0}"),
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    }
}

/// The four charts of one dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSet {
    pub memory: Chart,
    pub connections: Chart,
    pub network: Chart,
    pub opcounters: Chart,
}

impl Default for ChartSet {
    fn default() -> Self {
        Self {
            memory: Chart::new(ChartKind::Memory),
            connections: Chart::new(ChartKind::Connections),
            network: Chart::new(ChartKind::Network),
            opcounters: Chart::new(ChartKind::OpCounters),
        }
    }
}

impl ChartSet {
    pub fn apply(&mut self, updates: ChartUpdates) -> [(ChartKind, RenderAction); 4] {
        [
            (ChartKind::Memory, self.memory.create_or_append(updates.memory)),
            (
                ChartKind::Connections,
                self.connections.create_or_append(updates.connections),
            ),
            (ChartKind::Network, self.network.create_or_append(updates.network)),
            (
                ChartKind::OpCounters,
                self.opcounters.create_or_append(updates.opcounters),
            ),
        ]
    }

    pub fn views(&self) -> Vec<ChartView> {
        vec![
            self.memory.view(),
            self.connections.view(),
            self.network.view(),
            self.opcounters.view(),
        ]
    }
}
