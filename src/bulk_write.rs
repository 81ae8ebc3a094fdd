use crate::metrics::Metrics;
use crate::source::StatsSource;
use crate::state::now_unix;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const QUERY_TYPE: &str = "bulkWrite";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Syntax error on operations: {0}")]
    Syntax(String),
}

/// Options offered next to the operations editor. Unset options are not sent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_document_validation: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query_type: &'static str,
    pub collection: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub query_type: &'static str,
    pub collection: String,
    pub selector: Value,
    pub options: BulkWriteOptions,
    pub executed_at_unix: i64,
}

#[derive(Debug)]
pub struct QueryHistory {
    limit: usize,
    entries: VecDeque<HistoryEntry>,
}

impl QueryHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Spinner shown while a query is in flight.
#[derive(Debug, Clone, Default)]
pub struct BusyIndicator(Arc<AtomicBool>);

impl BusyIndicator {
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn start(&self) -> BusyGuard<'_> {
        self.0.store(true, Ordering::SeqCst);
        BusyGuard(&self.0)
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BulkWriter<S> {
    source: Arc<S>,
    metrics: Arc<Metrics>,
    history: RwLock<QueryHistory>,
    editor: RwLock<String>,
    busy: BusyIndicator,
    replay_delay: Duration,
}

impl<S: StatsSource> BulkWriter<S> {
    pub fn new(
        source: Arc<S>,
        metrics: Arc<Metrics>,
        history_limit: usize,
        replay_delay: Duration,
    ) -> Self {
        Self {
            source,
            metrics,
            history: RwLock::new(QueryHistory::new(history_limit)),
            editor: RwLock::new(String::new()),
            busy: BusyIndicator::default(),
            replay_delay,
        }
    }

    pub fn busy(&self) -> &BusyIndicator {
        &self.busy
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.read().await.entries()
    }

    pub async fn history_entry(&self, index: usize) -> Option<HistoryEntry> {
        self.history.read().await.get(index).cloned()
    }

    pub async fn editor_text(&self) -> String {
        self.editor.read().await.clone()
    }

    /// Parses the editor text and runs it against `collection`.
    pub async fn submit(
        &self,
        collection: &str,
        raw_operations: &str,
        options: BulkWriteOptions,
    ) -> Result<QueryOutcome, SubmitError> {
        self.execute(collection, raw_operations, options, true).await
    }

    /// Re-runs a stored query. Replays are not added to history again.
    pub async fn replay(&self, entry: &HistoryEntry) -> Result<QueryOutcome, SubmitError> {
        let raw = entry.selector.to_string();
        self.execute(&entry.collection, &raw, entry.options.clone(), false)
            .await
    }

    /// Fills the editor with a stored selector once the editor had time to
    /// initialize. Returns false when the entry carries nothing to show.
    pub async fn render_query(&self, entry: &HistoryEntry) -> bool {
        if entry.selector.is_null() {
            return false;
        }
        tokio::time::sleep(self.replay_delay).await;
        let text = pretty_one_space(&entry.selector);
        *self.editor.write().await = text;
        true
    }

    async fn execute(
        &self,
        collection: &str,
        raw_operations: &str,
        options: BulkWriteOptions,
        record_history: bool,
    ) -> Result<QueryOutcome, SubmitError> {
        let _busy = self.busy.start();

        let operations: Value = serde_json::from_str(raw_operations).map_err(|err| {
            self.metrics.inc_bulk_write("syntax_error");
            SubmitError::Syntax(err.to_string())
        })?;

        let outcome = match self
            .source
            .bulk_write(collection, &operations, &options)
            .await
        {
            Ok(result) => {
                info!(collection, "bulk write executed");
                self.metrics.inc_bulk_write("ok");
                QueryOutcome {
                    query_type: QUERY_TYPE,
                    collection: collection.to_string(),
                    result: Some(result),
                    error: None,
                }
            }
            Err(err) => {
                warn!(collection, error = %err, "bulk write failed");
                self.metrics.inc_bulk_write("error");
                QueryOutcome {
                    query_type: QUERY_TYPE,
                    collection: collection.to_string(),
                    result: None,
                    error: Some(err.to_string()),
                }
            }
        };

        if record_history {
            self.history.write().await.push(HistoryEntry {
                query_type: QUERY_TYPE,
                collection: collection.to_string(),
                selector: operations,
                options,
                executed_at_unix: now_unix(),
            });
        }

        Ok(outcome)
    }
}

fn pretty_one_space(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}
