use crate::bulk_write::BulkWriteOptions;
use crate::config::RpcConfig;
use crate::source::{DbStats, FetchError, RpcReply, ServerStatus, StatsSource};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

/// JSON-over-HTTP client for the dashboard backend. Each method is a
/// `POST {base_url}/{method}` returning an `{error?, result?}` envelope.
#[derive(Clone)]
pub struct RpcStatsSource {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RpcStatsSource {
    pub fn new(cfg: &RpcConfig) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent("dbdash/0.1.0").build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            timeout: cfg.timeout,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
    ) -> Result<Option<T>, FetchError> {
        let url = format!("{}/{}", self.base_url, method);
        let request = async {
            let resp = self.client.post(&url).json(&body).send().await?;
            let resp = resp.error_for_status()?;
            resp.json::<RpcReply<T>>().await
        };

        let reply = match time::timeout(self.timeout, request).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                warn!(method, error = %err, "rpc call failed");
                return Err(err.into());
            }
            Err(_elapsed) => {
                warn!(method, timeout_ms = self.timeout.as_millis() as u64, "rpc call timeout");
                return Err(FetchError::Timeout {
                    method: method.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        debug!(method, "rpc reply received");
        reply.into_result()
    }
}

impl StatsSource for RpcStatsSource {
    async fn db_stats(&self) -> Result<DbStats, FetchError> {
        self.call("dbStats", json!({}))
            .await?
            .ok_or_else(|| FetchError::EmptyReply("dbStats".to_string()))
    }

    async fn server_status(&self) -> Result<ServerStatus, FetchError> {
        self.call("serverStatus", json!({}))
            .await?
            .ok_or_else(|| FetchError::EmptyReply("serverStatus".to_string()))
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: &Value,
        options: &BulkWriteOptions,
    ) -> Result<Value, FetchError> {
        let body = json!({
            "collection": collection,
            "operations": operations,
            "options": options,
        });
        Ok(self.call("bulkWrite", body).await?.unwrap_or(Value::Null))
    }
}
