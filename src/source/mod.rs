pub mod rpc;

use crate::bulk_write::BulkWriteOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} timed out after {timeout_ms} ms")]
    Timeout { method: String, timeout_ms: u64 },
    #[error("{0}")]
    Remote(String),
    #[error("{0} returned neither result nor error")]
    EmptyReply(String),
}

/// Remote side of the dashboard. Every metric and every query goes through
/// one of these calls; nothing is computed locally.
pub trait StatsSource: Send + Sync + 'static {
    fn db_stats(&self) -> impl Future<Output = Result<DbStats, FetchError>> + Send;

    fn server_status(&self) -> impl Future<Output = Result<ServerStatus, FetchError>> + Send;

    fn bulk_write(
        &self,
        collection: &str,
        operations: &Value,
        options: &BulkWriteOptions,
    ) -> impl Future<Output = Result<Value, FetchError>> + Send;
}

/// Reply envelope used by every backend method.
#[derive(Debug, Deserialize)]
pub struct RpcReply<T> {
    pub error: Option<Value>,
    pub result: Option<T>,
}

impl<T> RpcReply<T> {
    pub fn into_result(self) -> Result<Option<T>, FetchError> {
        match self.error {
            Some(Value::Null) | None => Ok(self.result),
            Some(err) => Err(FetchError::Remote(remote_error_message(&err))),
        }
    }
}

fn remote_error_message(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => err.to_string(),
        },
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    #[serde(default)]
    pub data_size: Option<f64>,
    #[serde(default)]
    pub storage_size: Option<f64>,
    #[serde(default)]
    pub index_size: Option<f64>,
    #[serde(default)]
    pub file_size: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(default)]
    pub mem: Option<MemStatus>,
    #[serde(default)]
    pub connections: Option<ConnectionsStatus>,
    #[serde(default)]
    pub network: Option<NetworkStatus>,
    #[serde(default)]
    pub opcounters: Option<OpCounters>,
}

/// Values are megabytes, as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MemStatus {
    #[serde(rename = "virtual", default)]
    pub virtual_mb: Option<f64>,
    #[serde(rename = "mapped", default)]
    pub mapped_mb: Option<f64>,
    #[serde(rename = "resident", default)]
    pub resident_mb: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsStatus {
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub total_created: Option<f64>,
    #[serde(default)]
    pub available: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    #[serde(default)]
    pub bytes_in: Option<f64>,
    #[serde(default)]
    pub bytes_out: Option<f64>,
    #[serde(default)]
    pub num_requests: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OpCounters {
    #[serde(default)]
    pub insert: Option<f64>,
    #[serde(default)]
    pub query: Option<f64>,
    #[serde(default)]
    pub update: Option<f64>,
    #[serde(default)]
    pub delete: Option<f64>,
    #[serde(default)]
    pub getmore: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_status_accepts_partial_payloads() {
        let status: ServerStatus = serde_json::from_str(
            r#"{"host":"db1:27017","mem":{"virtual":100,"mapped":50,"resident":75},
                "network":{"bytesIn":2048,"bytesOut":1024,"numRequests":9},
                "asserts":{"regular":0}}"#,
        )
        .unwrap();

        assert_eq!(status.host.as_deref(), Some("db1:27017"));
        let mem = status.mem.unwrap();
        assert_eq!(mem.virtual_mb, Some(100.0));
        assert_eq!(mem.resident_mb, Some(75.0));
        assert_eq!(status.network.unwrap().num_requests, Some(9.0));
        assert!(status.connections.is_none());
        assert!(status.opcounters.is_none());
    }

    #[test]
    fn reply_with_error_object_surfaces_message() {
        let reply: RpcReply<DbStats> =
            serde_json::from_str(r#"{"error":{"message":"not authorized","code":13}}"#).unwrap();
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.to_string(), "not authorized");
    }

    #[test]
    fn reply_with_result_decodes_camel_case() {
        let reply: RpcReply<DbStats> =
            serde_json::from_str(r#"{"result":{"dataSize":2048,"indexSize":512}}"#).unwrap();
        let stats = reply.into_result().unwrap().unwrap();
        assert_eq!(stats.data_size, Some(2048.0));
        assert_eq!(stats.index_size, Some(512.0));
        assert_eq!(stats.file_size, None);
    }
}
