//! aria2 JSON-RPC client

use super::{DownloadBackend, RawStatus};
use crate::error::EngineError;
use crate::types::{DownloadOptions, DownloadStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_KEYS: [&str; 6] = [
    "status",
    "completedLength",
    "totalLength",
    "downloadSpeed",
    "files",
    "followedBy",
];

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    #[serde(default)]
    completed_length: String,
    #[serde(default)]
    total_length: String,
    #[serde(default)]
    download_speed: String,
    #[serde(default)]
    files: Vec<FileEntry>,
    #[serde(default)]
    followed_by: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    #[serde(default)]
    path: String,
}

/// Async client for the aria2 JSON-RPC interface
#[derive(Clone)]
pub struct Aria2Client {
    http: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl Aria2Client {
    pub fn new(url: String, secret: Option<String>) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Spawn(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, url, secret })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, EngineError> {
        let mut all_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all_params.push(json!(format!("token:{}", secret)));
        }
        all_params.extend(params);

        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": all_params,
        });

        // aria2 answers errors with a 4xx status and a JSON-RPC error body
        let response: RpcResponse = self.http.post(&self.url).json(&body).send().await?.json().await?;
        if let Some(error) = response.error {
            return Err(EngineError::from_rpc(error.code, error.message));
        }
        response
            .result
            .ok_or_else(|| EngineError::Protocol(format!("{} returned no result", method)))
    }

    pub async fn get_version(&self) -> Result<String, EngineError> {
        let result = self.call("aria2.getVersion", vec![]).await?;
        Ok(result
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    pub async fn add_uri(&self, uris: &[String], options: &DownloadOptions) -> Result<String, EngineError> {
        let options = serde_json::to_value(options).map_err(|e| EngineError::Protocol(e.to_string()))?;
        let result = self.call("aria2.addUri", vec![json!(uris), options]).await?;
        as_gid(result)
    }

    pub async fn tell_status(&self, gid: &str) -> Result<RawStatus, EngineError> {
        let result = self
            .call("aria2.tellStatus", vec![json!(gid), json!(STATUS_KEYS)])
            .await?;
        parse_status(result)
    }

    pub async fn pause(&self, gid: &str) -> Result<(), EngineError> {
        self.call("aria2.pause", vec![json!(gid)]).await.map(|_| ())
    }

    pub async fn unpause(&self, gid: &str) -> Result<(), EngineError> {
        self.call("aria2.unpause", vec![json!(gid)]).await.map(|_| ())
    }

    pub async fn remove(&self, gid: &str) -> Result<(), EngineError> {
        self.call("aria2.remove", vec![json!(gid)]).await.map(|_| ())
    }

    /// Write the session file now instead of waiting for the next interval
    pub async fn save_session(&self) -> Result<(), EngineError> {
        self.call("aria2.saveSession", vec![]).await.map(|_| ())
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.call("aria2.shutdown", vec![]).await.map(|_| ())
    }
}

fn as_gid(result: Value) -> Result<String, EngineError> {
    match result {
        Value::String(gid) => Ok(gid),
        other => Err(EngineError::Protocol(format!("expected a GID, got {}", other))),
    }
}

fn parse_length(field: &str, value: &str) -> Result<u64, EngineError> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| EngineError::Protocol(format!("invalid {}: {:?}", field, value)))
}

fn parse_status(result: Value) -> Result<RawStatus, EngineError> {
    let response: StatusResponse =
        serde_json::from_value(result).map_err(|e| EngineError::Protocol(e.to_string()))?;
    Ok(RawStatus {
        status: DownloadStatus::from(response.status.as_str()),
        completed_length: parse_length("completedLength", &response.completed_length)?,
        total_length: parse_length("totalLength", &response.total_length)?,
        download_speed: parse_length("downloadSpeed", &response.download_speed)?,
        path: response
            .files
            .into_iter()
            .next()
            .map(|f| f.path)
            .unwrap_or_default(),
        followed_by: response.followed_by,
    })
}

/// [`DownloadBackend`] driving an [`Aria2Client`] on its own tokio runtime
pub struct Aria2Backend {
    runtime: tokio::runtime::Runtime,
    client: Aria2Client,
}

impl Aria2Backend {
    pub fn new(client: Aria2Client) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("aria2-rpc")
            .enable_all()
            .build()
            .map_err(|e| EngineError::Spawn(format!("Failed to create tokio runtime: {}", e)))?;
        Ok(Self { runtime, client })
    }

    pub fn version(&self) -> Result<String, EngineError> {
        self.runtime.block_on(self.client.get_version())
    }

    pub fn save_session(&self) -> Result<(), EngineError> {
        self.runtime.block_on(self.client.save_session())
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.runtime.block_on(self.client.shutdown())
    }
}

impl DownloadBackend for Aria2Backend {
    fn add_uri(&self, uris: &[String], options: &DownloadOptions) -> Result<String, EngineError> {
        self.runtime.block_on(self.client.add_uri(uris, options))
    }

    fn tell_status(&self, gid: &str) -> Result<RawStatus, EngineError> {
        self.runtime.block_on(self.client.tell_status(gid))
    }

    fn pause(&self, gid: &str) -> Result<(), EngineError> {
        self.runtime.block_on(self.client.pause(gid))
    }

    fn unpause(&self, gid: &str) -> Result<(), EngineError> {
        self.runtime.block_on(self.client.unpause(gid))
    }

    fn remove(&self, gid: &str) -> Result<(), EngineError> {
        self.runtime.block_on(self.client.remove(gid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RpcStub;

    #[test]
    fn test_parse_status() {
        let status = parse_status(json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "completedLength": "262144000",
            "totalLength": "524288000",
            "downloadSpeed": "1048576",
            "files": [{"index": "1", "path": "/zims/wikipedia.zim", "length": "524288000"}],
        }))
        .unwrap();
        assert_eq!(status.status, DownloadStatus::Active);
        assert_eq!(status.completed_length, 262_144_000);
        assert_eq!(status.total_length, 524_288_000);
        assert_eq!(status.download_speed, 1_048_576);
        assert_eq!(status.path, "/zims/wikipedia.zim");
        assert!(status.followed_by.is_empty());
    }

    #[test]
    fn test_parse_metalink_status() {
        let status = parse_status(json!({
            "status": "complete",
            "completedLength": "4096",
            "totalLength": "4096",
            "downloadSpeed": "0",
            "followedBy": ["d2c5a6e1f0b7c3a9"],
        }))
        .unwrap();
        assert_eq!(status.status, DownloadStatus::Complete);
        assert_eq!(status.path, "");
        assert_eq!(status.followed_by, vec!["d2c5a6e1f0b7c3a9".to_string()]);
    }

    #[test]
    fn test_parse_status_rejects_garbage() {
        assert!(matches!(
            parse_status(json!({"status": "active", "totalLength": "lots"})),
            Err(EngineError::Protocol(_))
        ));
        assert!(matches!(parse_status(json!("active")), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_as_gid() {
        assert_eq!(as_gid(json!("2089b05ecca3d829")).unwrap(), "2089b05ecca3d829");
        assert!(as_gid(json!(42)).is_err());
    }

    fn backend(url: String, secret: Option<String>) -> Aria2Backend {
        Aria2Backend::new(Aria2Client::new(url, secret).unwrap()).unwrap()
    }

    #[test]
    fn test_unreachable_daemon() {
        // Nothing listens on the discard port
        let backend = backend("http://127.0.0.1:9/jsonrpc".into(), None);
        assert!(matches!(
            backend.tell_status("2089b05ecca3d829"),
            Err(EngineError::Unreachable(_))
        ));
    }

    #[test]
    fn test_calls_carry_token() {
        let stub = RpcStub::start();
        let backend = backend(stub.url(), Some("s3cret".into()));

        assert_eq!(backend.version().unwrap(), "1.37.0");
        backend.save_session().unwrap();
        backend.shutdown().unwrap();

        assert_eq!(
            stub.methods(),
            vec!["aria2.getVersion", "aria2.saveSession", "aria2.shutdown"]
        );
        assert!(stub
            .requests()
            .iter()
            .all(|request| request["params"][0] == "token:s3cret"));
    }
}
