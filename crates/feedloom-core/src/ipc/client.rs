//! Typed client for the daemon socket.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

use super::protocol::*;
use crate::discovery::{DiscoveryKind, DiscoveryState};
use crate::feed::{Article, ArticleFilter, Feed, FeedUpdate, ImportReport};
use crate::{Error, Result};

#[derive(Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Check if daemon is running by sending a ping
    pub async fn ping(&self) -> Result<bool> {
        match self.call(methods::PING, serde_json::Value::Null).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.call_as(methods::STATUS, serde_json::Value::Null).await
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let response: FeedListResponse = self.call_as(methods::FEED_LIST, serde_json::Value::Null).await?;
        Ok(response.feeds)
    }

    pub async fn add_feed(&self, url: &str, category: &str, title: &str) -> Result<Uuid> {
        self.add(methods::FEED_ADD, url, category, title).await
    }

    pub async fn add_script_feed(&self, script_path: &str, category: &str, title: &str) -> Result<Uuid> {
        self.add(methods::FEED_ADD_SCRIPT, script_path, category, title).await
    }

    async fn add(&self, method: &str, location: &str, category: &str, title: &str) -> Result<Uuid> {
        let params = serde_json::to_value(FeedAddParams {
            location: location.to_string(),
            category: category.to_string(),
            title: title.to_string(),
        })?;
        let response: FeedAddResponse = self.call_as(method, params).await?;
        Ok(response.id)
    }

    pub async fn update_feed(&self, id: Uuid, update: FeedUpdate) -> Result<Feed> {
        let params = serde_json::to_value(FeedUpdateParams { id, update })?;
        let response: FeedResponse = self.call_as(methods::FEED_UPDATE, params).await?;
        Ok(response.feed)
    }

    pub async fn delete_feed(&self, id: Uuid) -> Result<bool> {
        let response: DeletedResponse = self
            .call_as(methods::FEED_DELETE, serde_json::json!({ "id": id }))
            .await?;
        Ok(response.deleted)
    }

    /// Fetch one feed now; returns the number of new articles
    pub async fn refresh(&self, id: Uuid) -> Result<u32> {
        let response: RefreshResponse = self
            .call_as(methods::FEED_REFRESH, serde_json::json!({ "id": id }))
            .await?;
        Ok(response.new_articles)
    }

    pub async fn refresh_all(&self) -> Result<RefreshAllResponse> {
        self.call_as(methods::FEED_REFRESH_ALL, serde_json::Value::Null).await
    }

    pub async fn import_opml(&self, content: &str) -> Result<ImportReport> {
        self.call_as(methods::FEED_IMPORT_OPML, serde_json::json!({ "content": content }))
            .await
    }

    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        let response: ArticleListResponse = self
            .call_as(methods::ARTICLE_LIST, serde_json::to_value(filter)?)
            .await?;
        Ok(response.articles)
    }

    pub async fn cleanup(&self) -> Result<u32> {
        let response: CleanupResponse = self.call_as(methods::ARTICLE_CLEANUP, serde_json::Value::Null).await?;
        Ok(response.deleted)
    }

    pub async fn start_discovery(&self, kind: DiscoveryKind, feed_id: Option<Uuid>) -> Result<DiscoveryState> {
        let params = serde_json::to_value(DiscoveryStartParams { kind, feed_id })?;
        let response: DiscoveryStateResponse = self.call_as(methods::DISCOVERY_START, params).await?;
        Ok(response.state)
    }

    pub async fn discovery_state(&self, kind: DiscoveryKind) -> Result<DiscoveryState> {
        let response: DiscoveryStateResponse = self
            .call_as(methods::DISCOVERY_STATE, serde_json::json!({ "kind": kind }))
            .await?;
        Ok(response.state)
    }

    pub async fn clear_discovery(&self, kind: DiscoveryKind) -> Result<bool> {
        let response: ClearedResponse = self
            .call_as(methods::DISCOVERY_CLEAR, serde_json::json!({ "kind": kind }))
            .await?;
        Ok(response.cleared)
    }

    pub async fn get_setting(&self, key: &str) -> Result<String> {
        let response: SettingResponse = self
            .call_as(methods::SETTINGS_GET, serde_json::json!({ "key": key }))
            .await?;
        Ok(response.value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.call(methods::SETTINGS_SET, serde_json::json!({ "key": key, "value": value }))
            .await?;
        Ok(())
    }

    pub async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let response: SettingsListResponse = self.call_as(methods::SETTINGS_LIST, serde_json::Value::Null).await?;
        Ok(response.settings.into_iter().map(|s| (s.key, s.value)).collect())
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a request and receive a response
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Other(format!(
                "Failed to connect to daemon at {}: {}. Is the daemon running?",
                self.socket_path.display(),
                e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request = Request::new(method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        reader.read_line(&mut response_line).await?;
        if response_line.is_empty() {
            return Err(Error::Other("Daemon closed the connection".to_string()));
        }

        let response: Response = serde_json::from_str(&response_line)?;

        if let Some(error) = response.error {
            tracing::debug!("RPC {} failed with code {}", method, error.code);
            return Err(Error::Other(error.message));
        }

        response.result.ok_or_else(|| Error::Other("Empty response".to_string()))
    }
}

/// Check if daemon is reachable
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    let client = DaemonClient::new(socket_path.to_path_buf());
    client.ping().await.unwrap_or(false)
}
