//! Wire format between the daemon and its clients.
//!
//! One JSON object per line in each direction, JSON-RPC style.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discovery::{DiscoveryKind, DiscoveryState};
use crate::feed::{Article, Feed, FeedFetchResult, FeedUpdate};
use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Uuid, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Map a core error to the closest RPC code
    pub fn from_error(id: Uuid, error: &Error) -> Self {
        let code = match error {
            Error::Validation(_) | Error::UrlParse(_) => ERR_VALIDATION,
            Error::FeedNotFound(_) => ERR_NOT_FOUND,
            _ => ERR_INTERNAL,
        };
        Self::error(id, code, error.to_string())
    }

    pub fn ok(id: Uuid) -> Self {
        Self::success(id, serde_json::json!({"ok": true}))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Error codes
pub const ERR_PARSE: i32 = -32700;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_DAEMON_NOT_RUNNING: i32 = -32000;
pub const ERR_VALIDATION: i32 = -32001;
pub const ERR_NOT_FOUND: i32 = -32002;

pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";

    pub const FEED_LIST: &str = "feed.list";
    pub const FEED_ADD: &str = "feed.add";
    pub const FEED_ADD_SCRIPT: &str = "feed.add_script";
    pub const FEED_UPDATE: &str = "feed.update";
    pub const FEED_DELETE: &str = "feed.delete";
    pub const FEED_REFRESH: &str = "feed.refresh";
    pub const FEED_REFRESH_ALL: &str = "feed.refresh_all";
    pub const FEED_IMPORT_OPML: &str = "feed.import_opml";

    pub const ARTICLE_LIST: &str = "article.list";
    pub const ARTICLE_CLEANUP: &str = "article.cleanup";

    pub const DISCOVERY_START: &str = "discovery.start";
    pub const DISCOVERY_STATE: &str = "discovery.state";
    pub const DISCOVERY_CLEAR: &str = "discovery.clear";

    pub const SETTINGS_GET: &str = "settings.get";
    pub const SETTINGS_SET: &str = "settings.set";
    pub const SETTINGS_LIST: &str = "settings.list";
}

// Parameter structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedAddParams {
    /// Feed URL, or script path for `feed.add_script`
    pub location: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedIdParams {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedUpdateParams {
    pub id: Uuid,
    #[serde(flatten)]
    pub update: FeedUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpmlParams {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryStartParams {
    pub kind: DiscoveryKind,
    /// Seed feed, required for single discovery
    #[serde(default)]
    pub feed_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryKindParams {
    pub kind: DiscoveryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingKeyParams {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingSetParams {
    pub key: String,
    pub value: String,
}

// Response structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub scheduler_running: bool,
    pub feed_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedListResponse {
    pub feeds: Vec<Feed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub feed: Feed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedAddResponse {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleListResponse {
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub new_articles: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshAllResponse {
    pub results: Vec<FeedFetchResult>,
    pub cancelled: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryStateResponse {
    pub state: DiscoveryState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedResponse {
    pub cleared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsListResponse {
    pub settings: Vec<SettingResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("ping");
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"ping\""));
    }

    #[test]
    fn test_error_codes_follow_error_kind() {
        let id = Uuid::new_v4();
        let resp = Response::from_error(id, &Error::Validation("empty".into()));
        assert!(!resp.is_success());
        assert_eq!(resp.error.unwrap().code, ERR_VALIDATION);

        let resp = Response::from_error(id, &Error::FeedNotFound("x".into()));
        assert_eq!(resp.error.unwrap().code, ERR_NOT_FOUND);

        assert!(Response::ok(id).is_success());
    }

    #[test]
    fn test_update_params_flatten() {
        let id = Uuid::new_v4();
        let params: FeedUpdateParams = serde_json::from_value(serde_json::json!({
            "id": id,
            "title": "Renamed",
            "proxy_url": null
        }))
        .unwrap();
        assert_eq!(params.id, id);
        assert_eq!(params.update.title.as_deref(), Some("Renamed"));
        assert_eq!(params.update.proxy_url, Some(None));
        assert!(params.update.refresh_interval_secs.is_none());
    }

    #[test]
    fn test_discovery_kind_on_the_wire() {
        let params: DiscoveryStartParams =
            serde_json::from_value(serde_json::json!({ "kind": "batch" })).unwrap();
        assert_eq!(params.kind, DiscoveryKind::Batch);
        assert!(params.feed_id.is_none());
    }
}
