//! Daemon side of the IPC socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::discovery::DiscoveryKind;
use crate::engine::Engine;
use crate::feed::ArticleFilter;
use crate::storage::FeedRepository;
use crate::{Error, Result};

/// Maximum number of concurrent IPC requests to prevent connection pool exhaustion
const MAX_CONCURRENT_REQUESTS: usize = 10;

pub struct DaemonServer {
    engine: Engine,
    socket_path: PathBuf,
    start_time: Instant,
    scheduler_running: bool,
    request_semaphore: Arc<Semaphore>,
}

impl DaemonServer {
    pub fn new(engine: Engine, socket_path: PathBuf) -> Self {
        Self {
            engine,
            socket_path,
            start_time: Instant::now(),
            scheduler_running: false,
            request_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Report the scheduler as running in `status` replies
    pub fn with_scheduler(mut self, running: bool) -> Self {
        self.scheduler_running = running;
        self
    }

    /// Serve until `shutdown` is cancelled, then remove the socket file
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on: {}", self.socket_path.display());

        let server = Arc::new(self);
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let server = Arc::clone(&server);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, shutdown).await {
                                    warn!("Error handling connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&server.socket_path);
        Ok(())
    }

    async fn handle_connection(&self, stream: UnixStream, shutdown: CancellationToken) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = reader.read_line(&mut line) => read?,
            };
            if bytes_read == 0 {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let _permit = self
                .request_semaphore
                .acquire()
                .await
                .map_err(|e| Error::Other(format!("Failed to acquire semaphore: {}", e)))?;

            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => {
                    debug!("Received request: {} (id: {})", request.method, request.id);
                    self.handle_request(request).await
                }
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    Response::error(Uuid::nil(), ERR_PARSE, format!("Parse error: {}", e))
                }
            };

            let response_json = serde_json::to_string(&response)?;
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    async fn handle_request(&self, request: Request) -> Response {
        let id = request.id;
        let engine = &self.engine;

        match request.method.as_str() {
            methods::PING => Response::ok(id),

            methods::STATUS => {
                let feed_count = FeedRepository::new(engine.db()).count().await;
                reply(
                    id,
                    feed_count.map(|feed_count| StatusResponse {
                        running: true,
                        uptime_secs: self.start_time.elapsed().as_secs(),
                        scheduler_running: self.scheduler_running,
                        feed_count,
                    }),
                )
            }

            methods::FEED_LIST => reply(
                id,
                engine.list_feeds().await.map(|feeds| FeedListResponse { feeds }),
            ),

            methods::FEED_ADD => match params::<FeedAddParams>(id, request.params) {
                Ok(p) => reply(
                    id,
                    engine
                        .subscriptions()
                        .add_subscription(&p.location, &p.category, &p.title)
                        .await
                        .map(|id| FeedAddResponse { id }),
                ),
                Err(resp) => resp,
            },

            methods::FEED_ADD_SCRIPT => match params::<FeedAddParams>(id, request.params) {
                Ok(p) => reply(
                    id,
                    engine
                        .subscriptions()
                        .add_script_subscription(&p.location, &p.category, &p.title)
                        .await
                        .map(|id| FeedAddResponse { id }),
                ),
                Err(resp) => resp,
            },

            methods::FEED_UPDATE => match params::<FeedUpdateParams>(id, request.params) {
                Ok(p) => reply(
                    id,
                    engine
                        .subscriptions()
                        .update_subscription(p.id, p.update)
                        .await
                        .map(|feed| FeedResponse { feed }),
                ),
                Err(resp) => resp,
            },

            methods::FEED_DELETE => match params::<FeedIdParams>(id, request.params) {
                Ok(p) => reply(
                    id,
                    engine
                        .subscriptions()
                        .remove_subscription(p.id)
                        .await
                        .map(|deleted| DeletedResponse { deleted }),
                ),
                Err(resp) => resp,
            },

            methods::FEED_REFRESH => match params::<FeedIdParams>(id, request.params) {
                Ok(p) => reply(
                    id,
                    engine
                        .refresh_feed(p.id)
                        .await
                        .map(|new_articles| RefreshResponse { new_articles }),
                ),
                Err(resp) => resp,
            },

            methods::FEED_REFRESH_ALL => reply(
                id,
                engine.refresh_all().await.map(|report| RefreshAllResponse {
                    results: report.results,
                    cancelled: report.cancelled,
                }),
            ),

            methods::FEED_IMPORT_OPML => match params::<OpmlParams>(id, request.params) {
                Ok(p) => reply(id, engine.subscriptions().import_opml(&p.content).await),
                Err(resp) => resp,
            },

            methods::ARTICLE_LIST => {
                // No params means every visible article
                let filter = if request.params.is_null() {
                    Ok(ArticleFilter::default())
                } else {
                    params::<ArticleFilter>(id, request.params)
                };
                match filter {
                    Ok(filter) => reply(
                        id,
                        engine
                            .list_articles(&filter)
                            .await
                            .map(|articles| ArticleListResponse { articles }),
                    ),
                    Err(resp) => resp,
                }
            }

            methods::ARTICLE_CLEANUP => reply(
                id,
                engine.cleanup().await.map(|deleted| CleanupResponse { deleted }),
            ),

            methods::DISCOVERY_START => match params::<DiscoveryStartParams>(id, request.params) {
                Ok(DiscoveryStartParams {
                    kind: DiscoveryKind::Single,
                    feed_id: Some(feed_id),
                }) => reply(
                    id,
                    engine
                        .discovery()
                        .start_single(feed_id)
                        .await
                        .map(|state| DiscoveryStateResponse { state }),
                ),
                Ok(DiscoveryStartParams {
                    kind: DiscoveryKind::Single,
                    feed_id: None,
                }) => Response::error(id, ERR_INVALID_PARAMS, "Single discovery needs a feed_id"),
                Ok(DiscoveryStartParams {
                    kind: DiscoveryKind::Batch,
                    ..
                }) => reply(
                    id,
                    engine
                        .discovery()
                        .start_batch()
                        .await
                        .map(|state| DiscoveryStateResponse { state }),
                ),
                Err(resp) => resp,
            },

            methods::DISCOVERY_STATE => match params::<DiscoveryKindParams>(id, request.params) {
                Ok(p) => {
                    let state = engine.discovery().state(p.kind).await;
                    reply(id, Ok(DiscoveryStateResponse { state }))
                }
                Err(resp) => resp,
            },

            methods::DISCOVERY_CLEAR => match params::<DiscoveryKindParams>(id, request.params) {
                Ok(p) => {
                    let cleared = engine.discovery().clear(p.kind).await;
                    reply(id, Ok(ClearedResponse { cleared }))
                }
                Err(resp) => resp,
            },

            methods::SETTINGS_GET => match params::<SettingKeyParams>(id, request.params) {
                Ok(p) => reply(
                    id,
                    engine
                        .settings()
                        .get(&p.key)
                        .await
                        .map(|value| SettingResponse { key: p.key, value }),
                ),
                Err(resp) => resp,
            },

            methods::SETTINGS_SET => match params::<SettingSetParams>(id, request.params) {
                Ok(p) => match engine.settings().set(&p.key, &p.value).await {
                    Ok(()) => {
                        info!("Setting {} changed to {}", p.key, p.value);
                        Response::ok(id)
                    }
                    Err(e) => Response::from_error(id, &e),
                },
                Err(resp) => resp,
            },

            methods::SETTINGS_LIST => reply(
                id,
                engine.settings().list().await.map(|settings| SettingsListResponse {
                    settings: settings
                        .into_iter()
                        .map(|(key, value)| SettingResponse { key, value })
                        .collect(),
                }),
            ),

            _ => Response::error(id, ERR_METHOD_NOT_FOUND, "Method not found"),
        }
    }
}

fn params<T: DeserializeOwned>(id: Uuid, value: serde_json::Value) -> std::result::Result<T, Response> {
    serde_json::from_value(value).map_err(|e| Response::error(id, ERR_INVALID_PARAMS, e.to_string()))
}

fn reply<T: Serialize>(id: Uuid, result: Result<T>) -> Response {
    match result.and_then(|value| serde_json::to_value(value).map_err(Error::from)) {
        Ok(value) => Response::success(id, value),
        Err(e) => {
            debug!("Request {} failed: {}", id, e);
            Response::from_error(id, &e)
        }
    }
}
