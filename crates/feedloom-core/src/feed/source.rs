use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, Proxy, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use url::Url;

use crate::{Error, Result};

/// Hard cap on a feed document, network or script
pub const MAX_FEED_BYTES: usize = 5 * 1024 * 1024;

/// Script stderr kept for error messages; the rest is drained
const MAX_STDERR_BYTES: u64 = 16 * 1024;

// Rotating User-Agent pool - mimics different browsers for better compatibility
static USER_AGENT_INDEX: AtomicUsize = AtomicUsize::new(0);
const USER_AGENTS: &[&str] = &[
    // Chrome on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Firefox on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    // Firefox on Linux
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

fn next_user_agent() -> &'static str {
    let index = USER_AGENT_INDEX.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
    USER_AGENTS[index]
}

/// Something that can produce a raw feed document
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short human-readable origin, used in logs and errors
    fn describe(&self) -> String;

    async fn retrieve(&self) -> Result<Bytes>;
}

/// Build an HTTP client with optional proxy
pub(crate) fn build_client(timeout: Duration, proxy_url: Option<&str>) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(10));

    if let Some(proxy) = proxy_url {
        let proxy = Proxy::all(proxy)
            .map_err(|e| Error::Config(format!("Invalid proxy URL: {}", e)))?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(Error::Http)
}

/// Browser-like headers so feed hosts serve us the same thing they serve readers
pub(crate) fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,application/rss+xml,application/atom+xml,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
    headers.insert(USER_AGENT, HeaderValue::from_static(next_user_agent()));
    headers
}

/// Read a response body, failing as soon as it grows past `limit`
pub(crate) async fn read_capped(response: Response, limit: usize) -> Result<Bytes> {
    let url = response.url().to_string();

    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(too_large(len as usize, &url));
        }
    }

    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len().saturating_add(chunk.len()) > limit {
            return Err(too_large(body.len() + chunk.len(), &url));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body.freeze())
}

fn too_large(size: usize, url: &str) -> Error {
    Error::FeedParse(format!("Feed too large ({}+ bytes) for URL: {}", size, url))
}

fn is_cloudflare_response(headers: &HeaderMap) -> bool {
    headers.get("cf-mitigated").is_some()
        || headers
            .get("server")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("cloudflare"))
            .unwrap_or(false)
}

/// Whether a 2xx body is really a Cloudflare JavaScript challenge page
fn is_cloudflare_challenge(content: &[u8]) -> bool {
    let check_len = content.len().min(2048);
    let preview = String::from_utf8_lossy(&content[..check_len]);

    preview.contains("Just a moment...")
        || preview.contains("cf-browser-verification")
        || preview.contains("_cf_chl_opt")
        || preview.contains("challenge-platform")
}

/// Feed fetched over HTTP(S). One request, no retry.
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ContentSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn retrieve(&self) -> Result<Bytes> {
        let url = Url::parse(&self.url)?;

        tracing::info!("Fetching feed from: {}", url);

        let response = self.client.get(url.as_str()).headers(browser_headers()).send().await?;
        let status = response.status();

        if status == StatusCode::FORBIDDEN && is_cloudflare_response(response.headers()) {
            return Err(Error::FeedParse(format!(
                "Cloudflare protection detected for URL: {}. \
                The site requires JavaScript verification; configure a proxy for this feed.",
                url
            )));
        }

        if !status.is_success() {
            return Err(Error::FeedParse(format!("HTTP {} for URL: {}", status, url)));
        }

        let content = read_capped(response, MAX_FEED_BYTES).await?;

        if is_cloudflare_challenge(&content) {
            return Err(Error::FeedParse(format!(
                "Cloudflare JavaScript challenge detected for URL: {}",
                url
            )));
        }

        Ok(content)
    }
}

/// Permission boundary for script-backed feeds.
///
/// Only regular files inside the scripts directory may run.
#[derive(Debug, Clone)]
pub struct ScriptPolicy {
    dir: PathBuf,
    timeout: Duration,
}

impl ScriptPolicy {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a script path to a canonical file inside the scripts directory
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let path = path.trim();
        if path.is_empty() {
            return Err(Error::Validation("Script path is empty".to_string()));
        }

        let dir = self.dir.canonicalize().map_err(|e| {
            Error::Validation(format!(
                "Scripts directory {} is not accessible: {}",
                self.dir.display(),
                e
            ))
        })?;

        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            dir.join(candidate)
        };

        let resolved = joined
            .canonicalize()
            .map_err(|_| Error::Validation(format!("Script not found: {}", path)))?;

        if !resolved.starts_with(&dir) {
            return Err(Error::Validation(format!(
                "Script {} is outside the scripts directory {}",
                path,
                dir.display()
            )));
        }

        if !resolved.is_file() {
            return Err(Error::Validation(format!("Script {} is not a file", path)));
        }

        Ok(resolved)
    }

    /// Build a runnable source for a script path, enforcing the policy
    pub fn source(&self, path: &str) -> Result<ScriptSource> {
        let script = self.resolve(path)?;
        let working_dir = self.dir.canonicalize().unwrap_or_else(|_| self.dir.clone());

        Ok(ScriptSource {
            script,
            working_dir,
            timeout: self.timeout,
        })
    }
}

/// Interpreter used for a script, or `None` to execute it directly
fn interpreter_for(script: &Path) -> Option<&'static str> {
    match script.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("sh") => Some("sh"),
        Some("js") => Some("node"),
        Some("rb") => Some("ruby"),
        Some("ps1") => Some("pwsh"),
        _ => None,
    }
}

/// Feed document produced on a script's stdout
pub struct ScriptSource {
    script: PathBuf,
    working_dir: PathBuf,
    timeout: Duration,
}

#[async_trait]
impl ContentSource for ScriptSource {
    fn describe(&self) -> String {
        format!("script {}", self.script.display())
    }

    async fn retrieve(&self) -> Result<Bytes> {
        let mut command = match interpreter_for(&self.script) {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.script);
                command
            }
            None => Command::new(&self.script),
        };

        command
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!("Running feed {}", self.describe());

        let mut child = command
            .spawn()
            .map_err(|e| Error::Script(format!("Failed to start {}: {}", self.describe(), e)))?;
        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::Script(format!("{} has no output pipes", self.describe())));
        };

        let run = async {
            let read_stdout = async {
                let mut out = Vec::new();
                (&mut stdout)
                    .take(MAX_FEED_BYTES as u64 + 1)
                    .read_to_end(&mut out)
                    .await?;
                if out.len() > MAX_FEED_BYTES {
                    return Err(Error::Script(format!(
                        "{} produced more than {} bytes",
                        self.describe(),
                        MAX_FEED_BYTES
                    )));
                }
                Ok::<_, Error>(out)
            };
            let read_stderr = async {
                let mut err = Vec::new();
                (&mut stderr).take(MAX_STDERR_BYTES).read_to_end(&mut err).await?;
                tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await?;
                Ok::<_, Error>(err)
            };

            let (out, err) = tokio::try_join!(read_stdout, read_stderr)?;
            let status = child.wait().await?;
            Ok::<_, Error>((status, out, err))
        };

        // Dropping the child on error, timeout or cancellation kills it
        let (status, out, err) = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{} did not finish within {}s",
                    self.describe(),
                    self.timeout.as_secs()
                ))
            })??;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&err);
            return Err(Error::Script(format!(
                "{} exited with {}: {}",
                self.describe(),
                status,
                stderr.trim()
            )));
        }

        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy_with(scripts: &[(&str, &str)]) -> (TempDir, ScriptPolicy) {
        let dir = TempDir::new().unwrap();
        for (name, body) in scripts {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        let policy = ScriptPolicy::new(dir.path(), Duration::from_secs(5));
        (dir, policy)
    }

    #[test]
    fn test_policy_rejects_escapes() {
        let (dir, policy) = policy_with(&[("ok.sh", "echo hi")]);
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert!(policy.resolve("ok.sh").is_ok());
        assert!(matches!(policy.resolve(""), Err(Error::Validation(_))));
        assert!(matches!(policy.resolve("../ok.sh"), Err(Error::Validation(_))));
        assert!(matches!(policy.resolve("nested/../../ok.sh"), Err(Error::Validation(_))));
        assert!(matches!(policy.resolve("/etc/hostname"), Err(Error::Validation(_))));
        assert!(matches!(policy.resolve("missing.py"), Err(Error::Validation(_))));
        assert!(matches!(policy.resolve("nested"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_interpreter_by_extension() {
        assert_eq!(interpreter_for(Path::new("a.py")), Some("python3"));
        assert_eq!(interpreter_for(Path::new("a.sh")), Some("sh"));
        assert_eq!(interpreter_for(Path::new("a.js")), Some("node"));
        assert_eq!(interpreter_for(Path::new("a")), None);
    }

    #[tokio::test]
    async fn test_script_stdout_is_document() {
        let (_dir, policy) = policy_with(&[("feed.sh", "printf '<rss version=\"2.0\"></rss>'")]);
        let source = policy.source("feed.sh").unwrap();
        let bytes = source.retrieve().await.unwrap();
        assert_eq!(&bytes[..], b"<rss version=\"2.0\"></rss>");
    }

    #[tokio::test]
    async fn test_script_failure_carries_stderr() {
        let (_dir, policy) = policy_with(&[("bad.sh", "echo 'upstream down' >&2\nexit 3")]);
        let err = policy.source("bad.sh").unwrap().retrieve().await.unwrap_err();
        match err {
            Error::Script(msg) => assert!(msg.contains("upstream down"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_script_timeout() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("slow.sh"), "sleep 5").unwrap();
        let policy = ScriptPolicy::new(dir.path(), Duration::from_millis(200));

        let err = policy.source("slow.sh").unwrap().retrieve().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_runaway_script_output_is_capped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("flood.sh"), "yes '<item></item>'").unwrap();
        let policy = ScriptPolicy::new(dir.path(), Duration::from_secs(30));

        let started = std::time::Instant::now();
        let err = policy.source("flood.sh").unwrap().retrieve().await.unwrap_err();
        match err {
            Error::Script(msg) => assert!(msg.contains("more than"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_http_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5), None).unwrap();
        let source = HttpSource::new(client, format!("{}/gone.xml", server.uri()));
        let err = source.retrieve().await.unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
    }

    #[tokio::test]
    async fn test_http_body_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; MAX_FEED_BYTES + 1]))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5), None).unwrap();
        let err = HttpSource::new(client, server.uri()).retrieve().await.unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
    }

    #[tokio::test]
    async fn test_cloudflare_challenge_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><title>Just a moment...</title></html>"),
            )
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5), None).unwrap();
        let err = HttpSource::new(client, server.uri()).retrieve().await.unwrap_err();
        assert!(err.to_string().contains("Cloudflare"));
    }
}
