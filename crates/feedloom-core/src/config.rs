use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub scripts: ScriptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Feed synchronization defaults.
///
/// `refresh_interval_secs`, `max_concurrent_refreshes`, `auto_cleanup_enabled`
/// and `max_article_age_days` only seed the `settings` table; once a value is
/// stored there it wins and can be changed while the daemon runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Auto-refresh interval in seconds (0 = disabled)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Number of feeds fetched concurrently during a full refresh
    #[serde(default = "default_max_concurrent_refreshes")]
    pub max_concurrent_refreshes: usize,
    /// Delete old articles after each scheduled refresh
    #[serde(default = "default_true")]
    pub auto_cleanup_enabled: bool,
    /// Articles older than this are removed by cleanup (favorites and read-later are kept)
    #[serde(default = "default_max_article_age_days")]
    pub max_article_age_days: u32,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// HTTP proxy URL for feed fetching (e.g., "http://127.0.0.1:7890" or "socks5://127.0.0.1:1080")
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            max_concurrent_refreshes: default_max_concurrent_refreshes(),
            auto_cleanup_enabled: default_true(),
            max_article_age_days: default_max_article_age_days(),
            request_timeout_secs: default_timeout(),
            proxy_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Ceiling for a single-feed discovery run
    #[serde(default = "default_single_timeout")]
    pub single_timeout_secs: u64,
    /// Ceiling for a whole-library discovery run
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,
    /// Timeout for each page fetched while crawling
    #[serde(default = "default_discovery_request_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum candidate sites probed per seed
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Candidate sites probed concurrently
    #[serde(default = "default_discovery_concurrency")]
    pub concurrency: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            single_timeout_secs: default_single_timeout(),
            batch_timeout_secs: default_batch_timeout(),
            request_timeout_secs: default_discovery_request_timeout(),
            max_candidates: default_max_candidates(),
            concurrency: default_discovery_concurrency(),
        }
    }
}

impl DiscoveryConfig {
    pub fn single_timeout(&self) -> Duration {
        Duration::from_secs(self.single_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Directory that script-backed feeds must live in (defaults to `<data_dir>/scripts`)
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Maximum run time of one script invocation
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            dir: None,
            timeout_secs: default_script_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedloom")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    1800 // 30 minutes
}

fn default_max_concurrent_refreshes() -> usize {
    5
}

fn default_max_article_age_days() -> u32 {
    30
}

fn default_timeout() -> u64 {
    30
}

fn default_single_timeout() -> u64 {
    60
}

fn default_batch_timeout() -> u64 {
    240
}

fn default_discovery_request_timeout() -> u64 {
    10
}

fn default_max_candidates() -> usize {
    30
}

fn default_discovery_concurrency() -> usize {
    4
}

fn default_script_timeout() -> u64 {
    30
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file or return defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self) -> crate::Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the configuration file path
    /// Always uses ~/.config/feedloom/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("feedloom")
            .join("config.toml")
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("feedloom.db")
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("feedloom.sock")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }

    /// Directory script-backed feeds are resolved against
    pub fn scripts_dir(&self) -> PathBuf {
        match &self.scripts.dir {
            Some(dir) => expand_tilde(dir),
            None => self.data_dir().join("scripts"),
        }
    }
}
