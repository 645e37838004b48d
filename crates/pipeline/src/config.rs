use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::planner::CodecPolicy;

/// Default location looked up by both binaries when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mkv2mp4/config.toml";

/// Configuration for the conversion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Library root directories walked by `scan`
    pub library_roots: Vec<PathBuf>,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Output must be at least this fraction of the input size (e.g., 0.90)
    pub min_output_ratio: f64,
    /// Outputs above this fraction of the input size are logged as unusual but accepted
    pub max_output_ratio: f64,
    /// Hard timeout for the structural integrity check
    pub verify_timeout_secs: u64,
    /// Hard timeout for a full metadata probe
    pub probe_timeout_secs: u64,
    /// Per-request timeout for download-manager and media-server calls
    pub http_timeout_secs: u64,
    /// Optional wall-clock limit for the transcode process (unbounded when None)
    pub transcode_timeout_secs: Option<u64>,
    /// Minimum interval between two logged ffmpeg progress lines
    pub progress_log_interval_secs: u64,
    /// Directory for daily conversion logs and the default ledger database
    pub log_dir: PathBuf,
    /// Whether outcomes are appended to the corruption ledger
    pub ledger_enabled: bool,
    /// Explicit ledger database path (defaults to `<log_dir>/corruption_tracker.db`)
    pub ledger_path: Option<PathBuf>,
    /// Codec-keyed conversion policy table consulted by the planner
    pub codec_policies: Vec<CodecPolicy>,
    /// Download manager (Radarr) connection
    pub download_manager: ServiceConfig,
    /// Media server (Jellyfin) connection
    pub media_server: ServiceConfig,
    /// Playback webhook and smart-download settings
    pub webhook: WebhookConfig,
}

/// Base URL plus static API key for an external HTTP collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub url: String,
    pub api_key: String,
}

impl ServiceConfig {
    /// The integration is only attempted when an API key is present
    pub fn enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Apply environment values, but only when the file left the API key empty.
    /// `url_var`/`key_var` are looked up through `env` so tests can inject values.
    pub fn apply_env<F>(&mut self, url_var: &str, key_var: &str, default_url: &str, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.enabled() {
            return;
        }
        if let Some(key) = env(key_var).filter(|k| !k.trim().is_empty()) {
            self.api_key = key;
        }
        if self.url.trim().is_empty() || self.url == default_url {
            if let Some(url) = env(url_var).filter(|u| !u.trim().is_empty()) {
                self.url = url;
            }
        }
    }

    /// URL without a trailing slash, ready for path concatenation
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Settings for the playback webhook receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Socket address the webhook server binds to
    pub listen_addr: String,
    /// Only playback by this user name can trigger downloads
    pub tracked_user: String,
    /// Client IP prefix treated as the local network
    pub local_network_prefix: String,
    /// Client IP prefix of the Tailscale network (also treated as local)
    pub tailscale_network_prefix: String,
    /// Download once an item was watched this many times
    pub watch_count_threshold: u32,
    /// Minimum position/runtime percentage for a playback to count as watched
    pub completion_threshold_pct: f64,
}

pub const DEFAULT_DOWNLOAD_MANAGER_URL: &str = "http://localhost:7878";
pub const DEFAULT_MEDIA_SERVER_URL: &str = "http://localhost:8096";

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            tracked_user: "admin".to_string(),
            local_network_prefix: "192.168.".to_string(),
            tailscale_network_prefix: "100.64.".to_string(),
            watch_count_threshold: 2,
            completion_threshold_pct: 90.0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PipelineConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            library_roots: vec![PathBuf::from("/media/movies")],
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            min_output_ratio: 0.90,
            max_output_ratio: 1.05,
            verify_timeout_secs: 30,
            probe_timeout_secs: 60,
            http_timeout_secs: 10,
            transcode_timeout_secs: None,
            progress_log_interval_secs: 30,
            log_dir: PathBuf::from("/var/log/conversions"),
            ledger_enabled: true,
            ledger_path: None,
            codec_policies: CodecPolicy::default_table(),
            download_manager: ServiceConfig {
                url: DEFAULT_DOWNLOAD_MANAGER_URL.to_string(),
                api_key: String::new(),
            },
            media_server: ServiceConfig {
                url: DEFAULT_MEDIA_SERVER_URL.to_string(),
                api_key: String::new(),
            },
            webhook: WebhookConfig::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist.
    /// Environment credentials are applied afterwards.
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.apply_env_with(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Resolve service credentials from an environment lookup
    pub fn apply_env_with<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.download_manager
            .apply_env("RADARR_URL", "RADARR_API_KEY", DEFAULT_DOWNLOAD_MANAGER_URL, &env);
        self.media_server
            .apply_env("JELLYFIN_URL", "JELLYFIN_API_KEY", DEFAULT_MEDIA_SERVER_URL, &env);
        if self.download_manager.url.trim().is_empty() {
            self.download_manager.url = DEFAULT_DOWNLOAD_MANAGER_URL.to_string();
        }
        if self.media_server.url.trim().is_empty() {
            self.media_server.url = DEFAULT_MEDIA_SERVER_URL.to_string();
        }
    }

    /// Resolve the config path the binaries should use
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                default.exists().then_some(default)
            }
        }
    }

    /// Ledger database location
    pub fn ledger_db_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.log_dir.join("corruption_tracker.db"))
    }
}
