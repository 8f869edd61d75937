//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but cannot be used for the requested mode
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Metadata store location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("video_metadata.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Hardware acceleration preference for the encoder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HardwarePreference {
    /// Probe the host at startup
    #[default]
    Auto,
    /// Always use the software encoder
    None,
    Nvidia,
    Intel,
}

impl std::str::FromStr for HardwarePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" | "cpu" | "software" => Ok(Self::None),
            "nvidia" => Ok(Self::Nvidia),
            "intel" => Ok(Self::Intel),
            other => Err(format!("unknown hardware preference '{}'", other)),
        }
    }
}

/// Encoder tool locations and hardware selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: PathBuf,
    #[serde(default)]
    pub hardware: HardwarePreference,
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_bin() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            hardware: HardwarePreference::default(),
        }
    }
}

/// Local scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum concurrent jobs (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
    /// Where background mode writes its checkpoint
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    /// Log sink for the detached process
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Progress display refresh interval
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("transcode_checkpoint.json")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("transcode.log")
}

fn default_progress_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 0,
            checkpoint_path: default_checkpoint_path(),
            log_path: default_log_path(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

/// Metrics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

fn default_true() -> bool {
    true
}

fn default_metrics_bind() -> String {
    "127.0.0.1:2112".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_metrics_bind(),
        }
    }
}

/// One remote worker in the dispatch roster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub name: String,
    /// host:port of the worker's transcode API
    pub addr: String,
    /// Number of jobs the worker runs at once
    pub capacity: u32,
}

/// Distributed dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Address the callback listener binds to
    #[serde(default = "default_callback_bind")]
    pub callback_bind: String,
    /// URL workers use to reach the callback listener. No default: it must be
    /// reachable from every worker.
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

fn default_callback_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            callback_bind: default_callback_bind(),
            callback_url: None,
            workers: Vec::new(),
        }
    }
}

/// Settings for running this host as a remote worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerServerConfig {
    #[serde(default = "default_worker_name")]
    pub name: String,
    #[serde(default = "default_worker_bind")]
    pub bind: String,
}

fn default_worker_name() -> String {
    "worker".to_string()
}

fn default_worker_bind() -> String {
    "0.0.0.0:8081".to_string()
}

impl Default for WorkerServerConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            bind: default_worker_bind(),
        }
    }
}

/// Chat notification credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub worker: WorkerServerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VIDBATCH_STORE_PATH -> store.path
    /// - VIDBATCH_MAX_CONCURRENT_JOBS -> scheduler.max_concurrent_jobs
    /// - VIDBATCH_HARDWARE -> encoder.hardware
    /// - VIDBATCH_CALLBACK_URL -> dispatch.callback_url
    /// - VIDBATCH_METRICS_BIND -> metrics.bind
    /// - TELEGRAM_BOT_TOKEN -> notify.telegram_bot_token
    /// - TELEGRAM_CHAT_ID -> notify.telegram_chat_id
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VIDBATCH_STORE_PATH") {
            if !val.is_empty() {
                self.store.path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDBATCH_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.scheduler.max_concurrent_jobs = jobs;
            }
        }

        if let Ok(val) = env::var("VIDBATCH_HARDWARE") {
            if let Ok(pref) = val.parse::<HardwarePreference>() {
                self.encoder.hardware = pref;
            }
        }

        if let Ok(val) = env::var("VIDBATCH_CALLBACK_URL") {
            if !val.is_empty() {
                self.dispatch.callback_url = Some(val);
            }
        }

        if let Ok(val) = env::var("VIDBATCH_METRICS_BIND") {
            if !val.is_empty() {
                self.metrics.bind = val;
            }
        }

        if let Ok(val) = env::var("TELEGRAM_BOT_TOKEN") {
            if !val.is_empty() {
                self.notify.telegram_bot_token = Some(val);
            }
        }

        if let Ok(val) = env::var("TELEGRAM_CHAT_ID") {
            if !val.is_empty() {
                self.notify.telegram_chat_id = Some(val);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check that distributed dispatch has everything it needs
    pub fn validate_dispatch(&self) -> Result<(), ConfigError> {
        match self.dispatch.callback_url.as_deref() {
            None | Some("") => {
                return Err(ConfigError::Invalid(
                    "dispatch.callback_url must be set to an address reachable from every worker"
                        .to_string(),
                ))
            }
            Some(_) => {}
        }

        if self.dispatch.workers.is_empty() {
            return Err(ConfigError::Invalid(
                "dispatch.workers must list at least one worker".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for worker in &self.dispatch.workers {
            if worker.capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "worker '{}' has zero capacity",
                    worker.name
                )));
            }
            if !seen.insert(worker.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "worker name '{}' is listed twice",
                    worker.name
                )));
            }
        }

        Ok(())
    }
}
