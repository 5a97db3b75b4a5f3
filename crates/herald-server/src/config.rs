//! Server configuration: TOML file + CLI overrides.

use herald_core::{HeraldError, HeraldResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub timers: TimersSection,
    #[serde(default)]
    pub handlers: HandlersSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cert_path")]
    pub cert: String,
    #[serde(default = "default_key_path")]
    pub key: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            cert: default_cert_path(),
            key: default_key_path(),
            max_sessions: default_max_sessions(),
            max_frame_size: default_max_frame_size(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// `[timers]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TimersSection {
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    #[serde(default = "default_repeat_interval")]
    pub repeat_interval_secs: u64,
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
}

impl Default for TimersSection {
    fn default() -> Self {
        Self {
            status_interval_secs: default_status_interval(),
            repeat_interval_secs: default_repeat_interval(),
            repeat_count: default_repeat_count(),
        }
    }
}

/// `[handlers]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlersSection {
    #[serde(default = "default_sample_dir")]
    pub sample_dir: String,
}

impl Default for HandlersSection {
    fn default() -> Self {
        Self {
            sample_dir: default_sample_dir(),
        }
    }
}

fn default_port() -> u16 {
    8443
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_cert_path() -> String {
    "~/.herald/cert.pem".to_string()
}
fn default_key_path() -> String {
    "~/.herald/key.pem".to_string()
}
fn default_max_sessions() -> usize {
    1024
}
fn default_max_frame_size() -> usize {
    1_048_576
}
fn default_outbound_queue() -> usize {
    64
}
fn default_status_interval() -> u64 {
    5
}
fn default_repeat_interval() -> u64 {
    1
}
fn default_repeat_count() -> u32 {
    10
}
fn default_sample_dir() -> String {
    "./samples".to_string()
}

/// Timer cadence shared by the connection manager and the handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Period of the unsolicited status push.
    pub status_interval: Duration,
    /// Period between `repeat` firings.
    pub repeat_interval: Duration,
    /// Number of `repeat` firings per invocation.
    pub repeat_count: u32,
}

impl Default for Timing {
    fn default() -> Self {
        TimersSection::default().into()
    }
}

impl From<TimersSection> for Timing {
    fn from(t: TimersSection) -> Self {
        Self {
            status_interval: Duration::from_secs(t.status_interval_secs),
            repeat_interval: Duration::from_secs(t.repeat_interval_secs),
            repeat_count: t.repeat_count,
        }
    }
}

/// CLI values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub sample_dir: Option<String>,
    pub max_sessions: Option<usize>,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub max_sessions: usize,
    pub max_frame_size: usize,
    pub outbound_queue: usize,
    pub sample_dir: PathBuf,
    pub timing: Timing,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> HeraldResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    fn parse(content: &str) -> HeraldResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| HeraldError::Config(format!("config parse error: {e}")))
    }

    fn resolve(file_config: ConfigFile, overrides: Overrides) -> HeraldResult<Self> {
        let ConfigFile {
            server,
            timers,
            handlers,
        } = file_config;

        if timers.status_interval_secs == 0 || timers.repeat_interval_secs == 0 {
            return Err(HeraldError::Config(
                "timer intervals must be at least 1 second".into(),
            ));
        }
        if server.outbound_queue == 0 {
            return Err(HeraldError::Config("outbound_queue must be non-zero".into()));
        }

        let cert = overrides.cert.unwrap_or(server.cert);
        let key = overrides.key.unwrap_or(server.key);
        let sample_dir = overrides.sample_dir.unwrap_or(handlers.sample_dir);

        Ok(Self {
            port: overrides.port.unwrap_or(server.port),
            bind: overrides.bind.unwrap_or(server.bind),
            cert_path: expand_tilde_str(&cert),
            key_path: expand_tilde_str(&key),
            max_sessions: overrides.max_sessions.unwrap_or(server.max_sessions),
            max_frame_size: server.max_frame_size,
            outbound_queue: server.outbound_queue,
            sample_dir: expand_tilde_str(&sample_dir),
            timing: timers.into(),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
