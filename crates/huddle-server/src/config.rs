//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`HUDDLE_*`, nested keys joined with `__`)
//! - TOML configuration file (`huddle.toml`)

use anyhow::{Context, Result};
use huddle_core::engine::{ListenIp, WebRtcTransportOptions};
use huddle_core::{default_media_codecs, LoopbackConfig, MediasoupConfig, SessionConfig};
use huddle_protocol::RtpCodecCapability;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Signaling endpoint configuration.
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Static page configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// Media engine configuration.
    #[serde(default)]
    pub media: MediaConfig,

    /// Room configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Signaling endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Static page configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Directory holding the room client page.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

/// Which media engine backs the rooms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// A mediasoup worker.
    #[default]
    Mediasoup,
    /// Signaling only. Negotiates in process and never moves media.
    Loopback,
}

/// Media engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default)]
    pub engine: EngineKind,

    /// Lowest RTC port.
    #[serde(default = "default_rtc_min_port")]
    pub rtc_min_port: u16,

    /// Highest RTC port.
    #[serde(default = "default_rtc_max_port")]
    pub rtc_max_port: u16,

    /// Address WebRTC transports bind to.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Address announced to clients in ICE candidates.
    #[serde(default = "default_announced_ip")]
    pub announced_ip: Option<String>,

    #[serde(default = "default_true")]
    pub enable_udp: bool,

    #[serde(default = "default_true")]
    pub enable_tcp: bool,

    #[serde(default = "default_true")]
    pub prefer_udp: bool,

    /// Delay between media worker death and process exit, in milliseconds.
    #[serde(default = "default_worker_death_grace")]
    pub worker_death_grace_ms: u64,

    /// Codecs every room router supports.
    #[serde(default = "default_media_codecs")]
    pub codecs: Vec<RtpCodecCapability>,
}

/// Room configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Delete a room once its last participant leaves.
    #[serde(default = "default_true")]
    pub delete_empty: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_rtc_min_port() -> u16 {
    2000
}

fn default_rtc_max_port() -> u16 {
    4000
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_announced_ip() -> Option<String> {
    Some("127.0.0.1".to_string())
}

fn default_worker_death_grace() -> u64 {
    2000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            signaling: SignalingConfig::default(),
            http: HttpConfig::default(),
            media: MediaConfig::default(),
            rooms: RoomsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            public_dir: default_public_dir(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            rtc_min_port: default_rtc_min_port(),
            rtc_max_port: default_rtc_max_port(),
            listen_ip: default_listen_ip(),
            announced_ip: default_announced_ip(),
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            worker_death_grace_ms: default_worker_death_grace(),
            codecs: default_media_codecs(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self { delete_empty: true }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first `huddle.toml` found, plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "huddle.toml",
            "/etc/huddle/huddle.toml",
            "~/.config/huddle/huddle.toml",
        ];

        let found = config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
            .find(|path| path.exists());

        Self::load_layered(found.as_deref())
    }

    /// Load an optional TOML file, then apply `HUDDLE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment value cannot be parsed.
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("HUDDLE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Session settings derived from the media and room sections.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            media_codecs: self.media.codecs.clone(),
            webrtc_transport: WebRtcTransportOptions {
                listen_ips: vec![ListenIp {
                    ip: self.media.listen_ip.clone(),
                    announced_ip: self.media.announced_ip.clone(),
                }],
                enable_udp: self.media.enable_udp,
                enable_tcp: self.media.enable_tcp,
                prefer_udp: self.media.prefer_udp,
            },
            delete_empty_rooms: self.rooms.delete_empty,
        }
    }

    /// Settings for the mediasoup worker.
    #[must_use]
    pub fn mediasoup_config(&self) -> MediasoupConfig {
        MediasoupConfig {
            rtc_min_port: self.media.rtc_min_port,
            rtc_max_port: self.media.rtc_max_port,
        }
    }

    /// Settings for the in-process loopback engine.
    #[must_use]
    pub fn loopback_config(&self) -> LoopbackConfig {
        LoopbackConfig {
            rtc_min_port: self.media.rtc_min_port,
            rtc_max_port: self.media.rtc_max_port,
        }
    }

    #[must_use]
    pub fn worker_death_grace(&self) -> Duration {
        Duration::from_millis(self.media.worker_death_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::MediaKind;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.media.rtc_min_port, 2000);
        assert_eq!(config.media.rtc_max_port, 4000);
        assert_eq!(config.media.announced_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.media.engine, EngineKind::Mediasoup);
        assert_eq!(config.mediasoup_config().rtc_max_port, 4000);
        assert_eq!(config.worker_death_grace(), Duration::from_secs(2));
        assert!(config.rooms.delete_empty);
    }

    #[test]
    fn test_default_codecs() {
        let codecs = Config::default().media.codecs;
        assert_eq!(codecs.len(), 2);
        assert_eq!(codecs[0].kind, MediaKind::Audio);
        assert_eq!(codecs[0].mime_type, "audio/opus");
        assert_eq!(codecs[0].clock_rate, 48_000);
        assert_eq!(codecs[0].channels, Some(2));
        assert_eq!(codecs[1].mime_type, "video/VP8");
        assert_eq!(
            codecs[1].parameters.get("x-google-start-bitrate"),
            Some(&serde_json::json!(1000))
        );
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 3000);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 4443

            [media]
            engine = "loopback"
            rtc_min_port = 40000
            rtc_max_port = 40100
            announced_ip = "203.0.113.7"
            enable_tcp = false

            [rooms]
            delete_empty = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 4443);
        assert_eq!(config.media.engine, EngineKind::Loopback);
        assert_eq!(config.loopback_config().rtc_min_port, 40000);
        assert_eq!(config.mediasoup_config().rtc_max_port, 40100);
        assert_eq!(config.media.codecs.len(), 2);

        let session = config.session_config();
        assert!(!session.delete_empty_rooms);
        assert!(!session.webrtc_transport.enable_tcp);
        assert_eq!(
            session.webrtc_transport.listen_ips[0].announced_ip.as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn test_load_layered_file() {
        let path = std::env::temp_dir().join(format!("huddle-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 3100\n[signaling]\nwebsocket_path = \"/signal\"\n").unwrap();

        let config = Config::load_layered(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 3100);
        assert_eq!(config.signaling.websocket_path, "/signal");
        assert_eq!(config.media.rtc_max_port, 4000);
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let result: Result<Config, _> = toml::from_str("[media]\nengine = \"janus\"\n");
        assert!(result.is_err());
    }
}
