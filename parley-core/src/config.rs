use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub media: MediaConfig,
    pub room: RoomConfig,
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by the CORS layer on both the HTTP and websocket routes
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 15000,
            cors_origins: vec![
                "http://localhost".to_string(),
                "http://localhost:80".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Media engine worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Address the worker listens on
    pub listen_ip: IpAddr,
    /// Public address advertised in ICE candidates (defaults to `listen_ip`)
    pub announced_ip: Option<IpAddr>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    /// Delay before the process exits after the worker dies
    pub exit_delay_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            announced_ip: None,
            rtc_min_port: 40000,
            rtc_max_port: 49999,
            exit_delay_ms: 2000,
        }
    }
}

/// Room registry limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Maximum number of concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum participants per room (0 = unlimited)
    pub max_participants: usize,
}

/// Per-connection signaling limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Outbound frames buffered per connection before notifications are dropped
    pub outbound_queue_capacity: usize,
    /// Largest accepted websocket message in bytes
    pub max_message_size: usize,
    pub max_display_name_len: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            max_message_size: 64 * 1024,
            max_display_name_len: 32,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // PARLEY_SERVER__PORT, PARLEY_MEDIA__RTC_MIN_PORT, ...
        builder = builder.add_source(
            Environment::with_prefix("PARLEY")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the loaded values, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.server.cors_origins.iter().any(|o| o.trim().is_empty()) {
            errors.push("server.cors_origins must not contain empty entries".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }
        if self.media.rtc_min_port == 0 || self.media.rtc_min_port > self.media.rtc_max_port {
            errors.push(format!(
                "media.rtc_min_port ({}) must be non-zero and not above media.rtc_max_port ({})",
                self.media.rtc_min_port, self.media.rtc_max_port
            ));
        }
        if self.signaling.outbound_queue_capacity == 0 {
            errors.push("signaling.outbound_queue_capacity must be at least 1".to_string());
        }
        if self.signaling.max_message_size < 1024 {
            errors.push("signaling.max_message_size must be at least 1024 bytes".to_string());
        }
        if self.signaling.max_display_name_len == 0 {
            errors.push("signaling.max_display_name_len must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
