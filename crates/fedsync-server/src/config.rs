//! Server configuration loading from file and environment variables.

use fedsync_types::RegisteredPlatform;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Connection state-machine timing.
    #[serde(default)]
    pub hub: HubTimingConfig,

    /// Crypto and freshness knobs.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Platforms provisioned for the signed REST path.
    #[serde(default)]
    pub platforms: Vec<RegisteredPlatform>,

    /// Nodes provisioned for the WebSocket handshake.
    #[serde(default)]
    pub nodes: Vec<NodeKeyEntry>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Timing for the per-connection state machine and the liveness sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct HubTimingConfig {
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_probe_after")]
    pub probe_after_secs: u64,
    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_secs: u64,
}

/// Token, freshness, and replay-window settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Bearer-token lifetime.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Acceptable clock skew for handshake offers and signed requests.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: u64,

    /// Retention window for consumed handshake nonces.
    #[serde(default = "default_nonce_window")]
    pub nonce_window_secs: u64,

    /// Hex-encoded HMAC key for token issuance. When empty a random key is
    /// generated at startup, which invalidates outstanding tokens across
    /// restarts.
    #[serde(default)]
    pub token_key_hex: String,
}

/// One provisioned node key, as `[[nodes]]` in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeKeyEntry {
    pub node_id: String,
    /// Hex-encoded 32-byte Ed25519 public key.
    pub public_key_hex: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "fedsync_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    4000
}

fn default_auth_timeout() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_probe_after() -> u64 {
    60
}

fn default_hard_timeout() -> u64 {
    120
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_freshness_window() -> u64 {
    300
}

fn default_nonce_window() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for HubTimingConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: default_auth_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            probe_after_secs: default_probe_after(),
            hard_timeout_secs: default_hard_timeout(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            freshness_window_secs: default_freshness_window(),
            nonce_window_secs: default_nonce_window(),
            token_key_hex: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `FEDSYNC_HOST` overrides `server.host`
/// - `FEDSYNC_PORT` overrides `server.port`
/// - `FEDSYNC_TOKEN_KEY` overrides `security.token_key_hex`
/// - `FEDSYNC_LOG_LEVEL` overrides `logging.level`
/// - `FEDSYNC_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("FEDSYNC_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("FEDSYNC_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(key) = std::env::var("FEDSYNC_TOKEN_KEY") {
        config.security.token_key_hex = key;
    }
    if let Ok(level) = std::env::var("FEDSYNC_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("FEDSYNC_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.hub.auth_timeout_secs, 30);
        assert_eq!(config.security.freshness_window_secs, 300);
        assert!(config.platforms.is_empty());
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some("/nonexistent/fedsync.toml")).unwrap();
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn parses_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
host = "0.0.0.0"
port = 9000

[hub]
hard_timeout_secs = 240

[security]
token_ttl_secs = 600
token_key_hex = "deadbeef"

[logging]
level = "debug"
json = true

[[platforms]]
platformId = "p1"
apiKey = "k1"
signingSecret = "s1"
allowedPaths = ["/api/sync"]

[[nodes]]
node_id = "n1"
public_key_hex = "{}"
"#,
            "00".repeat(32)
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.hub.hard_timeout_secs, 240);
        // Unset knobs keep their defaults within a present section.
        assert_eq!(config.hub.auth_timeout_secs, 30);
        assert_eq!(config.security.token_ttl_secs, 600);
        assert_eq!(config.security.token_key_hex, "deadbeef");
        assert!(config.logging.json);
        assert_eq!(config.platforms.len(), 1);
        assert_eq!(config.platforms[0].platform_id, "p1");
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].node_id, "n1");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nport = nope").unwrap();
        assert!(matches!(
            load_config(file.path().to_str()),
            Err(ConfigError::Parse(_))
        ));
    }
}
