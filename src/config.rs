//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;
use crate::relay::DecodeFailurePolicy;
use crate::upstream::ApiFlavor;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub page: PageConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the page and relay socket are served on.
    pub listen_addr: String,

    /// Maximum concurrent relay connections.
    pub max_connections: usize,

    /// Timeout for individual writes to a peer (seconds).
    pub write_timeout_secs: u64,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            max_connections: 10_000,
            write_timeout_secs: 30,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Upstream generation service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Source provider: "mock" or "http".
    pub provider: String,

    /// Full URL requests are posted to.
    pub endpoint: String,

    /// Request body dialect.
    pub api: ApiFlavor,

    /// Model identifier sent with every request.
    pub model: String,

    /// Bearer credential (can also be set via UPSTREAM_API_KEY).
    pub api_key: Option<String>,

    /// Default prompt when the peer does not supply one.
    pub prompt: String,

    /// Optional system instructions.
    pub instructions: Option<String>,

    pub max_tokens: Option<u32>,

    pub temperature: Option<f32>,

    /// Connect timeout (seconds).
    pub connect_timeout_secs: u64,

    /// Maximum wait for a single upstream read (seconds, 0 = unbounded).
    pub read_timeout_secs: u64,

    /// Maximum idle connections per host in pool.
    pub pool_max_idle_per_host: usize,

    /// Skip TLS certificate verification (testing only).
    pub insecure_ssl: bool,

    /// Delay between mock fragments (milliseconds).
    pub mock_delay_ms: u64,

    /// Size of each mock fragment in bytes.
    pub mock_fragment_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            endpoint: "https://api.openai.com/v1/responses".to_string(),
            api: ApiFlavor::default(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            prompt: "Write the body of a short HTML page introducing yourself. \
                     Respond with HTML markup only."
                .to_string(),
            instructions: None,
            max_tokens: None,
            temperature: None,
            connect_timeout_secs: 10,
            read_timeout_secs: 0,
            pool_max_idle_per_host: 32,
            insecure_ssl: false,
            mock_delay_ms: 40,
            mock_fragment_bytes: 7,
        }
    }
}

impl UpstreamConfig {
    /// The configured credential, treating a blank value as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    pub fn mock_delay(&self) -> Duration {
        Duration::from_millis(self.mock_delay_ms)
    }
}

/// Relay core tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// What to do with an ordinary frame whose payload does not decode.
    pub decode_failure: DecodeFailurePolicy,

    /// Upper bound for one incomplete upstream frame (bytes, 0 = unbounded).
    pub max_buffer_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            decode_failure: DecodeFailurePolicy::default(),
            max_buffer_bytes: 1024 * 1024,
        }
    }
}

impl RelayConfig {
    pub fn buffer_limit(&self) -> Option<usize> {
        (self.max_buffer_bytes > 0).then_some(self.max_buffer_bytes)
    }
}

/// Page rendering configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Page title substituted into the template.
    pub title: String,

    /// Custom HTML template; the embedded one is used when unset.
    pub template_path: Option<String>,

    /// Directory served under /static.
    pub static_dir: Option<String>,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            title: "Live page".to_string(),
            template_path: None,
            static_dir: None,
        }
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(port) = lookup("PORT").and_then(|v| v.parse::<u16>().ok()) {
            let host = self
                .server
                .listen_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.listen_addr = format!("{}:{}", host, port);
        }
        if let Some(n) = lookup("RELAY_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.server.max_connections = n;
        }

        // Upstream overrides
        if let Some(v) = lookup("RELAY_UPSTREAM_PROVIDER") {
            self.upstream.provider = v;
        }
        if let Some(v) = lookup("UPSTREAM_URL") {
            self.upstream.endpoint = v;
        }
        if let Some(v) = lookup("UPSTREAM_MODEL") {
            self.upstream.model = v;
        }
        // `UPSTREAM_API_KEY=` counts as unset
        let credential = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = credential("UPSTREAM_API_KEY").or_else(|| credential("OPENAI_API_KEY")) {
            self.upstream.api_key = Some(v);
        }
        if let Some(n) = lookup("RELAY_READ_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.upstream.read_timeout_secs = n;
        }

        // Metrics overrides
        if let Some(v) = lookup("RELAY_METRICS_ENABLED") {
            self.metrics.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RELAY_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        // Logging overrides
        if let Some(v) = lookup("RELAY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("RELAY_LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Validate settings once at startup.
    ///
    /// A missing upstream credential is not an error here: each session
    /// reports it to its peer when the source is opened.
    pub fn validate(&self) -> Result<(), RelayError> {
        self.listen_addr()?;

        match self.upstream.provider.as_str() {
            "mock" => {}
            "http" => {
                reqwest::Url::parse(&self.upstream.endpoint).map_err(|e| {
                    RelayError::Config(format!(
                        "Invalid upstream endpoint {}: {}",
                        self.upstream.endpoint, e
                    ))
                })?;
                if self.upstream.api_key().is_none() {
                    tracing::warn!(
                        "No upstream API key configured; sessions will report a configuration error"
                    );
                }
            }
            other => {
                return Err(RelayError::Config(format!(
                    "Unknown upstream provider: {}. Available: mock, http",
                    other
                )))
            }
        }

        if self.server.write_timeout_secs == 0 {
            return Err(RelayError::Config(
                "server.write_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, RelayError> {
        self.server.listen_addr.parse().map_err(|e| {
            RelayError::Config(format!(
                "Invalid listen address {}: {}",
                self.server.listen_addr, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.upstream.provider, "mock");
        assert_eq!(config.relay.decode_failure, DecodeFailurePolicy::Skip);
        assert_eq!(config.relay.buffer_limit(), Some(1024 * 1024));
        assert_eq!(config.upstream.read_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:8088"

            [upstream]
            provider = "http"
            endpoint = "http://localhost:9000/v1/chat/completions"
            api = "chat"
            read_timeout_secs = 20

            [relay]
            decode_failure = "terminate"
            max_buffer_bytes = 0
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8088");
        assert_eq!(config.upstream.provider, "http");
        assert_eq!(config.upstream.api, ApiFlavor::Chat);
        assert_eq!(config.upstream.read_timeout(), Some(Duration::from_secs(20)));
        assert_eq!(config.relay.decode_failure, DecodeFailurePolicy::Terminate);
        assert_eq!(config.relay.buffer_limit(), None);
        // Untouched sections keep their defaults
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("PORT", "8123"),
            ("UPSTREAM_URL", "http://127.0.0.1:1/v1/responses"),
            ("UPSTREAM_MODEL", "tiny"),
            ("OPENAI_API_KEY", "sk-fallback"),
            ("RELAY_LOG_FORMAT", "json"),
        ]));

        assert_eq!(config.server.listen_addr, "0.0.0.0:8123");
        assert_eq!(config.upstream.endpoint, "http://127.0.0.1:1/v1/responses");
        assert_eq!(config.upstream.model, "tiny");
        assert_eq!(config.upstream.api_key.as_deref(), Some("sk-fallback"));
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_primary_credential_wins_over_fallback() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("UPSTREAM_API_KEY", "sk-primary"),
            ("OPENAI_API_KEY", "sk-fallback"),
        ]));
        assert_eq!(config.upstream.api_key.as_deref(), Some("sk-primary"));
    }

    #[test]
    fn test_blank_credential_is_unset() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("UPSTREAM_API_KEY", "")]));
        assert_eq!(config.upstream.api_key, None);

        config.apply_overrides(lookup_from(&[
            ("UPSTREAM_API_KEY", "  "),
            ("OPENAI_API_KEY", "sk-fallback"),
        ]));
        assert_eq!(config.upstream.api_key(), Some("sk-fallback"));

        config.upstream.api_key = Some(" ".to_string());
        assert_eq!(config.upstream.api_key(), None);
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("PORT", "not-a-port")]));
        assert_eq!(config.server.listen_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = Config::default();
        config.upstream.provider = "carrier-pigeon".to_string();
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = Config::default();
        config.upstream.provider = "http".to_string();
        config.upstream.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_file_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/relay.toml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.upstream.provider, "mock");
        assert_eq!(config.relay.max_buffer_bytes, 1_048_576);
        assert!(config.validate().is_ok());
    }
}
