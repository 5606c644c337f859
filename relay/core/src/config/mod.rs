//! TOML Configuration File Support
//!
//! Centralized configuration for the relay, loaded from
//! `$XDG_CONFIG_HOME/realtime-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`RELAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:8787"
//! seed_welcome = true
//!
//! [stream]
//! heartbeat_ms = 15000
//! tool_name = "web-search"
//!
//! [duplex]
//! heartbeat_ms = 25000
//! backoff_initial_ms = 500
//! backoff_max_ms = 4000
//! partial_delay_ms = 300
//! complete_delay_ms = 900
//!
//! [rate_limit]
//! limit = 10
//! refill_ms = 60000
//! enabled = true
//! idle_evict_secs = 600
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::streaming::ProducerConfig;
use crate::transport::{DuplexConfig, RateLimitConfig, ToolSessionConfig};

/// Default listen address for the daemon
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

/// Default idle time before a rate bucket is evicted (seconds)
pub const DEFAULT_IDLE_EVICT_SECS: u64 = 600;

/// Environment variables read by [`load_config`]
pub const ENV_VARS: &[&str] = &[
    "RELAY_BIND_ADDR",
    "RELAY_HEARTBEAT_MS",
    "RELAY_RATE_LIMIT",
    "RELAY_RATE_REFILL_MS",
    "RELAY_RATE_LIMIT_ENABLED",
    "RELAY_BACKOFF_INITIAL_MS",
    "RELAY_BACKOFF_MAX_MS",
    "RELAY_DUPLEX_HEARTBEAT_MS",
];

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address
    pub bind_addr: Option<String>,
    /// Seed the message store with a welcome message
    pub seed_welcome: Option<bool>,
}

/// `[stream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Heartbeat comment interval in milliseconds
    pub heartbeat_ms: Option<u64>,
    /// Delay before the running tool status
    pub tool_status_delay_ms: Option<u64>,
    /// Delay before the follow-up token
    pub analyze_delay_ms: Option<u64>,
    /// Delay before the final message
    pub complete_delay_ms: Option<u64>,
    /// Tool named in the scripted response
    pub tool_name: Option<String>,
}

/// `[duplex]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexToml {
    /// Client keep-alive interval in milliseconds
    pub heartbeat_ms: Option<u64>,
    /// Whether the client sends keep-alives
    pub heartbeat_enabled: Option<bool>,
    /// First reconnect delay
    pub backoff_initial_ms: Option<u64>,
    /// Reconnect delay cap
    pub backoff_max_ms: Option<u64>,
    /// Delay before a tool's partial result
    pub partial_delay_ms: Option<u64>,
    /// Delay before a tool's completion
    pub complete_delay_ms: Option<u64>,
}

/// `[rate_limit]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitToml {
    /// Bucket capacity
    pub limit: Option<u32>,
    /// Refill window in milliseconds
    pub refill_ms: Option<u64>,
    /// Whether rate limiting is enabled
    pub enabled: Option<bool>,
    /// Idle time before a bucket is dropped
    pub idle_evict_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server section
    pub server: ServerToml,
    /// Event stream section
    pub stream: StreamToml,
    /// Duplex socket section
    pub duplex: DuplexToml,
    /// Rate limiting section
    pub rate_limit: RateLimitToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the relay
///
/// Use [`load_config`] to assemble it with proper priority handling.
#[derive(Clone, Debug)]
pub struct RelayConfigFile {
    /// Listen address
    pub bind_addr: SocketAddr,

    /// Seed the message store with a welcome message
    pub seed_welcome: bool,

    /// Event stream script and heartbeat
    pub stream: ProducerConfig,

    /// Duplex client reconnect and heartbeat
    ///
    /// Read by library clients that build a [`crate::ManagedDuplexClient`]
    /// from this config; the daemon serves the tool socket and does not
    /// use it.
    pub duplex: DuplexConfig,

    /// Server-side tool session delays
    pub tool_session: ToolSessionConfig,

    /// Admission limits
    pub rate_limit: RateLimitConfig,

    /// Idle time before a rate bucket is evicted
    pub idle_evict: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for RelayConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            seed_welcome: true,
            stream: ProducerConfig::default(),
            duplex: DuplexConfig::default(),
            tool_session: ToolSessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            idle_evict: Duration::from_secs(DEFAULT_IDLE_EVICT_SECS),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfigFile {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.enabled && self.rate_limit.limit == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.limit must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.refill_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.refill_ms must be positive".to_string(),
            ));
        }
        let backoff = &self.duplex.backoff;
        if backoff.initial_ms == 0 || backoff.initial_ms > backoff.max_ms {
            return Err(ConfigError::ValidationError(format!(
                "backoff must satisfy 0 < initial ({}) <= max ({})",
                backoff.initial_ms, backoff.max_ms
            )));
        }
        if self.stream.heartbeat_ms == 0 {
            return Err(ConfigError::ValidationError(
                "stream.heartbeat_ms must be positive".to_string(),
            ));
        }
        if self.tool_session.partial_delay > self.tool_session.complete_delay {
            return Err(ConfigError::ValidationError(
                "duplex.partial_delay_ms must not exceed complete_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/realtime-relay/relay.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("realtime-relay").join("relay.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the result fails validation. A missing file is not an error.
pub fn load_config() -> Result<RelayConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfigFile, ConfigError> {
    load_config_with_overrides(path, &ConfigOverrides::new())
}

/// Load file, then environment, then CLI overrides, and validate the result
///
/// Validation runs once, after every layer, so an override can repair a
/// value that only the file got wrong.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or if the
/// final configuration fails validation.
pub fn load_config_with_overrides(
    path: Option<PathBuf>,
    overrides: &ConfigOverrides,
) -> Result<RelayConfigFile, ConfigError> {
    assemble(path, |key| std::env::var(key).ok(), overrides)
}

fn assemble(
    path: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
    overrides: &ConfigOverrides,
) -> Result<RelayConfigFile, ConfigError> {
    let mut config = load_file(path)?;
    apply_env(&mut config, lookup)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Defaults overlaid with the TOML file at `path` (no environment)
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_file(path: Option<PathBuf>) -> Result<RelayConfigFile, ConfigError> {
    let mut config = RelayConfigFile::default();

    let Some(config_path) = path else {
        return Ok(config);
    };
    if !config_path.exists() {
        tracing::debug!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(config);
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;
    let toml_config: RelayToml = toml::from_str(&content)?;
    apply_toml_config(&mut config, &toml_config)?;
    config.config_file_path = Some(config_path.clone());
    config.source = ConfigSource::File;

    tracing::info!(path = %config_path.display(), "Loaded configuration from file");
    Ok(config)
}

fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("invalid bind address: {value}")))
}

fn apply_toml_config(config: &mut RelayConfigFile, toml: &RelayToml) -> Result<(), ConfigError> {
    // Server
    if let Some(addr) = &toml.server.bind_addr {
        config.bind_addr = parse_addr(addr)?;
    }
    if let Some(seed) = toml.server.seed_welcome {
        config.seed_welcome = seed;
    }

    // Stream
    if let Some(ms) = toml.stream.heartbeat_ms {
        config.stream.heartbeat_ms = ms;
    }
    if let Some(ms) = toml.stream.tool_status_delay_ms {
        config.stream.tool_status_delay_ms = ms;
    }
    if let Some(ms) = toml.stream.analyze_delay_ms {
        config.stream.analyze_delay_ms = ms;
    }
    if let Some(ms) = toml.stream.complete_delay_ms {
        config.stream.complete_delay_ms = ms;
    }
    if let Some(name) = &toml.stream.tool_name {
        config.stream.tool_name = name.clone();
    }

    // Duplex
    if let Some(ms) = toml.duplex.heartbeat_ms {
        config.duplex.heartbeat_ms = ms;
    }
    if let Some(enabled) = toml.duplex.heartbeat_enabled {
        config.duplex.heartbeat_enabled = enabled;
    }
    if let Some(ms) = toml.duplex.backoff_initial_ms {
        config.duplex.backoff.initial_ms = ms;
    }
    if let Some(ms) = toml.duplex.backoff_max_ms {
        config.duplex.backoff.max_ms = ms;
    }
    if let Some(ms) = toml.duplex.partial_delay_ms {
        config.tool_session.partial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.duplex.complete_delay_ms {
        config.tool_session.complete_delay = Duration::from_millis(ms);
    }

    // Rate limit
    if let Some(limit) = toml.rate_limit.limit {
        config.rate_limit.limit = limit;
    }
    if let Some(ms) = toml.rate_limit.refill_ms {
        config.rate_limit.refill_ms = ms;
    }
    if let Some(enabled) = toml.rate_limit.enabled {
        config.rate_limit.enabled = enabled;
    }
    if let Some(secs) = toml.rate_limit.idle_evict_secs {
        config.idle_evict = Duration::from_secs(secs);
    }
    Ok(())
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply `RELAY_*` overrides using `lookup` to read variables
///
/// Unparseable numeric values are ignored with a warning.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` for an unparseable bind address.
pub fn apply_env<F>(config: &mut RelayConfigFile, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    fn number<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
        let parsed = raw.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(var = key, value = raw, "Ignoring unparseable environment value");
        }
        parsed
    }

    if let Some(addr) = lookup("RELAY_BIND_ADDR") {
        config.bind_addr = parse_addr(addr.trim())?;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = lookup("RELAY_HEARTBEAT_MS").and_then(|v| number("RELAY_HEARTBEAT_MS", &v)) {
        config.stream.heartbeat_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(limit) = lookup("RELAY_RATE_LIMIT").and_then(|v| number("RELAY_RATE_LIMIT", &v)) {
        config.rate_limit.limit = limit;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        lookup("RELAY_RATE_REFILL_MS").and_then(|v| number("RELAY_RATE_REFILL_MS", &v))
    {
        config.rate_limit.refill_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = lookup("RELAY_RATE_LIMIT_ENABLED") {
        config.rate_limit.enabled = parse_flag(enabled.trim());
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        lookup("RELAY_BACKOFF_INITIAL_MS").and_then(|v| number("RELAY_BACKOFF_INITIAL_MS", &v))
    {
        config.duplex.backoff.initial_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        lookup("RELAY_BACKOFF_MAX_MS").and_then(|v| number("RELAY_BACKOFF_MAX_MS", &v))
    {
        config.duplex.backoff.max_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        lookup("RELAY_DUPLEX_HEARTBEAT_MS").and_then(|v| number("RELAY_DUPLEX_HEARTBEAT_MS", &v))
    {
        config.duplex.heartbeat_ms = ms;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied by [`load_config_with_overrides`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub bind_addr: Option<SocketAddr>,

    /// Stream heartbeat override (milliseconds)
    pub heartbeat_ms: Option<u64>,

    /// Rate limit capacity override
    pub rate_limit: Option<u32>,

    /// Disable rate limiting
    pub disable_rate_limit: bool,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Set stream heartbeat override
    #[must_use]
    pub fn with_heartbeat_ms(mut self, ms: u64) -> Self {
        self.heartbeat_ms = Some(ms);
        self
    }

    /// Set rate limit capacity override
    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Turn rate limiting off
    #[must_use]
    pub fn without_rate_limit(mut self) -> Self {
        self.disable_rate_limit = true;
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfigFile) {
        if self.bind_addr.is_some()
            || self.heartbeat_ms.is_some()
            || self.rate_limit.is_some()
            || self.disable_rate_limit
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(ms) = self.heartbeat_ms {
            config.stream.heartbeat_ms = ms;
        }
        if let Some(limit) = self.rate_limit {
            config.rate_limit.limit = limit;
        }
        if self.disable_rate_limit {
            config.rate_limit.enabled = false;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfigFile::default();

        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.stream.heartbeat_ms, 15_000);
        assert_eq!(config.duplex.heartbeat_ms, 25_000);
        assert_eq!(config.duplex.backoff.initial_ms, 500);
        assert_eq!(config.duplex.backoff.max_ms, 4000);
        assert_eq!(config.rate_limit.limit, 10);
        assert_eq!(config.rate_limit.refill_ms, 60_000);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("realtime-relay/relay.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[server]
bind_addr = "0.0.0.0:9000"
seed_welcome = false

[stream]
heartbeat_ms = 5000
tool_name = "code-executor"

[duplex]
backoff_initial_ms = 250
backoff_max_ms = 8000
partial_delay_ms = 100

[rate_limit]
limit = 3
refill_ms = 1000
idle_evict_secs = 30
"#,
        );

        let config = load_file(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert!(!config.seed_welcome);
        assert_eq!(config.stream.heartbeat_ms, 5000);
        assert_eq!(config.stream.tool_name, "code-executor");
        assert_eq!(config.duplex.backoff.initial_ms, 250);
        assert_eq!(config.duplex.backoff.max_ms, 8000);
        assert_eq!(config.tool_session.partial_delay, Duration::from_millis(100));
        assert_eq!(config.tool_session.complete_delay, Duration::from_millis(900));
        assert_eq!(config.rate_limit.limit, 3);
        assert_eq!(config.rate_limit.refill_ms, 1000);
        assert_eq!(config.idle_evict, Duration::from_secs(30));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let file = toml_file("[rate_limit]\nenabled = false\n");
        let config = load_file(Some(file.path().to_path_buf())).unwrap();

        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.limit, 10);
        assert_eq!(config.stream.heartbeat_ms, 15_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_file(Some(PathBuf::from("/nonexistent/relay.toml"))).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let file = toml_file("[server\nbind_addr = ");
        let result = load_file(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_bind_addr_is_error() {
        let file = toml_file("[server]\nbind_addr = \"not-an-address\"\n");
        let result = load_file(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides_toml() {
        let file = toml_file("[stream]\nheartbeat_ms = 5000\n\n[rate_limit]\nlimit = 3\n");
        let mut config = load_file(Some(file.path().to_path_buf())).unwrap();

        apply_env(
            &mut config,
            env(&[
                ("RELAY_HEARTBEAT_MS", "2000"),
                ("RELAY_BIND_ADDR", "127.0.0.1:7000"),
                ("RELAY_RATE_LIMIT_ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.stream.heartbeat_ms, 2000);
        assert_eq!(config.bind_addr.port(), 7000);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.limit, 3);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_env_ignores_unparseable_numbers() {
        let mut config = RelayConfigFile::default();
        apply_env(&mut config, env(&[("RELAY_RATE_LIMIT", "lots")])).unwrap();

        assert_eq!(config.rate_limit.limit, 10);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_env_backoff_and_duplex_heartbeat() {
        let mut config = RelayConfigFile::default();
        apply_env(
            &mut config,
            env(&[
                ("RELAY_BACKOFF_INITIAL_MS", "100"),
                ("RELAY_BACKOFF_MAX_MS", "1600"),
                ("RELAY_DUPLEX_HEARTBEAT_MS", "10000"),
                ("RELAY_RATE_REFILL_MS", "500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.duplex.backoff.initial_ms, 100);
        assert_eq!(config.duplex.backoff.max_ms, 1600);
        assert_eq!(config.duplex.heartbeat_ms, 10_000);
        assert_eq!(config.rate_limit.refill_ms, 500);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = RelayConfigFile::default();
        apply_env(&mut config, env(&[("RELAY_HEARTBEAT_MS", "2000")])).unwrap();

        ConfigOverrides::new()
            .with_heartbeat_ms(1000)
            .without_rate_limit()
            .apply(&mut config);

        assert_eq!(config.stream.heartbeat_ms, 1000);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = RelayConfigFile::default();
        ConfigOverrides::default().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let file = toml_file("[rate_limit]\nlimit = 0\n");
        let path = Some(file.path().to_path_buf());

        let rejected = assemble(path.clone(), env(&[]), &ConfigOverrides::new());
        assert!(matches!(rejected, Err(ConfigError::ValidationError(_))));

        let config = assemble(path, env(&[]), &ConfigOverrides::new().with_rate_limit(5)).unwrap();
        assert_eq!(config.rate_limit.limit, 5);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = RelayConfigFile::default();
        config.duplex.backoff.initial_ms = 5000;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_zero_limit() {
        let mut config = RelayConfigFile::default();
        config.rate_limit.limit = 0;
        assert!(config.validate().is_err());

        config.rate_limit.enabled = false;
        assert!(config.validate().is_ok());
    }
}
