//! Worker configuration.
//!
//! Provides configuration options for one connection-serving worker and the
//! helpers used to read them from the environment.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default WebSocket upgrade path.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Path of the JSON health snapshot.
pub const HEALTH_PATH: &str = "/health";

/// Path of the flat metrics exposition.
pub const METRICS_PATH: &str = "/metrics";

/// Identity provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Verify tokens against an HTTP endpoint.
    Http {
        /// Verification endpoint; the token is sent as a bearer credential.
        verify_url: String,
        /// Request timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Fixed token to user mapping.
    Static {
        /// Token to user id.
        tokens: BTreeMap<String, String>,
    },
}

impl AuthConfig {
    /// Parses a `token:user,token:user` list into a static configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is not a non-empty `token:user` pair.
    pub fn parse_static(list: &str) -> Result<Self, ConfigError> {
        let mut tokens = BTreeMap::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, user) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidAuthToken(entry.to_string()))?;
            let (token, user) = (token.trim(), user.trim());
            if token.is_empty() || user.is_empty() {
                return Err(ConfigError::InvalidAuthToken(entry.to_string()));
            }
            tokens.insert(token.to_string(), user.to_string());
        }
        Ok(Self::Static { tokens })
    }
}

/// Configuration for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host.
    pub host: String,

    /// Listen port (0 picks an ephemeral port).
    pub port: u16,

    /// WebSocket upgrade path.
    pub ws_path: String,

    /// Liveness sweep interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Outbound queue capacity per connection.
    pub send_buffer: usize,

    /// Whether `/health` and `/metrics` are served.
    pub health_check_enabled: bool,

    /// Whether periodic stats are logged and reported.
    pub monitoring_enabled: bool,

    /// Stats reporting interval in milliseconds.
    pub stats_interval_ms: u64,

    /// Identity provider.
    pub auth: Option<AuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: DEFAULT_WS_PATH.to_string(),
            heartbeat_interval_ms: 30_000,
            send_buffer: 256,
            health_check_enabled: true,
            monitoring_enabled: true,
            stats_interval_ms: 60_000,
            auth: None,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration listening on the given address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Sets the identity provider.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    /// Sets the per-connection outbound queue capacity.
    #[must_use]
    pub fn with_send_buffer(mut self, capacity: usize) -> Self {
        self.send_buffer = capacity;
        self
    }

    /// Enables or disables the health routes.
    #[must_use]
    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check_enabled = enabled;
        self
    }

    /// Enables or disables periodic stats.
    #[must_use]
    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitoring_enabled = enabled;
        self
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Returns the stats interval.
    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let auth = match (lookup("PULSECAST_AUTH_URL"), lookup("PULSECAST_AUTH_TOKENS")) {
            (Some(verify_url), _) => Some(AuthConfig::Http {
                verify_url,
                timeout_ms: env_value(&lookup, "PULSECAST_AUTH_TIMEOUT_MS", 5_000)?,
            }),
            (None, Some(list)) => Some(AuthConfig::parse_static(&list)?),
            (None, None) => None,
        };

        let config = Self {
            host: lookup("PULSECAST_HOST").unwrap_or(defaults.host),
            port: env_value(&lookup, "PULSECAST_PORT", defaults.port)?,
            ws_path: lookup("PULSECAST_WS_PATH").unwrap_or(defaults.ws_path),
            heartbeat_interval_ms: env_value(
                &lookup,
                "PULSECAST_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval_ms,
            )?,
            send_buffer: env_value(&lookup, "PULSECAST_SEND_BUFFER", defaults.send_buffer)?,
            health_check_enabled: env_flag(
                &lookup,
                "PULSECAST_HEALTH_CHECK_ENABLED",
                defaults.health_check_enabled,
            )?,
            monitoring_enabled: env_flag(
                &lookup,
                "PULSECAST_MONITORING_ENABLED",
                defaults.monitoring_enabled,
            )?,
            stats_interval_ms: env_value(
                &lookup,
                "PULSECAST_STATS_INTERVAL_MS",
                defaults.stats_interval_ms,
            )?,
            auth,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration, including the identity provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_listener()?;

        match &self.auth {
            None => Err(ConfigError::MissingAuth),
            Some(AuthConfig::Http {
                verify_url,
                timeout_ms,
            }) => {
                if !verify_url.starts_with("http://") && !verify_url.starts_with("https://") {
                    return Err(ConfigError::InvalidAuthUrl(verify_url.clone()));
                }
                if *timeout_ms == 0 {
                    return Err(ConfigError::InvalidAuthTimeout);
                }
                Ok(())
            }
            Some(AuthConfig::Static { tokens }) if tokens.is_empty() => Err(ConfigError::MissingAuth),
            Some(AuthConfig::Static { .. }) => Ok(()),
        }
    }

    /// Validates everything except the identity provider.
    ///
    /// # Errors
    ///
    /// Returns an error if an interval, buffer or path is invalid.
    pub fn validate_listener(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidHeartbeatInterval);
        }

        if self.stats_interval_ms == 0 {
            return Err(ConfigError::InvalidStatsInterval);
        }

        if self.send_buffer == 0 {
            return Err(ConfigError::InvalidSendBuffer);
        }

        if !self.ws_path.starts_with('/')
            || self.ws_path == HEALTH_PATH
            || self.ws_path == METRICS_PATH
        {
            return Err(ConfigError::InvalidWsPath(self.ws_path.clone()));
        }

        Ok(())
    }
}

/// Reads and parses `key`, returning `default` when it is unset.
///
/// # Errors
///
/// Returns an error if the variable is set but does not parse.
pub fn env_value<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

/// Reads a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`).
///
/// # Errors
///
/// Returns an error if the variable is set to anything else.
pub fn env_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// No identity provider configured.
    #[error("no identity provider configured (set PULSECAST_AUTH_URL or PULSECAST_AUTH_TOKENS)")]
    MissingAuth,

    /// Malformed static token entry.
    #[error("invalid auth token entry: {0:?}")]
    InvalidAuthToken(String),

    /// Verification URL is not http(s).
    #[error("invalid auth url: {0}")]
    InvalidAuthUrl(String),

    /// Zero verification timeout.
    #[error("auth timeout must be > 0")]
    InvalidAuthTimeout,

    /// Zero heartbeat interval.
    #[error("heartbeat_interval_ms must be > 0")]
    InvalidHeartbeatInterval,

    /// Zero stats interval.
    #[error("stats_interval_ms must be > 0")]
    InvalidStatsInterval,

    /// Zero send buffer.
    #[error("send_buffer must be > 0")]
    InvalidSendBuffer,

    /// Upgrade path is relative or collides with an operational route.
    #[error("invalid websocket path: {0}")]
    InvalidWsPath(String),

    /// Zero worker count.
    #[error("worker count must be > 0")]
    InvalidWorkerCount,

    /// Zero shutdown timeout.
    #[error("shutdown_timeout_ms must be > 0")]
    InvalidShutdownTimeout,
}
