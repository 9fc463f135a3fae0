//! WebSocket configuration.
//!
//! Provides configuration options for the WebSocket client.

use url::Url;

use super::error::WsError;

/// Default WebSocket URL.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default capacity of the inbound event buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// WebSocket configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL.
    pub url: String,

    /// Credential sent as the `token` query parameter.
    pub token: String,

    /// Whether server liveness probes are answered automatically.
    pub ack_probes: bool,

    /// Capacity of the inbound event buffer.
    pub event_buffer: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            token: String::new(),
            ack_probes: true,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl WsConfig {
    /// Creates a new configuration with the given URL and token.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Sets whether liveness probes are acknowledged automatically.
    #[must_use]
    pub fn with_ack_probes(mut self, ack_probes: bool) -> Self {
        self.ack_probes = ack_probes;
        self
    }

    /// Sets the inbound event buffer capacity.
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Returns the connection URL with the token appended as a query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidConfig`] if the URL cannot be parsed.
    pub fn connection_url(&self) -> Result<String, WsError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| WsError::InvalidConfig(format!("invalid url: {e}")))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url.into())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), WsError> {
        if self.url.is_empty() {
            return Err(WsError::InvalidConfig(
                "url cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(WsError::InvalidConfig(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(WsError::InvalidConfig(
                "event_buffer must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WsConfig::default();
        assert_eq!(config.url, DEFAULT_WS_URL);
        assert!(config.ack_probes);
        assert_eq!(config.event_buffer, DEFAULT_EVENT_BUFFER);
    }

    #[test]
    fn test_config_builder() {
        let config = WsConfig::new("ws://localhost:9000/ws", "tok")
            .with_ack_probes(false)
            .with_event_buffer(8);

        assert_eq!(config.url, "ws://localhost:9000/ws");
        assert_eq!(config.token, "tok");
        assert!(!config.ack_probes);
        assert_eq!(config.event_buffer, 8);
    }

    #[test]
    fn test_config_connection_url() {
        let config = WsConfig::new("ws://localhost:9000/ws", "abc");
        assert_eq!(
            config.connection_url().expect("url"),
            "ws://localhost:9000/ws?token=abc"
        );
    }

    #[test]
    fn test_config_connection_url_with_existing_params() {
        let config = WsConfig::new("ws://localhost:9000/ws?v=1", "abc");
        assert_eq!(
            config.connection_url().expect("url"),
            "ws://localhost:9000/ws?v=1&token=abc"
        );
    }

    #[test]
    fn test_config_connection_url_encodes_token() {
        let config = WsConfig::new("ws://localhost:9000/ws", "a&b+c%d#e f");
        let url = config.connection_url().expect("url");
        assert_eq!(url, "ws://localhost:9000/ws?token=a%26b%2Bc%25d%23e+f");

        let parsed = Url::parse(&url).expect("parse");
        let token = parsed
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned());
        assert_eq!(token.as_deref(), Some("a&b+c%d#e f"));
    }

    #[test]
    fn test_config_connection_url_rejects_garbage() {
        let config = WsConfig::new("ws://", "abc");
        assert!(matches!(
            config.connection_url(),
            Err(WsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_validate() {
        tokio_test::assert_ok!(WsConfig::new("wss://example.com/ws", "t").validate());
        tokio_test::assert_err!(WsConfig::new("", "t").validate());
        tokio_test::assert_err!(WsConfig::new("https://example.com/ws", "t").validate());
        tokio_test::assert_err!(WsConfig::new("ws://example.com/ws", "t")
            .with_event_buffer(0)
            .validate());
    }
}
