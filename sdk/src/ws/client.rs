//! WebSocket client implementation.
//!
//! Provides the client used to consume an insight stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::config::WsConfig;
use super::error::WsError;
use crate::protocol::{ClientMessage, ServerMessage, Topic};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Streaming client for one Pulsecast connection.
#[derive(Debug)]
pub struct PulseClient {
    config: WsConfig,
    sink: Arc<Mutex<WsSink>>,
    event_rx: Mutex<mpsc::Receiver<ServerMessage>>,
    connected: Arc<AtomicBool>,
}

impl PulseClient {
    /// Connects and authenticates with the configured token.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::Unauthorized`] if the server rejects the token, or
    /// another error if the configuration is invalid or the connection fails.
    pub async fn connect(config: WsConfig) -> Result<Self, WsError> {
        config.validate()?;

        let url = config.connection_url()?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (sink, source) = ws_stream.split();

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let client = Self {
            sink: Arc::new(Mutex::new(sink)),
            event_rx: Mutex::new(event_rx),
            connected: Arc::new(AtomicBool::new(true)),
            config,
        };
        client.spawn_reader(source, event_tx);

        Ok(client)
    }

    /// Spawns the message reader task.
    fn spawn_reader(&self, mut source: WsSource, event_tx: mpsc::Sender<ServerMessage>) {
        let sink = Arc::clone(&self.sink);
        let connected = Arc::clone(&self.connected);
        let ack_probes = self.config.ack_probes;

        tokio::spawn(async move {
            while let Some(result) = source.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        let msg = match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(msg) => msg,
                            Err(e) => {
                                debug!(error = %e, "ignoring unparseable server frame");
                                continue;
                            }
                        };

                        if ack_probes && matches!(msg, ServerMessage::Ping { .. }) {
                            if let Ok(json) = serde_json::to_string(&ClientMessage::Pong) {
                                let _ = sink.lock().await.send(Message::Text(json.into())).await;
                            }
                        }

                        if event_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            connected.store(false, Ordering::Relaxed);
        });
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Returns true until the server closes the connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Sends a message to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub async fn send(&self, msg: &ClientMessage) -> Result<(), WsError> {
        let json = serde_json::to_string(msg).map_err(|e| WsError::Serialization(e.to_string()))?;
        self.send_text(json).await
    }

    /// Sends a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), WsError> {
        let text: String = text.into();
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }

    /// Subscribes to the given topics.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn subscribe(&self, topics: &[Topic]) -> Result<(), WsError> {
        let names: Vec<&str> = topics.iter().map(Topic::as_str).collect();
        self.subscribe_names(&names).await
    }

    /// Subscribes by topic name, including names the server may not know.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn subscribe_names(&self, names: &[&str]) -> Result<(), WsError> {
        self.send(&ClientMessage::Subscribe {
            topics: names.iter().map(|name| (*name).to_string()).collect(),
        })
        .await
    }

    /// Unsubscribes from the given topics.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn unsubscribe(&self, topics: &[Topic]) -> Result<(), WsError> {
        self.send(&ClientMessage::Unsubscribe {
            topics: topics.iter().map(|topic| topic.as_str().to_string()).collect(),
        })
        .await
    }

    /// Sends a ping; the server answers with `pong`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn ping(&self) -> Result<(), WsError> {
        self.send(&ClientMessage::Ping).await
    }

    /// Requests the connection status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn get_status(&self) -> Result<(), WsError> {
        self.send(&ClientMessage::GetStatus).await
    }

    /// Returns the next frame from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub async fn next_event(&self) -> Result<ServerMessage, WsError> {
        self.event_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(WsError::Closed)
    }

    /// Returns the next frame matching `predicate`, discarding the others.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection closes first.
    pub async fn next_matching<F>(&self, mut predicate: F) -> Result<ServerMessage, WsError>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let msg = self.next_event().await?;
            if predicate(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Closes the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame cannot be written.
    pub async fn close(&self) -> Result<(), WsError> {
        self.connected.store(false, Ordering::Relaxed);
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }
}
