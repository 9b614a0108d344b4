//! CDP WebSocket connection implementation
//!
//! One connection per DevTools endpoint. A reader task owns the receiving half
//! of the socket: responses are matched to pending commands by id, everything
//! else is broadcast to event subscribers.

use super::types::*;
use crate::{Error, Result};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, PendingCommand>>>;

/// CDP timeout configuration
#[derive(Debug, Clone)]
struct CdpTimeoutConfig {
    /// Default timeout for most commands
    default_timeout: Duration,
    /// Timeout for screenshot commands
    screenshot_timeout: Duration,
    /// Timeout for page navigation commands
    navigation_timeout: Duration,
}

impl Default for CdpTimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            screenshot_timeout: Duration::from_secs(90),
            navigation_timeout: Duration::from_secs(60),
        }
    }
}

impl CdpTimeoutConfig {
    /// Get timeout duration for a specific command method
    fn for_command(&self, method: &str) -> Duration {
        match method {
            "Page.captureScreenshot" => self.screenshot_timeout,
            "Page.navigate" | "Page.reload" => self.navigation_timeout,
            _ => self.default_timeout,
        }
    }
}

/// Pending command response
#[derive(Debug)]
struct PendingCommand {
    /// Response channel sender
    sender: oneshot::Sender<Result<Value>>,
    /// Command method (for logging)
    method: String,
}

/// CDP WebSocket connection
#[derive(Debug)]
pub struct CdpConnection {
    /// WebSocket URL
    url: String,
    /// Sending half of the socket
    sink: Mutex<SplitSink<WsStream, Message>>,
    /// Next command ID
    next_id: AtomicU64,
    /// Pending commands (ID -> response sender)
    pending: PendingMap,
    /// Event fan-out
    events: broadcast::Sender<CdpEvent>,
    /// Is connection active
    is_active: Arc<AtomicBool>,
    /// Timeout configuration
    timeout_config: CdpTimeoutConfig,
    /// Reader task
    reader: JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a DevTools WebSocket endpoint
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (e.g., "ws://localhost:9222/devtools/page/ABC123")
    pub async fn connect<S: Into<String>>(url: S) -> Result<Arc<Self>> {
        let url = url.into();
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::websocket(format!("Failed to connect to {}: {}", url, e)))?;
        let (sink, mut stream) = ws_stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(1024);
        let is_active = Arc::new(AtomicBool::new(true));

        let reader = {
            let pending = Arc::clone(&pending);
            let events = events.clone();
            let is_active = Arc::clone(&is_active);
            let url = url.clone();

            tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => route_message(&text, &pending, &events).await,
                        Ok(Message::Close(_)) => {
                            info!("WebSocket close frame received from {}", url);
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("WebSocket error on {}: {}", url, e);
                            break;
                        }
                    }
                }

                is_active.store(false, Ordering::SeqCst);
                let orphaned: Vec<_> = pending.lock().await.drain().collect();
                for (id, command) in orphaned {
                    warn!("Connection closed with command {} ({}) in flight", id, command.method);
                    let _ = command
                        .sender
                        .send(Err(Error::websocket("connection closed before response")));
                }
                debug!("Reader task for {} exited", url);
            })
        };

        info!("WebSocket connection established");

        Ok(Arc::new(Self {
            url,
            sink: Mutex::new(sink),
            next_id: AtomicU64::new(1),
            pending,
            events,
            is_active,
            timeout_config: CdpTimeoutConfig::default(),
            reader,
        }))
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if connection is active
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    /// Subscribe to protocol events
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Send a CDP command and wait for its result
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_active() {
            return Err(Error::websocket("Connection is not active"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params: if params.is_null() { None } else { Some(params) },
            session_id: None,
        };
        let json = serde_json::to_string(&request)
            .map_err(|e| Error::cdp(format!("Failed to serialize request: {}", e)))?;

        debug!("Sending CDP command {}: {}", id, method);

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingCommand {
                sender,
                method: method.to_string(),
            },
        );

        let sent = self.sink.lock().await.send(Message::Text(json)).await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(Error::websocket(format!("Failed to send message: {}", e)));
        }

        let timeout = self.timeout_config.for_command(method);
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::websocket(format!("Command {} response channel closed", id))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::timeout(format!("Command {} ({}) timed out after {:?}", id, method, timeout)))
            }
        }
    }

    /// Close the connection
    pub async fn close(&self) -> Result<()> {
        info!("Closing CDP WebSocket connection to {}", self.url);

        self.is_active.store(false, Ordering::SeqCst);
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| Error::websocket(format!("Failed to close WebSocket: {}", e)))
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Dispatch one incoming text frame
async fn route_message(text: &str, pending: &PendingMap, events: &broadcast::Sender<CdpEvent>) {
    if let Ok(response) = serde_json::from_str::<CdpRpcResponse>(text) {
        let Some(command) = pending.lock().await.remove(&response.id) else {
            warn!("Received response for unknown command ID: {}", response.id);
            return;
        };

        let outcome = match response.error {
            Some(err) => Err(Error::cdp(format!(
                "{} failed: {} (code: {}{})",
                command.method,
                err.message,
                err.code,
                err.data.map(|d| format!(", data: {}", d)).unwrap_or_default()
            ))),
            None => Ok(response.result),
        };
        let _ = command.sender.send(outcome);
        return;
    }

    if let Ok(notification) = serde_json::from_str::<CdpNotification>(text) {
        debug!("Received event: {}", notification.method);
        let _ = events.send(CdpEvent {
            method: notification.method,
            params: notification.params,
        });
        return;
    }

    warn!("Unknown message format: {}", text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timeout_per_method() {
        let config = CdpTimeoutConfig::default();
        assert_eq!(config.for_command("Page.captureScreenshot"), Duration::from_secs(90));
        assert_eq!(config.for_command("Page.navigate"), Duration::from_secs(60));
        assert_eq!(config.for_command("Runtime.evaluate"), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_route_response_to_pending_command() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(8);
        let (sender, receiver) = oneshot::channel();
        pending.lock().await.insert(
            7,
            PendingCommand {
                sender,
                method: "Runtime.evaluate".to_string(),
            },
        );

        route_message(r#"{"id":7,"result":{"ok":true}}"#, &pending, &events).await;

        assert_eq!(receiver.await.unwrap().unwrap(), json!({"ok": true}));
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_route_error_response() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(8);
        let (sender, receiver) = oneshot::channel();
        pending.lock().await.insert(
            1,
            PendingCommand {
                sender,
                method: "Page.navigate".to_string(),
            },
        );

        route_message(
            r#"{"id":1,"error":{"code":-32000,"message":"Cannot navigate to invalid URL"}}"#,
            &pending,
            &events,
        )
        .await;

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cdp(msg) if msg.contains("Cannot navigate")));
    }

    #[tokio::test]
    async fn test_route_event() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, mut receiver) = broadcast::channel(8);

        route_message(
            r#"{"method":"Page.loadEventFired","params":{"timestamp":1.5}}"#,
            &pending,
            &events,
        )
        .await;

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.method, "Page.loadEventFired");
        assert_eq!(event.params["timestamp"], json!(1.5));
    }
}
