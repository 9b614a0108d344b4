//! Mock host implementation for testing
//!
//! `MockHost` stands in for a browser engine. It cannot run JavaScript, so a
//! responder closure decides what each injected script "returns"; navigation
//! outcomes are scripted per host and events can also be injected by hand.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, watch};

use super::traits::*;
use crate::config::{HeaderMap, WindowOptions};
use crate::error::ScriptError;
use crate::session::script::{ChannelKind, InjectedScript};
use crate::Error;

const MOCK_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Pagewire/Mock";

// Minimal 1x1 PNG image
const MOCK_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90,
    0x77, 0x53, 0xDE,
];
const MOCK_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

/// What the mock page does with one injected script
#[derive(Debug, Clone, PartialEq)]
pub enum PageReply {
    /// Reply on the response channel
    Return(Value),
    /// Reply on the error channel
    Throw(ScriptError),
    /// Emit console lines, then reply as `then`
    Logged {
        lines: Vec<String>,
        then: Box<PageReply>,
    },
    /// Never reply
    Silent,
}

impl PageReply {
    /// An `Error` thrown with `message`
    pub fn throw<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        PageReply::Throw(ScriptError {
            stack: Some(format!("Error: {}\n    at <anonymous>:1:1", message)),
            message,
            name: "Error".to_string(),
        })
    }
}

/// Decides the reply for `(function source, args)`
pub type Responder = Arc<dyn Fn(&str, &[Value]) -> PageReply + Send + Sync>;

/// Scripted outcome of `load_url`
#[derive(Debug, Clone, PartialEq)]
pub enum MockNavigation {
    /// Emit start, dom-ready and finish-load
    Succeed,
    /// Emit start, then fail-load with the given code
    Fail { code: i32, description: String },
    /// Emit nothing; the test drives events with [`MockWindow::emit`]
    Manual,
}

#[derive(Debug)]
struct MockWindowState {
    url: String,
    user_agent: String,
    navigation: MockNavigation,
    navigations: Vec<(String, HeaderMap)>,
    scripts: Vec<InjectedScript>,
    keys: Vec<KeyInput>,
    close_failure: Option<String>,
    closed: bool,
}

/// Mock host window
pub struct MockWindow {
    id: String,
    partition: String,
    events: broadcast::Sender<HostEvent>,
    messages: broadcast::Sender<PageMessage>,
    responder: RwLock<Responder>,
    state: Mutex<MockWindowState>,
}

impl std::fmt::Debug for MockWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWindow")
            .field("id", &self.id)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

impl MockWindow {
    /// Create a mock window that returns `null` for every script
    pub fn new<S: Into<String>>(partition: S) -> Self {
        let (events, _) = broadcast::channel(256);
        let (messages, _) = broadcast::channel(256);
        let responder: Responder = Arc::new(|_: &str, _: &[Value]| PageReply::Return(Value::Null));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            partition: partition.into(),
            events,
            messages,
            responder: RwLock::new(responder),
            state: Mutex::new(MockWindowState {
                url: "about:blank".to_string(),
                user_agent: MOCK_USER_AGENT.to_string(),
                navigation: MockNavigation::Succeed,
                navigations: Vec::new(),
                scripts: Vec::new(),
                keys: Vec::new(),
                close_failure: None,
                closed: false,
            }),
        }
    }

    /// Storage partition this window was opened in
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Replace the script responder
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &[Value]) -> PageReply + Send + Sync + 'static,
    {
        self.replace_responder(Arc::new(responder));
    }

    fn replace_responder(&self, responder: Responder) {
        if let Ok(mut slot) = self.responder.write() {
            *slot = responder;
        }
    }

    /// Replace the scripted navigation outcome
    pub fn set_navigation(&self, navigation: MockNavigation) {
        self.with_state(|state| state.navigation = navigation);
    }

    /// Emit a host event
    pub fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    /// Send a message from the page context
    pub fn post<S: Into<String>>(&self, channel: S, args: Vec<Value>) {
        let _ = self.messages.send(PageMessage {
            channel: channel.into(),
            args,
        });
    }

    /// Deliver `reply` for a script under `prefix`
    pub fn reply(&self, prefix: &str, reply: PageReply) {
        match reply {
            PageReply::Return(value) => self.post(ChannelKind::Response.channel(prefix), vec![value]),
            PageReply::Throw(err) => self.post(
                ChannelKind::Error.channel(prefix),
                vec![
                    Value::String(err.message),
                    Value::String(err.name),
                    err.stack.map(Value::String).unwrap_or(Value::Null),
                ],
            ),
            PageReply::Logged { lines, then } => {
                let lines = lines.into_iter().map(Value::String).collect();
                self.post(ChannelKind::Log.channel(prefix), vec![Value::Array(lines)]);
                self.reply(prefix, *then);
            }
            PageReply::Silent => {}
        }
    }

    /// URLs (and headers) passed to `load_url`, oldest first
    pub fn navigations(&self) -> Vec<(String, HeaderMap)> {
        self.with_state(|state| state.navigations.clone())
    }

    /// Scripts submitted so far
    pub fn scripts(&self) -> Vec<InjectedScript> {
        self.with_state(|state| state.scripts.clone())
    }

    /// Keys dispatched so far
    pub fn keys(&self) -> Vec<KeyInput> {
        self.with_state(|state| state.keys.clone())
    }

    /// Make `close` fail with `reason` until cleared with `None`
    pub fn fail_close(&self, reason: Option<&str>) {
        self.with_state(|state| state.close_failure = reason.map(str::to_string));
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.with_state(|state| state.closed)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockWindowState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::session_closed(format!("mock window {} is closed", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl HostWindow for MockWindow {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<PageMessage> {
        self.messages.subscribe()
    }

    async fn load_url(&self, url: &str, headers: &HeaderMap) -> Result<(), Error> {
        self.ensure_open()?;

        let navigation = self.with_state(|state| {
            state.navigations.push((url.to_string(), headers.clone()));
            state.url = url.to_string();
            state.navigation.clone()
        });

        match navigation {
            MockNavigation::Succeed => {
                self.emit(HostEvent::NavigationStarted { url: Some(url.to_string()) });
                self.emit(HostEvent::DomReady);
                self.emit(HostEvent::FinishLoad);
            }
            MockNavigation::Fail { code, description } => {
                self.emit(HostEvent::NavigationStarted { url: Some(url.to_string()) });
                self.emit(HostEvent::FailLoad {
                    code,
                    description,
                    url: Some(url.to_string()),
                });
            }
            MockNavigation::Manual => {}
        }

        Ok(())
    }

    async fn execute_script(&self, script: &InjectedScript) -> Result<(), Error> {
        self.ensure_open()?;
        self.with_state(|state| state.scripts.push(script.clone()));

        let responder = self
            .responder
            .read()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .clone();
        let reply = responder(script.function(), script.args());
        self.reply(script.prefix(), reply);
        Ok(())
    }

    async fn capture(&self, _rect: Option<Rect>, format: ImageFormat) -> Result<Bytes, Error> {
        self.ensure_open()?;
        Ok(match format {
            ImageFormat::Png => Bytes::from_static(MOCK_PNG),
            ImageFormat::Jpeg(_) => Bytes::from_static(MOCK_JPEG),
        })
    }

    async fn url(&self) -> Result<String, Error> {
        self.ensure_open()?;
        Ok(self.with_state(|state| state.url.clone()))
    }

    async fn user_agent(&self) -> Result<String, Error> {
        self.ensure_open()?;
        Ok(self.with_state(|state| state.user_agent.clone()))
    }

    async fn set_user_agent(&self, agent: &str) -> Result<(), Error> {
        self.ensure_open()?;
        self.with_state(|state| state.user_agent = agent.to_string());
        Ok(())
    }

    async fn send_key(&self, key: &KeyInput) -> Result<(), Error> {
        self.ensure_open()?;
        self.with_state(|state| state.keys.push(key.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if let Some(reason) = self.with_state(|state| state.close_failure.clone()) {
            return Err(Error::cdp(reason));
        }
        self.with_state(|state| state.closed = true);
        self.emit(HostEvent::Closed);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// Mock host engine
pub struct MockHost {
    readiness: watch::Sender<Readiness>,
    ready_calls: AtomicUsize,
    responder: Option<Responder>,
    navigation: MockNavigation,
    windows: Mutex<Vec<Arc<MockWindow>>>,
}

impl std::fmt::Debug for MockHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHost")
            .field("ready_calls", &self.ready_calls.load(Ordering::Relaxed))
            .field("navigation", &self.navigation)
            .finish_non_exhaustive()
    }
}

impl MockHost {
    /// A host that is ready immediately
    pub fn new() -> Self {
        Self::with_readiness(Readiness::Ready)
    }

    /// A host that becomes ready only after [`MockHost::open_gate`]
    pub fn gated() -> Self {
        Self::with_readiness(Readiness::Pending)
    }

    /// A host whose readiness check fails
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::with_readiness(Readiness::Failed(reason.into()))
    }

    fn with_readiness(readiness: Readiness) -> Self {
        let (readiness, _) = watch::channel(readiness);
        Self {
            readiness,
            ready_calls: AtomicUsize::new(0),
            responder: None,
            navigation: MockNavigation::Succeed,
            windows: Mutex::new(Vec::new()),
        }
    }

    /// Responder installed on every window this host opens
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> PageReply + Send + Sync + 'static,
    {
        let responder: Responder = Arc::new(responder);
        self.responder = Some(responder);
        self
    }

    /// Navigation outcome installed on every window this host opens
    pub fn with_navigation(mut self, navigation: MockNavigation) -> Self {
        self.navigation = navigation;
        self
    }

    /// Signal readiness
    pub fn open_gate(&self) {
        self.readiness.send_replace(Readiness::Ready);
    }

    /// How many times `ready` was awaited
    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    /// Windows opened so far
    pub fn windows(&self) -> Vec<Arc<MockWindow>> {
        self.windows
            .lock()
            .map(|windows| windows.clone())
            .unwrap_or_default()
    }

    /// Most recently opened window
    pub fn last_window(&self) -> Option<Arc<MockWindow>> {
        self.windows().pop()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostFactory for MockHost {
    async fn ready(&self) -> Result<(), Error> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);

        let mut readiness = self.readiness.subscribe();
        let state = readiness
            .wait_for(|state| *state != Readiness::Pending)
            .await
            .map_err(|e| Error::host_unavailable(e.to_string()))?
            .clone();

        match state {
            Readiness::Failed(reason) => Err(Error::host_unavailable(reason)),
            _ => Ok(()),
        }
    }

    async fn open_window(
        &self,
        partition: &str,
        options: &WindowOptions,
    ) -> Result<Arc<dyn HostWindow>, Error> {
        let window = Arc::new(MockWindow::new(partition));
        if let Some(responder) = &self.responder {
            window.replace_responder(responder.clone());
        }
        window.set_navigation(self.navigation.clone());
        if let Some(agent) = &options.user_agent {
            window.set_user_agent(agent).await?;
        }

        self.windows
            .lock()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .push(window.clone());

        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_navigation_succeeds() {
        let window = MockWindow::new("p");
        let mut events = window.subscribe_events();

        window.load_url("https://example.com", &HeaderMap::new()).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), HostEvent::NavigationStarted { .. }));
        assert_eq!(events.recv().await.unwrap(), HostEvent::DomReady);
        assert_eq!(events.recv().await.unwrap(), HostEvent::FinishLoad);
        assert_eq!(window.url().await.unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn test_mock_script_reply() {
        let window = MockWindow::new("p");
        window.set_responder(|_, args| PageReply::Return(args[0].clone()));
        let mut messages = window.subscribe_messages();

        let script = InjectedScript::new("s|1|", "function (x) { return x; }", vec![json!(5)]).unwrap();
        window.execute_script(&script).await.unwrap();

        let message = messages.recv().await.unwrap();
        assert_eq!(message.channel, "s|1|js:response");
        assert_eq!(message.args, vec![json!(5)]);
    }

    #[tokio::test]
    async fn test_mock_closed_window_rejects() {
        let window = MockWindow::new("p");
        window.close().await.unwrap();

        assert!(window.is_closed());
        assert!(matches!(window.url().await, Err(Error::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_mock_host_unavailable() {
        let host = MockHost::unavailable("no display");
        let result = host.ready().await;
        assert!(matches!(result, Err(Error::HostUnavailable(reason)) if reason == "no display"));
    }
}
