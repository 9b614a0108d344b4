//! Session facade
//!
//! Composes one host window with its lifecycle tracker, evaluation bridge,
//! navigation controller and wait engine.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bridge::{ConsoleMessage, EvalBridge};
use super::lifecycle::{LifecycleRecord, LifecycleTracker};
use super::navigation::{NavigationController, NavigationWait};
use super::script::{CLICK_ELEMENT, FOCUS_ELEMENT, OUTER_HTML};
use super::wait::{WaitEngine, WaitRequest, WaitTarget};
use crate::config::{HeaderMap, SessionOptions};
use crate::host::{HostEvent, HostFactory, HostWindow, ImageFormat, KeyInput, Rect};
use crate::{Error, Result};

/// JPEG quality used when a screenshot is written to disk
pub const SCREENSHOT_JPEG_QUALITY: u8 = 50;

type WindowSlot = Arc<RwLock<Option<Arc<dyn HostWindow>>>>;

/// Outcome of [`Session::screenshot`]
#[derive(Debug, Clone, PartialEq)]
pub enum Screenshot {
    /// JPEG written to this path
    Saved(PathBuf),
    /// PNG image bytes
    Image(Bytes),
}

/// One controlled browser page
#[derive(Debug)]
pub struct Session {
    id: String,
    options: SessionOptions,
    window: WindowSlot,
    lifecycle: Arc<LifecycleTracker>,
    bridge: Arc<EvalBridge>,
    navigator: NavigationController,
    waiter: WaitEngine,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Open a window on `factory` and start tracking it
    ///
    /// The factory must already be ready; [`crate::Runtime::create`] takes
    /// care of that.
    pub async fn open(factory: &dyn HostFactory, options: SessionOptions) -> Result<Self> {
        options.wait.validate()?;
        let id = Uuid::new_v4().simple().to_string();
        let partition = options.window.partition.clone().unwrap_or_else(|| id.clone());

        let window = factory.open_window(&partition, &options.window).await?;
        let lifecycle = Arc::new(LifecycleTracker::new());
        let bridge = Arc::new(EvalBridge::new(id.clone()));
        let slot: WindowSlot = Arc::new(RwLock::new(Some(window.clone())));

        let pump = spawn_event_pump(
            id.clone(),
            window.subscribe_events(),
            lifecycle.clone(),
            bridge.clone(),
            slot.clone(),
        );
        let router = bridge.attach(window.subscribe_messages());

        info!(session = %id, window = window.id(), partition = %partition, "session opened");

        Ok(Self {
            navigator: NavigationController::new(options.headers.clone()),
            waiter: WaitEngine::new(options.wait),
            id,
            options,
            window: slot,
            lifecycle,
            bridge,
            tasks: vec![pump, router],
        })
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Copy of the current lifecycle record
    pub fn lifecycle(&self) -> LifecycleRecord {
        self.lifecycle.snapshot()
    }

    /// Subscribe to page console output produced by evaluations
    pub fn console(&self) -> broadcast::Receiver<ConsoleMessage> {
        self.bridge.console()
    }

    /// Whether the window is still open
    pub async fn is_open(&self) -> bool {
        self.window.read().await.is_some()
    }

    /// Navigate and wait for the load event
    pub async fn goto(&self, url: &str) -> Result<&Self> {
        self.goto_with(url, None, NavigationWait::default()).await
    }

    /// Navigate with extra headers and a chosen completion event
    pub async fn goto_with(
        &self,
        url: &str,
        headers: Option<&HeaderMap>,
        wait: NavigationWait,
    ) -> Result<&Self> {
        let window = self.window().await?;
        self.navigator.goto(window.as_ref(), url, headers, wait).await?;
        Ok(self)
    }

    /// Run `function(...args)` in the page
    pub async fn evaluate(&self, function: &str, args: Vec<Value>) -> Result<Value> {
        let window = self.window().await?;
        self.bridge.evaluate(window.as_ref(), function, args).await
    }

    /// Run `function(...args)` and deserialize its result
    pub async fn evaluate_as<T: DeserializeOwned>(&self, function: &str, args: Vec<Value>) -> Result<T> {
        let value = self.evaluate(function, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Wait for a delay, predicate, lifecycle milestone or selector
    pub async fn wait(&self, request: impl Into<WaitRequest>) -> Result<&Self> {
        self.window().await?;
        self.waiter.wait(request.into(), self).await?;
        Ok(self)
    }

    /// Serialized page markup
    pub async fn content(&self) -> Result<String> {
        self.evaluate_as(OUTER_HTML, Vec::new()).await
    }

    /// Current page URL
    pub async fn url(&self) -> Result<String> {
        self.window().await?.url().await
    }

    /// Current user agent
    pub async fn user_agent(&self) -> Result<String> {
        self.window().await?.user_agent().await
    }

    /// Override the user agent for subsequent requests
    pub async fn set_user_agent(&self, agent: &str) -> Result<&Self> {
        self.window().await?.set_user_agent(agent).await?;
        Ok(self)
    }

    /// Capture the page
    ///
    /// With a path the capture is written there as JPEG; without one the PNG
    /// bytes are returned. Unlike the other actions this does not return
    /// `&Self`, so a chain continues from the session after the call.
    pub async fn screenshot(&self, path: Option<&Path>, rect: Option<Rect>) -> Result<Screenshot> {
        let window = self.window().await?;

        match path {
            Some(path) => {
                let image = window
                    .capture(rect, ImageFormat::Jpeg(SCREENSHOT_JPEG_QUALITY))
                    .await?;
                debug!(session = %self.id, bytes = image.len(), "screenshot captured");
                tokio::fs::write(path, &image).await?;
                Ok(Screenshot::Saved(path.to_path_buf()))
            }
            None => Ok(Screenshot::Image(window.capture(rect, ImageFormat::Png).await?)),
        }
    }

    /// Focus `selector` and type `text` one key at a time
    pub async fn type_text(&self, selector: &str, text: &str, delay: Option<Duration>) -> Result<&Self> {
        self.evaluate(FOCUS_ELEMENT, vec![Value::String(selector.to_string())])
            .await?;

        let window = self.window().await?;
        for c in text.chars() {
            window.send_key(&KeyInput::for_char(c)).await?;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(self)
    }

    /// Click the element matching `selector`
    pub async fn click(&self, selector: &str) -> Result<Value> {
        self.evaluate(CLICK_ELEMENT, vec![Value::String(selector.to_string())])
            .await
    }

    /// Destroy the window and wait until the host confirms it is gone
    ///
    /// Pending evaluations fail whether or not the host managed to close the
    /// window. If closing fails the window stays attached so `end` can be
    /// retried; once it succeeds, calling `end` again is a no-op.
    pub async fn end(&self) -> Result<()> {
        let mut slot = self.window.write().await;
        let Some(window) = slot.take() else {
            return Ok(());
        };

        let mut events = window.subscribe_events();
        if let Err(e) = window.close().await {
            warn!(session = %self.id, error = %e, "failed to close window");
            *slot = Some(window);
            self.bridge.abandon_all();
            return Err(e);
        }
        drop(slot);

        loop {
            match events.recv().await {
                Ok(HostEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }

        self.bridge.abandon_all();
        info!(session = %self.id, "session ended");
        Ok(())
    }

    async fn window(&self) -> Result<Arc<dyn HostWindow>> {
        self.window
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::session_closed(self.id.clone()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl WaitTarget for Session {
    fn lifecycle(&self) -> LifecycleRecord {
        self.lifecycle.snapshot()
    }

    async fn evaluate(&self, function: &str, args: Vec<Value>) -> Result<Value> {
        Session::evaluate(self, function, args).await
    }
}

fn spawn_event_pump(
    session: String,
    events: broadcast::Receiver<HostEvent>,
    lifecycle: Arc<LifecycleTracker>,
    bridge: Arc<EvalBridge>,
    window: WindowSlot,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = BroadcastStream::new(events);
        while let Some(item) = stream.next().await {
            match item {
                Ok(HostEvent::Closed) => {
                    debug!(session = %session, "window closed");
                    window.write().await.take();
                    bridge.abandon_all();
                    break;
                }
                Ok(event) => lifecycle.apply(&event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(session = %session, skipped, "host event stream lagged");
                }
            }
        }
    })
}
