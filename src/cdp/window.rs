//! CDP-backed host window
//!
//! One page target in its own browser context. Protocol events are
//! translated into [`HostEvent`]s and page messages arrive through a
//! `Runtime.addBinding` binding called by the page-side bridge shim.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::connection::CdpConnection;
use super::types::*;
use crate::config::HeaderMap;
use crate::error::{ScriptError, ABORTED_LOAD_CODE};
use crate::host::{HostEvent, HostWindow, ImageFormat, KeyInput, PageMessage, Rect};
use crate::session::script::{InjectedScript, PAGE_BRIDGE};
use crate::{Error, Result};

/// Binding the bridge shim reports through
pub const BINDING_NAME: &str = "__pagewire_binding__";

/// Chromium net error code used when a name is not in the table
const GENERIC_NET_ERROR: i32 = -2;

static NET_ERRORS: phf::Map<&'static str, i32> = phf::phf_map! {
    "ERR_FAILED" => -2,
    "ERR_ABORTED" => -3,
    "ERR_TIMED_OUT" => -7,
    "ERR_BLOCKED_BY_CLIENT" => -20,
    "ERR_CONNECTION_CLOSED" => -100,
    "ERR_CONNECTION_RESET" => -101,
    "ERR_CONNECTION_REFUSED" => -102,
    "ERR_NAME_NOT_RESOLVED" => -105,
    "ERR_INTERNET_DISCONNECTED" => -106,
    "ERR_ADDRESS_UNREACHABLE" => -109,
    "ERR_CERT_AUTHORITY_INVALID" => -202,
    "ERR_TOO_MANY_REDIRECTS" => -310,
    "ERR_EMPTY_RESPONSE" => -324,
};

/// Numeric Chromium code for a net error name such as `net::ERR_ABORTED`
pub fn net_error_code(error_text: &str, canceled: bool) -> i32 {
    if canceled {
        return ABORTED_LOAD_CODE;
    }
    let name = error_text.trim().trim_start_matches("net::");
    NET_ERRORS.get(name).copied().unwrap_or(GENERIC_NET_ERROR)
}

/// Page-side shim installing the bridge global
pub fn bridge_shim() -> String {
    format!(
        r#"(function () {{
    if (window.{bridge}) {{ return; }}
    var binding = window.{binding};
    Object.defineProperty(window, '{bridge}', {{
        value: {{
            send: function (channel) {{
                var args = Array.prototype.slice.call(arguments, 1);
                binding(JSON.stringify({{ channel: channel, args: args }}));
            }}
        }},
        enumerable: false
    }});
}})()"#,
        bridge = PAGE_BRIDGE,
        binding = BINDING_NAME,
    )
}

/// Protocol event after translation
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    Host(HostEvent),
    Message(PageMessage),
}

/// Main-frame bookkeeping used to filter protocol events
#[derive(Debug, Default)]
pub struct FrameTracker {
    main_frame: Option<String>,
    document_request: Option<String>,
}

impl FrameTracker {
    pub fn new(main_frame: Option<String>) -> Self {
        Self {
            main_frame,
            document_request: None,
        }
    }

    fn is_main(&self, frame_id: Option<&str>) -> bool {
        match (&self.main_frame, frame_id) {
            (Some(main), Some(frame)) => main == frame,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    /// Translate one protocol event
    pub fn translate(&mut self, event: &CdpEvent) -> Option<Translated> {
        let params = &event.params;
        match event.method.as_str() {
            "Page.frameNavigated" => {
                let frame = &params["frame"];
                if frame.get("parentId").is_none() {
                    self.main_frame = frame["id"].as_str().map(str::to_string);
                }
                None
            }
            "Page.frameStartedLoading" => {
                let frame = params["frameId"].as_str();
                self.is_main(frame)
                    .then_some(Translated::Host(HostEvent::NavigationStarted { url: None }))
            }
            "Page.domContentEventFired" => Some(Translated::Host(HostEvent::DomReady)),
            "Page.loadEventFired" => Some(Translated::Host(HostEvent::FinishLoad)),
            "Network.requestWillBeSent" => {
                let request: RequestWillBeSent = serde_json::from_value(params.clone()).ok()?;
                if request.r#type.as_deref() == Some("Document") && self.is_main(request.frame_id.as_deref()) {
                    self.document_request = Some(request.request_id);
                }
                None
            }
            "Network.loadingFailed" => {
                let failed: LoadingFailed = serde_json::from_value(params.clone()).ok()?;
                if self.document_request.as_deref() != Some(failed.request_id.as_str()) {
                    return None;
                }
                self.document_request = None;
                Some(Translated::Host(HostEvent::FailLoad {
                    code: net_error_code(&failed.error_text, failed.canceled),
                    description: failed.error_text,
                    url: None,
                }))
            }
            "Runtime.bindingCalled" => {
                let called: BindingCalled = serde_json::from_value(params.clone()).ok()?;
                if called.name != BINDING_NAME {
                    return None;
                }
                match serde_json::from_str::<PageMessage>(&called.payload) {
                    Ok(message) => Some(Translated::Message(message)),
                    Err(e) => {
                        warn!("Malformed bridge payload: {}", e);
                        None
                    }
                }
            }
            "Inspector.detached" | "Inspector.targetCrashed" => Some(Translated::Host(HostEvent::Closed)),
            _ => None,
        }
    }
}

/// Host window over one CDP page target
#[derive(Debug)]
pub struct CdpWindow {
    target_id: String,
    browser_context_id: Option<String>,
    page: Arc<CdpConnection>,
    browser: Option<Arc<CdpConnection>>,
    events: broadcast::Sender<HostEvent>,
    messages: broadcast::Sender<PageMessage>,
    closed: AtomicBool,
    pump: JoinHandle<()>,
}

impl CdpWindow {
    /// Prepare a connected page target for use as a host window
    ///
    /// `browser` and `browser_context_id` are used on close to tear down the
    /// target and its context; without them only the page is closed.
    pub async fn attach(
        target_id: String,
        page: Arc<CdpConnection>,
        browser: Option<Arc<CdpConnection>>,
        browser_context_id: Option<String>,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(256);
        let (messages, _) = broadcast::channel(256);
        let tracker = Arc::new(Mutex::new(FrameTracker::default()));

        let pump = spawn_translator(
            target_id.clone(),
            page.subscribe(),
            tracker.clone(),
            events.clone(),
            messages.clone(),
        );

        for domain in ["Page.enable", "Runtime.enable", "Network.enable"] {
            page.send_command(domain, Value::Null).await?;
        }
        page.send_command("Runtime.addBinding", json!({ "name": BINDING_NAME }))
            .await?;

        let shim = bridge_shim();
        page.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": shim }),
        )
        .await?;
        page.send_command("Runtime.evaluate", json!({ "expression": shim }))
            .await?;

        let tree: FrameTreeResult =
            serde_json::from_value(page.send_command("Page.getFrameTree", Value::Null).await?)?;
        if let Ok(mut tracker) = tracker.lock() {
            tracker.main_frame = Some(tree.frame_tree.frame.id);
        }

        info!("Attached to page target {}", target_id);

        Ok(Self {
            target_id,
            browser_context_id,
            page,
            browser,
            events,
            messages,
            closed: AtomicBool::new(false),
            pump,
        })
    }

    async fn evaluate_value(&self, expression: &str) -> Result<Value> {
        let params = EvaluateParams {
            expression: expression.to_string(),
            await_promise: Some(false),
            return_by_value: Some(true),
        };
        let result = self
            .page
            .send_command("Runtime.evaluate", serde_json::to_value(params)?)
            .await?;
        let response: EvaluateResponse = serde_json::from_value(result)?;

        if let Some(details) = response.exception_details {
            return Err(Error::Script(script_error_from_exception(details)));
        }
        Ok(response.result.value.unwrap_or(Value::Null))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || !self.page.is_active() {
            return Err(Error::session_closed(format!("page target {} is closed", self.target_id)));
        }
        Ok(())
    }
}

impl Drop for CdpWindow {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl HostWindow for CdpWindow {
    fn id(&self) -> &str {
        &self.target_id
    }

    fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<PageMessage> {
        self.messages.subscribe()
    }

    async fn load_url(&self, url: &str, headers: &HeaderMap) -> Result<()> {
        self.ensure_open()?;

        self.page
            .send_command("Network.setExtraHTTPHeaders", json!({ "headers": headers }))
            .await?;

        let params = serde_json::to_value(NavigateParams { url: url.to_string() })?;
        let result: NavigateResult =
            serde_json::from_value(self.page.send_command("Page.navigate", params).await?)?;

        if let Some(error_text) = result.error_text.filter(|text| !text.is_empty()) {
            debug!("Page.navigate to {} reported {}", url, error_text);
            let _ = self.events.send(HostEvent::FailLoad {
                code: net_error_code(&error_text, false),
                description: error_text,
                url: Some(url.to_string()),
            });
        }
        Ok(())
    }

    async fn execute_script(&self, script: &InjectedScript) -> Result<()> {
        self.ensure_open()?;
        self.evaluate_value(script.source()).await.map(|_| ())
    }

    async fn capture(&self, rect: Option<Rect>, format: ImageFormat) -> Result<Bytes> {
        self.ensure_open()?;

        let (format, quality) = match format {
            ImageFormat::Png => ("png", None),
            ImageFormat::Jpeg(quality) => ("jpeg", Some(quality.min(100))),
        };
        let params = ScreenshotParams {
            format: format.to_string(),
            quality,
            clip: rect.map(|r| Clip {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                scale: 1.0,
            }),
        };

        let result: ScreenshotResult = serde_json::from_value(
            self.page
                .send_command("Page.captureScreenshot", serde_json::to_value(params)?)
                .await?,
        )?;
        let image = BASE64
            .decode(result.data.as_bytes())
            .map_err(|e| Error::cdp(format!("Failed to decode screenshot: {}", e)))?;
        Ok(Bytes::from(image))
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        let value = self.evaluate_value("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn user_agent(&self) -> Result<String> {
        self.ensure_open()?;
        let value = self.evaluate_value("navigator.userAgent").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn set_user_agent(&self, agent: &str) -> Result<()> {
        self.ensure_open()?;
        self.page
            .send_command("Network.setUserAgentOverride", json!({ "userAgent": agent }))
            .await?;
        Ok(())
    }

    async fn send_key(&self, key: &KeyInput) -> Result<()> {
        self.ensure_open()?;

        let mut down = json!({ "type": "keyDown", "key": key.key });
        if let Some(text) = &key.text {
            down["text"] = Value::String(text.clone());
        }
        self.page.send_command("Input.dispatchKeyEvent", down).await?;
        self.page
            .send_command("Input.dispatchKeyEvent", json!({ "type": "keyUp", "key": key.key }))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(HostEvent::Closed);
            return Ok(());
        }

        match &self.browser {
            Some(browser) => {
                browser
                    .send_command("Target.closeTarget", json!({ "targetId": self.target_id }))
                    .await?;
                if let Some(context) = &self.browser_context_id {
                    browser
                        .send_command(
                            "Target.disposeBrowserContext",
                            json!({ "browserContextId": context }),
                        )
                        .await?;
                }
                let _ = browser.close().await;
            }
            None => {
                self.page.send_command("Page.close", Value::Null).await?;
            }
        }

        if let Err(e) = self.page.close().await {
            debug!("Page connection already gone: {}", e);
        }
        info!("Closed page target {}", self.target_id);
        let _ = self.events.send(HostEvent::Closed);
        Ok(())
    }
}

fn spawn_translator(
    target_id: String,
    events: broadcast::Receiver<CdpEvent>,
    tracker: Arc<Mutex<FrameTracker>>,
    host_events: broadcast::Sender<HostEvent>,
    messages: broadcast::Sender<PageMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = BroadcastStream::new(events);
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Target {} lagged {} protocol events", target_id, skipped);
                    continue;
                }
            };

            let translated = match tracker.lock() {
                Ok(mut tracker) => tracker.translate(&event),
                Err(_) => break,
            };
            match translated {
                Some(Translated::Host(event)) => {
                    let _ = host_events.send(event);
                }
                Some(Translated::Message(message)) => {
                    let _ = messages.send(message);
                }
                None => {}
            }
        }
        debug!("Protocol event stream for {} ended", target_id);
        let _ = host_events.send(HostEvent::Closed);
    })
}

fn script_error_from_exception(details: ExceptionDetails) -> ScriptError {
    let description = details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .or(details.text)
        .unwrap_or_else(|| "script evaluation failed".to_string());

    let first_line = description.lines().next().unwrap_or_default();
    let (name, message) = match first_line.split_once(": ") {
        Some((name, message)) if !name.contains(' ') => (name.to_string(), message.to_string()),
        _ => ("Error".to_string(), first_line.to_string()),
    };

    ScriptError {
        message,
        name,
        stack: Some(description),
    }
}
