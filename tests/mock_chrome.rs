//! Mock Chrome DevTools Protocol server
//!
//! Speaks just enough of the discovery endpoint and the protocol to drive a
//! full session through `CdpHost` without a real Chrome instance.

use futures_util::{SinkExt, StreamExt};
use pagewire::cdp::{CdpConnection, CdpHost, CdpWindow, BINDING_NAME};
use pagewire::config::SessionOptions;
use pagewire::host::{HostEvent, HostFactory, HostWindow};
use pagewire::session::{Runtime, Screenshot};
use pagewire::Error;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const MOCK_USER_AGENT: &str = "Mozilla/5.0 (MockChrome)";
const MOCK_HTML: &str = "<html><head></head><body><h1 id=\"title\">Mock</h1></body></html>";
const PIXEL_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

/// Mock Chrome server
pub struct MockChromeServer {
    addr: String,
    requests: Arc<Mutex<Vec<Value>>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Per-connection page state
struct PageState {
    url: String,
    user_agent: String,
}

impl MockChromeServer {
    /// Start a new mock Chrome server
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server_addr = addr.clone();
        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                tokio::spawn(Self::handle_connection(stream, server_addr.clone(), log.clone()));
                            }
                            Err(e) => {
                                tracing::error!("Mock Chrome: Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Get the WebSocket endpoint URL
    pub fn ws_endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every protocol request received for `method`
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req["method"] == method)
            .cloned()
            .collect()
    }

    async fn handle_connection(mut stream: TcpStream, addr: String, log: Arc<Mutex<Vec<Value>>>) {
        let mut head = [0u8; 32];
        let Ok(n) = stream.peek(&mut head).await else {
            return;
        };
        if head[..n].starts_with(b"GET /json/version") {
            Self::serve_version(stream, &addr).await;
            return;
        }

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!("Mock Chrome: WebSocket handshake error: {}", e);
                return;
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut state = PageState {
            url: "about:blank".to_string(),
            user_agent: MOCK_USER_AGENT.to_string(),
        };

        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let Ok(req) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    log.lock().unwrap().push(req.clone());
                    for outgoing in Self::respond(&req, &mut state) {
                        if ws_sender.send(Message::Text(outgoing.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    }

    async fn serve_version(mut stream: TcpStream, addr: &str) {
        let mut request = vec![0u8; 4096];
        let _ = stream.read(&mut request).await;

        let body = json!({
            "Browser": "Chrome/120.0.6099.109",
            "Protocol-Version": "1.3",
            "User-Agent": MOCK_USER_AGENT,
            "webSocketDebuggerUrl": format!("ws://{}/devtools/browser/mock", addr),
        })
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    /// Response followed by any events the request triggers
    fn respond(req: &Value, state: &mut PageState) -> Vec<Value> {
        let id = req["id"].as_i64().unwrap_or(0);
        let method = req["method"].as_str().unwrap_or("unknown");
        let params = &req["params"];
        let ok = |result: Value| json!({ "id": id, "result": result });

        match method {
            "Page.enable" | "Runtime.enable" | "Network.enable" | "Runtime.addBinding"
            | "Network.setExtraHTTPHeaders" | "Input.dispatchKeyEvent" | "Target.closeTarget"
            | "Target.disposeBrowserContext" | "Page.close" => vec![ok(json!({}))],
            "Page.addScriptToEvaluateOnNewDocument" => vec![ok(json!({ "identifier": "1" }))],
            "Target.createBrowserContext" => vec![ok(json!({ "browserContextId": "ctx-1" }))],
            "Target.createTarget" => vec![ok(json!({ "targetId": "target-1" }))],
            "Page.getFrameTree" => vec![ok(json!({
                "frameTree": { "frame": { "id": "main", "loaderId": "l0", "url": state.url } }
            }))],
            "Network.setUserAgentOverride" => {
                state.user_agent = params["userAgent"].as_str().unwrap_or_default().to_string();
                vec![ok(json!({}))]
            }
            "Page.captureScreenshot" => vec![ok(json!({ "data": PIXEL_PNG }))],
            "Page.navigate" => {
                let url = params["url"].as_str().unwrap_or_default().to_string();
                if url.contains("unreachable") {
                    return vec![ok(json!({
                        "frameId": "main",
                        "loaderId": "l1",
                        "errorText": "net::ERR_NAME_NOT_RESOLVED"
                    }))];
                }
                state.url = url;
                vec![
                    ok(json!({ "frameId": "main", "loaderId": "l1" })),
                    json!({ "method": "Page.frameStartedLoading", "params": { "frameId": "main" } }),
                    json!({ "method": "Page.domContentEventFired", "params": { "timestamp": 1.0 } }),
                    json!({ "method": "Page.loadEventFired", "params": { "timestamp": 2.0 } }),
                ]
            }
            "Runtime.evaluate" => {
                let expression = params["expression"].as_str().unwrap_or_default();
                match expression {
                    "window.location.href" => vec![ok(json!({ "result": { "type": "string", "value": state.url } }))],
                    "navigator.userAgent" => {
                        vec![ok(json!({ "result": { "type": "string", "value": state.user_agent } }))]
                    }
                    _ => {
                        let mut out = vec![ok(json!({ "result": { "type": "undefined" } }))];
                        out.extend(Self::bridge_reply(expression));
                        out
                    }
                }
            }
            _ => vec![json!({
                "id": id,
                "error": { "code": -32601, "message": format!("Method not implemented: {}", method) }
            })],
        }
    }

    /// Simulate the page-side bridge answering a wrapped evaluation
    fn bridge_reply(expression: &str) -> Option<Value> {
        let marker = "js:response\"";
        let end = expression.find(marker)?;
        let start = expression[..end].rfind('"')? + 1;
        let prefix = &expression[start..end];

        let (channel, args) = if expression.contains("boom") {
            (format!("{}js:error", prefix), json!(["boom", "Error", "Error: boom"]))
        } else if expression.contains("outerHTML") {
            (format!("{}js:response", prefix), json!([MOCK_HTML]))
        } else if expression.contains("document.querySelector") {
            (format!("{}js:response", prefix), json!([true]))
        } else {
            (format!("{}js:response", prefix), json!([42]))
        };

        let payload = json!({ "channel": channel, "args": args }).to_string();
        Some(json!({
            "method": "Runtime.bindingCalled",
            "params": { "name": BINDING_NAME, "payload": payload, "executionContextId": 1 }
        }))
    }
}

impl Drop for MockChromeServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Let the session's event pump catch up
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn runtime_for(server: &MockChromeServer) -> Runtime {
    Runtime::new(Arc::new(CdpHost::new(server.ws_endpoint(), 3)))
}

#[tokio::test]
async fn test_mock_chrome_startup() {
    let server = MockChromeServer::start().await.unwrap();
    assert!(server.ws_endpoint().starts_with("ws://127.0.0.1:"));
}

#[tokio::test]
async fn test_host_ready_and_version() {
    let server = MockChromeServer::start().await.unwrap();
    let host = CdpHost::new(server.ws_endpoint(), 3);

    host.ready().await.unwrap();
    let version = host.version().await.unwrap();
    assert_eq!(version.browser, "Chrome/120.0.6099.109");
    assert!(version.web_socket_debugger_url.ends_with("/devtools/browser/mock"));
}

#[tokio::test]
async fn test_session_over_cdp() {
    let server = MockChromeServer::start().await.unwrap();
    let runtime = runtime_for(&server).await;

    let mut options = SessionOptions::default();
    options.headers.insert("X-Test".to_string(), "1".to_string());
    let session = runtime.create(options).await.unwrap();

    session.goto("https://example.com/").await.unwrap();
    settle().await;
    assert!(session.lifecycle().finish_loaded);
    assert_eq!(session.url().await.unwrap(), "https://example.com/");

    let headers = server.requests("Network.setExtraHTTPHeaders");
    assert_eq!(headers.last().unwrap()["params"]["headers"]["X-Test"], "1");

    assert_eq!(session.content().await.unwrap(), MOCK_HTML);
    assert_eq!(
        session.evaluate("function (a, b) { return a + b; }", vec![json!(40), json!(2)]).await.unwrap(),
        json!(42)
    );

    session.end().await.unwrap();
    assert_eq!(server.requests("Target.closeTarget").len(), 1);
    assert_eq!(server.requests("Target.disposeBrowserContext").len(), 1);
}

#[tokio::test]
async fn test_script_exception_over_cdp() {
    let server = MockChromeServer::start().await.unwrap();
    let session = runtime_for(&server).await.create(SessionOptions::default()).await.unwrap();

    let err = session
        .evaluate("function () { throw new Error('boom'); }", vec![])
        .await
        .unwrap_err();
    let script = err.as_script_error().unwrap();
    assert_eq!(script.message, "boom");
    assert_eq!(script.name, "Error");

    session.end().await.unwrap();
}

#[tokio::test]
async fn test_navigation_error_text_fails_goto() {
    let server = MockChromeServer::start().await.unwrap();
    let session = runtime_for(&server).await.create(SessionOptions::default()).await.unwrap();

    let err = session.goto("https://unreachable.invalid/").await.unwrap_err();
    let failure = err.as_navigation_failure().unwrap();
    assert_eq!(failure.code, -105);
    assert_eq!(failure.description, "net::ERR_NAME_NOT_RESOLVED");
    settle().await;
    assert_eq!(session.lifecycle().fatal_error.as_ref().map(|f| f.code), Some(-105));

    session.end().await.unwrap();
}

#[tokio::test]
async fn test_user_agent_and_screenshot_over_cdp() {
    let server = MockChromeServer::start().await.unwrap();
    let session = runtime_for(&server).await.create(SessionOptions::default()).await.unwrap();

    assert_eq!(session.user_agent().await.unwrap(), MOCK_USER_AGENT);
    session.set_user_agent("pagewire-test/1.0").await.unwrap();
    assert_eq!(session.user_agent().await.unwrap(), "pagewire-test/1.0");

    match session.screenshot(None, None).await.unwrap() {
        Screenshot::Image(bytes) => assert!(bytes.starts_with(b"\x89PNG")),
        other => panic!("unexpected screenshot result: {:?}", other),
    }

    session.end().await.unwrap();
}

#[tokio::test]
async fn test_window_attach_without_browser_connection() {
    let server = MockChromeServer::start().await.unwrap();
    let page = CdpConnection::connect(format!("{}/devtools/page/direct", server.ws_endpoint()))
        .await
        .unwrap();
    let window = CdpWindow::attach("direct".to_string(), page, None, None).await.unwrap();

    assert_eq!(server.requests("Runtime.addBinding")[0]["params"]["name"], BINDING_NAME);
    assert_eq!(server.requests("Page.addScriptToEvaluateOnNewDocument").len(), 1);

    let mut events = window.subscribe_events();
    window.close().await.unwrap();
    assert_eq!(server.requests("Page.close").len(), 1);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(HostEvent::Closed) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);

    let err = window.url().await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed(_)));
}
