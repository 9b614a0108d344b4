//! CDP (Chrome DevTools Protocol) type definitions
//!
//! Wire structures for the subset of the protocol the host layer speaks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CDP JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    /// Request ID
    pub id: u64,
    /// Method name (e.g., "Page.navigate")
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Session ID for flattened target sessions
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// CDP JSON-RPC notification (event)
#[derive(Debug, Clone, Deserialize)]
pub struct CdpNotification {
    /// Event method (e.g., "Page.loadEventFired")
    pub method: String,
    /// Event parameters
    #[serde(default)]
    pub params: Value,
    /// Session ID for flattened target sessions
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// CDP JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct CdpRpcResponse {
    /// Response ID (matches request ID)
    pub id: u64,
    /// Response result
    #[serde(default)]
    pub result: Value,
    /// Error if any
    #[serde(default)]
    pub error: Option<CdpErrorDetail>,
}

/// CDP error detail
#[derive(Debug, Clone, Deserialize)]
pub struct CdpErrorDetail {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default)]
    pub data: Option<Value>,
}

/// Event delivered to connection subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    /// Event method
    pub method: String,
    /// Event parameters
    pub params: Value,
}

/// Response of `GET /json/version`
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    /// Product name
    #[serde(rename = "Browser", default)]
    pub browser: String,
    /// Protocol version
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    /// Default user agent
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    /// Browser-level WebSocket endpoint
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Page navigation parameters
#[derive(Debug, Clone, Serialize)]
pub struct NavigateParams {
    /// URL to navigate to
    pub url: String,
}

/// `Page.navigate` result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    /// Frame that navigated
    #[serde(default)]
    pub frame_id: String,
    /// Loader of the new document
    #[serde(default)]
    pub loader_id: Option<String>,
    /// Net error name when the navigation failed outright
    #[serde(default)]
    pub error_text: Option<String>,
}

/// JavaScript evaluation parameters
#[derive(Debug, Clone, Serialize)]
pub struct EvaluateParams {
    /// JavaScript expression to evaluate
    pub expression: String,
    /// Whether to await promise
    #[serde(skip_serializing_if = "Option::is_none", rename = "awaitPromise")]
    pub await_promise: Option<bool>,
    /// Whether to return as value
    #[serde(skip_serializing_if = "Option::is_none", rename = "returnByValue")]
    pub return_by_value: Option<bool>,
}

/// Screenshot parameters
#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotParams {
    /// Image format
    pub format: String,
    /// JPEG quality (0-100)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Capture region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip: Option<Clip>,
}

/// Clip region for screenshot
#[derive(Debug, Clone, Serialize)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Page scale factor
    pub scale: f64,
}

/// `Page.captureScreenshot` result
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotResult {
    /// Base64 image data
    pub data: String,
}

/// Remote object (result of JavaScript evaluation)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteObject {
    /// Object type
    #[serde(default)]
    pub r#type: String,
    /// Object subtype
    #[serde(default)]
    pub subtype: Option<String>,
    /// Object value
    #[serde(default)]
    pub value: Option<Value>,
    /// Object description
    #[serde(default)]
    pub description: Option<String>,
}

/// Exception details
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// Exception text
    #[serde(default)]
    pub text: Option<String>,
    /// Exception object
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

/// JavaScript evaluation response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    /// Evaluation result
    #[serde(default)]
    pub result: RemoteObject,
    /// Exception details if evaluation failed
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

/// `Page.getFrameTree` result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTreeResult {
    pub frame_tree: FrameTree,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameTree {
    pub frame: Frame,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    /// Frame ID
    pub id: String,
    /// Current URL
    #[serde(default)]
    pub url: String,
}

/// `Target.createTarget` result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetResult {
    pub target_id: String,
}

/// `Target.createBrowserContext` result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBrowserContextResult {
    pub browser_context_id: String,
}

/// `Runtime.bindingCalled` event
#[derive(Debug, Clone, Deserialize)]
pub struct BindingCalled {
    /// Binding name
    pub name: String,
    /// String passed by the page
    pub payload: String,
}

/// `Network.requestWillBeSent` event (fields used for document tracking)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
}

/// `Network.loadingFailed` event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
}
