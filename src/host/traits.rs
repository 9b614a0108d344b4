//! Host engine traits
//!
//! This module defines the contract between a session and the browser engine
//! that actually owns the page. A host emits navigation events and page
//! messages, and accepts script, navigation, capture and input requests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{HeaderMap, WindowOptions};
use crate::session::script::InjectedScript;
use crate::Error;

/// Navigation event emitted by the host for one window
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A new main-frame navigation started
    NavigationStarted {
        /// Target URL, when the host knows it
        url: Option<String>,
    },
    /// The document finished parsing (DOMContentLoaded)
    DomReady,
    /// The page and its subresources finished loading
    FinishLoad,
    /// The load failed
    FailLoad {
        /// Host numeric error code
        code: i32,
        /// Host description
        description: String,
        /// URL that failed, when known
        url: Option<String>,
    },
    /// The window was destroyed
    Closed,
}

/// Structured message sent from the page context to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMessage {
    /// Channel name, e.g. `"<prefix>js:response"`
    pub channel: String,
    /// Message arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Capture region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Encoded image format requested from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG format
    Png,
    /// JPEG format with quality 0-100
    Jpeg(u8),
}

/// One synthetic key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    /// DOM `key` value (e.g. "a", "Enter")
    pub key: String,
    /// Text inserted by the key, if any
    pub text: Option<String>,
}

static NAMED_KEYS: phf::Map<char, &'static str> = phf::phf_map! {
    '\n' => "Enter",
    '\r' => "Enter",
    '\t' => "Tab",
    '\u{8}' => "Backspace",
    '\u{1b}' => "Escape",
    '\u{7f}' => "Delete",
};

impl KeyInput {
    /// Key press producing a single character
    pub fn for_char(c: char) -> Self {
        match NAMED_KEYS.get(&c) {
            Some(name) => Self {
                key: (*name).to_string(),
                text: matches!(c, '\n' | '\r').then(|| "\r".to_string()),
            },
            None => Self {
                key: c.to_string(),
                text: Some(c.to_string()),
            },
        }
    }
}

/// One host window backing a session
///
/// Event and message streams are broadcast so that several consumers (the
/// lifecycle pump, a pending navigation, the evaluation router) can observe
/// the same traffic independently.
#[async_trait]
pub trait HostWindow: Send + Sync + std::fmt::Debug {
    /// Host-assigned window id
    fn id(&self) -> &str;

    /// Subscribe to navigation events
    fn subscribe_events(&self) -> broadcast::Receiver<HostEvent>;

    /// Subscribe to page-context messages
    fn subscribe_messages(&self) -> broadcast::Receiver<PageMessage>;

    /// Start loading a URL with extra request headers
    async fn load_url(&self, url: &str, headers: &HeaderMap) -> Result<(), Error>;

    /// Submit a wrapped script to the page context
    ///
    /// Resolution arrives later as page messages on the script's channels.
    async fn execute_script(&self, script: &InjectedScript) -> Result<(), Error>;

    /// Capture the visible page (or a region of it)
    async fn capture(&self, rect: Option<Rect>, format: ImageFormat) -> Result<Bytes, Error>;

    /// Current page URL
    async fn url(&self) -> Result<String, Error>;

    /// Current user agent
    async fn user_agent(&self) -> Result<String, Error>;

    /// Override the user agent
    async fn set_user_agent(&self, agent: &str) -> Result<(), Error>;

    /// Dispatch one synthetic key press to the focused element
    async fn send_key(&self, key: &KeyInput) -> Result<(), Error>;

    /// Destroy the window
    async fn close(&self) -> Result<(), Error>;
}

/// Host engine able to open windows
#[async_trait]
pub trait HostFactory: Send + Sync + std::fmt::Debug {
    /// Resolve once the host engine can open windows
    async fn ready(&self) -> Result<(), Error>;

    /// Open a window in an isolated storage partition
    async fn open_window(
        &self,
        partition: &str,
        options: &WindowOptions,
    ) -> Result<Arc<dyn HostWindow>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_input_printable() {
        let key = KeyInput::for_char('a');
        assert_eq!(key.key, "a");
        assert_eq!(key.text.as_deref(), Some("a"));
    }

    #[test]
    fn test_key_input_named() {
        let enter = KeyInput::for_char('\n');
        assert_eq!(enter.key, "Enter");
        assert_eq!(enter.text.as_deref(), Some("\r"));

        let tab = KeyInput::for_char('\t');
        assert_eq!(tab.key, "Tab");
        assert!(tab.text.is_none());
    }

    #[test]
    fn test_page_message_deserialize_without_args() {
        let message: PageMessage = serde_json::from_str(r#"{"channel":"a|1|js:log"}"#).unwrap();
        assert!(message.args.is_empty());
    }
}
