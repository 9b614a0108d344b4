//! Page evaluation bridge
//!
//! Each evaluation gets its own channel prefix `<session>|<call>|`. A router
//! task reads every page message of the window and settles the pending call
//! registered under the message's prefix; console output is re-published to
//! console subscribers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::script::{ChannelKind, InjectedScript};
use crate::error::ScriptError;
use crate::host::{HostWindow, PageMessage};
use crate::{Error, Result};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// Console output captured while an evaluation ran
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleMessage {
    /// Session id
    pub session: String,
    /// Evaluation call number within the session
    pub call: u64,
    /// Stringified `console.log` arguments
    pub args: Vec<String>,
    /// When the controller received the message
    pub timestamp: DateTime<Utc>,
}

/// Removes a pending entry when the evaluation future is dropped early
struct PendingGuard {
    prefix: String,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if pending.remove(&self.prefix).is_some() {
            debug!(prefix = %self.prefix, "dropped pending evaluation");
        }
    }
}

/// Evaluation bridge for one session
#[derive(Debug)]
pub struct EvalBridge {
    session_id: String,
    next_call: AtomicU64,
    pending: PendingMap,
    console: broadcast::Sender<ConsoleMessage>,
}

impl EvalBridge {
    pub fn new<S: Into<String>>(session_id: S) -> Self {
        let (console, _) = broadcast::channel(256);
        Self {
            session_id: session_id.into(),
            next_call: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            console,
        }
    }

    /// Start routing page messages to pending evaluations
    pub fn attach(self: &Arc<Self>, messages: broadcast::Receiver<PageMessage>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut stream = BroadcastStream::new(messages);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(message) => bridge.route(message),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(session = %bridge.session_id, skipped, "page message stream lagged");
                    }
                }
            }
            debug!(session = %bridge.session_id, "page message stream ended");
            bridge.abandon_all();
        })
    }

    /// Subscribe to forwarded console output
    pub fn console(&self) -> broadcast::Receiver<ConsoleMessage> {
        self.console.subscribe()
    }

    /// Number of evaluations awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Run `function(...args)` in the page and return its result
    pub async fn evaluate(
        &self,
        window: &dyn HostWindow,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let call = self.next_call.fetch_add(1, Ordering::Relaxed) + 1;
        let prefix = format!("{}|{}|", self.session_id, call);
        let script = InjectedScript::new(prefix.clone(), function, args)?;

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(prefix.clone(), tx);
        let _guard = PendingGuard {
            prefix: prefix.clone(),
            pending: Arc::clone(&self.pending),
        };

        debug!(session = %self.session_id, call, "evaluating script");
        window.execute_script(&script).await?;

        rx.await
            .map_err(|_| Error::transport(format!("evaluation {} ended without a reply", prefix)))?
    }

    /// Fail every pending evaluation; used when the window goes away
    pub fn abandon_all(&self) {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        for (prefix, tx) in drained {
            let _ = tx.send(Err(Error::session_closed(format!(
                "session {} closed before evaluation {} replied",
                self.session_id, prefix
            ))));
        }
    }

    fn route(&self, message: PageMessage) {
        let Some((prefix, kind)) = ChannelKind::split(&message.channel) else {
            debug!(channel = %message.channel, "ignoring message on unknown channel");
            return;
        };
        let Some(call) = self.call_number(prefix) else {
            return;
        };

        match kind {
            ChannelKind::Log => self.publish_console(call, message.args),
            ChannelKind::Response => {
                let value = message.args.into_iter().next().unwrap_or(Value::Null);
                self.settle(prefix, Ok(value));
            }
            ChannelKind::Error => {
                let err = decode_script_error(message.args);
                debug!(session = %self.session_id, call, error = %err, "script raised");
                self.settle(prefix, Err(Error::Script(err)));
            }
        }
    }

    fn settle(&self, prefix: &str, outcome: Result<Value>) {
        let sender = self.lock_pending().remove(prefix);
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(prefix, "discarding reply for an evaluation nobody awaits"),
        }
    }

    fn publish_console(&self, call: u64, args: Vec<Value>) {
        let args = console_lines(args);
        debug!(target: "pagewire::console", session = %self.session_id, call, "{}", args.join(" "));
        let _ = self.console.send(ConsoleMessage {
            session: self.session_id.clone(),
            call,
            args,
            timestamp: Utc::now(),
        });
    }

    fn call_number(&self, prefix: &str) -> Option<u64> {
        prefix
            .strip_prefix(self.session_id.as_str())?
            .strip_prefix('|')?
            .strip_suffix('|')?
            .parse()
            .ok()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Result<Value>>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode_script_error(args: Vec<Value>) -> ScriptError {
    let mut args = args.into_iter();
    let mut text = |fallback: &str| match args.next() {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => (!fallback.is_empty()).then(|| fallback.to_string()),
        Some(other) => Some(other.to_string()),
    };

    ScriptError {
        message: text("").unwrap_or_default(),
        name: text("Error").unwrap_or_default(),
        stack: text(""),
    }
}

// The page sends one array of stringified arguments; anything else is
// rendered value by value.
fn console_lines(args: Vec<Value>) -> Vec<String> {
    let render = |value: Value| match value {
        Value::String(s) => s,
        other => other.to_string(),
    };

    match <[Value; 1]>::try_from(args) {
        Ok([Value::Array(items)]) => items.into_iter().map(render).collect(),
        Ok([single]) => vec![render(single)],
        Err(args) => args.into_iter().map(render).collect(),
    }
}
