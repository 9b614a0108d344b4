//! Wait engine
//!
//! One entry point covering fixed delays, page predicates, lifecycle
//! milestones and selector presence. Predicate and lifecycle waits share the
//! global deadline measured from the moment `wait` is called.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::debug;

use super::lifecycle::LifecycleRecord;
use super::script::{is_truthy, SELECTOR_PRESENCE};
use crate::config::WaitSettings;
use crate::{Error, Result};

/// Named lifecycle milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleToken {
    /// DOMContentLoaded
    DomReady,
    /// The load event
    FullyLoaded,
    /// Everything settled; currently the same condition as `FullyLoaded`
    #[default]
    AllSettled,
}

static LIFECYCLE_TOKENS: phf::Map<&'static str, LifecycleToken> = phf::phf_map! {
    "dom-ready" => LifecycleToken::DomReady,
    "fully-loaded" => LifecycleToken::FullyLoaded,
    "all-settled" => LifecycleToken::AllSettled,
    "event:dom" => LifecycleToken::DomReady,
    "event:loaded" => LifecycleToken::FullyLoaded,
    "event:all" => LifecycleToken::AllSettled,
};

impl LifecycleToken {
    /// Recognize a token name
    pub fn parse(name: &str) -> Option<Self> {
        LIFECYCLE_TOKENS.get(name).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleToken::DomReady => "dom-ready",
            LifecycleToken::FullyLoaded => "fully-loaded",
            LifecycleToken::AllSettled => "all-settled",
        }
    }

    /// Whether the record satisfies this milestone
    pub fn is_reached(&self, record: &LifecycleRecord) -> bool {
        match self {
            LifecycleToken::DomReady => record.dom_ready,
            LifecycleToken::FullyLoaded | LifecycleToken::AllSettled => record.finish_loaded,
        }
    }
}

impl fmt::Display for LifecycleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::configuration(format!("unknown lifecycle token: {}", s)))
    }
}

/// A function evaluated in the page until it returns a truthy value
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub function: String,
    pub args: Vec<Value>,
}

impl Predicate {
    pub fn new<S: Into<String>>(function: S) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }
}

/// What to wait for
#[derive(Debug, Clone, PartialEq)]
pub enum WaitRequest {
    /// Sleep for a fixed duration
    Delay(Duration),
    /// Poll a page predicate
    Predicate(Predicate),
    /// Poll the lifecycle record
    Lifecycle(LifecycleToken),
    /// Poll for an element matching a selector
    Selector(String),
}

impl Default for WaitRequest {
    fn default() -> Self {
        WaitRequest::Lifecycle(LifecycleToken::AllSettled)
    }
}

impl From<u64> for WaitRequest {
    fn from(ms: u64) -> Self {
        WaitRequest::Delay(Duration::from_millis(ms))
    }
}

impl From<Duration> for WaitRequest {
    fn from(duration: Duration) -> Self {
        WaitRequest::Delay(duration)
    }
}

impl From<Predicate> for WaitRequest {
    fn from(predicate: Predicate) -> Self {
        WaitRequest::Predicate(predicate)
    }
}

impl From<LifecycleToken> for WaitRequest {
    fn from(token: LifecycleToken) -> Self {
        WaitRequest::Lifecycle(token)
    }
}

impl From<&str> for WaitRequest {
    fn from(arg: &str) -> Self {
        match LifecycleToken::parse(arg) {
            Some(token) => WaitRequest::Lifecycle(token),
            None => WaitRequest::Selector(arg.to_string()),
        }
    }
}

impl From<String> for WaitRequest {
    fn from(arg: String) -> Self {
        match LifecycleToken::parse(&arg) {
            Some(token) => WaitRequest::Lifecycle(token),
            None => WaitRequest::Selector(arg),
        }
    }
}

/// What the engine polls
#[async_trait]
pub trait WaitTarget: Send + Sync {
    /// Current lifecycle record
    fn lifecycle(&self) -> LifecycleRecord;

    /// Evaluate a function in the page
    async fn evaluate(&self, function: &str, args: Vec<Value>) -> Result<Value>;
}

/// Wait engine
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitEngine {
    settings: WaitSettings,
}

impl WaitEngine {
    pub fn new(settings: WaitSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &WaitSettings {
        &self.settings
    }

    /// Wait until `request` is satisfied
    pub async fn wait(&self, request: WaitRequest, target: &dyn WaitTarget) -> Result<()> {
        self.settings.validate()?;
        let start = Instant::now();

        match request {
            WaitRequest::Delay(duration) => {
                time::sleep(duration).await;
                Ok(())
            }
            WaitRequest::Predicate(predicate) => self.poll_predicate(start, &predicate, target).await,
            WaitRequest::Lifecycle(token) => self.poll_lifecycle(start, token, target).await,
            WaitRequest::Selector(selector) => {
                if selector.is_empty() {
                    return Err(Error::transport("cannot wait for an empty selector"));
                }
                let predicate = Predicate::new(SELECTOR_PRESENCE).arg(Value::String(selector));
                self.poll_predicate(start, &predicate, target).await
            }
        }
    }

    async fn poll_predicate(
        &self,
        start: Instant,
        predicate: &Predicate,
        target: &dyn WaitTarget,
    ) -> Result<()> {
        let deadline = start + self.settings.global_timeout;

        loop {
            time::sleep(self.settings.predicate_tick).await;
            if start.elapsed() > self.settings.global_timeout {
                return Err(self.timed_out());
            }

            let result = time::timeout_at(
                deadline,
                target.evaluate(&predicate.function, predicate.args.clone()),
            )
            .await
            .map_err(|_| self.timed_out())??;

            if is_truthy(&result) {
                return Ok(());
            }
            debug!(elapsed_ms = start.elapsed().as_millis() as u64, "predicate not yet satisfied");
        }
    }

    async fn poll_lifecycle(
        &self,
        start: Instant,
        token: LifecycleToken,
        target: &dyn WaitTarget,
    ) -> Result<()> {
        time::sleep(self.settings.settle_delay).await;

        let mut ticker = time::interval_at(Instant::now() + self.settings.tick, self.settings.tick);
        loop {
            ticker.tick().await;

            if start.elapsed() > self.settings.global_timeout {
                return Err(self.timed_out());
            }

            let record = target.lifecycle();
            if let Some(failure) = record.fatal_error {
                return Err(Error::Navigation(failure));
            }
            if token.is_reached(&record) {
                debug!(%token, "lifecycle milestone reached");
                return Ok(());
            }
        }
    }

    fn timed_out(&self) -> Error {
        Error::timeout(format!(
            "wait rejected after global timeout of {}ms",
            self.settings.global_timeout.as_millis()
        ))
    }
}
