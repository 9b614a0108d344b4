//! Configuration management for Pagewire

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Header name -> value map sent with navigations
pub type HeaderMap = BTreeMap<String, String>;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CDP endpoint of the host browser
    pub cdp_endpoint: String,

    /// How many times to probe the host before giving up on readiness
    pub ready_attempts: u32,

    /// Lifecycle poll tick in milliseconds
    pub wait_tick_ms: u64,

    /// Settling delay before lifecycle polling starts, in milliseconds
    pub wait_delay_ms: u64,

    /// Predicate poll tick in milliseconds
    pub wait_fn_tick_ms: u64,

    /// Global deadline for predicate and lifecycle waits, in milliseconds
    pub wait_global_timeout_ms: u64,

    /// Default navigation headers
    pub headers: HeaderMap,

    /// Default window options
    pub window: WindowOptions,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cdp_endpoint: "ws://localhost:9222".to_string(),
            ready_attempts: 20,
            wait_tick_ms: 100,
            wait_delay_ms: 200,
            wait_fn_tick_ms: 250,
            wait_global_timeout_ms: 30000,
            headers: HeaderMap::new(),
            window: WindowOptions::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(endpoint) = env::var("PAGEWIRE_CDP_ENDPOINT") {
            config.cdp_endpoint = endpoint;
        }

        if let Ok(attempts) = env::var("PAGEWIRE_READY_ATTEMPTS") {
            config.ready_attempts = attempts
                .parse()
                .map_err(|_| Error::configuration("Invalid PAGEWIRE_READY_ATTEMPTS"))?;
        }

        if let Ok(tick) = env::var("PAGEWIRE_WAIT_TICK_MS") {
            config.wait_tick_ms = tick
                .parse()
                .map_err(|_| Error::configuration("Invalid PAGEWIRE_WAIT_TICK_MS"))?;
        }

        if let Ok(delay) = env::var("PAGEWIRE_WAIT_DELAY_MS") {
            config.wait_delay_ms = delay
                .parse()
                .map_err(|_| Error::configuration("Invalid PAGEWIRE_WAIT_DELAY_MS"))?;
        }

        if let Ok(tick) = env::var("PAGEWIRE_WAIT_FN_TICK_MS") {
            config.wait_fn_tick_ms = tick
                .parse()
                .map_err(|_| Error::configuration("Invalid PAGEWIRE_WAIT_FN_TICK_MS"))?;
        }

        if let Ok(timeout) = env::var("PAGEWIRE_WAIT_TIMEOUT_MS") {
            config.wait_global_timeout_ms = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid PAGEWIRE_WAIT_TIMEOUT_MS"))?;
        }

        if let Ok(user_agent) = env::var("PAGEWIRE_USER_AGENT") {
            config.window.user_agent = Some(user_agent);
        }

        if let Ok(proxy) = env::var("PAGEWIRE_PROXY") {
            config.window.proxy = Some(proxy);
        }

        if let Ok(log_level) = env::var("PAGEWIRE_LOG_LEVEL") {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Wait timings derived from this configuration
    pub fn wait_settings(&self) -> WaitSettings {
        WaitSettings {
            tick: Duration::from_millis(self.wait_tick_ms),
            settle_delay: Duration::from_millis(self.wait_delay_ms),
            predicate_tick: Duration::from_millis(self.wait_fn_tick_ms),
            global_timeout: Duration::from_millis(self.wait_global_timeout_ms),
        }
    }

    fn validate(&self) -> Result<()> {
        self.wait_settings().validate()?;
        if self.ready_attempts == 0 {
            return Err(Error::configuration("ready_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Options for the host window backing one session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    /// Window width
    pub width: u32,
    /// Window height
    pub height: u32,
    /// User agent applied when the window opens
    pub user_agent: Option<String>,
    /// Proxy server (e.g. "http://proxy:3128")
    pub proxy: Option<String>,
    /// Storage partition name; defaults to the session id
    pub partition: Option<String>,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            user_agent: None,
            proxy: None,
            partition: None,
        }
    }
}

/// Timings used by the wait engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    /// Lifecycle poll tick
    pub tick: Duration,
    /// Delay before lifecycle polling starts
    pub settle_delay: Duration,
    /// Predicate poll tick
    pub predicate_tick: Duration,
    /// Global deadline for predicate and lifecycle waits
    pub global_timeout: Duration,
}

impl WaitSettings {
    /// Reject timings the poll loops cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() || self.predicate_tick.is_zero() {
            return Err(Error::configuration("wait tick intervals must be non-zero"));
        }
        Ok(())
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Config::default().wait_settings()
    }
}

/// Per-session options
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Host window options
    pub window: WindowOptions,
    /// Headers merged under caller-supplied navigation headers
    pub headers: HeaderMap,
    /// Wait timings
    pub wait: WaitSettings,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            window: config.window.clone(),
            headers: config.headers.clone(),
            wait: config.wait_settings(),
        }
    }
}
