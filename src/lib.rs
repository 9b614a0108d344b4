//! Pagewire: asynchronous control layer for a single browser page
//!
//! This library drives one page through a host browser engine: navigate it,
//! run script in its page context, wait for lifecycle or DOM conditions, and
//! read results back.

pub mod error;
pub mod config;

pub mod host;
pub mod cdp;
pub mod session;

// Re-exports
pub use config::{Config, SessionOptions};
pub use error::{Error, NavigationFailure, Result, ScriptError};
pub use session::{Runtime, Session, WaitRequest};

/// Pagewire library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
