//! Common test utilities
//!
//! Shared helpers and fixtures for the integration tests.

#![allow(dead_code)]

use pagewire::config::{Config, SessionOptions};
use pagewire::host::mock::{MockHost, PageReply};
use pagewire::session::script::OUTER_HTML;
use pagewire::session::Runtime;
use serde_json::{json, Value};
use std::sync::Arc;

/// Get test HTML content
pub fn get_test_html() -> String {
    r#"<html><head><title>Test Page</title></head><body><h1 id="title">Hello World</h1><input id="text-input" type="text"></body></html>"#
        .to_string()
}

/// Mock host whose page answers `content()` with the test HTML
pub fn html_host() -> MockHost {
    MockHost::new().with_responder(|function, _| {
        if function == OUTER_HTML {
            PageReply::Return(json!(get_test_html()))
        } else {
            PageReply::Return(Value::Null)
        }
    })
}

/// Wrap a host in a runtime, keeping a handle for assertions
pub fn setup_runtime(host: MockHost) -> (Arc<MockHost>, Runtime) {
    let host = Arc::new(host);
    let runtime = Runtime::new(host.clone());
    (host, runtime)
}

/// Session options with short wait timings
pub fn fast_options() -> SessionOptions {
    let config = Config::from_toml(
        r#"
        wait_tick_ms = 10
        wait_delay_ms = 20
        wait_fn_tick_ms = 25
        wait_global_timeout_ms = 1000
        "#,
    )
    .expect("Failed to parse test configuration");
    SessionOptions::from(&config)
}
