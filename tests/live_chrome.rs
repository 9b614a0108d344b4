//! Tests against a real Chrome instance
//!
//! Skipped unless a DevTools endpoint answers at `PAGEWIRE_CDP_ENDPOINT`
//! (default ws://localhost:9222), e.g. `chrome --headless --remote-debugging-port=9222`.

mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::get_test_html;
use pagewire::cdp::CdpHost;
use pagewire::config::{Config, SessionOptions};
use pagewire::host::HostFactory;
use pagewire::session::{Runtime, Screenshot};
use serde_json::json;
use std::sync::Arc;

async fn live_runtime() -> Option<Runtime> {
    let config = Config::from_env().ok()?;
    let host = CdpHost::new(config.cdp_endpoint.clone(), 1);
    if let Err(e) = host.ready().await {
        eprintln!("Skipping live Chrome test: {}", e);
        return None;
    }
    Some(Runtime::new(Arc::new(host)))
}

fn test_page_url() -> String {
    format!("data:text/html;base64,{}", BASE64.encode(get_test_html()))
}

#[tokio::test]
async fn test_live_session_round_trip() {
    let Some(runtime) = live_runtime().await else {
        return;
    };
    let session = runtime.create(SessionOptions::default()).await.unwrap();

    session.goto(&test_page_url()).await.unwrap();
    session.wait("#title").await.unwrap();

    let title: String = session
        .evaluate_as("function (s) { return document.querySelector(s).textContent; }", vec![json!("#title")])
        .await
        .unwrap();
    assert_eq!(title, "Hello World");

    session.type_text("#text-input", "abc", None).await.unwrap();
    let typed: String = session
        .evaluate_as("function () { return document.querySelector('#text-input').value; }", vec![])
        .await
        .unwrap();
    assert_eq!(typed, "abc");

    assert!(matches!(session.screenshot(None, None).await.unwrap(), Screenshot::Image(_)));
    session.end().await.unwrap();
}
