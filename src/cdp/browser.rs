//! CDP host engine
//!
//! Readiness is probed over the HTTP discovery endpoint; each window gets a
//! fresh browser context so sessions never share cookies or storage.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::connection::CdpConnection;
use super::types::*;
use super::window::CdpWindow;
use crate::config::{Config, WindowOptions};
use crate::host::{HostFactory, HostWindow};
use crate::{Error, Result};

/// Delay between readiness probes
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Chrome reachable over the DevTools protocol
#[derive(Debug)]
pub struct CdpHost {
    /// DevTools endpoint (e.g., "ws://localhost:9222")
    endpoint: String,
    /// Readiness probes before giving up
    ready_attempts: u32,
    http: reqwest::Client,
}

impl CdpHost {
    /// Create a host for a DevTools endpoint
    ///
    /// # Arguments
    /// * `endpoint` - Browser WebSocket endpoint (e.g., "ws://localhost:9222")
    pub fn new<S: Into<String>>(endpoint: S, ready_attempts: u32) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        info!("Creating CDP host for endpoint: {}", endpoint);
        Self {
            endpoint,
            ready_attempts: ready_attempts.max(1),
            // DevTools endpoints are local or tunnelled; never route them through a proxy
            http: reqwest::Client::builder().no_proxy().build().unwrap_or_default(),
        }
    }

    /// Create a host from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cdp_endpoint.clone(), config.ready_attempts)
    }

    /// HTTP form of the endpoint
    pub fn http_endpoint(&self) -> String {
        self.endpoint
            .replacen("ws://", "http://", 1)
            .replacen("wss://", "https://", 1)
    }

    /// WebSocket URL of a page target
    pub fn page_url(&self, target_id: &str) -> String {
        format!("{}/devtools/page/{}", self.endpoint, target_id)
    }

    /// Fetch browser version info
    pub async fn version(&self) -> Result<BrowserVersion> {
        let url = format!("{}/json/version", self.http_endpoint());
        debug!("Fetching browser version from {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::host_unavailable(format!("Failed to connect to browser: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| Error::cdp(format!("Failed to parse version: {}", e)))
    }
}

#[async_trait]
impl HostFactory for CdpHost {
    async fn ready(&self) -> Result<()> {
        let mut last_error = None;

        for attempt in 1..=self.ready_attempts {
            match self.version().await {
                Ok(version) => {
                    info!("Browser ready: {} (protocol {})", version.browser, version.protocol_version);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Readiness probe {}/{} failed: {}", attempt, self.ready_attempts, e);
                    last_error = Some(e);
                }
            }
            if attempt < self.ready_attempts {
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }

        Err(Error::host_unavailable(format!(
            "{} not reachable after {} attempts{}",
            self.endpoint,
            self.ready_attempts,
            last_error.map(|e| format!(": {}", e)).unwrap_or_default()
        )))
    }

    async fn open_window(
        &self,
        partition: &str,
        options: &WindowOptions,
    ) -> Result<Arc<dyn HostWindow>> {
        let version = self.version().await?;
        let browser = CdpConnection::connect(version.web_socket_debugger_url).await?;

        let mut context_params = json!({ "disposeOnDetach": true });
        if let Some(proxy) = &options.proxy {
            context_params["proxyServer"] = json!(proxy_server(proxy));
        }
        let context: CreateBrowserContextResult = serde_json::from_value(
            browser
                .send_command("Target.createBrowserContext", context_params)
                .await?,
        )?;

        let target: CreateTargetResult = serde_json::from_value(
            browser
                .send_command(
                    "Target.createTarget",
                    json!({
                        "url": "about:blank",
                        "width": options.width,
                        "height": options.height,
                        "browserContextId": context.browser_context_id,
                    }),
                )
                .await?,
        )?;
        info!(
            "Opened target {} in context {} for partition {}",
            target.target_id, context.browser_context_id, partition
        );

        let page = CdpConnection::connect(self.page_url(&target.target_id)).await?;
        let window = CdpWindow::attach(
            target.target_id,
            page,
            Some(browser),
            Some(context.browser_context_id),
        )
        .await?;

        if let Some(agent) = &options.user_agent {
            window.set_user_agent(agent).await?;
        }

        Ok(Arc::new(window))
    }
}

/// Proxy address without credentials, as `proxyServer` expects
fn proxy_server(proxy: &str) -> String {
    match reqwest::Url::parse(proxy) {
        Ok(url) if url.has_host() => {
            let host = url.host_str().unwrap_or_default();
            match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            }
        }
        // "host:port" or "user:pass@host:port" without a scheme
        _ => proxy.rsplit('@').next().unwrap_or(proxy).to_string(),
    }
}
