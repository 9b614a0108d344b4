//! Navigation controller
//!
//! A navigation settles on the first of: the completion event selected by
//! [`NavigationWait`], or a load failure. Aborted loads (code -3) are skipped
//! so a superseded navigation keeps waiting for the real outcome.

use std::str::FromStr;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::HeaderMap;
use crate::error::NavigationFailure;
use crate::host::{HostEvent, HostWindow};
use crate::{Error, Result};

/// Which event completes a navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationWait {
    /// DOMContentLoaded
    DomReady,
    /// The load event
    #[default]
    Loaded,
}

impl FromStr for NavigationWait {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dom" => Ok(NavigationWait::DomReady),
            "loaded" => Ok(NavigationWait::Loaded),
            other => Err(Error::configuration(format!("unknown navigation wait mode: {}", other))),
        }
    }
}

/// Issues navigations for one session
#[derive(Debug, Clone, Default)]
pub struct NavigationController {
    default_headers: HeaderMap,
}

impl NavigationController {
    pub fn new(default_headers: HeaderMap) -> Self {
        Self { default_headers }
    }

    /// Defaults overlaid with caller headers; the caller wins on conflicts
    pub fn merge_headers(&self, headers: Option<&HeaderMap>) -> HeaderMap {
        let mut merged = self.default_headers.clone();
        if let Some(headers) = headers {
            merged.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    /// Load `url` and wait for it to complete or fail
    pub async fn goto(
        &self,
        window: &dyn HostWindow,
        url: &str,
        headers: Option<&HeaderMap>,
        wait: NavigationWait,
    ) -> Result<()> {
        let headers = self.merge_headers(headers);
        // Subscribe first so events emitted while loading are not missed
        let mut events = window.subscribe_events();

        info!(url, ?wait, "navigating");
        window.load_url(url, &headers).await?;

        loop {
            match events.recv().await {
                Ok(HostEvent::FinishLoad) => {
                    debug!(url, "finished loading");
                    return Ok(());
                }
                Ok(HostEvent::DomReady) if wait == NavigationWait::DomReady => {
                    debug!(url, "dom ready");
                    return Ok(());
                }
                Ok(HostEvent::FailLoad { code, description, .. }) => {
                    match NavigationFailure::from_fail_load(code, description) {
                        Some(failure) => {
                            warn!(url, code, "navigation failed");
                            return Err(Error::Navigation(failure));
                        }
                        None => debug!(url, "ignoring aborted load"),
                    }
                }
                Ok(HostEvent::Closed) => {
                    return Err(Error::session_closed(format!("window closed while loading {}", url)));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(url, skipped, "navigation event stream lagged");
                }
                Err(RecvError::Closed) => {
                    return Err(Error::transport(format!("host event stream ended while loading {}", url)));
                }
            }
        }
    }
}
