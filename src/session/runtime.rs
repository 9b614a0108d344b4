//! Session factory
//!
//! Every session waits on one shared readiness future, so the host is probed
//! once no matter how many sessions are created or how early.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tracing::info;

use super::page::Session;
use crate::config::SessionOptions;
use crate::host::HostFactory;
use crate::{Error, Result};

type ReadyLatch = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

/// Creates sessions on one host engine
#[derive(Clone)]
pub struct Runtime {
    factory: Arc<dyn HostFactory>,
    ready: ReadyLatch,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("factory", &self.factory)
            .field("ready", &self.ready.peek().is_some())
            .finish()
    }
}

impl Runtime {
    pub fn new(factory: Arc<dyn HostFactory>) -> Self {
        let probe = factory.clone();
        let ready = async move {
            probe.ready().await.map_err(|e| e.to_string())?;
            info!("host engine ready");
            Ok::<(), String>(())
        }
        .boxed()
        .shared();

        Self { factory, ready }
    }

    /// Resolve once the host is ready
    ///
    /// The outcome of the first readiness check is kept; a failed check is
    /// reported to every later caller as well.
    pub async fn ready(&self) -> Result<()> {
        self.ready.clone().await.map_err(Error::host_unavailable)
    }

    /// Whether the readiness check has already succeeded
    pub fn is_ready(&self) -> bool {
        matches!(self.ready.peek(), Some(Ok(())))
    }

    /// Wait for the host, then open a session
    pub async fn create(&self, options: SessionOptions) -> Result<Session> {
        self.ready().await?;
        Session::open(self.factory.as_ref(), options).await
    }

    pub fn factory(&self) -> &Arc<dyn HostFactory> {
        &self.factory
    }
}
