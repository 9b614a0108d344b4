//! Page lifecycle tracking
//!
//! The record is rebuilt from host navigation events only; nothing else
//! writes to it.

use tokio::sync::watch;
use tracing::debug;

use crate::error::NavigationFailure;
use crate::host::HostEvent;

/// Lifecycle flags of the current navigation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleRecord {
    /// DOMContentLoaded fired
    pub dom_ready: bool,
    /// The load event fired
    pub finish_loaded: bool,
    /// Load failure reported by the host, cleared by the next navigation
    pub fatal_error: Option<NavigationFailure>,
}

impl LifecycleRecord {
    /// Apply one host event
    pub fn transition(&mut self, event: &HostEvent) {
        match event {
            HostEvent::NavigationStarted { .. } => *self = LifecycleRecord::default(),
            HostEvent::DomReady => self.dom_ready = true,
            HostEvent::FinishLoad => self.finish_loaded = true,
            HostEvent::FailLoad { code, description, .. } => {
                if let Some(failure) = NavigationFailure::from_fail_load(*code, description.as_str()) {
                    self.fatal_error = Some(failure);
                }
            }
            HostEvent::Closed => {}
        }
    }
}

/// Shared lifecycle state for one session
#[derive(Debug)]
pub struct LifecycleTracker {
    state: watch::Sender<LifecycleRecord>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleRecord::default());
        Self { state }
    }

    /// Apply a host event and notify watchers when the record changed
    pub fn apply(&self, event: &HostEvent) {
        self.state.send_if_modified(|record| {
            let before = record.clone();
            record.transition(event);
            let changed = *record != before;
            if changed {
                debug!(?event, dom_ready = record.dom_ready, finish_loaded = record.finish_loaded, "lifecycle updated");
            }
            changed
        });
    }

    /// Copy of the current record
    pub fn snapshot(&self) -> LifecycleRecord {
        self.state.borrow().clone()
    }

    /// Watch the record for changes
    pub fn subscribe(&self) -> watch::Receiver<LifecycleRecord> {
        self.state.subscribe()
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}
