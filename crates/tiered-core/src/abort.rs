//! Cooperative abort coordination.
//!
//! An [`AbortSignal`] is a shared flag with an attached reason. It is checked
//! before each stage is dispatched and before each task is admitted; units may
//! also poll it or await [`AbortSignal::aborted`]. Aborting is advisory: work
//! that never looks at the signal runs to completion and its result is
//! discarded downstream.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

/// Cloneable handle to one run's abort flag.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the flag. The first reason wins; returns `false` if already tripped.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let tripped = self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if tripped {
            warn!(event = "run.abort_requested", reason = %reason);
        }
        tripped
    }

    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Resolves once the flag is tripped.
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once tripped.
        let _ = rx.wait_for(|reason| reason.is_some()).await;
    }
}
