//! Page teardown signalling
//!
//! Long-lived observers and pending deferrals must stop when the page is
//! hidden, unloaded or navigated away from within a single-page session.

use std::sync::Arc;
use tokio::sync::watch;

/// Why the page is going away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Hidden,
    Unload,
    Navigation,
}

/// Owner of the teardown signal for one page
#[derive(Clone)]
pub struct PageLifecycle {
    tx: Arc<watch::Sender<Option<TeardownReason>>>,
}

impl Default for PageLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        PageLifecycle { tx: Arc::new(tx) }
    }

    /// Fire the signal. Only the first reason sticks.
    pub fn teardown(&self, reason: TeardownReason) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            log::debug!("page teardown: {:?}", reason);
            *current = Some(reason);
            true
        });
    }

    pub fn is_torn_down(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn signal(&self) -> TeardownSignal {
        TeardownSignal { rx: self.tx.subscribe() }
    }
}

/// Awaitable view of the teardown signal
pub struct TeardownSignal {
    rx: watch::Receiver<Option<TeardownReason>>,
}

impl TeardownSignal {
    /// Resolves once teardown fires; never resolves if it never does
    pub async fn fired(&mut self) -> TeardownReason {
        loop {
            if let Some(reason) = *self.rx.borrow_and_update() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// `fired()` for an optional signal; pending forever when absent
pub(crate) async fn fired_or_never(signal: &mut Option<TeardownSignal>) -> TeardownReason {
    match signal {
        Some(s) => s.fired().await,
        None => std::future::pending().await,
    }
}
