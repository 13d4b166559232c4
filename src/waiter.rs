//! Deferred element resolution
//!
//! `ElementWaiter::defer` resolves once a selector matches in the document.
//! A match that already exists resolves immediately without attaching an
//! observer; otherwise every mutation batch re-runs the check until a
//! wall-clock deadline passes. The deadline does not depend on how often the
//! page mutates, so a page that goes quiet still times out on schedule.

use crate::dom::{Document, Dom, NodeId, ObserveOptions, Selector};
use crate::lifecycle::{fired_or_never, PageLifecycle};
use crate::{Error, Result, WaiterConfig};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
enum WaitState {
    Pending,
    Resolved,
    TimedOut,
    Cancelled,
}

/// Bookkeeping for one deferral, used for diagnostics
struct WaitTask<'a> {
    selector: &'a str,
    checks: u32,
    started: Instant,
    state: WaitState,
}

impl<'a> WaitTask<'a> {
    fn new(selector: &'a str) -> Self {
        WaitTask { selector, checks: 1, started: Instant::now(), state: WaitState::Pending }
    }

    fn finish(&mut self, state: WaitState) {
        self.state = state;
        log::debug!(
            "defer '{}' -> {:?} after {} checks in {}ms",
            self.selector,
            self.state,
            self.checks,
            self.started.elapsed().as_millis()
        );
    }
}

/// Waits for elements to appear in a document
#[derive(Clone)]
pub struct ElementWaiter {
    doc: Document,
    timeout: Duration,
    lifecycle: Option<PageLifecycle>,
}

impl ElementWaiter {
    pub fn new(doc: Document, config: &WaiterConfig) -> Self {
        ElementWaiter { doc, timeout: Duration::from_millis(config.timeout_ms), lifecycle: None }
    }

    /// Abandon pending deferrals when the page tears down
    pub fn with_lifecycle(mut self, lifecycle: PageLifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// First element matching `selector`
    pub async fn defer(&self, selector: &str) -> Result<NodeId> {
        self.defer_within(selector, self.timeout).await
    }

    /// Like `defer` with an explicit bound
    pub async fn defer_within(&self, selector: &str, timeout: Duration) -> Result<NodeId> {
        self.wait(selector, timeout, |dom, sel| dom.select_first(sel, dom.root())).await
    }

    /// All elements matching `selector`, once there is at least one
    pub async fn defer_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        self.wait(selector, self.timeout, |dom, sel| {
            let all = dom.select_all(sel, dom.root());
            (!all.is_empty()).then_some(all)
        })
        .await
    }

    async fn wait<T>(
        &self,
        selector: &str,
        timeout: Duration,
        probe: impl Fn(&Dom, &Selector) -> Option<T>,
    ) -> Result<T> {
        let sel = Selector::parse(selector)?;
        let check = || self.doc.read(|dom| probe(dom, &sel));

        if let Some(found) = check() {
            log::debug!("defer '{}' resolved immediately", selector);
            return Ok(found);
        }

        let mut task = WaitTask::new(selector);
        let deadline = task.started + timeout;
        let mut teardown = self.lifecycle.as_ref().map(PageLifecycle::signal);
        // dropped on every return below, which disconnects it
        let mut observer = self.doc.observe(
            self.doc.root(),
            ObserveOptions { subtree: true, child_list: true, attributes: true, character_data: false },
        )?;

        // a mutation may have landed between the first check and observe()
        task.checks += 1;
        if let Some(found) = check() {
            task.finish(WaitState::Resolved);
            return Ok(found);
        }

        loop {
            tokio::select! {
                batch = observer.next_batch() => {
                    if batch.is_none() {
                        task.finish(WaitState::Cancelled);
                        return Err(Error::Cancelled(format!("document dropped while waiting for '{}'", selector)));
                    }
                    task.checks += 1;
                    if let Some(found) = check() {
                        task.finish(WaitState::Resolved);
                        return Ok(found);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    task.finish(WaitState::TimedOut);
                    log::warn!("element '{}' never appeared", selector);
                    return Err(Error::DeferralTimeout {
                        selector: selector.to_string(),
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
                reason = fired_or_never(&mut teardown) => {
                    task.finish(WaitState::Cancelled);
                    return Err(Error::Cancelled(format!("page {:?} while waiting for '{}'", reason, selector)));
                }
            }
        }
    }
}
