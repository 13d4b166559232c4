//! Mutation-driven reconciliation
//!
//! A `MutationReconciler` owns one observer on one subtree. Every pass reads
//! a snapshot of the subtree, derives the injected state from it (possibly
//! asynchronously) and writes that state back. Writes go through
//! `Document::write_as`, so the reconciler never wakes itself up, and
//! implementations diff before writing, so re-running a pass on unchanged
//! input changes nothing.
//!
//! The loop ends when the document goes away, when the watched subtree is
//! detached from the document or when the page tears down.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{Interval, MissedTickBehavior};

use crate::dom::{Document, Dom, MutationObserver, NodeId, ObserveOptions};
use crate::lifecycle::{fired_or_never, PageLifecycle, TeardownReason};
use crate::Result;

/// Read, derive, write
pub trait Reconcile: Send {
    /// Plain data copied out of the document
    type Snapshot: Send;
    /// What to write back
    type Update: Send;

    /// Copy what the pass needs out of the subtree under `root`.
    /// `None` skips the pass.
    fn snapshot(&mut self, dom: &Dom, root: NodeId) -> Option<Self::Snapshot>;

    /// Turn a snapshot into an update. Runs without holding the document.
    fn derive<'a>(&'a mut self, snapshot: Self::Snapshot) -> BoxFuture<'a, Self::Update>;

    /// Write the update; returns how many nodes actually changed
    fn apply(&mut self, dom: &mut Dom, root: NodeId, update: Self::Update) -> Result<usize>;
}

/// Why a reconciler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DocumentDropped,
    Detached,
    Teardown(TeardownReason),
}

/// Counters for one `run`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub passes: u64,
    pub writes: u64,
    pub batches: u64,
    pub ticks: u64,
    pub failed_passes: u64,
    pub stopped: Option<StopReason>,
}

enum Event {
    Batch(bool),
    Structure(bool),
    Tick,
    Teardown(TeardownReason),
}

pub struct MutationReconciler<R: Reconcile> {
    doc: Document,
    root: NodeId,
    reconcile: R,
    observer: MutationObserver,
    /// structural changes anywhere, to notice `root` being detached
    structure: MutationObserver,
    sample_every: Option<Duration>,
    lifecycle: Option<PageLifecycle>,
    report: ReconcileReport,
}

impl<R: Reconcile> MutationReconciler<R> {
    /// Attach to `root` right away so no mutation after this call is missed
    pub fn new(doc: Document, root: NodeId, reconcile: R, options: ObserveOptions) -> Result<Self> {
        let observer = doc.observe(root, options)?;
        let structure = doc.observe(doc.root(), ObserveOptions::subtree_child_list())?;
        Ok(MutationReconciler {
            doc,
            root,
            reconcile,
            observer,
            structure,
            sample_every: None,
            lifecycle: None,
            report: ReconcileReport::default(),
        })
    }

    /// Also run a pass every `period`, for values that change with time alone
    pub fn with_sampling(mut self, period: Duration) -> Self {
        self.sample_every = (!period.is_zero()).then_some(period);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: PageLifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn reconcile(&self) -> &R {
        &self.reconcile
    }

    pub fn report(&self) -> &ReconcileReport {
        &self.report
    }

    /// One read/derive/write cycle. Returns the number of changed nodes.
    pub async fn pass(&mut self) -> Result<usize> {
        self.report.passes += 1;
        let root = self.root;
        let reconcile = &mut self.reconcile;
        let snapshot = self
            .doc
            .read(|dom| if dom.is_connected(root) { reconcile.snapshot(dom, root) } else { None });
        let Some(snapshot) = snapshot else {
            return Ok(0);
        };

        let update = reconcile.derive(snapshot).await;

        let writes = self.doc.write_as(&self.observer, |dom| {
            // the host may have detached the subtree while we were deriving
            if !dom.is_connected(root) {
                return Ok(0);
            }
            reconcile.apply(dom, root, update)
        })?;
        self.report.writes += writes as u64;
        log::debug!("reconcile pass {} on {:?}: {} writes", self.report.passes, root, writes);
        Ok(writes)
    }

    async fn pass_logged(&mut self) {
        if let Err(e) = self.pass().await {
            self.report.failed_passes += 1;
            log::warn!("reconcile pass on {:?} failed: {}", self.root, e);
        }
    }

    fn attached(&self) -> bool {
        let root = self.root;
        self.doc.read(|dom| dom.is_connected(root))
    }

    /// Reconcile once, then on every mutation batch and sampling tick until
    /// a stop condition. Failed passes are logged and the loop continues.
    pub async fn run(mut self) -> ReconcileReport {
        let mut teardown = self.lifecycle.as_ref().map(PageLifecycle::signal);
        let mut ticker = self.sample_every.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        if let Some(interval) = ticker.as_mut() {
            // the first tick completes immediately; the initial pass covers it
            interval.reset();
        }

        if let Some(lifecycle) = &self.lifecycle {
            if lifecycle.is_torn_down() {
                let reason = lifecycle.signal().fired().await;
                return self.stop(StopReason::Teardown(reason));
            }
        }
        if !self.attached() {
            return self.stop(StopReason::Detached);
        }
        self.pass_logged().await;

        loop {
            let event = tokio::select! {
                batch = self.observer.next_batch() => Event::Batch(batch.is_some()),
                batch = self.structure.next_batch() => Event::Structure(batch.is_some()),
                _ = tick_or_never(&mut ticker) => Event::Tick,
                reason = fired_or_never(&mut teardown) => Event::Teardown(reason),
            };

            match event {
                Event::Batch(false) | Event::Structure(false) => return self.stop(StopReason::DocumentDropped),
                Event::Teardown(reason) => return self.stop(StopReason::Teardown(reason)),
                Event::Structure(true) => {
                    if !self.attached() {
                        return self.stop(StopReason::Detached);
                    }
                }
                Event::Batch(true) => {
                    self.report.batches += 1;
                    if !self.attached() {
                        return self.stop(StopReason::Detached);
                    }
                    self.pass_logged().await;
                }
                Event::Tick => {
                    self.report.ticks += 1;
                    if !self.attached() {
                        return self.stop(StopReason::Detached);
                    }
                    self.pass_logged().await;
                }
            }
        }
    }

    fn stop(mut self, reason: StopReason) -> ReconcileReport {
        log::debug!("reconciler on {:?} stopped: {:?}", self.root, reason);
        self.report.stopped = Some(reason);
        // observers disconnect when `self` drops here
        self.report.clone()
    }
}

/// Give `parent` exactly one `<tag class="class">` child showing `text`, or
/// none when `text` is `None`. Returns how many nodes changed.
pub fn sync_decoration(
    dom: &mut Dom,
    parent: NodeId,
    tag: &str,
    class: &str,
    text: Option<&str>,
    attrs: &[(&str, &str)],
) -> Result<usize> {
    let existing = dom.child_with_class(parent, class);
    let Some(text) = text else {
        return match existing {
            Some(node) => {
                dom.remove(node)?;
                Ok(1)
            }
            None => Ok(0),
        };
    };

    let mut writes = 0;
    let node = match existing {
        Some(node) => node,
        None => {
            // built detached so the host sees a single insertion
            let node = dom.create_element(tag);
            dom.set_attr(node, "class", class)?;
            writes += 1;
            node
        }
    };
    for (name, value) in attrs {
        writes += dom.set_attr(node, name, value)? as usize;
    }
    writes += dom.set_text(node, text)? as usize;
    if existing.is_none() {
        dom.append_child(parent, node)?;
    }
    Ok(writes)
}

async fn tick_or_never(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
