//! Progress-bar consumer
//!
//! Host progress indicators carry their value only in an attribute such as
//! `aria-label="Progress: 42.50%"`. Each pass mirrors that value into a
//! `data-level` attribute and a visible `span.rw-health` child.

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::dom::{Dom, NodeId, Selector};
use crate::reconciler::{sync_decoration, Reconcile};
use crate::Result;

pub const HEALTH_CLASS: &str = "rw-health";
pub const LEVEL_ATTR: &str = "data-level";

const LABEL_PREFIX: &str = "Progress:";

/// `"Progress: NN.NN%"` to a percentage
pub fn parse_progress_label(label: &str) -> Option<f64> {
    let rest = label.trim().strip_prefix(LABEL_PREFIX)?;
    let pct: f64 = rest.trim().strip_suffix('%')?.trim().parse().ok()?;
    (pct.is_finite() && (0.0..=100.0).contains(&pct)).then_some(pct)
}

/// Bucket for styling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Low,
    Mid,
    High,
}

impl HealthLevel {
    pub fn from_percent(pct: f64) -> Self {
        if pct < 25.0 {
            HealthLevel::Low
        } else if pct < 60.0 {
            HealthLevel::Mid
        } else {
            HealthLevel::High
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthLevel::Low => "low",
            HealthLevel::Mid => "mid",
            HealthLevel::High => "high",
        }
    }
}

pub struct HealthBarReconciler {
    bars: Selector,
}

impl HealthBarReconciler {
    pub fn new() -> Result<Self> {
        Self::with_selector(&format!("[aria-label^='{}']", LABEL_PREFIX))
    }

    pub fn with_selector(selector: &str) -> Result<Self> {
        Ok(HealthBarReconciler { bars: Selector::parse(selector)? })
    }
}

impl Reconcile for HealthBarReconciler {
    type Snapshot = Vec<(NodeId, Option<f64>)>;
    type Update = Vec<(NodeId, Option<f64>)>;

    fn snapshot(&mut self, dom: &Dom, root: NodeId) -> Option<Self::Snapshot> {
        let bars: Vec<_> = dom
            .select_all(&self.bars, root)
            .into_iter()
            .map(|bar| (bar, dom.attr(bar, "aria-label").and_then(parse_progress_label)))
            .collect();
        (!bars.is_empty()).then_some(bars)
    }

    fn derive<'a>(&'a mut self, snapshot: Self::Snapshot) -> BoxFuture<'a, Self::Update> {
        futures::future::ready(snapshot).boxed()
    }

    fn apply(&mut self, dom: &mut Dom, _root: NodeId, update: Self::Update) -> Result<usize> {
        let mut writes = 0;
        for (bar, pct) in update {
            match pct {
                Some(pct) => {
                    writes += dom.set_attr(bar, LEVEL_ATTR, HealthLevel::from_percent(pct).as_str())? as usize;
                    let text = format!("{:.2}%", pct);
                    writes += sync_decoration(dom, bar, "span", HEALTH_CLASS, Some(text.as_str()), &[])?;
                }
                None => {
                    writes += dom.remove_attr(bar, LEVEL_ATTR)? as usize;
                    writes += sync_decoration(dom, bar, "span", HEALTH_CLASS, None, &[])?;
                }
            }
        }
        Ok(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, ObserveOptions};
    use crate::reconciler::MutationReconciler;

    #[test]
    fn labels() {
        assert_eq!(parse_progress_label("Progress: 42.50%"), Some(42.5));
        assert_eq!(parse_progress_label("Progress:100%"), Some(100.0));
        assert_eq!(parse_progress_label("Progress: 142%"), None);
        assert_eq!(parse_progress_label("Loading"), None);
        assert_eq!(parse_progress_label("Progress: 42.5"), None);
    }

    #[test]
    fn levels() {
        assert_eq!(HealthLevel::from_percent(10.0), HealthLevel::Low);
        assert_eq!(HealthLevel::from_percent(25.0), HealthLevel::Mid);
        assert_eq!(HealthLevel::from_percent(60.0), HealthLevel::High);
    }

    #[tokio::test]
    async fn mirrors_the_label_and_follows_changes() {
        let doc = Document::parse_html(r#"<body><div id=hp><div class=bar aria-label="Progress: 80.00%"></div></div></body>"#);
        let hp = doc.query_selector("#hp").unwrap().unwrap();
        let bar = doc.query_selector(".bar").unwrap().unwrap();
        let mut r = MutationReconciler::new(doc.clone(), hp, HealthBarReconciler::new().unwrap(), ObserveOptions::all())
            .unwrap();

        assert!(r.pass().await.unwrap() > 0);
        assert_eq!(
            doc.outer_html(bar),
            r#"<div aria-label="Progress: 80.00%" class="bar" data-level="high"><span class="rw-health">80.00%</span></div>"#
        );
        assert_eq!(r.pass().await.unwrap(), 0);

        doc.set_attr(bar, "aria-label", "Progress: 12.34%").unwrap();
        r.pass().await.unwrap();
        assert_eq!(doc.attr(bar, LEVEL_ATTR).as_deref(), Some("low"));
        assert_eq!(doc.text_content(bar), "12.34%");

        doc.set_attr(bar, "aria-label", "Progress: ???").unwrap();
        r.pass().await.unwrap();
        assert_eq!(doc.attr(bar, LEVEL_ATTR), None);
        assert_eq!(doc.text_content(bar), "");
    }
}
