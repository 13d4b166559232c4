//! CSS selectors over the node arena
//!
//! Parsing is scraper's; matching runs through `selectors::Element`
//! implemented for a borrowed arena element, the way scraper does it for
//! `ElementRef`.

use std::fmt;

use html5ever::{LocalName, Namespace};
use scraper::selector::{NonTSPseudoClass, PseudoElement, Simple};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::{matching, Element, OpaqueElement};

use super::{Dom, NodeId};
use crate::{Error, Result};

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// A parsed selector group
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    inner: scraper::Selector,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self> {
        scraper::Selector::parse(input)
            .map(|inner| Selector { inner })
            .map_err(|e| Error::InvalidArgument(format!("invalid selector '{}': {:?}", input, e.kind)))
    }

    /// Whether `node` (an element) matches any selector in the group
    pub fn matches(&self, dom: &Dom, node: NodeId) -> bool {
        let Some(element) = ArenaElement::wrap(dom, node) else {
            return false;
        };
        let mut context =
            matching::MatchingContext::new(matching::MatchingMode::Normal, None, None, matching::QuirksMode::NoQuirks);
        self.inner
            .selectors
            .iter()
            .any(|s| matching::matches_selector(s, 0, None, &element, &mut context, &mut |_, _| {}))
    }
}

/// An element of a `Dom`, borrowed for matching
#[derive(Clone, Copy)]
struct ArenaElement<'a> {
    dom: &'a Dom,
    id: NodeId,
}

impl fmt::Debug for ArenaElement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaElement({:?} <{}>)", self.id, self.dom.tag(self.id).unwrap_or_default())
    }
}

impl<'a> ArenaElement<'a> {
    fn wrap(dom: &'a Dom, id: NodeId) -> Option<Self> {
        dom.is_element(id).then_some(ArenaElement { dom, id })
    }

    fn sibling_element(&self, step: isize) -> Option<Self> {
        let parent = self.dom.parent(self.id)?;
        let siblings = self.dom.children(parent);
        let mut at = siblings.iter().position(|c| *c == self.id)? as isize;
        loop {
            at += step;
            let id = *siblings.get(usize::try_from(at).ok()?)?;
            if let Some(el) = ArenaElement::wrap(self.dom, id) {
                return Some(el);
            }
        }
    }
}

impl Element for ArenaElement<'_> {
    type Impl = Simple;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(&self.dom.nodes[self.id.0])
    }

    fn parent_element(&self) -> Option<Self> {
        self.dom.parent(self.id).and_then(|p| ArenaElement::wrap(self.dom, p))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.sibling_element(-1)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.sibling_element(1)
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, name: &LocalName) -> bool {
        self.dom.tag(self.id) == Some(&**name)
    }

    fn has_namespace(&self, ns: &Namespace) -> bool {
        &**ns == HTML_NS
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.dom.tag(self.id) == other.dom.tag(other.id)
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&Namespace>,
        local_name: &LocalName,
        operation: &AttrSelectorOperation<&String>,
    ) -> bool {
        if matches!(*ns, NamespaceConstraint::Specific(url) if !url.is_empty()) {
            return false;
        }
        self.dom.attr(self.id, local_name).is_some_and(|value| operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class<F>(
        &self,
        _pc: &NonTSPseudoClass,
        _context: &mut matching::MatchingContext<Self::Impl>,
        _flags_setter: &mut F,
    ) -> bool {
        false
    }

    fn match_pseudo_element(&self, _pe: &PseudoElement, _context: &mut matching::MatchingContext<Self::Impl>) -> bool {
        false
    }

    fn is_link(&self) -> bool {
        self.dom.tag(self.id) == Some("a") && self.dom.attr(self.id, "href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &LocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.dom.attr(self.id, "id").is_some_and(|v| case_sensitivity.eq(id.as_bytes(), v.as_bytes()))
    }

    fn has_class(&self, name: &LocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.dom
            .attr(self.id, "class")
            .is_some_and(|c| c.split_whitespace().any(|w| case_sensitivity.eq(name.as_bytes(), w.as_bytes())))
    }

    fn exported_part(&self, _: &LocalName) -> Option<LocalName> {
        None
    }

    fn imported_part(&self, _: &LocalName) -> Option<LocalName> {
        None
    }

    fn is_part(&self, _name: &LocalName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.dom.children(self.id).is_empty()
    }

    fn is_root(&self) -> bool {
        self.id == self.dom.root()
    }
}
