//! Observable in-memory document
//!
//! `Document` is a cheaply cloneable handle to a node arena. It stands in for
//! the live page: the host mutates it, our code queries it, and
//! `MutationObserver`s receive batches of `MutationRecord`s for the subtrees
//! they watch. Writes performed through `Document::write_as` are not reported
//! back to the observer that made them.

pub mod selector;

pub use selector::Selector;

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

const VOID_ELEMENTS: &[&str] = &["area", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr"];

/// Index of a node in its document's arena. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Element { tag: String, attrs: BTreeMap<String, String> },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// What changed
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    ChildList { added: Vec<NodeId>, removed: Vec<NodeId> },
    Attributes { name: String, old_value: Option<String> },
    CharacterData { old_value: String },
}

/// One change to one node
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

/// Which changes an observer wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObserveOptions {
    pub subtree: bool,
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
}

impl ObserveOptions {
    /// Everything under the target
    pub fn all() -> Self {
        ObserveOptions { subtree: true, child_list: true, attributes: true, character_data: true }
    }

    /// Structural changes anywhere under the target
    pub fn subtree_child_list() -> Self {
        ObserveOptions { subtree: true, child_list: true, ..Default::default() }
    }

    fn wants(&self, kind: &MutationKind) -> bool {
        match kind {
            MutationKind::ChildList { .. } => self.child_list,
            MutationKind::Attributes { .. } => self.attributes,
            MutationKind::CharacterData { .. } => self.character_data,
        }
    }
}

struct ObserverEntry {
    target: NodeId,
    options: ObserveOptions,
    buffer: Vec<MutationRecord>,
    tx: mpsc::UnboundedSender<Vec<MutationRecord>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, ObserverEntry>,
}

/// The node arena. Reached through `Document::read` / `Document::write`.
pub struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    registry: Arc<Mutex<Registry>>,
    suppressed: Option<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dom {
    fn new(registry: Arc<Mutex<Registry>>) -> Self {
        let root = Node {
            kind: NodeKind::Element { tag: "html".into(), attrs: BTreeMap::new() },
            parent: None,
            children: Vec::new(),
        };
        Dom { nodes: vec![root], root: NodeId(0), registry, suppressed: None }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn checked(&self, id: NodeId) -> Result<&Node> {
        self.node(id).ok_or_else(|| Error::InvalidArgument(format!("unknown node {:?}", id)))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Tag name, or `None` for text nodes
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag(id).is_some()
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            NodeKind::Text(_) => None,
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class").is_some_and(|c| c.split_whitespace().any(|w| w == class))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    /// Direct children, text nodes included
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Direct element children
    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id).iter().copied().filter(|c| self.is_element(*c)).collect()
    }

    /// Whether the node is attached under the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.is_inclusive_ancestor(self.root, id)
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.parent(node) {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    /// Concatenated text of the node and its descendants
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::Text(t)) => out.push_str(t),
            Some(NodeKind::Element { .. }) => {
                for c in self.children(id) {
                    self.collect_text(*c, out);
                }
            }
            None => {}
        }
    }

    /// Elements under `scope` (inclusive) in document order
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![scope];
        while let Some(id) = stack.pop() {
            if !self.is_element(id) {
                continue;
            }
            out.push(id);
            for c in self.children(id).iter().rev() {
                stack.push(*c);
            }
        }
        out
    }

    pub fn select_first(&self, selector: &Selector, scope: NodeId) -> Option<NodeId> {
        self.descendants(scope).into_iter().find(|n| selector.matches(self, *n))
    }

    pub fn select_all(&self, selector: &Selector, scope: NodeId) -> Vec<NodeId> {
        self.descendants(scope).into_iter().filter(|n| selector.matches(self, *n)).collect()
    }

    /// First element child of `parent` carrying `class`
    pub fn child_with_class(&self, parent: NodeId, class: &str) -> Option<NodeId> {
        self.children(parent).iter().copied().find(|c| self.has_class(*c, class))
    }

    // --- mutation -------------------------------------------------------

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node { kind, parent: None, children: Vec::new() });
        NodeId(self.nodes.len() - 1)
    }

    /// A detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element { tag: tag.to_ascii_lowercase(), attrs: BTreeMap::new() })
    }

    /// A detached text node
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    /// Append `child` to `parent`, moving it if it is attached elsewhere
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.checked(child)?;
        if !self.is_element(parent) {
            return Err(Error::InvalidArgument(format!("{:?} cannot have children", parent)));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(Error::InvalidArgument("append would create a cycle".into()));
        }
        if self.parent(child).is_some() {
            self.remove(child)?;
        }
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        self.record(parent, MutationKind::ChildList { added: vec![child], removed: vec![] });
        Ok(())
    }

    /// Detach `id` from its parent; detached nodes are left alone
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        self.checked(id)?;
        if id == self.root {
            return Err(Error::InvalidArgument("cannot remove the document root".into()));
        }
        let Some(parent) = self.nodes[id.0].parent.take() else { return Ok(()) };
        self.nodes[parent.0].children.retain(|c| *c != id);
        self.record(parent, MutationKind::ChildList { added: vec![], removed: vec![id] });
        Ok(())
    }

    /// Set an attribute; returns whether anything changed
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<bool> {
        let old = match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element { attrs, .. }) => {
                if attrs.get(name).map(String::as_str) == Some(value) {
                    return Ok(false);
                }
                attrs.insert(name.to_string(), value.to_string())
            }
            _ => return Err(Error::InvalidArgument(format!("{:?} is not an element", id))),
        };
        self.record(id, MutationKind::Attributes { name: name.to_string(), old_value: old });
        Ok(true)
    }

    /// Remove an attribute; returns whether it was present
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<bool> {
        let old = match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs.remove(name),
            _ => return Err(Error::InvalidArgument(format!("{:?} is not an element", id))),
        };
        match old {
            Some(old) => {
                self.record(id, MutationKind::Attributes { name: name.to_string(), old_value: Some(old) });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the node's text; a no-op when the text is already `text`.
    ///
    /// For elements this leaves a single text child (or none for `""`).
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<bool> {
        let node = self.checked(id)?;
        let children = node.children.clone();
        if let NodeKind::Text(current) = &mut self.nodes[id.0].kind {
            if current.as_str() == text {
                return Ok(false);
            }
            let old_value = std::mem::replace(current, text.to_string());
            self.record(id, MutationKind::CharacterData { old_value });
            return Ok(true);
        }

        let already = match children.as_slice() {
            [] => text.is_empty(),
            [only] => matches!(&self.nodes[only.0].kind, NodeKind::Text(t) if t == text),
            _ => false,
        };
        if already {
            return Ok(false);
        }

        for c in &children {
            self.nodes[c.0].parent = None;
        }
        self.nodes[id.0].children.clear();
        let mut added = Vec::new();
        if !text.is_empty() {
            let t = self.create_text(text);
            self.nodes[id.0].children.push(t);
            self.nodes[t.0].parent = Some(id);
            added.push(t);
        }
        self.record(id, MutationKind::ChildList { added, removed: children });
        Ok(true)
    }

    fn record(&mut self, target: NodeId, kind: MutationKind) {
        let registry = self.registry.clone();
        let mut registry = lock(&registry);
        let record = MutationRecord { target, kind };
        for (id, entry) in registry.entries.iter_mut() {
            if Some(*id) == self.suppressed || !entry.options.wants(&record.kind) {
                continue;
            }
            let in_scope = if entry.options.subtree {
                self.is_inclusive_ancestor(entry.target, target)
            } else {
                entry.target == target
            };
            if in_scope {
                entry.buffer.push(record.clone());
            }
        }
    }

    // --- serialization --------------------------------------------------

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for c in self.children(id) {
            self.write_html(*c, &mut out);
        }
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        match &node.kind {
            NodeKind::Text(t) => escape_into(t, false, out),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (k, v) in attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    escape_into(v, true, out);
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                for c in &node.children {
                    self.write_html(*c, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn escape_into(s: &str, attr: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attr => out.push_str("&lt;"),
            '>' if !attr => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

/// Shared handle to a document
#[derive(Clone)]
pub struct Document {
    dom: Arc<Mutex<Dom>>,
    registry: Arc<Mutex<Registry>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document with a bare `<html>` root
    pub fn new() -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        Document { dom: Arc::new(Mutex::new(Dom::new(registry.clone()))), registry }
    }

    /// Import markup parsed by scraper. Whitespace-only text is dropped.
    pub fn parse_html(html: &str) -> Self {
        let parsed = scraper::Html::parse_document(html);
        let doc = Document::new();
        doc.write(|dom| {
            let source_root = parsed.root_element();
            if let NodeKind::Element { attrs, .. } = &mut dom.nodes[0].kind {
                for (k, v) in source_root.value().attrs() {
                    attrs.insert(k.to_string(), v.to_string());
                }
            }
            let root = dom.root;
            import_children(dom, source_root, root);
        });
        doc
    }

    /// Run `f` with shared access to the node arena
    pub fn read<R>(&self, f: impl FnOnce(&Dom) -> R) -> R {
        f(&lock(&self.dom))
    }

    /// Run `f` with exclusive access and deliver the resulting records
    pub fn write<R>(&self, f: impl FnOnce(&mut Dom) -> R) -> R {
        let out = {
            let mut dom = lock(&self.dom);
            f(&mut dom)
        };
        self.flush();
        out
    }

    /// Like `write`, but `observer` is not told about these changes
    pub fn write_as<R>(&self, observer: &MutationObserver, f: impl FnOnce(&mut Dom) -> R) -> R {
        let out = {
            let mut dom = lock(&self.dom);
            dom.suppressed = Some(observer.id);
            let out = f(&mut dom);
            dom.suppressed = None;
            out
        };
        self.flush();
        out
    }

    fn flush(&self) {
        let mut registry = lock(&self.registry);
        registry.entries.retain(|_, entry| {
            if entry.buffer.is_empty() {
                return !entry.tx.is_closed();
            }
            let batch = std::mem::take(&mut entry.buffer);
            entry.tx.send(batch).is_ok()
        });
    }

    /// Start observing `target`. Dropping the returned handle disconnects it.
    pub fn observe(&self, target: NodeId, options: ObserveOptions) -> Result<MutationObserver> {
        self.read(|dom| dom.checked(target).map(|_| ()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.insert(id, ObserverEntry { target, options, buffer: Vec::new(), tx });
        Ok(MutationObserver { id, target, registry: Arc::downgrade(&self.registry), rx })
    }

    /// Observers currently connected
    pub fn observer_count(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn root(&self) -> NodeId {
        self.read(|dom| dom.root)
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let sel = Selector::parse(selector)?;
        Ok(self.read(|dom| dom.select_first(&sel, dom.root)))
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let sel = Selector::parse(selector)?;
        Ok(self.read(|dom| dom.select_all(&sel, dom.root)))
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.read(|dom| dom.text_content(id))
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.read(|dom| dom.attr(id, name).map(str::to_string))
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        self.read(|dom| dom.outer_html(id))
    }

    /// Markup of the whole document
    pub fn html(&self) -> String {
        self.read(|dom| dom.outer_html(dom.root))
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.write(|dom| dom.create_element(tag))
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.write(|dom| dom.append_child(parent, child))
    }

    pub fn remove(&self, id: NodeId) -> Result<()> {
        self.write(|dom| dom.remove(id))
    }

    pub fn set_attr(&self, id: NodeId, name: &str, value: &str) -> Result<bool> {
        self.write(|dom| dom.set_attr(id, name, value))
    }

    pub fn set_text(&self, id: NodeId, text: &str) -> Result<bool> {
        self.write(|dom| dom.set_text(id, text))
    }

    /// Parse `html` and append the resulting elements to `parent`
    pub fn append_html(&self, parent: NodeId, html: &str) -> Result<Vec<NodeId>> {
        let fragment = scraper::Html::parse_fragment(html);
        self.write(|dom| {
            if !dom.is_element(parent) {
                return Err(Error::InvalidArgument(format!("{:?} cannot have children", parent)));
            }
            let holder = dom.create_element("template");
            import_children(dom, fragment.root_element(), holder);
            let added = dom.children(holder).to_vec();
            for c in &added {
                dom.append_child(parent, *c)?;
            }
            Ok(added)
        })
    }
}

fn import_children(dom: &mut Dom, source: scraper::ElementRef<'_>, parent: NodeId) {
    for child in source.children() {
        if let Some(el) = scraper::ElementRef::wrap(child) {
            let id = dom.create_element(el.value().name());
            if let NodeKind::Element { attrs, .. } = &mut dom.nodes[id.0].kind {
                for (k, v) in el.value().attrs() {
                    attrs.insert(k.to_string(), v.to_string());
                }
            }
            dom.nodes[parent.0].children.push(id);
            dom.nodes[id.0].parent = Some(parent);
            import_children(dom, el, id);
        } else if let Some(text) = child.value().as_text() {
            let text: &str = &text.text;
            if !text.trim().is_empty() {
                let id = dom.create_text(text);
                dom.nodes[parent.0].children.push(id);
                dom.nodes[id.0].parent = Some(parent);
            }
        }
    }
}

/// Receives mutation batches for one observed node.
///
/// The registration is removed when the handle is dropped, on every path.
pub struct MutationObserver {
    id: u64,
    target: NodeId,
    registry: Weak<Mutex<Registry>>,
    rx: mpsc::UnboundedReceiver<Vec<MutationRecord>>,
}

impl MutationObserver {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Wait for the next batch, merging any further batches already queued.
    /// Returns `None` once the document is gone.
    pub async fn next_batch(&mut self) -> Option<Vec<MutationRecord>> {
        let mut batch = self.rx.recv().await?;
        while let Ok(more) = self.rx.try_recv() {
            batch.extend(more);
        }
        Some(batch)
    }

    /// Drain queued records without waiting
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        let mut out = Vec::new();
        while let Ok(more) = self.rx.try_recv() {
            out.extend(more);
        }
        out
    }

    pub fn disconnect(self) {}
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_serializes() {
        let doc = Document::parse_html("<html lang=\"en\"><body><p class=\"a\">x &amp; y</p><br></body></html>");
        assert_eq!(
            doc.html(),
            "<html lang=\"en\"><head></head><body><p class=\"a\">x &amp; y</p><br></body></html>"
        );
    }

    #[test]
    fn set_text_is_idempotent() {
        let doc = Document::parse_html("<body><span id=s>old</span></body>");
        let s = doc.query_selector("#s").unwrap().unwrap();
        assert!(doc.set_text(s, "new").unwrap());
        assert!(!doc.set_text(s, "new").unwrap());
        assert_eq!(doc.text_content(s), "new");
        assert!(doc.set_text(s, "").unwrap());
        assert!(!doc.set_text(s, "").unwrap());
        assert_eq!(doc.outer_html(s), "<span id=\"s\"></span>");
    }

    #[test]
    fn set_attr_skips_unchanged_values() {
        let doc = Document::parse_html("<body><a id=l href=\"/x\"></a></body>");
        let a = doc.query_selector("#l").unwrap().unwrap();
        assert!(!doc.set_attr(a, "href", "/x").unwrap());
        assert!(doc.set_attr(a, "href", "/y").unwrap());
        assert!(doc.write(|d| d.remove_attr(a, "href")).unwrap());
        assert!(!doc.write(|d| d.remove_attr(a, "href")).unwrap());
    }

    #[test]
    fn append_rejects_cycles_and_text_parents() {
        let doc = Document::parse_html("<body><div id=a><div id=b></div></div></body>");
        let a = doc.query_selector("#a").unwrap().unwrap();
        let b = doc.query_selector("#b").unwrap().unwrap();
        assert!(doc.append_child(b, a).is_err());
        let t = doc.write(|d| d.create_text("t"));
        assert!(doc.append_child(t, b).is_err());
        assert!(doc.remove(doc.root()).is_err());
    }

    #[test]
    fn moving_a_node_detaches_it_first() {
        let doc = Document::parse_html("<body><ul id=a><li id=x></li></ul><ul id=b></ul></body>");
        let x = doc.query_selector("#x").unwrap().unwrap();
        let b = doc.query_selector("#b").unwrap().unwrap();
        doc.append_child(b, x).unwrap();
        assert_eq!(doc.query_selector_all("#a li").unwrap().len(), 0);
        assert_eq!(doc.query_selector_all("#b > li").unwrap(), vec![x]);
    }

    #[tokio::test]
    async fn observers_see_subtree_mutations_in_order() {
        let doc = Document::parse_html("<body><ul id=lb><li id=r1>a</li></ul><p id=out></p></body>");
        let lb = doc.query_selector("#lb").unwrap().unwrap();
        let r1 = doc.query_selector("#r1").unwrap().unwrap();
        let out = doc.query_selector("#out").unwrap().unwrap();
        let mut obs = doc.observe(lb, ObserveOptions::all()).unwrap();

        doc.set_attr(r1, "class", "first").unwrap();
        doc.set_text(r1, "b").unwrap();
        doc.set_text(out, "elsewhere").unwrap();

        let batch = obs.next_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch[0].kind, MutationKind::Attributes { .. }));
        assert!(matches!(batch[1].kind, MutationKind::ChildList { .. }));
        assert!(obs.take_records().is_empty());
    }

    #[test]
    fn options_filter_record_kinds() {
        let doc = Document::parse_html("<body><ul id=lb><li id=r1>a</li></ul></body>");
        let lb = doc.query_selector("#lb").unwrap().unwrap();
        let r1 = doc.query_selector("#r1").unwrap().unwrap();
        let mut shallow = doc.observe(lb, ObserveOptions { child_list: true, ..Default::default() }).unwrap();
        doc.set_text(r1, "b").unwrap();
        doc.set_attr(lb, "class", "x").unwrap();
        assert!(shallow.take_records().is_empty());
        let li = doc.create_element("li");
        doc.append_child(lb, li).unwrap();
        assert_eq!(shallow.take_records().len(), 1);
    }

    #[test]
    fn write_as_hides_own_changes_only() {
        let doc = Document::parse_html("<body><ul id=lb><li id=r1>a</li></ul></body>");
        let lb = doc.query_selector("#lb").unwrap().unwrap();
        let r1 = doc.query_selector("#r1").unwrap().unwrap();
        let mut mine = doc.observe(lb, ObserveOptions::all()).unwrap();
        let mut theirs = doc.observe(lb, ObserveOptions::all()).unwrap();

        doc.write_as(&mine, |d| d.set_text(r1, "ours")).unwrap();
        assert!(mine.take_records().is_empty());
        assert_eq!(theirs.take_records().len(), 1);

        doc.set_text(r1, "host").unwrap();
        assert_eq!(mine.take_records().len(), 1);
    }

    #[test]
    fn dropping_an_observer_disconnects_it() {
        let doc = Document::new();
        let obs = doc.observe(doc.root(), ObserveOptions::all()).unwrap();
        let other = doc.observe(doc.root(), ObserveOptions::all()).unwrap();
        assert_eq!(doc.observer_count(), 2);
        drop(obs);
        assert_eq!(doc.observer_count(), 1);
        other.disconnect();
        assert_eq!(doc.observer_count(), 0);
    }

    #[test]
    fn append_html_imports_fragment() {
        let doc = Document::parse_html("<body><ul id=lb></ul></body>");
        let lb = doc.query_selector("#lb").unwrap().unwrap();
        let added = doc.append_html(lb, "<li data-driver-id=\"7\"><span class=\"name\">Cy</span></li>").unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(doc.query_selector("li[data-driver-id='7'] .name").unwrap().map(|n| doc.text_content(n)), Some("Cy".into()));
    }
}
