//! The columnar document store.
//!
//! Every main node (root, element, text, comment, processing instruction) is a
//! row across a set of parallel vectors indexed by [`NodeHandle`]. Attributes
//! and namespace declarations live in their own parallel vectors that point
//! back at the owning element; they only become nodes when a [`NodeRef`] view
//! is created for them.
//!
//! Rows are appended in document order by [`crate::TinyBuilder`]. Once the
//! builder finishes, the document is read-only apart from the lazily computed
//! indexes, each of which is built at most once.

use crate::namepool::{Fingerprint, NameCode, NamePool, NamespaceCode};
use crate::node::{NodeHandle, NodeId, NodeKind, NodeRef};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

pub(crate) const NONE: u32 = u32::MAX;

/// DTD type of an attribute, as far as the tree cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeType {
    #[default]
    Cdata,
    Id,
    IdRef,
    IdRefs,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnparsedEntity {
    pub system_id: String,
    pub public_id: Option<String>,
}

type ElementList = Arc<OnceCell<Arc<[NodeHandle]>>>;

pub struct TinyDocument {
    pool: Arc<NamePool>,
    document_number: u32,
    system_id: String,

    pub(crate) kind: Vec<NodeKind>,
    pub(crate) depth: Vec<u32>,
    pub(crate) next: Vec<u32>,
    /// Text/comment/PI: start in the owning buffer. Element: first attribute.
    pub(crate) offset: Vec<u32>,
    /// Text/comment/PI: length in bytes. Element: first namespace declaration.
    pub(crate) length: Vec<u32>,
    pub(crate) name_code: Vec<u32>,

    pub(crate) att_parent: Vec<u32>,
    pub(crate) att_code: Vec<NameCode>,
    pub(crate) att_value: Vec<Box<str>>,
    pub(crate) att_type: Vec<AttributeType>,

    pub(crate) ns_parent: Vec<u32>,
    pub(crate) ns_code: Vec<NamespaceCode>,
    /// Name of the namespace node: the prefix as an unqualified local name.
    pub(crate) ns_name: Vec<NameCode>,

    pub(crate) text: String,
    pub(crate) comments: String,

    line_numbers: Option<Vec<u32>>,
    id_table: HashMap<Box<str>, u32>,
    unparsed_entities: HashMap<String, UnparsedEntity>,

    prior: OnceCell<Vec<u32>>,
    element_lists: Mutex<HashMap<Fingerprint, ElementList>>,
}

impl fmt::Debug for TinyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TinyDocument")
            .field("document_number", &self.document_number)
            .field("system_id", &self.system_id)
            .field("nodes", &self.kind.len())
            .field("attributes", &self.att_code.len())
            .field("namespaces", &self.ns_code.len())
            .finish()
    }
}

impl TinyDocument {
    pub(crate) fn new(pool: Arc<NamePool>) -> Self {
        let document_number = pool.allocate_document_number();
        TinyDocument {
            pool,
            document_number,
            system_id: String::new(),
            kind: Vec::new(),
            depth: Vec::new(),
            next: Vec::new(),
            offset: Vec::new(),
            length: Vec::new(),
            name_code: Vec::new(),
            att_parent: Vec::new(),
            att_code: Vec::new(),
            att_value: Vec::new(),
            att_type: Vec::new(),
            ns_parent: Vec::new(),
            ns_code: Vec::new(),
            ns_name: Vec::new(),
            text: String::new(),
            comments: String::new(),
            line_numbers: None,
            id_table: HashMap::new(),
            unparsed_entities: HashMap::new(),
            prior: OnceCell::new(),
            element_lists: Mutex::new(HashMap::new()),
        }
    }

    // --- Construction (builder only) ---

    pub(crate) fn add_node(&mut self, kind: NodeKind, depth: u32, offset: u32, length: u32, name: u32) -> u32 {
        let nr = self.kind.len() as u32;
        self.kind.push(kind);
        self.depth.push(depth);
        self.next.push(NONE);
        self.offset.push(offset);
        self.length.push(length);
        self.name_code.push(name);
        if let Some(lines) = self.line_numbers.as_mut() {
            lines.push(0);
        }
        nr
    }

    pub(crate) fn add_attribute(&mut self, parent: u32, code: NameCode, value: &str, att_type: AttributeType) {
        self.att_parent.push(parent);
        self.att_code.push(code);
        self.att_value.push(value.into());
        self.att_type.push(att_type);
        if att_type == AttributeType::Id {
            // Only the first element carrying a given ID value is indexed.
            self.id_table.entry(value.trim().into()).or_insert(parent);
        }
    }

    pub(crate) fn add_namespace(&mut self, parent: u32, code: NamespaceCode, name: NameCode) {
        self.ns_parent.push(parent);
        self.ns_code.push(code);
        self.ns_name.push(name);
    }

    pub(crate) fn append_text(&mut self, chars: &str) -> u32 {
        let start = self.text.len() as u32;
        self.text.push_str(chars);
        start
    }

    pub(crate) fn append_comment(&mut self, chars: &str) -> u32 {
        let start = self.comments.len() as u32;
        self.comments.push_str(chars);
        start
    }

    pub(crate) fn set_system_id(&mut self, system_id: &str) {
        self.system_id = system_id.to_string();
    }

    pub(crate) fn enable_line_numbering(&mut self) {
        if self.line_numbers.is_none() {
            self.line_numbers = Some(vec![0; self.kind.len()]);
        }
    }

    pub(crate) fn set_line_number(&mut self, nr: u32, line: u32) {
        if let Some(slot) = self
            .line_numbers
            .as_mut()
            .and_then(|lines| lines.get_mut(nr as usize))
        {
            *slot = line;
        }
    }

    pub(crate) fn set_next(&mut self, nr: u32, next: u32) {
        if let Some(slot) = self.next.get_mut(nr as usize) {
            *slot = next;
        }
    }

    pub(crate) fn set_unparsed_entity(&mut self, name: &str, entity: UnparsedEntity) {
        self.unparsed_entities.insert(name.to_string(), entity);
    }

    /// Discards every main node from `nodes` onwards, together with the
    /// attributes, namespace declarations and character data they own.
    pub(crate) fn truncate(&mut self, nodes: usize) {
        // Lazy indexes may have been built over the partial tree even when
        // nothing is discarded, and later appends would leave them short.
        self.reset_indexes();
        let count = self.kind.len();
        if nodes >= count {
            return;
        }
        let tail = nodes..count;

        if let Some(i) = tail.clone().find(|&i| self.kind[i] == NodeKind::Text) {
            self.text.truncate(self.offset[i] as usize);
        }
        if let Some(i) = tail.clone().find(|&i| {
            matches!(
                self.kind[i],
                NodeKind::Comment | NodeKind::ProcessingInstruction
            )
        }) {
            self.comments.truncate(self.offset[i] as usize);
        }
        if let Some(i) = tail
            .clone()
            .find(|&i| self.kind[i] == NodeKind::Element && self.offset[i] != NONE)
        {
            let atts = self.offset[i] as usize;
            self.att_parent.truncate(atts);
            self.att_code.truncate(atts);
            self.att_value.truncate(atts);
            self.att_type.truncate(atts);
        }
        if let Some(i) = tail
            .clone()
            .find(|&i| self.kind[i] == NodeKind::Element && self.length[i] != NONE)
        {
            let decls = self.length[i] as usize;
            self.ns_parent.truncate(decls);
            self.ns_code.truncate(decls);
            self.ns_name.truncate(decls);
        }

        self.kind.truncate(nodes);
        self.depth.truncate(nodes);
        self.next.truncate(nodes);
        self.offset.truncate(nodes);
        self.length.truncate(nodes);
        self.name_code.truncate(nodes);
        if let Some(lines) = self.line_numbers.as_mut() {
            lines.truncate(nodes);
        }
        for next in self.next.iter_mut() {
            if *next as usize >= nodes && *next != NONE {
                *next = NONE;
            }
        }
        self.id_table.retain(|_, owner| (*owner as usize) < nodes);

        log::debug!("document {} truncated to {} nodes", self.document_number, nodes);
    }

    fn reset_indexes(&mut self) {
        self.prior = OnceCell::new();
        if let Ok(lists) = self.element_lists.get_mut() {
            lists.clear();
        }
    }

    // --- Read access ---

    pub fn name_pool(&self) -> &Arc<NamePool> {
        &self.pool
    }

    pub fn document_number(&self) -> u32 {
        self.document_number
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Number of main nodes, excluding attributes and namespace declarations.
    pub fn number_of_nodes(&self) -> usize {
        self.kind.len()
    }

    pub fn number_of_attributes(&self) -> usize {
        self.att_code.len()
    }

    pub fn number_of_namespaces(&self) -> usize {
        self.ns_code.len()
    }

    pub fn root(&self) -> NodeRef<'_> {
        NodeRef::new(self, NodeId::Node(NodeHandle::ROOT))
    }

    /// The view of a main node, or `None` when the handle is out of range.
    pub fn node(&self, handle: NodeHandle) -> Option<NodeRef<'_>> {
        (handle.index() < self.kind.len()).then(|| NodeRef::new(self, NodeId::Node(handle)))
    }

    /// The outermost element, if the document has one.
    pub fn document_element(&self) -> Option<NodeRef<'_>> {
        (1..self.kind.len())
            .find(|&i| self.kind[i] == NodeKind::Element && self.depth[i] == 1)
            .map(|i| NodeRef::new(self, NodeId::Node(NodeHandle::new(i as u32))))
    }

    /// The view of any node, or `None` when the id does not denote one.
    pub fn node_by_id(&self, id: NodeId) -> Option<NodeRef<'_>> {
        let valid = match id {
            NodeId::Node(h) => h.index() < self.kind.len(),
            NodeId::Attribute(i) => (i as usize) < self.att_code.len(),
            NodeId::Namespace { owner, decl } => {
                owner.index() < self.kind.len() && (decl as usize) < self.ns_code.len()
            }
        };
        valid.then(|| NodeRef::new(self, id))
    }

    pub fn attribute(&self, index: u32) -> Option<NodeRef<'_>> {
        ((index as usize) < self.att_code.len()).then(|| NodeRef::new(self, NodeId::Attribute(index)))
    }

    /// The element whose `ID`-typed attribute has the given value.
    pub fn select_id(&self, id: &str) -> Option<NodeRef<'_>> {
        self.id_table
            .get(id)
            .map(|&nr| NodeRef::new(self, NodeId::Node(NodeHandle::new(nr))))
    }

    pub fn unparsed_entity(&self, name: &str) -> Option<&UnparsedEntity> {
        self.unparsed_entities.get(name)
    }

    pub fn line_number(&self, handle: NodeHandle) -> Option<u32> {
        self.line_numbers
            .as_ref()
            .and_then(|lines| lines.get(handle.index()).copied())
            .filter(|&line| line > 0)
    }

    /// All elements with the given fingerprint, in document order.
    ///
    /// The list is computed on first request and shared by every later caller;
    /// concurrent first callers wait for the same computation.
    pub fn all_elements(&self, fingerprint: Fingerprint) -> Arc<[NodeHandle]> {
        let cell = {
            let mut lists = self
                .element_lists
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            lists.entry(fingerprint).or_default().clone()
        };
        cell.get_or_init(|| {
            log::debug!(
                "indexing elements named {} in document {}",
                fingerprint,
                self.document_number
            );
            (1..self.kind.len())
                .filter(|&i| {
                    self.kind[i] == NodeKind::Element
                        && NameCode::from_raw(self.name_code[i]).fingerprint() == fingerprint
                })
                .map(|i| NodeHandle::new(i as u32))
                .collect()
        })
        .clone()
    }

    // --- Crate-internal navigation helpers ---

    pub(crate) fn name_of(&self, nr: u32) -> Option<NameCode> {
        let raw = self.name_code[nr as usize];
        (raw != NONE).then(|| NameCode::from_raw(raw))
    }

    pub(crate) fn has_children(&self, nr: u32) -> bool {
        let next = nr as usize + 1;
        next < self.kind.len() && self.depth[next] > self.depth[nr as usize]
    }

    /// Scans backwards for the nearest shallower row.
    pub(crate) fn parent_nr(&self, nr: u32) -> Option<u32> {
        let depth = self.depth[nr as usize];
        if depth == 0 {
            return None;
        }
        (0..nr).rev().find(|&i| self.depth[i as usize] < depth)
    }

    /// Previous sibling index, built on first use.
    pub(crate) fn prior(&self) -> &[u32] {
        self.prior.get_or_init(|| {
            let mut prior = vec![NONE; self.kind.len()];
            for (i, &next) in self.next.iter().enumerate() {
                if next != NONE && (next as usize) < prior.len() {
                    prior[next as usize] = i as u32;
                }
            }
            prior
        })
    }

    /// First attribute index of an element, if it has attributes.
    pub(crate) fn first_attribute(&self, nr: u32) -> Option<u32> {
        let i = nr as usize;
        (self.kind[i] == NodeKind::Element && self.offset[i] != NONE).then(|| self.offset[i])
    }

    /// First namespace declaration of an element, if it declares any.
    pub(crate) fn first_namespace(&self, nr: u32) -> Option<u32> {
        let i = nr as usize;
        (self.kind[i] == NodeKind::Element && self.length[i] != NONE).then(|| self.length[i])
    }

    pub(crate) fn text_of(&self, nr: u32) -> &str {
        let i = nr as usize;
        let start = self.offset[i] as usize;
        let end = start + self.length[i] as usize;
        match self.kind[i] {
            NodeKind::Text => self.text.get(start..end).unwrap_or(""),
            NodeKind::Comment | NodeKind::ProcessingInstruction => {
                self.comments.get(start..end).unwrap_or("")
            }
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::tests::sample_document;
    use crate::namepool::NamePool;
    use crate::node::NodeKind;
    use std::sync::Arc;

    #[test]
    fn test_all_elements_is_shared() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let x = pool.get_fingerprint("", "x").unwrap();
        let first = doc.all_elements(x);
        let second = doc.all_elements(x);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_all_elements_concurrent_callers_agree() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let a = pool.get_fingerprint("", "a").unwrap();
        let lists: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| doc.all_elements(a))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for list in &lists[1..] {
            assert!(Arc::ptr_eq(&lists[0], list));
        }
    }

    #[test]
    fn test_select_id_first_wins() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let node = doc.select_id("first").unwrap();
        assert_eq!(node.kind(), NodeKind::Element);
        assert_eq!(node.local_name(), "a");
        assert!(doc.select_id("nothing").is_none());
    }

    #[test]
    fn test_document_element() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        assert_eq!(doc.document_element().unwrap().local_name(), "root");
    }
}
