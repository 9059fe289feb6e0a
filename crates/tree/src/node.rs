//! Node handles and the transient views built over them.
use crate::document::TinyDocument;
use crate::namepool::{Fingerprint, NameCode};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The kind of a node, aligned with the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum NodeKind {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

impl NodeKind {
    pub const COUNT: usize = 7;

    pub const fn index(self) -> usize {
        self as usize
    }

    /// The letter used for this kind in generated identifiers.
    const fn id_letter(self) -> char {
        match self {
            NodeKind::Root => 'r',
            NodeKind::Element => 'e',
            NodeKind::Attribute => 'a',
            NodeKind::Text => 't',
            NodeKind::Comment => 'c',
            NodeKind::ProcessingInstruction => 'p',
            NodeKind::Namespace => 'n',
        }
    }
}

/// Index of a main node (root, element, text, comment, PI) within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub const ROOT: NodeHandle = NodeHandle(0);

    pub const fn new(raw: u32) -> Self {
        NodeHandle(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of any node within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Node(NodeHandle),
    /// Index into the attribute arrays.
    Attribute(u32),
    /// A namespace node of `owner`, backed by declaration `decl`.
    Namespace { owner: NodeHandle, decl: u32 },
}

/// A cheap, copyable view of one node of a [`TinyDocument`].
///
/// Views are created on demand and compare equal when they denote the same
/// node of the same document, whatever their provenance.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a TinyDocument,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub(crate) fn new(doc: &'a TinyDocument, id: NodeId) -> Self {
        NodeRef { doc, id }
    }

    pub(crate) fn main(doc: &'a TinyDocument, nr: u32) -> Self {
        NodeRef {
            doc,
            id: NodeId::Node(NodeHandle(nr)),
        }
    }

    pub fn document(&self) -> &'a TinyDocument {
        self.doc
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The handle of a main node; `None` for attributes and namespaces.
    pub fn handle(&self) -> Option<NodeHandle> {
        match self.id {
            NodeId::Node(h) => Some(h),
            _ => None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.id {
            NodeId::Node(h) => self.doc.kind[h.index()],
            NodeId::Attribute(_) => NodeKind::Attribute,
            NodeId::Namespace { .. } => NodeKind::Namespace,
        }
    }

    pub fn name_code(&self) -> Option<NameCode> {
        match self.id {
            NodeId::Node(h) => self.doc.name_of(h.raw()),
            NodeId::Attribute(i) => Some(self.doc.att_code[i as usize]),
            NodeId::Namespace { decl, .. } => Some(self.doc.ns_name[decl as usize]),
        }
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.name_code().map(NameCode::fingerprint)
    }

    pub fn local_name(&self) -> String {
        self.name_code()
            .and_then(|code| self.doc.name_pool().get_local_name(code).ok())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    pub fn display_name(&self) -> String {
        self.name_code()
            .and_then(|code| self.doc.name_pool().get_display_name(code).ok())
            .unwrap_or_default()
    }

    pub fn prefix(&self) -> String {
        self.name_code()
            .and_then(|code| self.doc.name_pool().get_prefix(code).ok())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    /// Namespace URI of the node's name; empty for unnamed nodes.
    pub fn uri(&self) -> String {
        if self.kind() == NodeKind::Namespace {
            return String::new();
        }
        self.name_code()
            .and_then(|code| self.doc.name_pool().get_uri(code).ok())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    /// The XPath string value of the node.
    pub fn string_value(&self) -> Cow<'a, str> {
        match self.id {
            NodeId::Attribute(i) => Cow::Borrowed(&self.doc.att_value[i as usize]),
            NodeId::Namespace { decl, .. } => Cow::Owned(
                self.doc
                    .name_pool()
                    .get_uri_from_namespace_code(self.doc.ns_code[decl as usize])
                    .map(|u| u.to_string())
                    .unwrap_or_default(),
            ),
            NodeId::Node(h) => match self.doc.kind[h.index()] {
                NodeKind::Root | NodeKind::Element => {
                    let start = h.index();
                    let depth = self.doc.depth[start];
                    let texts = (start + 1..self.doc.number_of_nodes())
                        .take_while(|&i| self.doc.depth[i] > depth)
                        .filter(|&i| self.doc.kind[i] == NodeKind::Text)
                        .map(|i| self.doc.text_of(i as u32));
                    let mut parts = texts.peekable();
                    match parts.next() {
                        None => Cow::Borrowed(""),
                        Some(first) if parts.peek().is_none() => Cow::Borrowed(first),
                        Some(first) => {
                            let mut value = first.to_string();
                            parts.for_each(|t| value.push_str(t));
                            Cow::Owned(value)
                        }
                    }
                }
                _ => Cow::Borrowed(self.doc.text_of(h.raw())),
            },
        }
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        match self.id {
            NodeId::Node(h) => self.doc.parent_nr(h.raw()).map(|p| NodeRef::main(self.doc, p)),
            NodeId::Attribute(i) => Some(NodeRef::main(self.doc, self.doc.att_parent[i as usize])),
            NodeId::Namespace { owner, .. } => Some(NodeRef::main(self.doc, owner.raw())),
        }
    }

    pub fn has_child_nodes(&self) -> bool {
        match self.id {
            NodeId::Node(h) => self.doc.has_children(h.raw()),
            _ => false,
        }
    }

    /// Document-order rank within the document.
    ///
    /// Main nodes occupy the top 32 bits; namespaces and then attributes sort
    /// directly after their owning element and before its first child.
    pub fn sequence_number(&self) -> u64 {
        match self.id {
            NodeId::Node(h) => (h.raw() as u64) << 32,
            NodeId::Namespace { owner, decl } => ((owner.raw() as u64) << 32) + 1 + decl as u64,
            NodeId::Attribute(i) => {
                let owner = self.doc.att_parent[i as usize];
                let first = self.doc.offset[owner as usize];
                ((owner as u64) << 32) + 0x8000_0000 + (i - first) as u64
            }
        }
    }

    /// Document order, falling back to document number across documents.
    pub fn compare_order(&self, other: &NodeRef<'_>) -> Ordering {
        if std::ptr::eq(self.doc, other.doc) {
            self.sequence_number().cmp(&other.sequence_number())
        } else {
            self.doc.document_number().cmp(&other.doc.document_number())
        }
    }

    pub fn is_same_node(&self, other: &NodeRef<'_>) -> bool {
        std::ptr::eq(self.doc, other.doc) && self.id == other.id
    }

    /// An identifier unique to this node among all documents of the pool.
    pub fn generate_id(&self) -> String {
        let doc = self.doc.document_number();
        match self.id {
            NodeId::Node(h) => format!("d{}{}{}", doc, self.kind().id_letter(), h.raw()),
            NodeId::Attribute(i) => {
                let owner = self.doc.att_parent[i as usize];
                format!("d{doc}e{owner}a{i}")
            }
            NodeId::Namespace { owner, decl } => format!("d{}e{}n{}", doc, owner.raw(), decl),
        }
    }

    /// Value of the named attribute of an element.
    pub fn attribute_value(&self, fingerprint: Fingerprint) -> Option<&'a str> {
        let NodeId::Node(h) = self.id else {
            return None;
        };
        let doc = self.doc;
        let first = doc.first_attribute(h.raw())?;
        (first as usize..doc.att_code.len())
            .take_while(|&i| doc.att_parent[i] == h.raw())
            .find(|&i| doc.att_code[i].fingerprint() == fingerprint)
            .map(|i| &*doc.att_value[i])
    }

    pub fn line_number(&self) -> Option<u32> {
        match self.id {
            NodeId::Node(h) => self.doc.line_number(h),
            _ => self.parent().and_then(|p| p.line_number()),
        }
    }

    pub fn system_id(&self) -> &'a str {
        self.doc.system_id()
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_node(other)
    }
}

impl Eq for NodeRef<'_> {}

impl Hash for NodeRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.doc.document_number().hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for NodeRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeRef<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_order(other)
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("document", &self.doc.document_number())
            .field("id", &self.id)
            .field("kind", &self.kind())
            .finish()
    }
}
