//! Axis enumerations over the columnar arrays.
//!
//! Every enumeration is a forward-only cursor that always knows its next
//! node in advance, so `has_next` is free. The total length (`last()` in
//! XPath) is only computed on request, by replaying a fresh copy of the
//! enumeration from its starting state.

use crate::axis::Axis;
use crate::document::{NONE, TinyDocument};
use crate::namepool::{NULL_CODE, XML_CODE};
use crate::node::{NodeHandle, NodeId, NodeKind, NodeRef};
use crate::node_test::NodeTest;
use std::collections::VecDeque;
use std::sync::Arc;

/// A sequence of nodes with the properties the evaluator needs to know.
pub trait NodeEnumeration<'a>: Iterator<Item = NodeRef<'a>> {
    fn has_next(&mut self) -> bool;

    /// Nodes are delivered in document order.
    fn is_document_order_sorted(&self) -> bool;

    /// Nodes are delivered in reverse document order.
    fn is_reverse_sorted(&self) -> bool;

    /// No delivered node is an ancestor of another.
    fn is_peer(&self) -> bool;

    /// Whether [`NodeEnumeration::last_position`] can answer without
    /// buffering the remainder of the sequence.
    fn is_last_position_finder(&self) -> bool {
        false
    }

    /// Total number of nodes in the sequence, consumed or not.
    fn last_position(&mut self) -> usize;
}

impl<'a, E: NodeEnumeration<'a> + ?Sized> NodeEnumeration<'a> for Box<E> {
    fn has_next(&mut self) -> bool {
        (**self).has_next()
    }
    fn is_document_order_sorted(&self) -> bool {
        (**self).is_document_order_sorted()
    }
    fn is_reverse_sorted(&self) -> bool {
        (**self).is_reverse_sorted()
    }
    fn is_peer(&self) -> bool {
        (**self).is_peer()
    }
    fn is_last_position_finder(&self) -> bool {
        (**self).is_last_position_finder()
    }
    fn last_position(&mut self) -> usize {
        (**self).last_position()
    }
}

#[derive(Debug, Clone)]
enum Cursor {
    Empty,
    One(Option<NodeId>),
    /// Next sibling to deliver, following `next[]`.
    Siblings(u32),
    /// Next row to deliver while deeper than `depth`.
    Descendants { next: u32, depth: u32 },
    /// Next row to deliver, up to the end of the document.
    Following(u32),
    /// One past the next row to inspect, walking backwards.
    Preceding {
        next: u32,
        ancestor_depth: i64,
        include_ancestors: bool,
    },
    Ancestors(Option<NodeId>),
    /// Next sibling to deliver, following `prior[]`.
    PrecedingSiblings(u32),
    Attributes { next: u32, owner: u32 },
    Ids { items: Arc<[NodeId]>, index: usize },
    Elements { items: Arc<[NodeHandle]>, index: usize },
    Chain(Box<Cursor>, Box<Cursor>),
}

impl Cursor {
    fn step(&mut self, doc: &TinyDocument) -> Option<NodeId> {
        match self {
            Cursor::Empty => None,
            Cursor::One(id) => id.take(),
            Cursor::Siblings(next) => {
                let current = *next;
                if current == NONE || current as usize >= doc.number_of_nodes() {
                    return None;
                }
                *next = doc.next[current as usize];
                Some(NodeId::Node(NodeHandle::new(current)))
            }
            Cursor::Descendants { next, depth } => {
                let current = *next;
                if current as usize >= doc.number_of_nodes() || doc.depth[current as usize] <= *depth {
                    return None;
                }
                *next += 1;
                Some(NodeId::Node(NodeHandle::new(current)))
            }
            Cursor::Following(next) => {
                let current = *next;
                if current as usize >= doc.number_of_nodes() {
                    return None;
                }
                *next += 1;
                Some(NodeId::Node(NodeHandle::new(current)))
            }
            Cursor::Preceding {
                next,
                ancestor_depth,
                include_ancestors,
            } => {
                while *next > 0 {
                    *next -= 1;
                    let i = *next;
                    if !*include_ancestors && doc.depth[i as usize] as i64 == *ancestor_depth {
                        *ancestor_depth -= 1;
                        continue;
                    }
                    return Some(NodeId::Node(NodeHandle::new(i)));
                }
                None
            }
            Cursor::Ancestors(current) => {
                let id = current.take()?;
                *current = parent_id(doc, id);
                Some(id)
            }
            Cursor::PrecedingSiblings(next) => {
                let current = *next;
                if current == NONE {
                    return None;
                }
                *next = doc.prior().get(current as usize).copied().unwrap_or(NONE);
                Some(NodeId::Node(NodeHandle::new(current)))
            }
            Cursor::Attributes { next, owner } => {
                let current = *next;
                if current as usize >= doc.number_of_attributes()
                    || doc.att_parent[current as usize] != *owner
                {
                    return None;
                }
                *next += 1;
                Some(NodeId::Attribute(current))
            }
            Cursor::Ids { items, index } => {
                let id = items.get(*index).copied()?;
                *index += 1;
                Some(id)
            }
            Cursor::Elements { items, index } => {
                let handle = items.get(*index).copied()?;
                *index += 1;
                Some(NodeId::Node(handle))
            }
            Cursor::Chain(first, second) => first.step(doc).or_else(|| second.step(doc)),
        }
    }
}

fn parent_id(doc: &TinyDocument, id: NodeId) -> Option<NodeId> {
    match id {
        NodeId::Node(h) => doc.parent_nr(h.raw()).map(|p| NodeId::Node(NodeHandle::new(p))),
        NodeId::Attribute(i) => Some(NodeId::Node(NodeHandle::new(doc.att_parent[i as usize]))),
        NodeId::Namespace { owner, .. } => Some(NodeId::Node(owner)),
    }
}

/// First row after the subtree rooted at `nr`.
fn after_subtree(doc: &TinyDocument, nr: u32) -> u32 {
    let depth = doc.depth[nr as usize];
    let mut next = nr + 1;
    while (next as usize) < doc.number_of_nodes() && doc.depth[next as usize] > depth {
        next += 1;
    }
    next
}

/// The in-scope namespaces of an element as namespace nodes, in declaration order.
fn namespace_nodes(doc: &TinyDocument, element: u32) -> Arc<[NodeId]> {
    let owner = NodeHandle::new(element);
    let mut seen_prefixes: Vec<u16> = Vec::new();
    let mut decls: Vec<u32> = Vec::new();
    let mut current = Some(element);
    while let Some(e) = current {
        if doc.kind[e as usize] == NodeKind::Element
            && let Some(first) = doc.first_namespace(e)
        {
            for d in (first as usize..doc.number_of_namespaces()).take_while(|&d| doc.ns_parent[d] == e) {
                let code = doc.ns_code[d];
                if seen_prefixes.contains(&code.prefix_code()) {
                    continue;
                }
                seen_prefixes.push(code.prefix_code());
                // xmlns="" hides outer default declarations without creating a node.
                if code.uri_code() != NULL_CODE {
                    decls.push(d as u32);
                }
            }
        }
        current = doc.parent_nr(e);
    }
    if !seen_prefixes.contains(&XML_CODE) && doc.number_of_namespaces() > 0 {
        decls.push(0);
    }
    decls.sort_unstable();
    decls
        .into_iter()
        .map(|decl| NodeId::Namespace { owner, decl })
        .collect()
}

/// An enumeration of the nodes on one axis that satisfy a node test.
#[derive(Debug, Clone)]
pub struct AxisEnumeration<'a> {
    doc: &'a TinyDocument,
    axis: Axis,
    test: NodeTest,
    start: Cursor,
    cursor: Cursor,
    /// A name can occur once among attributes: stop at the first match.
    single_match: bool,
    pending: Option<NodeId>,
    last: Option<usize>,
}

impl<'a> AxisEnumeration<'a> {
    fn new(doc: &'a TinyDocument, axis: Axis, test: NodeTest, cursor: Cursor) -> Self {
        let single_match = axis == Axis::Attribute && matches!(test, NodeTest::Name { .. });
        let mut enumeration = AxisEnumeration {
            doc,
            axis,
            test,
            start: cursor.clone(),
            cursor,
            single_match,
            pending: None,
            last: None,
        };
        enumeration.pending = enumeration.advance();
        enumeration
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    fn advance(&mut self) -> Option<NodeId> {
        let pool = self.doc.name_pool();
        while let Some(id) = self.cursor.step(self.doc) {
            let node = NodeRef::new(self.doc, id);
            if self.test.matches(node.kind(), node.name_code(), pool) {
                if self.single_match {
                    self.cursor = Cursor::Empty;
                }
                return Some(id);
            }
        }
        None
    }
}

impl<'a> Iterator for AxisEnumeration<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<NodeRef<'a>> {
        let current = self.pending?;
        self.pending = self.advance();
        Some(NodeRef::new(self.doc, current))
    }
}

impl<'a> NodeEnumeration<'a> for AxisEnumeration<'a> {
    fn has_next(&mut self) -> bool {
        self.pending.is_some()
    }

    fn is_document_order_sorted(&self) -> bool {
        self.axis.is_forward()
    }

    fn is_reverse_sorted(&self) -> bool {
        self.axis.is_reverse()
    }

    fn is_peer(&self) -> bool {
        self.axis.is_peer_axis()
    }

    fn is_last_position_finder(&self) -> bool {
        true
    }

    fn last_position(&mut self) -> usize {
        if let Some(last) = self.last {
            return last;
        }
        let replay = AxisEnumeration::new(self.doc, self.axis, self.test, self.start.clone());
        let last = replay.count();
        self.last = Some(last);
        last
    }
}

impl<'a> NodeRef<'a> {
    /// The nodes on `axis` from this node that satisfy `test`.
    pub fn enumerate(&self, axis: Axis, test: NodeTest) -> AxisEnumeration<'a> {
        let doc = self.document();
        let id = self.id();
        let cursor = match (axis, id) {
            (Axis::SelfAxis, _) => Cursor::One(Some(id)),
            (Axis::Parent, _) => Cursor::One(parent_id(doc, id)),
            (Axis::AncestorOrSelf, _) => Cursor::Ancestors(Some(id)),
            (Axis::Ancestor, _) => Cursor::Ancestors(parent_id(doc, id)),

            (Axis::Child, NodeId::Node(h)) if doc.has_children(h.raw()) => Cursor::Siblings(h.raw() + 1),
            (Axis::Child, _) => Cursor::Empty,

            (Axis::Descendant | Axis::DescendantOrSelf, NodeId::Node(h))
                if doc.kind[h.index()] == NodeKind::Root
                    && matches!(test, NodeTest::Name { kind: NodeKind::Element, .. }) =>
            {
                let fingerprint = test.fingerprint();
                match fingerprint {
                    Some(fp) => Cursor::Elements {
                        items: doc.all_elements(fp),
                        index: 0,
                    },
                    None => Cursor::Empty,
                }
            }
            (Axis::Descendant, NodeId::Node(h)) => Cursor::Descendants {
                next: h.raw() + 1,
                depth: doc.depth[h.index()],
            },
            (Axis::Descendant, _) => Cursor::Empty,
            (Axis::DescendantOrSelf, NodeId::Node(h)) => Cursor::Chain(
                Box::new(Cursor::One(Some(id))),
                Box::new(Cursor::Descendants {
                    next: h.raw() + 1,
                    depth: doc.depth[h.index()],
                }),
            ),
            (Axis::DescendantOrSelf, _) => Cursor::One(Some(id)),

            (Axis::Following, NodeId::Node(h)) if h == NodeHandle::ROOT => Cursor::Empty,
            (Axis::Following, NodeId::Node(h)) => Cursor::Following(after_subtree(doc, h.raw())),
            (Axis::Following, _) => match parent_id(doc, id) {
                // Attributes and namespaces: everything after the owner's start tag.
                Some(NodeId::Node(p)) => Cursor::Following(p.raw() + 1),
                _ => Cursor::Empty,
            },

            (Axis::FollowingSibling, NodeId::Node(h)) if h != NodeHandle::ROOT => {
                Cursor::Siblings(doc.next[h.index()])
            }
            (Axis::FollowingSibling, _) => Cursor::Empty,

            (Axis::PrecedingSibling, NodeId::Node(h)) if h != NodeHandle::ROOT => {
                Cursor::PrecedingSiblings(doc.prior().get(h.index()).copied().unwrap_or(NONE))
            }
            (Axis::PrecedingSibling, _) => Cursor::Empty,

            (Axis::Preceding | Axis::PrecedingOrAncestor, _) => {
                let include_ancestors = axis == Axis::PrecedingOrAncestor;
                let origin = match id {
                    NodeId::Node(h) => Some(h.raw()),
                    _ => match parent_id(doc, id) {
                        Some(NodeId::Node(p)) => Some(p.raw()),
                        _ => None,
                    },
                };
                match origin {
                    Some(start) => {
                        let preceding = Cursor::Preceding {
                            next: start,
                            ancestor_depth: doc.depth[start as usize] as i64 - 1,
                            include_ancestors,
                        };
                        if include_ancestors && !matches!(id, NodeId::Node(_)) {
                            Cursor::Chain(
                                Box::new(Cursor::One(Some(NodeId::Node(NodeHandle::new(start))))),
                                Box::new(preceding),
                            )
                        } else {
                            preceding
                        }
                    }
                    None => Cursor::Empty,
                }
            }

            (Axis::Attribute, NodeId::Node(h)) => match doc.first_attribute(h.raw()) {
                Some(first) => Cursor::Attributes {
                    next: first,
                    owner: h.raw(),
                },
                None => Cursor::Empty,
            },
            (Axis::Attribute, _) => Cursor::Empty,

            (Axis::Namespace, NodeId::Node(h)) if doc.kind[h.index()] == NodeKind::Element => Cursor::Ids {
                items: namespace_nodes(doc, h.raw()),
                index: 0,
            },
            (Axis::Namespace, _) => Cursor::Empty,
        };
        AxisEnumeration::new(doc, axis, test, cursor)
    }
}

/// A materialised sequence of nodes.
#[derive(Debug, Clone)]
pub struct NodeListEnumeration<'a> {
    nodes: std::vec::IntoIter<NodeRef<'a>>,
    total: usize,
    sorted: bool,
}

impl<'a> NodeListEnumeration<'a> {
    pub fn new(nodes: Vec<NodeRef<'a>>, sorted: bool) -> Self {
        NodeListEnumeration {
            total: nodes.len(),
            nodes: nodes.into_iter(),
            sorted,
        }
    }

    pub fn singleton(node: NodeRef<'a>) -> Self {
        Self::new(vec![node], true)
    }
}

impl<'a> Iterator for NodeListEnumeration<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<NodeRef<'a>> {
        self.nodes.next()
    }
}

impl<'a> NodeEnumeration<'a> for NodeListEnumeration<'a> {
    fn has_next(&mut self) -> bool {
        self.nodes.len() > 0
    }

    fn is_document_order_sorted(&self) -> bool {
        self.sorted
    }

    fn is_reverse_sorted(&self) -> bool {
        false
    }

    fn is_peer(&self) -> bool {
        self.total <= 1
    }

    fn is_last_position_finder(&self) -> bool {
        true
    }

    fn last_position(&mut self) -> usize {
        self.total
    }
}

/// Adds look-ahead to a plain node iterator.
///
/// Only as many nodes are buffered as `has_next` needs; the remainder is
/// buffered in full only if `last_position` is asked for.
pub struct LookaheadEnumeration<'a, I> {
    inner: I,
    buffer: VecDeque<NodeRef<'a>>,
    delivered: usize,
    sorted: bool,
}

impl<'a, I: Iterator<Item = NodeRef<'a>>> LookaheadEnumeration<'a, I> {
    pub fn new(inner: I) -> Self {
        LookaheadEnumeration {
            inner,
            buffer: VecDeque::new(),
            delivered: 0,
            sorted: false,
        }
    }

    /// Declares the wrapped sequence to be in document order.
    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }
}

impl<'a, I: Iterator<Item = NodeRef<'a>>> Iterator for LookaheadEnumeration<'a, I> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<NodeRef<'a>> {
        let next = self.buffer.pop_front().or_else(|| self.inner.next());
        if next.is_some() {
            self.delivered += 1;
        }
        next
    }
}

impl<'a, I: Iterator<Item = NodeRef<'a>>> NodeEnumeration<'a> for LookaheadEnumeration<'a, I> {
    fn has_next(&mut self) -> bool {
        if !self.buffer.is_empty() {
            return true;
        }
        match self.inner.next() {
            Some(node) => {
                self.buffer.push_back(node);
                true
            }
            None => false,
        }
    }

    fn is_document_order_sorted(&self) -> bool {
        self.sorted
    }

    fn is_reverse_sorted(&self) -> bool {
        false
    }

    fn is_peer(&self) -> bool {
        false
    }

    fn last_position(&mut self) -> usize {
        self.buffer.extend(self.inner.by_ref());
        self.delivered + self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::sample_document;
    use crate::namepool::NamePool;

    fn names<'a>(nodes: impl Iterator<Item = NodeRef<'a>>) -> Vec<String> {
        nodes
            .map(|n| match n.kind() {
                NodeKind::Text => format!("\"{}\"", n.string_value()),
                NodeKind::Root => "/".to_string(),
                NodeKind::Attribute => format!("@{}", n.display_name()),
                NodeKind::Namespace => format!("ns:{}", n.local_name()),
                _ => n.display_name(),
            })
            .collect()
    }

    fn element<'a>(doc: &'a TinyDocument, nr: u32) -> NodeRef<'a> {
        doc.node(NodeHandle::new(nr)).unwrap()
    }

    #[test]
    fn test_descendant_wildcard_with_last() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let root = element(&doc, 1);
        let mut e = root.enumerate(Axis::Descendant, NodeTest::Kind(NodeKind::Element));
        assert_eq!(e.last_position(), 4);
        assert_eq!(names(e.by_ref()), ["a", "x", "y", "b"]);
        assert_eq!(e.last_position(), 4);
    }

    #[test]
    fn test_child_axis_reproduces_construction_order() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let kids = names(doc.root().enumerate(Axis::Child, NodeTest::AnyNode));
        assert_eq!(kids, ["root"]);
        let kids = names(element(&doc, 2).enumerate(Axis::Child, NodeTest::AnyNode));
        assert_eq!(kids, ["x", "y"]);
        let kids = names(element(&doc, 3).enumerate(Axis::Child, NodeTest::AnyNode));
        assert_eq!(kids, ["\"x\""]);
    }

    #[test]
    fn test_following_and_preceding() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let x = element(&doc, 3);
        let following = names(x.enumerate(Axis::Following, NodeTest::Kind(NodeKind::Element)));
        assert_eq!(following, ["y", "b"]);
        let b = element(&doc, 7);
        let mut preceding = b.enumerate(Axis::Preceding, NodeTest::Kind(NodeKind::Element));
        assert!(preceding.is_reverse_sorted());
        assert_eq!(names(preceding.by_ref()), ["y", "x", "a"]);
        let with_ancestors = names(b.enumerate(Axis::PrecedingOrAncestor, NodeTest::Kind(NodeKind::Element)));
        assert_eq!(with_ancestors, ["y", "x", "a", "root"]);
    }

    #[test]
    fn test_following_from_attribute_includes_owner_descendants() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let attr = doc.attribute(0).unwrap();
        let following = names(attr.enumerate(Axis::Following, NodeTest::Kind(NodeKind::Element)));
        assert_eq!(following, ["x", "y", "b"]);
        let preceding = names(attr.enumerate(Axis::PrecedingOrAncestor, NodeTest::Kind(NodeKind::Element)));
        assert_eq!(preceding, ["a", "root"]);
    }

    #[test]
    fn test_siblings() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let y = element(&doc, 5);
        assert_eq!(names(y.enumerate(Axis::PrecedingSibling, NodeTest::AnyNode)), ["x"]);
        assert_eq!(names(y.enumerate(Axis::FollowingSibling, NodeTest::AnyNode)), Vec::<String>::new());
        let a = element(&doc, 2);
        assert_eq!(names(a.enumerate(Axis::FollowingSibling, NodeTest::AnyNode)), ["b"]);
        assert_eq!(doc.root().enumerate(Axis::FollowingSibling, NodeTest::AnyNode).count(), 0);
    }

    #[test]
    fn test_ancestors() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let text = element(&doc, 4);
        assert_eq!(names(text.enumerate(Axis::Ancestor, NodeTest::AnyNode)), ["x", "a", "root", "/"]);
        assert_eq!(
            names(text.enumerate(Axis::AncestorOrSelf, NodeTest::Kind(NodeKind::Element))),
            ["x", "a", "root"]
        );
        assert_eq!(doc.root().enumerate(Axis::Ancestor, NodeTest::AnyNode).count(), 0);
    }

    #[test]
    fn test_attribute_axis() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let a = element(&doc, 2);
        assert_eq!(names(a.enumerate(Axis::Attribute, NodeTest::Kind(NodeKind::Attribute))), ["@id", "@p:flag"]);
        let id = pool.get_fingerprint("", "id").unwrap();
        let mut by_name = a.enumerate(Axis::Attribute, NodeTest::Name {
            kind: NodeKind::Attribute,
            fingerprint: id,
        });
        assert_eq!(by_name.last_position(), 1);
        assert_eq!(by_name.next().unwrap().string_value(), "first");
        let text = element(&doc, 4);
        assert_eq!(text.enumerate(Axis::Attribute, NodeTest::AnyNode).count(), 0);
    }

    #[test]
    fn test_namespace_axis() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let x = element(&doc, 3);
        assert_eq!(names(x.enumerate(Axis::Namespace, NodeTest::AnyNode)), ["ns:xml", "ns:p"]);
        let ns = x.enumerate(Axis::Namespace, NodeTest::AnyNode).nth(1).unwrap();
        assert_eq!(ns.string_value(), "urn:p");
        assert_eq!(ns.parent(), Some(x));
        assert_eq!(doc.attribute(0).unwrap().enumerate(Axis::Namespace, NodeTest::AnyNode).count(), 0);
    }

    #[test]
    fn test_descendant_from_root_by_name_uses_index() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let y = pool.get_fingerprint("", "y").unwrap();
        let test = NodeTest::Name {
            kind: NodeKind::Element,
            fingerprint: y,
        };
        let found: Vec<_> = doc.root().enumerate(Axis::Descendant, test).collect();
        assert_eq!(found, vec![element(&doc, 5)]);
        let or_self: Vec<_> = doc.root().enumerate(Axis::DescendantOrSelf, test).collect();
        assert_eq!(found, or_self);
    }

    #[test]
    fn test_lookahead_buffers_only_on_demand() {
        let pool = Arc::new(NamePool::new());
        let doc = sample_document(&pool);
        let nodes = (0..doc.number_of_nodes() as u32).map(|i| element(&doc, i));
        let mut e = LookaheadEnumeration::new(nodes);
        assert!(e.has_next());
        assert_eq!(e.buffer.len(), 1);
        e.next();
        e.next();
        assert_eq!(e.last_position(), 9);
        assert_eq!(e.by_ref().count(), 7);
        assert!(!e.has_next());
    }
}
