//! Node paths and simple sibling numbering, used in diagnostics.
use crate::axis::Axis;
use crate::node::{NodeKind, NodeRef};
use crate::node_test::NodeTest;

impl<'a> NodeRef<'a> {
    /// An XPath-like path that identifies this node within its document,
    /// such as `/doc/chap[2]/@id` or `/doc/text()[3]`.
    pub fn path(&self) -> String {
        let parent_path = || match self.parent() {
            Some(p) if p.kind() == NodeKind::Root => String::new(),
            Some(p) => p.path(),
            None => String::new(),
        };
        match self.kind() {
            NodeKind::Root => "/".to_string(),
            NodeKind::Element => format!("{}/{}[{}]", parent_path(), self.display_name(), self.number_simple()),
            NodeKind::Attribute => format!("{}/@{}", parent_path(), self.display_name()),
            NodeKind::Text => format!("{}/text()[{}]", parent_path(), self.number_simple()),
            NodeKind::Comment => format!("{}/comment()[{}]", parent_path(), self.number_simple()),
            NodeKind::ProcessingInstruction => {
                format!("{}/processing-instruction()[{}]", parent_path(), self.number_simple())
            }
            NodeKind::Namespace => format!("{}/namespace::{}", parent_path(), self.local_name()),
        }
    }

    /// One more than the number of preceding siblings with the same kind and name.
    pub fn number_simple(&self) -> usize {
        let test = match self.fingerprint() {
            Some(fingerprint) => NodeTest::Name {
                kind: self.kind(),
                fingerprint,
            },
            None => NodeTest::Kind(self.kind()),
        };
        1 + self.enumerate(Axis::PrecedingSibling, test).count()
    }
}
