//! Push-style construction of a [`TinyDocument`].
//!
//! Nodes are appended in a single forward pass in document order. The builder
//! keeps, for every open depth, the last node appended at that depth so it can
//! link next-sibling pointers as it goes.
//!
//! When a [`PreviewHandler`] is attached, each finished element whose name the
//! handler selects is handed over for processing before construction resumes;
//! its descendants are then discarded to bound memory.

use crate::document::{AttributeType, NONE, TinyDocument, UnparsedEntity};
use crate::error::TreeError;
use crate::namepool::{Fingerprint, NameCode, NamePool, NamespaceCode};
use crate::node::{NodeHandle, NodeKind};
use std::sync::Arc;

/// One attribute of a start tag.
#[derive(Debug, Clone, Copy)]
pub struct Attribute<'s> {
    pub name: NameCode,
    pub value: &'s str,
    pub att_type: AttributeType,
}

impl<'s> Attribute<'s> {
    pub fn new(name: NameCode, value: &'s str) -> Self {
        Attribute {
            name,
            value,
            att_type: AttributeType::Cdata,
        }
    }

    pub fn id(name: NameCode, value: &'s str) -> Self {
        Attribute {
            name,
            value,
            att_type: AttributeType::Id,
        }
    }
}

/// The event protocol through which a parser or adapter feeds a tree.
pub trait Receiver {
    fn start_document(&mut self) -> Result<(), TreeError>;
    fn end_document(&mut self) -> Result<(), TreeError>;
    /// `namespaces` holds only the declarations made on this element.
    fn start_element(
        &mut self,
        name: NameCode,
        attributes: &[Attribute<'_>],
        namespaces: &[NamespaceCode],
    ) -> Result<(), TreeError>;
    fn end_element(&mut self) -> Result<(), TreeError>;
    fn characters(&mut self, text: &str) -> Result<(), TreeError>;
    fn comment(&mut self, text: &str) -> Result<(), TreeError>;
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), TreeError>;
    fn set_unparsed_entity(&mut self, name: &str, entity: UnparsedEntity) -> Result<(), TreeError>;
    /// Line number of the next event, when the source knows it.
    fn set_line_number(&mut self, _line: u32) {}
}

/// Processes selected elements as soon as they are complete.
pub trait PreviewHandler {
    fn is_preview_element(&self, fingerprint: Fingerprint) -> bool;

    /// Called after the end tag of a selected element. The element's subtree
    /// is discarded once this returns.
    fn preview(&mut self, doc: &TinyDocument, element: NodeHandle) -> Result<(), TreeError>;
}

pub struct TinyBuilder<'p> {
    doc: TinyDocument,
    depth: u32,
    prev_at_depth: Vec<u32>,
    open_elements: Vec<NameCode>,
    line_numbering: bool,
    current_line: u32,
    started: bool,
    ended: bool,
    discard_comments: bool,
    preview: Option<&'p mut dyn PreviewHandler>,
}

impl<'p> TinyBuilder<'p> {
    pub fn new(pool: Arc<NamePool>) -> Self {
        TinyBuilder {
            doc: TinyDocument::new(pool),
            depth: 0,
            prev_at_depth: Vec::with_capacity(32),
            open_elements: Vec::with_capacity(32),
            line_numbering: false,
            current_line: 0,
            started: false,
            ended: false,
            discard_comments: false,
            preview: None,
        }
    }

    pub fn with_system_id(mut self, system_id: &str) -> Self {
        self.doc.set_system_id(system_id);
        self
    }

    pub fn with_line_numbering(mut self, enabled: bool) -> Self {
        self.line_numbering = enabled;
        self
    }

    pub fn with_discard_comments(mut self, discard: bool) -> Self {
        self.discard_comments = discard;
        self
    }

    pub fn with_preview(mut self, handler: &'p mut dyn PreviewHandler) -> Self {
        self.preview = Some(handler);
        self
    }

    pub fn name_pool(&self) -> &Arc<NamePool> {
        self.doc.name_pool()
    }

    /// The tree as built so far.
    pub fn document(&self) -> &TinyDocument {
        &self.doc
    }

    /// Completes construction and hands over the tree.
    pub fn finish(self) -> Result<TinyDocument, TreeError> {
        if !self.started {
            return Err(TreeError::Builder("document was never started".into()));
        }
        if !self.open_elements.is_empty() {
            return Err(TreeError::Builder(format!(
                "{} element(s) left open",
                self.open_elements.len()
            )));
        }
        log::debug!(
            "built document {}: {} nodes, {} attributes, {} namespaces",
            self.doc.document_number(),
            self.doc.number_of_nodes(),
            self.doc.number_of_attributes(),
            self.doc.number_of_namespaces()
        );
        Ok(self.doc)
    }

    fn check_open(&self) -> Result<(), TreeError> {
        if !self.started || self.ended {
            return Err(TreeError::Builder(
                "content received outside the document".into(),
            ));
        }
        Ok(())
    }

    /// Links `nr` as the next sibling of the previous node at the current depth.
    fn link(&mut self, nr: u32) {
        let depth = self.depth as usize;
        if self.prev_at_depth.len() <= depth {
            self.prev_at_depth.resize(depth + 1, NONE);
        }
        let prev = self.prev_at_depth[depth];
        if prev != NONE && prev > 0 {
            self.doc.set_next(prev, nr);
        }
        self.prev_at_depth[depth] = nr;
    }

    /// Closes the sibling chain at the current depth.
    fn close_level(&mut self) {
        let depth = self.depth as usize;
        if let Some(&prev) = self.prev_at_depth.get(depth) {
            if prev != NONE && prev > 0 {
                self.doc.set_next(prev, NONE);
            }
            self.prev_at_depth[depth] = NONE;
        }
    }

    fn append_leaf(&mut self, kind: NodeKind, offset: u32, length: u32, name: u32) -> u32 {
        let nr = self.doc.add_node(kind, self.depth, offset, length, name);
        self.link(nr);
        if self.line_numbering {
            self.doc.set_line_number(nr, self.current_line);
        }
        nr
    }
}

impl Receiver for TinyBuilder<'_> {
    fn start_document(&mut self) -> Result<(), TreeError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        if self.line_numbering {
            self.doc.enable_line_numbering();
        }
        self.doc.add_node(NodeKind::Root, 0, 0, 0, NONE);
        // The xml namespace is implicitly declared on the root.
        let xml_name = self.doc.name_pool().allocate("", "", "xml")?;
        self.doc.add_namespace(0, NamespaceCode::XML, xml_name);
        self.prev_at_depth.clear();
        self.prev_at_depth.push(0);
        self.depth = 1;
        self.prev_at_depth.push(NONE);
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), TreeError> {
        if self.ended {
            return Ok(());
        }
        self.check_open()?;
        self.close_level();
        self.ended = true;
        Ok(())
    }

    fn start_element(
        &mut self,
        name: NameCode,
        attributes: &[Attribute<'_>],
        namespaces: &[NamespaceCode],
    ) -> Result<(), TreeError> {
        self.check_open()?;
        let nr = self.doc.number_of_nodes() as u32;

        let first_ns = if namespaces.is_empty() {
            NONE
        } else {
            self.doc.number_of_namespaces() as u32
        };
        for &code in namespaces {
            let prefix = self
                .doc
                .name_pool()
                .get_prefix_from_namespace_code(code)
                .ok_or_else(|| TreeError::Builder(format!("unknown namespace code {}", code.raw())))?;
            let ns_name = self.doc.name_pool().allocate("", "", &prefix)?;
            self.doc.add_namespace(nr, code, ns_name);
        }

        let first_att = if attributes.is_empty() {
            NONE
        } else {
            self.doc.number_of_attributes() as u32
        };
        self.doc
            .add_node(NodeKind::Element, self.depth, first_att, first_ns, name.raw());
        for att in attributes {
            self.doc.add_attribute(nr, att.name, att.value, att.att_type);
        }

        self.link(nr);
        if self.line_numbering {
            self.doc.set_line_number(nr, self.current_line);
        }
        self.open_elements.push(name);
        self.depth += 1;
        let depth = self.depth as usize;
        if self.prev_at_depth.len() <= depth {
            self.prev_at_depth.resize(depth + 1, NONE);
        }
        self.prev_at_depth[depth] = NONE;
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), TreeError> {
        self.check_open()?;
        let name = self
            .open_elements
            .pop()
            .ok_or_else(|| TreeError::Builder("end tag without start tag".into()))?;

        if let Some(handler) = self.preview.as_deref_mut()
            && handler.is_preview_element(name.fingerprint())
        {
            let element = self.prev_at_depth[self.depth as usize - 1];
            log::debug!("preview processing of element node {element}");
            handler.preview(&self.doc, NodeHandle::new(element))?;
            self.doc.truncate(element as usize + 1);
        }

        self.close_level();
        self.depth -= 1;
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), TreeError> {
        self.check_open()?;
        if text.is_empty() {
            return Ok(());
        }
        let start = self.doc.append_text(text);
        self.append_leaf(NodeKind::Text, start, text.len() as u32, NONE);
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), TreeError> {
        self.check_open()?;
        if self.discard_comments {
            return Ok(());
        }
        let start = self.doc.append_comment(text);
        self.append_leaf(NodeKind::Comment, start, text.len() as u32, NONE);
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), TreeError> {
        self.check_open()?;
        if self.discard_comments {
            return Ok(());
        }
        let name = self.doc.name_pool().allocate("", "", target)?;
        let start = self.doc.append_comment(data);
        self.append_leaf(
            NodeKind::ProcessingInstruction,
            start,
            data.len() as u32,
            name.raw(),
        );
        Ok(())
    }

    fn set_unparsed_entity(&mut self, name: &str, entity: UnparsedEntity) -> Result<(), TreeError> {
        self.doc.set_unparsed_entity(name, entity);
        Ok(())
    }

    fn set_line_number(&mut self, line: u32) {
        self.current_line = line;
    }
}
