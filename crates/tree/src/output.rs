//! Serialisation of result events.
//!
//! An [`Outputter`] receives the events a transformation produces. The
//! XML implementation defers each start tag until its first child event so
//! that childless elements come out as empty-element tags.

use crate::document::TinyDocument;
use crate::error::TreeError;
use crate::node::{NodeId, NodeKind, NodeRef};
use crate::{axis::Axis, node_test::NodeTest};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesPI, BytesStart, BytesText, Event};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Destination for the events of a result tree.
pub trait Outputter {
    fn start_element(&mut self, name: &str) -> Result<(), TreeError>;

    /// Declares a namespace on the element just started. An empty prefix
    /// declares the default namespace.
    fn namespace(&mut self, prefix: &str, uri: &str) -> Result<(), TreeError>;

    /// Adds an attribute to the element just started.
    fn attribute(&mut self, name: &str, value: &str) -> Result<(), TreeError>;

    fn end_element(&mut self) -> Result<(), TreeError>;
    fn characters(&mut self, text: &str) -> Result<(), TreeError>;
    fn comment(&mut self, text: &str) -> Result<(), TreeError>;
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), TreeError>;

    /// Flushes anything still buffered.
    fn finish(&mut self) -> Result<(), TreeError> {
        Ok(())
    }
}

/// Writes events as XML text.
pub struct XmlOutputter<W: Write> {
    writer: Writer<W>,
    pending: Option<BytesStart<'static>>,
    open: Vec<String>,
}

impl<W: Write> XmlOutputter<W> {
    pub fn new(inner: W) -> Self {
        XmlOutputter {
            writer: Writer::new(inner),
            pending: None,
            open: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn flush_start(&mut self) -> Result<(), TreeError> {
        if let Some(start) = self.pending.take() {
            self.writer.write_event(Event::Start(start))?;
        }
        Ok(())
    }

    fn pending_tag(&mut self) -> Result<&mut BytesStart<'static>, TreeError> {
        self.pending
            .as_mut()
            .ok_or_else(|| TreeError::Output("attribute written outside a start tag".into()))
    }
}

impl XmlOutputter<Vec<u8>> {
    /// Output gathered in memory so far, as text.
    pub fn into_string(mut self) -> Result<String, TreeError> {
        self.finish()?;
        String::from_utf8(self.into_inner()).map_err(|e| TreeError::Output(e.to_string()))
    }
}

impl<W: Write> Outputter for XmlOutputter<W> {
    fn start_element(&mut self, name: &str) -> Result<(), TreeError> {
        self.flush_start()?;
        self.pending = Some(BytesStart::new(name.to_string()));
        self.open.push(name.to_string());
        Ok(())
    }

    fn namespace(&mut self, prefix: &str, uri: &str) -> Result<(), TreeError> {
        let name = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{prefix}")
        };
        self.pending_tag()?.push_attribute((name.as_str(), uri));
        Ok(())
    }

    fn attribute(&mut self, name: &str, value: &str) -> Result<(), TreeError> {
        self.pending_tag()?.push_attribute((name, value));
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), TreeError> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| TreeError::Output("end tag without start tag".into()))?;
        match self.pending.take() {
            Some(start) => self.writer.write_event(Event::Empty(start))?,
            None => self.writer.write_event(Event::End(BytesEnd::new(name)))?,
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), TreeError> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush_start()?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), TreeError> {
        self.flush_start()?;
        self.writer
            .write_event(Event::Comment(BytesText::from_escaped(text)))?;
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), TreeError> {
        self.flush_start()?;
        let content = if data.is_empty() {
            target.to_string()
        } else {
            format!("{target} {data}")
        };
        self.writer.write_event(Event::PI(BytesPI::new(content)))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TreeError> {
        self.flush_start()?;
        while !self.open.is_empty() {
            self.end_element()?;
        }
        Ok(())
    }
}

/// Keeps only character data, as the `text` output method does.
#[derive(Debug, Default)]
pub struct TextOutputter {
    buffer: String,
}

impl TextOutputter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl Outputter for TextOutputter {
    fn start_element(&mut self, _name: &str) -> Result<(), TreeError> {
        Ok(())
    }
    fn namespace(&mut self, _prefix: &str, _uri: &str) -> Result<(), TreeError> {
        Ok(())
    }
    fn attribute(&mut self, _name: &str, _value: &str) -> Result<(), TreeError> {
        Ok(())
    }
    fn end_element(&mut self) -> Result<(), TreeError> {
        Ok(())
    }
    fn characters(&mut self, text: &str) -> Result<(), TreeError> {
        self.buffer.push_str(text);
        Ok(())
    }
    fn comment(&mut self, _text: &str) -> Result<(), TreeError> {
        Ok(())
    }
    fn processing_instruction(&mut self, _target: &str, _data: &str) -> Result<(), TreeError> {
        Ok(())
    }
}

/// A shared outputter. The caller keeps one handle and hands a clone to
/// whoever produces the events, then reads the result through its own.
impl<O: Outputter + ?Sized> Outputter for Rc<RefCell<O>> {
    fn start_element(&mut self, name: &str) -> Result<(), TreeError> {
        self.borrow_mut().start_element(name)
    }
    fn namespace(&mut self, prefix: &str, uri: &str) -> Result<(), TreeError> {
        self.borrow_mut().namespace(prefix, uri)
    }
    fn attribute(&mut self, name: &str, value: &str) -> Result<(), TreeError> {
        self.borrow_mut().attribute(name, value)
    }
    fn end_element(&mut self) -> Result<(), TreeError> {
        self.borrow_mut().end_element()
    }
    fn characters(&mut self, text: &str) -> Result<(), TreeError> {
        self.borrow_mut().characters(text)
    }
    fn comment(&mut self, text: &str) -> Result<(), TreeError> {
        self.borrow_mut().comment(text)
    }
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), TreeError> {
        self.borrow_mut().processing_instruction(target, data)
    }
    fn finish(&mut self) -> Result<(), TreeError> {
        self.borrow_mut().finish()
    }
}

/// Namespace declarations made on an element itself, as (prefix, uri).
fn declared_namespaces<'a>(doc: &'a TinyDocument, element: u32) -> impl Iterator<Item = (String, String)> + 'a {
    let pool = doc.name_pool();
    let first = doc.first_namespace(element).unwrap_or(doc.number_of_namespaces() as u32) as usize;
    (first..doc.number_of_namespaces())
        .take_while(move |&d| doc.ns_parent[d] == element)
        .map(move |d| {
            let code = doc.ns_code[d];
            let prefix = pool
                .get_prefix_from_namespace_code(code)
                .map(|p| p.to_string())
                .unwrap_or_default();
            let uri = pool
                .get_uri_from_namespace_code(code)
                .map(|u| u.to_string())
                .unwrap_or_default();
            (prefix, uri)
        })
}

impl<'a> NodeRef<'a> {
    /// Sends a deep copy of this node to `out`.
    pub fn copy_to(&self, out: &mut dyn Outputter) -> Result<(), TreeError> {
        match self.kind() {
            NodeKind::Root => self.copy_children(out),
            NodeKind::Element => {
                out.start_element(&self.display_name())?;
                if let NodeId::Node(h) = self.id() {
                    for (prefix, uri) in declared_namespaces(self.document(), h.raw()) {
                        out.namespace(&prefix, &uri)?;
                    }
                }
                for attribute in self.enumerate(Axis::Attribute, NodeTest::AnyNode) {
                    out.attribute(&attribute.display_name(), &attribute.string_value())?;
                }
                self.copy_children(out)?;
                out.end_element()
            }
            NodeKind::Attribute => out.attribute(&self.display_name(), &self.string_value()),
            NodeKind::Namespace => out.namespace(&self.local_name(), &self.string_value()),
            NodeKind::Text => out.characters(&self.string_value()),
            NodeKind::Comment => out.comment(&self.string_value()),
            NodeKind::ProcessingInstruction => {
                out.processing_instruction(&self.local_name(), &self.string_value())
            }
        }
    }

    fn copy_children(&self, out: &mut dyn Outputter) -> Result<(), TreeError> {
        for child in self.enumerate(Axis::Child, NodeTest::AnyNode) {
            child.copy_to(out)?;
        }
        Ok(())
    }
}
