//! The evaluation context.
//!
//! A [`Context`] is a small value that is cloned whenever a nested dispatch
//! needs different settings; the `with_*` methods produce the modified copy.
//! Clones share the source of `last()` for the sequence being processed, so
//! that the length is computed at most once for all nodes of that sequence.

use crate::error::XsltError;
use crate::keys::KeyManager;
use crate::mode::{ModeId, Rule};
use crate::params::ParameterSet;
use crate::value::Value;
use arbor_tree::{NodeEnumeration, NodeRef};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A node sequence being iterated, shared with the contexts created for it.
pub type SharedEnumeration<'a> = Rc<RefCell<Box<dyn NodeEnumeration<'a> + 'a>>>;

/// Where the value of `last()` comes from.
#[derive(Clone)]
pub enum LastSource<'a> {
    Known(usize),
    Sequence(SharedEnumeration<'a>),
}

impl fmt::Debug for LastSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastSource::Known(n) => f.debug_tuple("Known").field(n).finish(),
            LastSource::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

#[derive(Clone)]
pub struct Context<'a> {
    keys: Option<&'a KeyManager>,
    context_node: NodeRef<'a>,
    current_node: NodeRef<'a>,
    position: usize,
    last: LastSource<'a>,
    mode: ModeId,
    current_template: Option<Arc<Rule>>,
    tail_call: Option<ParameterSet<'a>>,
    remembered_number: Option<(NodeRef<'a>, usize)>,
    return_value: Option<Value<'a>>,
    saved_error: Option<Arc<XsltError>>,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("context_node", &self.context_node)
            .field("current_node", &self.current_node)
            .field("position", &self.position)
            .field("last", &self.last)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<'a> Context<'a> {
    /// A context positioned on `node`, as the only node of its sequence.
    pub fn new(node: NodeRef<'a>) -> Self {
        Context {
            keys: None,
            context_node: node,
            current_node: node,
            position: 1,
            last: LastSource::Known(1),
            mode: ModeId::Default,
            current_template: None,
            tail_call: None,
            remembered_number: None,
            return_value: None,
            saved_error: None,
        }
    }

    /// A copy for a nested evaluation. Call-scoped state is not carried over.
    pub fn new_context(&self) -> Self {
        Context {
            tail_call: None,
            return_value: None,
            saved_error: None,
            ..self.clone()
        }
    }

    pub fn with_keys(mut self, keys: &'a KeyManager) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_context_node(mut self, node: NodeRef<'a>) -> Self {
        self.context_node = node;
        self
    }

    pub fn with_current_node(mut self, node: NodeRef<'a>) -> Self {
        self.current_node = node;
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    pub fn with_last(mut self, last: usize) -> Self {
        self.last = LastSource::Known(last);
        self
    }

    pub fn with_last_source(mut self, source: LastSource<'a>) -> Self {
        self.last = source;
        self
    }

    pub fn with_mode(mut self, mode: ModeId) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_current_template(mut self, rule: Option<Arc<Rule>>) -> Self {
        self.current_template = rule;
        self
    }

    /// Moves to `node` as both context and current node.
    pub fn at(mut self, node: NodeRef<'a>, position: usize) -> Self {
        self.context_node = node;
        self.current_node = node;
        self.position = position;
        self
    }

    pub fn keys(&self) -> Option<&'a KeyManager> {
        self.keys
    }

    pub fn context_node(&self) -> NodeRef<'a> {
        self.context_node
    }

    pub fn current_node(&self) -> NodeRef<'a> {
        self.current_node
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn mode(&self) -> ModeId {
        self.mode
    }

    pub fn current_template(&self) -> Option<&Arc<Rule>> {
        self.current_template.as_ref()
    }

    /// Size of the sequence being processed.
    pub fn last(&self) -> Result<usize, XsltError> {
        match &self.last {
            LastSource::Known(n) => Ok(*n),
            LastSource::Sequence(seq) => seq
                .try_borrow_mut()
                .map(|mut seq| seq.last_position())
                .map_err(|_| XsltError::structural("last() requested while the sequence is being advanced")),
        }
    }

    pub fn is_at_last(&self) -> Result<bool, XsltError> {
        match &self.last {
            LastSource::Known(n) => Ok(self.position == *n),
            LastSource::Sequence(seq) => seq
                .try_borrow_mut()
                .map(|mut seq| !seq.has_next())
                .map_err(|_| XsltError::structural("last() requested while the sequence is being advanced")),
        }
    }

    pub fn set_remembered_number(&mut self, node: NodeRef<'a>, number: usize) {
        self.remembered_number = Some((node, number));
    }

    /// The number last remembered, if it was remembered for `node`.
    pub fn remembered_number(&self, node: NodeRef<'a>) -> Option<usize> {
        self.remembered_number
            .filter(|(n, _)| *n == node)
            .map(|(_, number)| number)
    }

    pub fn set_tail_call(&mut self, params: ParameterSet<'a>) {
        self.tail_call = Some(params);
    }

    pub fn take_tail_call(&mut self) -> Option<ParameterSet<'a>> {
        self.tail_call.take()
    }

    pub fn set_return_value(&mut self, value: Value<'a>) -> Result<(), XsltError> {
        if self.return_value.is_some() {
            return Err(XsltError::dynamic("A function can only return one result"));
        }
        self.return_value = Some(value);
        Ok(())
    }

    pub fn take_return_value(&mut self) -> Option<Value<'a>> {
        self.return_value.take()
    }

    pub fn set_saved_error(&mut self, error: XsltError) {
        self.saved_error = Some(Arc::new(error));
    }

    pub fn saved_error(&self) -> Option<&XsltError> {
        self.saved_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_tree::{Axis, NamePool, NodeKind, NodeTest, ParseOptions, parse_document};

    #[test]
    fn test_last_from_shared_sequence() {
        let pool = Arc::new(NamePool::new());
        let doc = parse_document(pool, "<r><a/><b/><c/></r>", &ParseOptions::default(), None).unwrap();
        let r = doc.document_element().unwrap();
        let seq: Box<dyn NodeEnumeration<'_> + '_> =
            Box::new(r.enumerate(Axis::Child, NodeTest::Kind(NodeKind::Element)));
        let shared = Rc::new(RefCell::new(seq));
        let first = shared.borrow_mut().next().unwrap();
        let ctx = Context::new(r)
            .with_last_source(LastSource::Sequence(shared.clone()))
            .at(first, 1);
        assert_eq!(ctx.last().unwrap(), 3);
        assert!(!ctx.is_at_last().unwrap());
        let branch = ctx.new_context();
        shared.borrow_mut().nth(1);
        assert!(branch.is_at_last().unwrap());
    }

    #[test]
    fn test_single_return_value() {
        let pool = Arc::new(NamePool::new());
        let doc = parse_document(pool, "<r/>", &ParseOptions::default(), None).unwrap();
        let mut ctx = Context::new(doc.root());
        ctx.set_return_value(Value::from("one")).unwrap();
        let err = ctx.set_return_value(Value::from("two")).unwrap_err();
        assert_eq!(err.to_string(), "A function can only return one result");
        assert!(ctx.new_context().take_return_value().is_none());
    }

    #[test]
    fn test_remembered_number_is_per_node() {
        let pool = Arc::new(NamePool::new());
        let doc = parse_document(pool, "<r><a/></r>", &ParseOptions::default(), None).unwrap();
        let r = doc.document_element().unwrap();
        let mut ctx = Context::new(r);
        ctx.set_remembered_number(r, 7);
        assert_eq!(ctx.remembered_number(r), Some(7));
        assert_eq!(ctx.remembered_number(doc.root()), None);
    }
}
