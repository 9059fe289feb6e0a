//! `xsl:key` definitions and the per-document indexes built from them.
use crate::context::Context;
use crate::error::XsltError;
use crate::expression::Expression;
use crate::pattern::Pattern;
use crate::value::Value;
use arbor_tree::{Axis, Fingerprint, NodeId, NodeKind, NodeRef, NodeTest, TinyDocument};
use itertools::Itertools;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// One `xsl:key` declaration. Several may share a name.
#[derive(Debug, Clone)]
pub struct KeyDefinition {
    pub name: Fingerprint,
    pub pattern: Arc<Pattern>,
    pub use_expr: Arc<dyn Expression>,
}

/// Key value to the matching nodes, in document order.
type KeyIndex = HashMap<String, Vec<NodeId>>;

#[derive(Default)]
pub struct KeyManager {
    definitions: HashMap<Fingerprint, Vec<KeyDefinition>>,
    indexes: Mutex<HashMap<(u32, Fingerprint), Arc<OnceCell<KeyIndex>>>>,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("keys", &self.definitions.len())
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition. Declaring the same key twice with the same match
    /// pattern and use expression is a recoverable error; the copy is ignored.
    pub fn add_key_definition(&mut self, definition: KeyDefinition) -> Result<(), XsltError> {
        let existing = self.definitions.entry(definition.name).or_default();
        let duplicate = existing.iter().any(|d| {
            d.pattern.text() == definition.pattern.text()
                && format!("{:?}", d.use_expr) == format!("{:?}", definition.use_expr)
        });
        if duplicate {
            return Err(XsltError::recoverable(format!(
                "Duplicate definition of key with pattern {}",
                definition.pattern
            )));
        }
        existing.push(definition);
        Ok(())
    }

    pub fn key_definitions(&self, name: Fingerprint) -> &[KeyDefinition] {
        self.definitions.get(&name).map(Vec::as_slice).unwrap_or_default()
    }

    /// The nodes of `doc` whose value for key `name` is `value`, in document
    /// order. The document's index for the key is built on first use.
    pub fn select_by_key<'a>(
        &self,
        name: Fingerprint,
        doc: &'a TinyDocument,
        value: &str,
        ctx: &Context<'a>,
    ) -> Result<Vec<NodeRef<'a>>, XsltError> {
        let definitions = self.definitions.get(&name).ok_or_else(|| XsltError::UndefinedKey {
            name: doc
                .name_pool()
                .get_display_name(name.to_name_code())
                .unwrap_or_else(|_| name.to_string()),
        })?;
        let cell = {
            let mut indexes = self.indexes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            indexes.entry((doc.document_number(), name)).or_default().clone()
        };
        let index = cell.get_or_try_init(|| build_index(definitions, doc, ctx))?;
        Ok(index
            .get(value)
            .map(|ids| ids.iter().filter_map(|&id| doc.node_by_id(id)).collect())
            .unwrap_or_default())
    }

    /// Drops the indexes built for a document.
    pub fn forget_document(&self, document_number: u32) {
        let mut indexes = self.indexes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        indexes.retain(|(doc, _), _| *doc != document_number);
    }

    /// Number of (document, key) indexes currently held.
    pub fn cached_indexes(&self) -> usize {
        self.indexes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

fn build_index<'a>(
    definitions: &[KeyDefinition],
    doc: &'a TinyDocument,
    ctx: &Context<'a>,
) -> Result<KeyIndex, XsltError> {
    log::debug!(
        "Building index for key with {} definition(s) over document {}",
        definitions.len(),
        doc.document_number()
    );
    let mut per_definition = Vec::with_capacity(definitions.len());
    for definition in definitions {
        per_definition.push(index_definition(definition, doc, ctx)?);
    }
    let mut merged: HashMap<String, Vec<Vec<NodeRef<'a>>>> = HashMap::new();
    for index in per_definition {
        for (value, nodes) in index {
            merged.entry(value).or_default().push(nodes);
        }
    }
    Ok(merged
        .into_iter()
        .map(|(value, lists)| {
            let ids = lists.into_iter().kmerge().dedup().map(|n| n.id()).collect();
            (value, ids)
        })
        .collect())
}

fn index_definition<'a>(
    definition: &KeyDefinition,
    doc: &'a TinyDocument,
    ctx: &Context<'a>,
) -> Result<HashMap<String, Vec<NodeRef<'a>>>, XsltError> {
    let kind = definition.pattern.node_kind();
    let with_attributes = matches!(kind, None | Some(NodeKind::Attribute));
    let mut index: HashMap<String, Vec<NodeRef<'a>>> = HashMap::new();
    let mut consider = |node: NodeRef<'a>| -> Result<(), XsltError> {
        if !definition.pattern.matches(node, ctx)? {
            return Ok(());
        }
        let at_node = ctx.new_context().at(node, 1).with_last(1);
        let values = match definition.use_expr.evaluate(&at_node)? {
            Value::NodeSet(nodes) => nodes.iter().map(|n| n.string_value().into_owned()).collect(),
            other => vec![other.as_string()],
        };
        for value in values {
            let nodes = index.entry(value).or_default();
            // One node can yield the same value more than once.
            if nodes.last() != Some(&node) {
                nodes.push(node);
            }
        }
        Ok(())
    };
    for node in doc.root().enumerate(Axis::Descendant, NodeTest::AnyNode) {
        if kind.is_none_or(|k| k == node.kind()) {
            consider(node)?;
        }
        if with_attributes && node.kind() == NodeKind::Element {
            for attribute in node.enumerate(Axis::Attribute, NodeTest::AnyNode) {
                consider(attribute)?;
            }
        }
    }
    Ok(index)
}
