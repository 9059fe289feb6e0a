//! Building trees from XML text.
//!
//! The text is parsed with roxmltree and then replayed as [`Receiver`]
//! events, so the same builder serves parsed and programmatic input.

use crate::builder::{Attribute, PreviewHandler, Receiver, TinyBuilder};
use crate::document::{AttributeType, TinyDocument};
use crate::error::TreeError;
use crate::namepool::{NameCode, NamePool, NamespaceCode, XML_URI};
use std::sync::Arc;

/// Options applied while a source document is built.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub system_id: String,
    /// Drop text nodes consisting only of whitespace.
    pub strip_whitespace: bool,
    pub line_numbering: bool,
    pub discard_comments: bool,
    /// Local names of attributes treated as `ID`-typed, besides `xml:id`.
    pub id_attributes: Vec<String>,
}

/// Parses `text` into a new document whose names live in `pool`.
pub fn parse_document(
    pool: Arc<NamePool>,
    text: &str,
    options: &ParseOptions,
    preview: Option<&mut dyn PreviewHandler>,
) -> Result<TinyDocument, TreeError> {
    let xml = roxmltree::Document::parse_with_options(
        text,
        roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        },
    )?;
    let mut builder = TinyBuilder::new(pool)
        .with_system_id(&options.system_id)
        .with_line_numbering(options.line_numbering)
        .with_discard_comments(options.discard_comments);
    if let Some(handler) = preview {
        builder = builder.with_preview(handler);
    }
    let pool = builder.name_pool().clone();
    send_document(&xml, &mut builder, &pool, options)?;
    builder.finish()
}

/// Replays a parsed document as a stream of events.
pub fn send_document(
    xml: &roxmltree::Document<'_>,
    receiver: &mut dyn Receiver,
    pool: &Arc<NamePool>,
    options: &ParseOptions,
) -> Result<(), TreeError> {
    let pool = Names(pool.clone());
    receiver.start_document()?;
    for child in xml.root().children() {
        send_node(xml, child, receiver, &pool, options)?;
    }
    receiver.end_document()
}

struct Names(Arc<NamePool>);

impl Names {
    fn name(&self, node: roxmltree::Node<'_, '_>, uri: Option<&str>, local: &str) -> Result<NameCode, TreeError> {
        let uri = uri.unwrap_or("");
        let prefix = if uri.is_empty() {
            ""
        } else if uri == XML_URI {
            "xml"
        } else {
            node.lookup_prefix(uri).unwrap_or("")
        };
        self.0.allocate(prefix, uri, local)
    }
}

fn send_node(
    xml: &roxmltree::Document<'_>,
    node: roxmltree::Node<'_, '_>,
    receiver: &mut dyn Receiver,
    pool: &Names,
    options: &ParseOptions,
) -> Result<(), TreeError> {
    if options.line_numbering {
        receiver.set_line_number(xml.text_pos_at(node.range().start).row);
    }
    match node.node_type() {
        roxmltree::NodeType::Element => {
            let tag = node.tag_name();
            let name = pool.name(node, tag.namespace(), tag.name())?;

            let values: Vec<(NameCode, AttributeType)> = node
                .attributes()
                .map(|a| {
                    let code = pool.name(node, a.namespace(), a.name())?;
                    let is_id = (a.namespace() == Some(XML_URI) && a.name() == "id")
                        || (a.namespace().is_none() && options.id_attributes.iter().any(|n| n == a.name()));
                    Ok((code, if is_id { AttributeType::Id } else { AttributeType::Cdata }))
                })
                .collect::<Result<_, TreeError>>()?;
            let attributes: Vec<Attribute<'_>> = node
                .attributes()
                .zip(&values)
                .map(|(a, &(code, att_type))| Attribute {
                    name: code,
                    value: a.value(),
                    att_type,
                })
                .collect();

            let namespaces = namespace_delta(node, &pool.0)?;
            receiver.start_element(name, &attributes, &namespaces)?;
            for child in node.children() {
                send_node(xml, child, receiver, pool, options)?;
            }
            receiver.end_element()
        }
        roxmltree::NodeType::Text => {
            let text = node.text().unwrap_or("");
            if options.strip_whitespace && text.trim().is_empty() {
                return Ok(());
            }
            receiver.characters(text)
        }
        roxmltree::NodeType::Comment => receiver.comment(node.text().unwrap_or("")),
        roxmltree::NodeType::PI => match node.pi() {
            Some(pi) => receiver.processing_instruction(pi.target, pi.value.unwrap_or("")),
            None => Ok(()),
        },
        roxmltree::NodeType::Root => Ok(()),
    }
}

/// Namespaces in scope on `node` that are not in scope, with the same URI,
/// on its parent element. An undeclared default namespace yields the null code.
fn namespace_delta(node: roxmltree::Node<'_, '_>, pool: &NamePool) -> Result<Vec<NamespaceCode>, TreeError> {
    let parent = node.parent_element();
    let inherited = |prefix: Option<&str>| {
        parent.and_then(|p| {
            p.namespaces()
                .find(|ns| ns.name() == prefix)
                .map(|ns| ns.uri().to_string())
        })
    };
    let mut codes = Vec::new();
    for ns in node.namespaces() {
        if ns.name() == Some("xml") || ns.uri().is_empty() {
            continue;
        }
        if inherited(ns.name()).as_deref() != Some(ns.uri()) {
            codes.push(pool.allocate_namespace_code(ns.name().unwrap_or(""), ns.uri())?);
        }
    }
    let default_here = node
        .namespaces()
        .any(|ns| ns.name().is_none() && !ns.uri().is_empty());
    if !default_here && inherited(None).is_some_and(|uri| !uri.is_empty()) {
        codes.push(NamespaceCode::NULL);
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::node::NodeKind;
    use crate::node_test::NodeTest;

    fn parse(pool: &Arc<NamePool>, text: &str, options: &ParseOptions) -> TinyDocument {
        parse_document(pool.clone(), text, options, None).unwrap()
    }

    #[test]
    fn test_parse_builds_rows_in_document_order() {
        let pool = Arc::new(NamePool::new());
        let doc = parse(&pool, "<r><a>1</a><!--c--><?go now?><b/></r>", &ParseOptions::default());
        let kinds: Vec<_> = (0..doc.number_of_nodes() as u32)
            .map(|i| doc.node(crate::node::NodeHandle::new(i)).unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            [
                NodeKind::Root,
                NodeKind::Element,
                NodeKind::Element,
                NodeKind::Text,
                NodeKind::Comment,
                NodeKind::ProcessingInstruction,
                NodeKind::Element
            ]
        );
    }

    #[test]
    fn test_whitespace_stripping() {
        let pool = Arc::new(NamePool::new());
        let text = "<r>\n  <a>x</a>\n</r>";
        let kept = parse(&pool, text, &ParseOptions::default());
        let stripped = parse(
            &pool,
            text,
            &ParseOptions {
                strip_whitespace: true,
                ..ParseOptions::default()
            },
        );
        assert_eq!(kept.number_of_nodes(), 6);
        assert_eq!(stripped.number_of_nodes(), 4);
    }

    #[test]
    fn test_prefixed_names_and_namespace_nodes() {
        let pool = Arc::new(NamePool::new());
        let doc = parse(
            &pool,
            r#"<r xmlns="urn:d" xmlns:q="urn:q"><q:e q:att="v"><f xmlns=""/></q:e></r>"#,
            &ParseOptions::default(),
        );
        let e = doc.document_element().unwrap().enumerate(Axis::Child, NodeTest::AnyNode).next().unwrap();
        assert_eq!(e.display_name(), "q:e");
        assert_eq!(e.uri(), "urn:q");
        let att = e.enumerate(Axis::Attribute, NodeTest::AnyNode).next().unwrap();
        assert_eq!(att.display_name(), "q:att");
        let f = e.enumerate(Axis::Child, NodeTest::AnyNode).next().unwrap();
        assert_eq!(f.uri(), "");
        let in_scope: Vec<_> = f
            .enumerate(Axis::Namespace, NodeTest::AnyNode)
            .map(|n| n.local_name())
            .collect();
        assert_eq!(in_scope, ["xml", "q"]);
    }

    #[test]
    fn test_id_attributes_and_line_numbers() {
        let pool = Arc::new(NamePool::new());
        let options = ParseOptions {
            line_numbering: true,
            id_attributes: vec!["key".into()],
            ..ParseOptions::default()
        };
        let doc = parse(&pool, "<r>\n<a key=\"k1\"/>\n<b xml:id=\"k2\"/></r>", &options);
        let a = doc.select_id("k1").unwrap();
        assert_eq!(a.local_name(), "a");
        assert_eq!(a.line_number(), Some(2));
        assert_eq!(doc.select_id("k2").unwrap().local_name(), "b");
    }

    #[test]
    fn test_malformed_input() {
        let pool = Arc::new(NamePool::new());
        let result = parse_document(pool, "<r><a></r>", &ParseOptions::default(), None);
        assert!(matches!(result, Err(TreeError::Xml(_))));
    }
}
