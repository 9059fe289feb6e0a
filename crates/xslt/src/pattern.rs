//! Match patterns: parsing and node matching.
//!
//! Pattern text is parsed with `nom` into a raw form whose names are then
//! resolved against a [`StaticContext`]. Matching works right to left: the
//! last step is tested against the node itself, then each earlier step
//! against its parent or one of its ancestors.
use crate::context::Context;
use crate::error::XsltError;
use crate::expression::{Expression, Literal};
use crate::value::Value;
use arbor_tree::namepool::XML_URI;
use arbor_tree::{Fingerprint, NamePool, NodeKind, NodeRef, NodeTest};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated},
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a pattern was written. Every part of a pattern, including both
/// halves of a union, refers to the same record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatternSource {
    pub text: String,
    pub system_id: String,
    pub line: u32,
}

/// How a step relates to the step written before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `a/b`
    Parent,
    /// `a//b`
    Ancestor,
}

#[derive(Debug, Clone)]
pub struct LocationPathPattern {
    test: NodeTest,
    filters: Vec<Arc<dyn Expression>>,
    upper: Option<(Relation, Box<Pattern>)>,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    Union(Box<Pattern>, Box<Pattern>),
    Test(NodeTest),
    Path(LocationPathPattern),
    /// `id(...)`: elements whose ID is among the whitespace-separated values.
    Id(Arc<dyn Expression>),
    /// `key(name, value)`
    Key {
        name: Fingerprint,
        display_name: String,
        value: Arc<dyn Expression>,
    },
}

#[derive(Debug, Clone)]
pub struct Pattern {
    kind: PatternKind,
    source: Arc<PatternSource>,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source.text)
    }
}

impl Pattern {
    pub fn new(kind: PatternKind, source: PatternSource) -> Self {
        Pattern {
            kind,
            source: Arc::new(source),
        }
    }

    /// A single-step pattern for `test`, displayed as `text`.
    pub fn from_node_test(test: NodeTest, text: &str) -> Self {
        Self::new(
            PatternKind::Test(test),
            PatternSource {
                text: text.to_string(),
                ..PatternSource::default()
            },
        )
    }

    /// `a | b`. Both halves take over the source record of the union.
    pub fn union(a: Pattern, b: Pattern) -> Self {
        let source = Arc::new(PatternSource {
            text: format!("{} | {}", a.source.text, b.source.text),
            system_id: a.source.system_id.clone(),
            line: a.source.line,
        });
        Pattern {
            kind: PatternKind::Union(
                Box::new(a.with_source(source.clone())),
                Box::new(b.with_source(source.clone())),
            ),
            source,
        }
    }

    /// Attaches a predicate to the last step.
    pub fn with_filter(mut self, filter: Arc<dyn Expression>) -> Result<Self, XsltError> {
        self.kind = match self.kind {
            PatternKind::Test(test) => PatternKind::Path(LocationPathPattern {
                test,
                filters: vec![filter],
                upper: None,
            }),
            PatternKind::Path(mut path) => {
                path.filters.push(filter);
                PatternKind::Path(path)
            }
            _ => {
                return Err(XsltError::structural(format!(
                    "Cannot attach a predicate to pattern {}",
                    self.source.text
                )));
            }
        };
        Ok(self)
    }

    pub(crate) fn with_source(mut self, source: Arc<PatternSource>) -> Self {
        self.kind = match self.kind {
            PatternKind::Union(a, b) => PatternKind::Union(
                Box::new(a.with_source(source.clone())),
                Box::new(b.with_source(source.clone())),
            ),
            PatternKind::Path(mut path) => {
                path.upper = path
                    .upper
                    .map(|(rel, upper)| (rel, Box::new(upper.with_source(source.clone()))));
                PatternKind::Path(path)
            }
            other => other,
        };
        self.source = source;
        self
    }

    pub fn kind(&self) -> &PatternKind {
        &self.kind
    }

    pub fn source(&self) -> &Arc<PatternSource> {
        &self.source
    }

    pub fn text(&self) -> &str {
        &self.source.text
    }

    pub fn system_id(&self) -> &str {
        &self.source.system_id
    }

    pub fn line_number(&self) -> u32 {
        self.source.line
    }

    /// True when two patterns came from the same piece of pattern text.
    pub fn same_origin(&self, other: &Pattern) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }

    pub fn is_no_node(&self) -> bool {
        match &self.kind {
            PatternKind::Test(test) => *test == NodeTest::NoNode,
            PatternKind::Path(path) => path.test == NodeTest::NoNode,
            _ => false,
        }
    }

    /// The only kind of node this pattern can match, if there is one.
    pub fn node_kind(&self) -> Option<NodeKind> {
        match &self.kind {
            PatternKind::Test(test) => test.node_kind(),
            PatternKind::Path(path) => path.test.node_kind(),
            PatternKind::Union(a, b) => a.node_kind().filter(|kind| b.node_kind() == Some(*kind)),
            PatternKind::Id(_) => Some(NodeKind::Element),
            PatternKind::Key { .. } => None,
        }
    }

    /// The only name this pattern can match, if it is that specific.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match &self.kind {
            PatternKind::Test(test) => test.fingerprint(),
            PatternKind::Path(path) => path.test.fingerprint(),
            _ => None,
        }
    }

    pub fn default_priority(&self) -> f64 {
        match &self.kind {
            PatternKind::Test(test) => test.default_priority(),
            PatternKind::Path(path) if path.filters.is_empty() && path.upper.is_none() => {
                path.test.default_priority()
            }
            _ => 0.5,
        }
    }

    pub fn matches<'a>(&self, node: NodeRef<'a>, ctx: &Context<'a>) -> Result<bool, XsltError> {
        match &self.kind {
            PatternKind::Union(a, b) => Ok(a.matches(node, ctx)? || b.matches(node, ctx)?),
            PatternKind::Test(test) => Ok(test.matches_node(&node)),
            PatternKind::Path(path) => path.matches(node, ctx),
            PatternKind::Id(expr) => {
                if node.kind() != NodeKind::Element {
                    return Ok(false);
                }
                let ids = expr.evaluate(&ctx.new_context().at(node, 1).with_last(1))?;
                let doc = node.document();
                Ok(string_values(&ids)
                    .iter()
                    .flat_map(|s| s.split_whitespace())
                    .any(|id| doc.select_id(id) == Some(node)))
            }
            PatternKind::Key {
                name,
                display_name,
                value,
            } => {
                let keys = ctx.keys().ok_or_else(|| XsltError::UndefinedKey {
                    name: display_name.clone(),
                })?;
                let values = value.evaluate(&ctx.new_context().at(node, 1).with_last(1))?;
                for v in string_values(&values) {
                    if keys.select_by_key(*name, node.document(), &v, ctx)?.contains(&node) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl LocationPathPattern {
    fn matches<'a>(&self, node: NodeRef<'a>, ctx: &Context<'a>) -> Result<bool, XsltError> {
        if !self.test.matches_node(&node) {
            return Ok(false);
        }
        if !self.filters.is_empty() {
            let at_node = ctx.new_context().at(node, 1).with_last(1);
            for filter in &self.filters {
                if !filter.evaluate(&at_node)?.as_boolean() {
                    return Ok(false);
                }
            }
        }
        match &self.upper {
            None => Ok(true),
            Some((Relation::Parent, upper)) => match node.parent() {
                Some(parent) => upper.matches(parent, ctx),
                None => Ok(false),
            },
            Some((Relation::Ancestor, upper)) => {
                let mut current = node.parent();
                while let Some(ancestor) = current {
                    if upper.matches(ancestor, ctx)? {
                        return Ok(true);
                    }
                    current = ancestor.parent();
                }
                Ok(false)
            }
        }
    }
}

fn string_values(value: &Value<'_>) -> Vec<String> {
    match value {
        Value::NodeSet(nodes) => nodes.iter().map(|n| n.string_value().into_owned()).collect(),
        other => vec![other.as_string()],
    }
}

/// Names and namespaces in scope where a pattern is written.
#[derive(Debug, Clone)]
pub struct StaticContext {
    pool: Arc<NamePool>,
    namespaces: HashMap<String, String>,
    system_id: String,
    line: u32,
}

impl StaticContext {
    pub fn new(pool: Arc<NamePool>) -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert("xml".to_string(), XML_URI.to_string());
        StaticContext {
            pool,
            namespaces,
            system_id: String::new(),
            line: 0,
        }
    }

    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.declare_namespace(prefix, uri);
        self
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        self.namespaces.insert(prefix.to_string(), uri.to_string());
    }

    pub fn with_location(mut self, system_id: &str, line: u32) -> Self {
        self.system_id = system_id.to_string();
        self.line = line;
        self
    }

    pub fn name_pool(&self) -> &Arc<NamePool> {
        &self.pool
    }

    pub fn parse(&self, text: &str) -> Result<Pattern, XsltError> {
        let trimmed = text.trim();
        let fail = |message: String| XsltError::PatternParse {
            pattern: trimmed.to_string(),
            message,
        };
        let paths = match pattern_parser(trimmed) {
            Ok(("", paths)) => paths,
            Ok((rest, _)) => return Err(fail(format!("Unexpected text '{rest}'"))),
            Err(e) => return Err(fail(e.to_string())),
        };
        let source = Arc::new(PatternSource {
            text: trimmed.to_string(),
            system_id: self.system_id.clone(),
            line: self.line,
        });
        let mut resolved = Vec::with_capacity(paths.len());
        for path in paths {
            resolved.push(self.resolve_path(path, &source).map_err(|e| match e {
                XsltError::Structural(message) => fail(message),
                other => other,
            })?);
        }
        resolved
            .into_iter()
            .reduce(|a, b| Pattern {
                kind: PatternKind::Union(Box::new(a), Box::new(b)),
                source: source.clone(),
            })
            .ok_or_else(|| fail("Empty pattern".to_string()))
    }

    /// Expanded name of a lexical QName; unprefixed names are in no namespace.
    pub fn fingerprint(&self, prefix: Option<&str>, local: &str) -> Result<Fingerprint, XsltError> {
        let prefix = prefix.unwrap_or("");
        let uri = self.uri_for(prefix)?;
        match self.pool.get_fingerprint(uri, local) {
            Some(fp) => Ok(fp),
            None => Ok(self.pool.allocate(prefix, uri, local)?.fingerprint()),
        }
    }

    fn uri_for(&self, prefix: &str) -> Result<&str, XsltError> {
        if prefix.is_empty() {
            return Ok("");
        }
        self.namespaces
            .get(prefix)
            .map(String::as_str)
            .ok_or_else(|| XsltError::structural(format!("Undeclared namespace prefix '{prefix}'")))
    }

    fn resolve_path(&self, path: RawPath<'_>, source: &Arc<PatternSource>) -> Result<Pattern, XsltError> {
        let mut current = match path.head {
            None => None,
            Some(RawHead::Root) => Some(PatternKind::Test(NodeTest::Kind(NodeKind::Root))),
            Some(RawHead::Id(ids)) => Some(PatternKind::Id(Arc::new(Literal::string(ids)))),
            Some(RawHead::Key(name, value)) => {
                let (prefix, local) = split_qname(name);
                Some(PatternKind::Key {
                    name: self.fingerprint(prefix, local)?,
                    display_name: name.to_string(),
                    value: Arc::new(Literal::string(value)),
                })
            }
        };
        for (relation, step) in path.steps {
            let test = self.resolve_step(&step)?;
            current = Some(match current {
                None => PatternKind::Test(test),
                Some(upper) => PatternKind::Path(LocationPathPattern {
                    test,
                    filters: Vec::new(),
                    upper: Some((
                        relation,
                        Box::new(Pattern {
                            kind: upper,
                            source: source.clone(),
                        }),
                    )),
                }),
            });
        }
        let kind = current.ok_or_else(|| XsltError::structural("Empty location path"))?;
        Ok(Pattern {
            kind,
            source: source.clone(),
        })
    }

    fn resolve_step(&self, step: &RawStep<'_>) -> Result<NodeTest, XsltError> {
        let kind = if step.attribute {
            NodeKind::Attribute
        } else {
            NodeKind::Element
        };
        Ok(match (&step.test, step.attribute) {
            (RawTest::Node, true) | (RawTest::Any, true) => NodeTest::Kind(NodeKind::Attribute),
            (RawTest::Text | RawTest::Comment | RawTest::Pi(_), true) => NodeTest::NoNode,
            (RawTest::Node, false) => NodeTest::AnyChildNode,
            (RawTest::Any, false) => NodeTest::Kind(NodeKind::Element),
            (RawTest::Text, false) => NodeTest::Kind(NodeKind::Text),
            (RawTest::Comment, false) => NodeTest::Kind(NodeKind::Comment),
            (RawTest::Pi(None), false) => NodeTest::Kind(NodeKind::ProcessingInstruction),
            (RawTest::Pi(Some(target)), false) => NodeTest::Name {
                kind: NodeKind::ProcessingInstruction,
                fingerprint: self.fingerprint(None, target)?,
            },
            (RawTest::NamespaceWildcard(prefix), _) => {
                let uri = self.uri_for(prefix)?;
                let uri_code = match self.pool.get_code_for_uri(uri) {
                    Some(code) => code,
                    None => self.pool.allocate_code_for_uri(uri)?,
                };
                NodeTest::Namespace { kind, uri_code }
            }
            (RawTest::Name(prefix, local), _) => NodeTest::Name {
                kind,
                fingerprint: self.fingerprint(*prefix, local)?,
            },
        })
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

// --- Parser ---

#[derive(Debug, Clone, PartialEq)]
enum RawTest<'s> {
    Node,
    Text,
    Comment,
    Pi(Option<&'s str>),
    Any,
    NamespaceWildcard(&'s str),
    Name(Option<&'s str>, &'s str),
}

#[derive(Debug, Clone, PartialEq)]
struct RawStep<'s> {
    attribute: bool,
    test: RawTest<'s>,
}

#[derive(Debug, Clone, PartialEq)]
enum RawHead<'s> {
    Root,
    Id(&'s str),
    Key(&'s str, &'s str),
}

/// A path between `|` separators. The relation of the first step links it to
/// the head, and is meaningless when there is none.
#[derive(Debug, Clone, PartialEq)]
struct RawPath<'s> {
    head: Option<RawHead<'s>>,
    steps: Vec<(Relation, RawStep<'s>)>,
}

fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn ncname(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.')),
    ))
    .parse(input)
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
    ))
    .parse(input)
}

fn node_test(input: &str) -> IResult<&str, RawTest<'_>> {
    alt((
        value(RawTest::Node, tag("node()")),
        value(RawTest::Text, tag("text()")),
        value(RawTest::Comment, tag("comment()")),
        map(
            delimited(tag("processing-instruction("), opt(ws(string_literal)), char(')')),
            RawTest::Pi,
        ),
        value(RawTest::Any, char('*')),
        map(terminated(ncname, tag(":*")), RawTest::NamespaceWildcard),
        map(pair(opt(terminated(ncname, char(':'))), ncname), |(prefix, local)| {
            RawTest::Name(prefix, local)
        }),
    ))
    .parse(input)
}

fn step(input: &str) -> IResult<&str, RawStep<'_>> {
    map(
        pair(
            opt(alt((
                value(true, char('@')),
                value(true, tag("attribute::")),
                value(false, tag("child::")),
            ))),
            node_test,
        ),
        |(axis, test)| RawStep {
            attribute: axis.unwrap_or(false),
            test,
        },
    )
    .parse(input)
}

fn separator(input: &str) -> IResult<&str, Relation> {
    alt((
        value(Relation::Ancestor, tag("//")),
        value(Relation::Parent, char('/')),
    ))
    .parse(input)
}

fn further_steps(input: &str) -> IResult<&str, Vec<(Relation, RawStep<'_>)>> {
    many0(pair(ws(separator), step)).parse(input)
}

fn id_call(input: &str) -> IResult<&str, RawHead<'_>> {
    map(
        delimited(pair(tag("id"), ws(char('('))), string_literal, ws(char(')'))),
        RawHead::Id,
    )
    .parse(input)
}

fn key_call(input: &str) -> IResult<&str, RawHead<'_>> {
    map(
        delimited(
            pair(tag("key"), ws(char('('))),
            separated_pair(string_literal, ws(char(',')), string_literal),
            ws(char(')')),
        ),
        |(name, value)| RawHead::Key(name, value),
    )
    .parse(input)
}

fn path(input: &str) -> IResult<&str, RawPath<'_>> {
    alt((
        map(pair(alt((id_call, key_call)), further_steps), |(head, steps)| RawPath {
            head: Some(head),
            steps,
        }),
        map(
            pair(pair(separator, step), further_steps),
            |(first, mut steps)| {
                steps.insert(0, first);
                RawPath {
                    head: Some(RawHead::Root),
                    steps,
                }
            },
        ),
        value(
            RawPath {
                head: Some(RawHead::Root),
                steps: Vec::new(),
            },
            char('/'),
        ),
        map(pair(step, further_steps), |(first, mut steps)| {
            steps.insert(0, (Relation::Parent, first));
            RawPath { head: None, steps }
        }),
    ))
    .parse(input)
}

fn pattern_parser(input: &str) -> IResult<&str, Vec<RawPath<'_>>> {
    separated_list1(ws(char('|')), preceded(multispace0, path)).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::expr_fn;
    use arbor_tree::{ParseOptions, TinyDocument, parse_document};

    const DOC: &str = r#"<doc xmlns:p="urn:p"><sec id="s1"><para n="1">one</para><p:note/></sec><para n="2">two<?fmt bold?></para></doc>"#;

    fn setup() -> (StaticContext, TinyDocument) {
        let pool = Arc::new(NamePool::new());
        let options = ParseOptions {
            id_attributes: vec!["id".to_string()],
            ..ParseOptions::default()
        };
        let doc = parse_document(pool.clone(), DOC, &options, None).unwrap();
        (StaticContext::new(pool).with_namespace("q", "urn:p"), doc)
    }

    fn matching(sc: &StaticContext, doc: &TinyDocument, text: &str) -> Vec<String> {
        let pattern = sc.parse(text).unwrap();
        let ctx = Context::new(doc.root());
        let mut all = vec![doc.root()];
        all.extend(doc.root().enumerate(arbor_tree::Axis::Descendant, NodeTest::AnyNode));
        let attributes: Vec<_> = all
            .iter()
            .flat_map(|n| n.enumerate(arbor_tree::Axis::Attribute, NodeTest::AnyNode))
            .collect();
        all.extend(attributes);
        all.into_iter()
            .filter(|n| pattern.matches(*n, &ctx).unwrap())
            .map(|n| n.path())
            .collect()
    }

    #[test]
    fn test_pattern_parsing() {
        let (sc, _) = setup();
        for text in [
            "para",
            "sec/para",
            "/",
            "/*",
            "//para",
            "doc//para | @n",
            "text()",
            "processing-instruction('fmt')",
            "q:*",
            "id('s1')/para",
            "key('k', 'v')",
            "child::para/attribute::n",
        ] {
            assert!(sc.parse(text).is_ok(), "failed to parse {text}");
        }
        for text in ["", "//", "para/", "para[1]", "u:x", "id(s1)"] {
            assert!(sc.parse(text).is_err(), "accepted {text}");
        }
    }

    #[test]
    fn test_matching_paths() {
        let (sc, doc) = setup();
        assert_eq!(matching(&sc, &doc, "/"), ["/"]);
        assert_eq!(matching(&sc, &doc, "/doc"), ["/doc[1]"]);
        assert_eq!(matching(&sc, &doc, "para"), ["/doc[1]/sec[1]/para[1]", "/doc[1]/para[1]"]);
        assert_eq!(matching(&sc, &doc, "doc/para"), ["/doc[1]/para[1]"]);
        assert_eq!(matching(&sc, &doc, "doc//para"), ["/doc[1]/sec[1]/para[1]", "/doc[1]/para[1]"]);
        assert_eq!(matching(&sc, &doc, "q:*"), ["/doc[1]/sec[1]/p:note[1]"]);
        assert_eq!(matching(&sc, &doc, "sec/@id"), ["/doc[1]/sec[1]/@id"]);
        assert_eq!(
            matching(&sc, &doc, "processing-instruction()"),
            ["/doc[1]/para[1]/processing-instruction()[1]"]
        );
        assert_eq!(matching(&sc, &doc, "id('s1')/para"), ["/doc[1]/sec[1]/para[1]"]);
    }

    #[test]
    fn test_default_priorities() {
        let (sc, _) = setup();
        let priority = |text| sc.parse(text).unwrap().default_priority();
        assert_eq!(priority("para"), 0.0);
        assert_eq!(priority("@n"), 0.0);
        assert_eq!(priority("q:*"), -0.25);
        assert_eq!(priority("*"), -0.5);
        assert_eq!(priority("node()"), -0.5);
        assert_eq!(priority("/"), -0.5);
        assert_eq!(priority("sec/para"), 0.5);
        assert_eq!(priority("id('x')"), 0.5);
    }

    #[test]
    fn test_attribute_axis_kind_tests_never_match() {
        let (sc, _) = setup();
        assert!(sc.parse("@comment()").unwrap().is_no_node());
        assert!(sc.parse("@text()").unwrap().is_no_node());
        assert!(!sc.parse("@*").unwrap().is_no_node());
        assert_eq!(sc.parse("@node()").unwrap().node_kind(), Some(NodeKind::Attribute));
    }

    #[test]
    fn test_union_halves_share_source() {
        let (sc, _) = setup();
        let union = sc.parse("para | text()").unwrap();
        let PatternKind::Union(a, b) = union.kind() else {
            panic!("expected a union");
        };
        assert!(a.same_origin(b));
        assert!(a.same_origin(&union));
        assert_eq!(a.text(), "para | text()");
        assert_eq!(union.node_kind(), None);
        assert!(!sc.parse("para").unwrap().same_origin(&sc.parse("para").unwrap()));
    }

    #[test]
    fn test_programmatic_filter() {
        let (sc, doc) = setup();
        let n = sc.fingerprint(None, "n").unwrap();
        let second = expr_fn("n=2", move |ctx| {
            Ok(Value::Boolean(ctx.context_node().attribute_value(n) == Some("2")))
        });
        let pattern = sc.parse("para").unwrap().with_filter(Arc::new(second)).unwrap();
        assert_eq!(pattern.default_priority(), 0.5);
        let ctx = Context::new(doc.root());
        let paras: Vec<_> = doc
            .root()
            .enumerate(arbor_tree::Axis::Descendant, NodeTest::AnyNode)
            .filter(|n| pattern.matches(*n, &ctx).unwrap())
            .collect();
        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].string_value(), "two");
        assert!(sc.parse("a|b").unwrap().with_filter(Arc::new(Literal::boolean(true))).is_err());
    }
}
