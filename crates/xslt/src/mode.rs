//! A mode's rule table.
//!
//! Rules are kept in buckets: one per node kind, a hashed set of buckets for
//! named elements, and one generic bucket for patterns that can match more
//! than one kind of node. Each bucket is ordered by descending
//! (precedence, priority), so a lookup can stop at the first rule ranked
//! below the best match so far.
use crate::context::Context;
use crate::error::XsltError;
use crate::error_listener::Diagnostics;
use crate::handler::NodeHandler;
use crate::pattern::Pattern;
use arbor_tree::{Fingerprint, NodeKind, NodeRef};
use std::fmt;
use std::sync::Arc;

const NAME_BUCKETS: usize = 101;
const GENERIC_BUCKET: usize = NodeKind::COUNT;
const BUCKET_COUNT: usize = NodeKind::COUNT + 1 + NAME_BUCKETS;

/// Names a mode: the unnamed default one or a named one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModeId {
    #[default]
    Default,
    Named(Fingerprint),
}

/// A template rule: a pattern and the handler to run for matching nodes.
pub struct Rule {
    pub pattern: Arc<Pattern>,
    pub handler: Arc<dyn NodeHandler>,
    pub precedence: i32,
    pub priority: f64,
    /// Registration order across the whole mode.
    pub sequence: u32,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("pattern", &self.pattern.text())
            .field("precedence", &self.precedence)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Rule {
    fn ranks_below(&self, other: &Rule) -> bool {
        self.precedence < other.precedence
            || (self.precedence == other.precedence && self.priority < other.priority)
    }

    fn ties_with(&self, other: &Rule) -> bool {
        self.precedence == other.precedence && self.priority == other.priority
    }
}

pub struct Mode {
    id: ModeId,
    buckets: Vec<Vec<Arc<Rule>>>,
    sequence: u32,
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mode")
            .field("id", &self.id)
            .field("rules", &self.sequence)
            .finish()
    }
}

impl Mode {
    pub fn new(id: ModeId) -> Self {
        Mode {
            id,
            buckets: vec![Vec::new(); BUCKET_COUNT],
            sequence: 0,
        }
    }

    pub fn id(&self) -> ModeId {
        self.id
    }

    /// Registers a rule. The pattern must not be a union; patterns that can
    /// never match anything are dropped.
    pub fn add_rule(
        &mut self,
        pattern: Arc<Pattern>,
        handler: Arc<dyn NodeHandler>,
        precedence: i32,
        priority: f64,
    ) {
        if pattern.is_no_node() {
            log::debug!("Dropping pattern {pattern} that cannot match any node");
            return;
        }
        let index = bucket_for_pattern(&pattern);
        let sequence = self.sequence;
        self.sequence += 1;
        log::debug!(
            "Mode {:?}: rule {pattern} (precedence {precedence}, priority {priority}) in bucket {index}",
            self.id
        );
        let rule = Arc::new(Rule {
            pattern,
            handler,
            precedence,
            priority,
            sequence,
        });
        let bucket = &mut self.buckets[index];
        // A new rule goes ahead of existing rules of equal rank.
        let position = bucket
            .iter()
            .position(|r| r.precedence < precedence || (r.precedence == precedence && r.priority <= priority))
            .unwrap_or(bucket.len());
        bucket.insert(position, rule);
    }

    /// The best rule for `node`, reporting ambiguities as the policy asks.
    pub fn get_rule<'a>(
        &self,
        node: NodeRef<'a>,
        ctx: &Context<'a>,
        diagnostics: &Diagnostics,
    ) -> Result<Option<Arc<Rule>>, XsltError> {
        let specific = match bucket_for_node(node) {
            Some(index) => self.scan(&self.buckets[index], None, node, ctx, diagnostics)?,
            None => None,
        };
        let general = self.scan(
            &self.buckets[GENERIC_BUCKET],
            specific.as_deref(),
            node,
            ctx,
            diagnostics,
        )?;
        match (specific, general) {
            (None, general) => Ok(general),
            (specific, None) => Ok(specific),
            (Some(s), Some(g)) => {
                if s.ties_with(&g) {
                    if !diagnostics.is_silent() {
                        report_ambiguity(node, &s, &g, diagnostics)?;
                    }
                    Ok(Some(if s.sequence > g.sequence { s } else { g }))
                } else if g.ranks_below(&s) {
                    Ok(Some(s))
                } else {
                    Ok(Some(g))
                }
            }
        }
    }

    /// The best rule for `node` whose precedence lies in `min..=max`. Only the
    /// first match in each bucket is considered.
    pub fn get_rule_in_range<'a>(
        &self,
        node: NodeRef<'a>,
        min: i32,
        max: i32,
        ctx: &Context<'a>,
        diagnostics: &Diagnostics,
    ) -> Result<Option<Arc<Rule>>, XsltError> {
        let first_in = |bucket: &[Arc<Rule>]| -> Result<Option<Arc<Rule>>, XsltError> {
            for rule in bucket {
                if (min..=max).contains(&rule.precedence) && pattern_matches(rule, node, ctx, diagnostics)? {
                    return Ok(Some(rule.clone()));
                }
            }
            Ok(None)
        };
        let specific = match bucket_for_node(node) {
            Some(index) => first_in(&self.buckets[index])?,
            None => None,
        };
        let general = first_in(&self.buckets[GENERIC_BUCKET])?;
        Ok(match (specific, general) {
            (None, general) => general,
            (specific, None) => specific,
            (Some(s), Some(g)) => Some(if g.ranks_below(&s) || s.ties_with(&g) { s } else { g }),
        })
    }

    /// Finds the first match in `bucket` and looks for a second one of equal
    /// rank. With `floor`, rules ranked below it are not considered at all.
    fn scan<'a>(
        &self,
        bucket: &[Arc<Rule>],
        floor: Option<&Rule>,
        node: NodeRef<'a>,
        ctx: &Context<'a>,
        diagnostics: &Diagnostics,
    ) -> Result<Option<Arc<Rule>>, XsltError> {
        let mut found: Option<Arc<Rule>> = None;
        for rule in bucket {
            if found.as_deref().or(floor).is_some_and(|best| rule.ranks_below(best)) {
                break;
            }
            if !pattern_matches(rule, node, ctx, diagnostics)? {
                continue;
            }
            if let Some(first) = &found {
                if rule.ties_with(first) {
                    report_ambiguity(node, first, rule, diagnostics)?;
                }
                break;
            }
            found = Some(rule.clone());
            if diagnostics.is_silent() {
                break;
            }
        }
        Ok(found)
    }

    /// Every rule in the mode, bucket by bucket.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.buckets.iter().flatten()
    }
}

fn bucket_for_pattern(pattern: &Pattern) -> usize {
    match (pattern.node_kind(), pattern.fingerprint()) {
        (Some(NodeKind::Element), Some(fp)) => name_bucket(fp),
        (Some(NodeKind::Element), None) | (None, _) => GENERIC_BUCKET,
        (Some(kind), _) => kind.index(),
    }
}

/// The specific bucket to search for `node`, besides the generic one.
fn bucket_for_node(node: NodeRef<'_>) -> Option<usize> {
    match node.kind() {
        NodeKind::Element => node.fingerprint().map(name_bucket),
        kind => Some(kind.index()),
    }
}

fn name_bucket(fp: Fingerprint) -> usize {
    NodeKind::COUNT + 1 + fp.raw() as usize % NAME_BUCKETS
}

/// Matches `rule` against `node`. A recoverable failure, such as an
/// undefined key, is reported and counts as no match.
fn pattern_matches<'a>(
    rule: &Rule,
    node: NodeRef<'a>,
    ctx: &Context<'a>,
    diagnostics: &Diagnostics,
) -> Result<bool, XsltError> {
    match rule.pattern.matches(node, ctx) {
        Err(e) if e.is_recoverable() => diagnostics.report_recoverable(e).map(|()| false),
        other => other,
    }
}

fn report_ambiguity(
    node: NodeRef<'_>,
    first: &Rule,
    second: &Rule,
    diagnostics: &Diagnostics,
) -> Result<(), XsltError> {
    if first.pattern.same_origin(&second.pattern) {
        return Ok(());
    }
    let describe = |p: &Pattern| {
        format!(
            "\"{}\" on line {} of {}",
            p.text(),
            p.line_number(),
            p.system_id()
        )
    };
    diagnostics.report_recoverable(XsltError::recoverable(format!(
        "Ambiguous rule match for {}\nMatches both {}\nand {}",
        node.path(),
        describe(&first.pattern),
        describe(&second.pattern)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_listener::{ErrorListener, RecoveryPolicy};
    use crate::handler::handler_fn;
    use crate::pattern::StaticContext;
    use arbor_tree::{NamePool, ParseOptions, TinyDocument, parse_document};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ErrorListener for Recorder {
        fn warning(&self, error: XsltError) -> Result<(), XsltError> {
            self.0.lock().unwrap().push(error.to_string());
            Ok(())
        }
    }

    fn diagnostics(policy: RecoveryPolicy) -> (Diagnostics, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (Diagnostics::new(policy, recorder.clone()), recorder)
    }

    fn setup() -> (StaticContext, TinyDocument) {
        let pool = Arc::new(NamePool::new());
        let doc = parse_document(pool.clone(), "<doc><A>t</A><B/></doc>", &ParseOptions::default(), None).unwrap();
        (StaticContext::new(pool).with_location("style.xsl", 3), doc)
    }

    fn noop() -> Arc<dyn NodeHandler> {
        Arc::new(handler_fn(|_, _| Ok(())))
    }

    fn add(mode: &mut Mode, sc: &StaticContext, text: &str, precedence: i32, priority: f64) {
        mode.add_rule(Arc::new(sc.parse(text).unwrap()), noop(), precedence, priority);
    }

    fn element<'d>(doc: &'d TinyDocument, name: &str) -> NodeRef<'d> {
        doc.root()
            .enumerate(arbor_tree::Axis::Descendant, arbor_tree::NodeTest::AnyNode)
            .find(|n| n.local_name() == name)
            .unwrap()
    }

    #[test]
    fn test_highest_rank_wins() {
        let (sc, doc) = setup();
        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "A", 0, 1.0);
        add(&mut mode, &sc, "doc/A", 1, -3.0);
        add(&mut mode, &sc, "A", 0, 2.0);
        add(&mut mode, &sc, "*", 1, -2.0);
        let (diag, recorder) = diagnostics(RecoveryPolicy::RecoverWithWarnings);
        let a = element(&doc, "A");
        let rule = mode.get_rule(a, &Context::new(a), &diag).unwrap().unwrap();
        assert_eq!((rule.pattern.text(), rule.precedence), ("*", 1));
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_named_element_beats_wildcard() {
        let (sc, doc) = setup();
        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "A", 0, 0.0);
        add(&mut mode, &sc, "*", 0, -0.5);
        let (diag, _) = diagnostics(RecoveryPolicy::RecoverWithWarnings);
        let a = element(&doc, "A");
        let rule = mode.get_rule(a, &Context::new(a), &diag).unwrap().unwrap();
        assert_eq!(rule.pattern.text(), "A");
        let b = element(&doc, "B");
        let rule = mode.get_rule(b, &Context::new(b), &diag).unwrap().unwrap();
        assert_eq!(rule.pattern.text(), "*");
    }

    #[test]
    fn test_exact_tie_reports_once_and_later_rule_wins() {
        let (sc, doc) = setup();
        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "A", 0, 1.0);
        add(&mut mode, &sc, "doc/A", 0, 1.0);
        let (diag, recorder) = diagnostics(RecoveryPolicy::RecoverWithWarnings);
        let a = element(&doc, "A");
        let rule = mode.get_rule(a, &Context::new(a), &diag).unwrap().unwrap();
        assert_eq!(rule.sequence, 1);
        let reports = recorder.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0],
            "Ambiguous rule match for /doc[1]/A[1]\nMatches both \"doc/A\" on line 3 of style.xsl\nand \"A\" on line 3 of style.xsl"
        );
    }

    #[test]
    fn test_specific_and_general_tie_prefers_recent() {
        let (sc, doc) = setup();
        let a = element(&doc, "A");
        let (diag, recorder) = diagnostics(RecoveryPolicy::RecoverWithWarnings);

        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "A", 0, 0.0);
        add(&mut mode, &sc, "node()", 0, 0.0);
        let rule = mode.get_rule(a, &Context::new(a), &diag).unwrap().unwrap();
        assert_eq!(rule.pattern.text(), "node()");

        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "node()", 0, 0.0);
        add(&mut mode, &sc, "A", 0, 0.0);
        let rule = mode.get_rule(a, &Context::new(a), &diag).unwrap().unwrap();
        assert_eq!(rule.pattern.text(), "A");
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_silent_policy_skips_ambiguity_checks() {
        let (sc, doc) = setup();
        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "A", 0, 1.0);
        add(&mut mode, &sc, "doc/A", 0, 1.0);
        add(&mut mode, &sc, "node()", 0, 1.0);
        let (diag, recorder) = diagnostics(RecoveryPolicy::RecoverSilently);
        let a = element(&doc, "A");
        let rule = mode.get_rule(a, &Context::new(a), &diag).unwrap().unwrap();
        assert_eq!(rule.pattern.text(), "node()");
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_union_halves_are_not_ambiguous() {
        let (sc, doc) = setup();
        let union = sc.parse("A | doc/A").unwrap();
        let crate::pattern::PatternKind::Union(left, right) = union.kind() else {
            panic!("expected a union");
        };
        let mut mode = Mode::new(ModeId::Default);
        mode.add_rule(Arc::new((**left).clone()), noop(), 0, 0.5);
        mode.add_rule(Arc::new((**right).clone()), noop(), 0, 0.5);
        let (diag, recorder) = diagnostics(RecoveryPolicy::RecoverWithWarnings);
        let a = element(&doc, "A");
        assert!(mode.get_rule(a, &Context::new(a), &diag).unwrap().is_some());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_do_not_recover_fails_on_ambiguity() {
        let (sc, doc) = setup();
        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "A", 0, 0.0);
        add(&mut mode, &sc, "A", 0, 0.0);
        let diag = Diagnostics::standard(RecoveryPolicy::DoNotRecover, 25);
        let a = element(&doc, "A");
        let err = mode.get_rule(a, &Context::new(a), &diag).unwrap_err();
        assert!(err.to_string().contains("error recovery is disabled"));
    }

    #[test]
    fn test_precedence_window() {
        let (sc, doc) = setup();
        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "A", 2, 0.0);
        add(&mut mode, &sc, "*", 1, -0.5);
        add(&mut mode, &sc, "A", 0, 0.0);
        let a = element(&doc, "A");
        let ctx = Context::new(a);
        let diag = Diagnostics::default();
        let pick = |min, max| {
            mode.get_rule_in_range(a, min, max, &ctx, &diag)
                .unwrap()
                .map(|r| (r.pattern.text().to_string(), r.precedence))
        };
        assert_eq!(pick(0, 2), Some(("A".to_string(), 2)));
        assert_eq!(pick(0, 1), Some(("*".to_string(), 1)));
        assert_eq!(pick(0, 0), Some(("A".to_string(), 0)));
        assert_eq!(pick(3, 5), None);
    }

    #[test]
    fn test_text_and_no_node_rules() {
        let (sc, doc) = setup();
        let mut mode = Mode::new(ModeId::Default);
        add(&mut mode, &sc, "@comment()", 0, 9.0);
        add(&mut mode, &sc, "text()", 0, -0.5);
        assert_eq!(mode.rules().count(), 1);
        let text = element(&doc, "A")
            .enumerate(arbor_tree::Axis::Child, arbor_tree::NodeTest::AnyNode)
            .next()
            .unwrap();
        let (diag, _) = diagnostics(RecoveryPolicy::RecoverWithWarnings);
        let rule = mode.get_rule(text, &Context::new(text), &diag).unwrap();
        assert_eq!(rule.unwrap().pattern.text(), "text()");
    }
}
