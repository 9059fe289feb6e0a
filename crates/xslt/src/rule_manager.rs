//! Template rules grouped by mode, and the lookups dispatch uses.
use crate::context::Context;
use crate::error::XsltError;
use crate::error_listener::Diagnostics;
use crate::handler::NodeHandler;
use crate::mode::{Mode, ModeId, Rule};
use crate::pattern::{Pattern, PatternKind};
use arbor_tree::{Fingerprint, NodeRef};
use std::collections::HashMap;
use std::sync::Arc;

/// All template rules of a stylesheet, partitioned by mode.
#[derive(Debug)]
pub struct RuleManager {
    default_mode: Mode,
    modes: HashMap<Fingerprint, Mode>,
}

impl Default for RuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleManager {
    pub fn new() -> Self {
        RuleManager {
            default_mode: Mode::new(ModeId::Default),
            modes: HashMap::new(),
        }
    }

    /// The mode with this name, created on first use.
    pub fn get_mode(&mut self, id: ModeId) -> &mut Mode {
        match id {
            ModeId::Default => &mut self.default_mode,
            ModeId::Named(fp) => self.modes.entry(fp).or_insert_with(|| Mode::new(id)),
        }
    }

    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        match id {
            ModeId::Default => Some(&self.default_mode),
            ModeId::Named(fp) => self.modes.get(&fp),
        }
    }

    pub fn modes(&self) -> impl Iterator<Item = &Mode> {
        std::iter::once(&self.default_mode).chain(self.modes.values())
    }

    /// Registers a rule with the pattern's default priority. Each branch of
    /// a union pattern becomes a rule of its own, with its own priority.
    pub fn set_handler(&mut self, pattern: Pattern, handler: Arc<dyn NodeHandler>, mode: ModeId, precedence: i32) {
        if let PatternKind::Union(a, b) = pattern.kind() {
            let (a, b) = ((**a).clone(), (**b).clone());
            self.set_handler(a, handler.clone(), mode, precedence);
            self.set_handler(b, handler, mode, precedence);
            return;
        }
        let priority = pattern.default_priority();
        self.get_mode(mode).add_rule(Arc::new(pattern), handler, precedence, priority);
    }

    /// Registers a rule with an explicit priority, shared by every branch of
    /// a union pattern.
    pub fn set_handler_with_priority(
        &mut self,
        pattern: Pattern,
        handler: Arc<dyn NodeHandler>,
        mode: ModeId,
        precedence: i32,
        priority: f64,
    ) {
        if let PatternKind::Union(a, b) = pattern.kind() {
            let (a, b) = ((**a).clone(), (**b).clone());
            self.set_handler_with_priority(a, handler.clone(), mode, precedence, priority);
            self.set_handler_with_priority(b, handler, mode, precedence, priority);
            return;
        }
        self.get_mode(mode).add_rule(Arc::new(pattern), handler, precedence, priority);
    }

    /// The rule that applies to `node` in `mode`, if any.
    pub fn get_handler<'a>(
        &self,
        node: NodeRef<'a>,
        mode: ModeId,
        ctx: &Context<'a>,
        diagnostics: &Diagnostics,
    ) -> Result<Option<Arc<Rule>>, XsltError> {
        match self.mode(mode) {
            Some(m) => m.get_rule(node, ctx, diagnostics),
            None => Ok(None),
        }
    }

    /// As [`get_handler`](Self::get_handler), restricted to rules whose
    /// precedence lies in `min..=max`.
    pub fn get_handler_in_range<'a>(
        &self,
        node: NodeRef<'a>,
        mode: ModeId,
        min: i32,
        max: i32,
        ctx: &Context<'a>,
        diagnostics: &Diagnostics,
    ) -> Result<Option<Arc<Rule>>, XsltError> {
        match self.mode(mode) {
            Some(m) => m.get_rule_in_range(node, min, max, ctx, diagnostics),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::pattern::StaticContext;
    use arbor_tree::{Axis, NamePool, NodeTest, ParseOptions, parse_document};

    fn noop() -> Arc<dyn NodeHandler> {
        Arc::new(handler_fn(|_, _| Ok(())))
    }

    #[test]
    fn test_union_split_gives_each_branch_its_priority() {
        let pool = Arc::new(NamePool::new());
        let sc = StaticContext::new(pool);
        let mut rules = RuleManager::new();
        rules.set_handler(sc.parse("para | sec/para | text()").unwrap(), noop(), ModeId::Default, 0);
        let mut priorities: Vec<_> = rules
            .mode(ModeId::Default)
            .unwrap()
            .rules()
            .map(|r| (r.pattern.text().to_string(), r.priority))
            .collect();
        priorities.sort_by(|a, b| a.1.total_cmp(&b.1));
        let values: Vec<f64> = priorities.iter().map(|p| p.1).collect();
        assert_eq!(values, [-0.5, 0.0, 0.5]);
        assert!(priorities.iter().all(|(text, _)| text == "para | sec/para | text()"));

        let mut explicit = RuleManager::new();
        explicit.set_handler_with_priority(sc.parse("a | b").unwrap(), noop(), ModeId::Default, 0, 3.0);
        assert!(explicit.mode(ModeId::Default).unwrap().rules().all(|r| r.priority == 3.0));
    }

    #[test]
    fn test_modes_are_separate() {
        let pool = Arc::new(NamePool::new());
        let doc = parse_document(pool.clone(), "<a/>", &ParseOptions::default(), None).unwrap();
        let sc = StaticContext::new(pool.clone());
        let toc = ModeId::Named(pool.allocate("", "", "toc").unwrap().fingerprint());
        let mut rules = RuleManager::new();
        assert!(rules.mode(toc).is_none());
        rules.set_handler(sc.parse("a").unwrap(), noop(), toc, 0);
        assert_eq!(rules.modes().count(), 2);

        let a = doc.root().enumerate(Axis::Child, NodeTest::AnyNode).next().unwrap();
        let ctx = Context::new(a);
        let diag = Diagnostics::default();
        assert!(rules.get_handler(a, toc, &ctx, &diag).unwrap().is_some());
        assert!(rules.get_handler(a, ModeId::Default, &ctx, &diag).unwrap().is_none());
        assert!(rules.get_handler_in_range(a, toc, 1, 2, &ctx, &diag).unwrap().is_none());
    }
}
