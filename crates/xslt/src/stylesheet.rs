//! The immutable, shareable result of preparing a stylesheet.
//!
//! A [`PreparedStylesheet`] owns everything a run needs that does not change
//! from one run to the next: template rules by mode, key definitions, the
//! declarations of global variables and the preview settings. Any number of
//! [`Controller`](crate::Controller)s may borrow it at once.
use crate::bindery::{Binding, Scope};
use crate::config::TransformConfig;
use crate::error::XsltError;
use crate::expression::Expression;
use crate::handler::{NodeHandler, ValueSource};
use crate::keys::{KeyDefinition, KeyManager};
use crate::mode::ModeId;
use crate::pattern::{Pattern, StaticContext};
use crate::preview::PreviewManager;
use crate::rule_manager::RuleManager;
use arbor_tree::{Fingerprint, NamePool};
use std::sync::Arc;

#[derive(Debug)]
pub struct PreparedStylesheet {
    static_context: StaticContext,
    rules: RuleManager,
    keys: KeyManager,
    preview: Option<PreviewManager>,
    globals: Vec<Arc<Binding>>,
    local_slots: usize,
}

impl PreparedStylesheet {
    pub fn new(pool: Arc<NamePool>) -> Self {
        PreparedStylesheet {
            static_context: StaticContext::new(pool),
            rules: RuleManager::new(),
            keys: KeyManager::new(),
            preview: None,
            globals: Vec::new(),
            local_slots: 0,
        }
    }

    pub fn name_pool(&self) -> &Arc<NamePool> {
        self.static_context.name_pool()
    }

    pub fn rules(&self) -> &RuleManager {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleManager {
        &mut self.rules
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn preview(&self) -> Option<&PreviewManager> {
        self.preview.as_ref()
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        self.static_context.declare_namespace(prefix, uri);
    }

    /// Location recorded on patterns parsed from now on, reported in
    /// ambiguity warnings.
    pub fn set_location(&mut self, system_id: &str, line: u32) {
        self.static_context = self.static_context.clone().with_location(system_id, line);
    }

    pub fn parse_pattern(&self, text: &str) -> Result<Pattern, XsltError> {
        self.static_context.parse(text)
    }

    /// Registers a template rule. With no explicit priority each branch of a
    /// union gets its own default priority.
    pub fn add_rule(
        &mut self,
        pattern: Pattern,
        handler: Arc<dyn NodeHandler>,
        mode: ModeId,
        precedence: i32,
        priority: Option<f64>,
    ) {
        match priority {
            Some(priority) => self
                .rules
                .set_handler_with_priority(pattern, handler, mode, precedence, priority),
            None => self.rules.set_handler(pattern, handler, mode, precedence),
        }
    }

    /// Parses `pattern` and registers it as a template rule.
    pub fn add_template(
        &mut self,
        pattern: &str,
        handler: Arc<dyn NodeHandler>,
        mode: ModeId,
        precedence: i32,
        priority: Option<f64>,
    ) -> Result<(), XsltError> {
        let pattern = self.parse_pattern(pattern)?;
        self.add_rule(pattern, handler, mode, precedence, priority);
        Ok(())
    }

    /// Adds an `xsl:key` definition. A second identical definition is
    /// reported as recoverable and otherwise ignored.
    pub fn add_key(
        &mut self,
        name: &str,
        pattern: &str,
        use_expr: Arc<dyn Expression>,
    ) -> Result<(), XsltError> {
        let definition = KeyDefinition {
            name: self.fingerprint_of(name)?,
            pattern: Arc::new(self.parse_pattern(pattern)?),
            use_expr,
        };
        self.keys.add_key_definition(definition)
    }

    /// Declares a global variable or parameter in the next free slot.
    pub fn declare_global(
        &mut self,
        name: &str,
        is_param: bool,
        select: Option<Arc<dyn ValueSource>>,
    ) -> Result<Arc<Binding>, XsltError> {
        let fingerprint = self.fingerprint_of(name)?;
        if self.globals.iter().any(|g| g.fingerprint == fingerprint) {
            return Err(XsltError::structural(format!("Duplicate global variable {name}")));
        }
        let binding = Arc::new(Binding {
            fingerprint,
            display_name: name.to_string(),
            slot: self.globals.len(),
            scope: Scope::Global,
            is_param,
            select,
        });
        self.globals.push(binding.clone());
        Ok(binding)
    }

    /// A local variable or parameter occupying `slot` of its template's
    /// frame.
    pub fn local_binding(
        &mut self,
        name: &str,
        slot: usize,
        is_param: bool,
        select: Option<Arc<dyn ValueSource>>,
    ) -> Result<Binding, XsltError> {
        self.reserve_local_slots(slot + 1);
        Ok(Binding {
            fingerprint: self.fingerprint_of(name)?,
            display_name: name.to_string(),
            slot,
            scope: Scope::Local,
            is_param,
            select,
        })
    }

    /// Makes every stack frame at least `count` slots wide.
    pub fn reserve_local_slots(&mut self, count: usize) {
        self.local_slots = self.local_slots.max(count);
    }

    /// Global bindings in declaration order.
    pub fn globals(&self) -> &[Arc<Binding>] {
        &self.globals
    }

    pub fn local_slots(&self) -> usize {
        self.local_slots
    }

    /// Fingerprint of a name written as a QName (`p:local`) or in Clark
    /// notation (`{uri}local`).
    pub fn fingerprint_of(&self, name: &str) -> Result<Fingerprint, XsltError> {
        if let Some(rest) = name.strip_prefix('{') {
            let (uri, local) = rest
                .split_once('}')
                .ok_or_else(|| XsltError::structural(format!("Invalid expanded name {name}")))?;
            let pool = self.name_pool();
            return match pool.get_fingerprint(uri, local) {
                Some(fp) => Ok(fp),
                None => Ok(pool.allocate("", uri, local)?.fingerprint()),
            };
        }
        match name.split_once(':') {
            Some((prefix, local)) => self.static_context.fingerprint(Some(prefix), local),
            None => self.static_context.fingerprint(None, name),
        }
    }

    /// The default mode for `None`, otherwise the named mode.
    pub fn mode_id(&self, name: Option<&str>) -> Result<ModeId, XsltError> {
        match name {
            None => Ok(ModeId::Default),
            Some(name) => Ok(ModeId::Named(self.fingerprint_of(name)?)),
        }
    }

    /// Enables preview: each complete element named in `elements` is
    /// processed in `mode` while the source is still being built.
    pub fn set_preview(&mut self, mode: ModeId, elements: &[&str]) -> Result<(), XsltError> {
        let mut manager = PreviewManager::new(mode);
        for name in elements {
            manager.add_element(self.fingerprint_of(name)?);
        }
        self.preview = Some(manager);
        Ok(())
    }

    /// Applies the preview settings of a configuration, if it names a mode.
    pub fn configure_preview(&mut self, config: &TransformConfig) -> Result<(), XsltError> {
        let Some(mode) = config.preview_mode.as_deref() else {
            return Ok(());
        };
        let mode = self.mode_id(Some(mode).filter(|m| !m.is_empty() && *m != "#default"))?;
        let elements: Vec<&str> = config.preview_elements.iter().map(String::as_str).collect();
        self.set_preview(mode, &elements)
    }
}
