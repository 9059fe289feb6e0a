//! Runs a prepared stylesheet over a source tree.
//!
//! [`Controller::apply_templates`] is the one recursive entry point: the
//! top-level run, the built-in rules and handlers all go through it. A
//! controller lives for a single run; everything it reads from the
//! stylesheet is shared and immutable.
use crate::bindery::{Bindery, Binding, Scope};
use crate::config::TransformConfig;
use crate::context::{Context, LastSource, SharedEnumeration};
use crate::error::XsltError;
use crate::error_listener::{Diagnostics, ErrorListener};
use crate::mode::{ModeId, Rule};
use crate::params::ParameterSet;
use crate::stylesheet::PreparedStylesheet;
use crate::value::Value;
use arbor_tree::{
    Axis, LookaheadEnumeration, NodeEnumeration, NodeKind, NodeListEnumeration, NodeRef, NodeTest, Outputter,
    TinyDocument,
};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

pub struct Controller<'a> {
    stylesheet: Option<&'a PreparedStylesheet>,
    bindery: Bindery<'a>,
    diagnostics: Diagnostics,
    outputter: Option<Box<dyn Outputter>>,
    principal_source: Option<NodeRef<'a>>,
}

impl fmt::Debug for Controller<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("prepared", &self.stylesheet.is_some())
            .field("diagnostics", &self.diagnostics)
            .field("frame", &self.bindery.get_frame_id())
            .finish_non_exhaustive()
    }
}

impl<'a> Controller<'a> {
    /// A controller for `stylesheet`, with slots for all of its variables.
    pub fn new(stylesheet: &'a PreparedStylesheet, diagnostics: Diagnostics) -> Self {
        let mut controller = Self::unprepared(diagnostics);
        controller.prepare(stylesheet);
        controller
    }

    pub fn from_config(stylesheet: &'a PreparedStylesheet, config: &TransformConfig) -> Self {
        Self::new(stylesheet, config.diagnostics())
    }

    /// A controller with no stylesheet yet; running it fails until
    /// [`prepare`](Self::prepare) is called.
    pub fn unprepared(diagnostics: Diagnostics) -> Self {
        Controller {
            stylesheet: None,
            bindery: Bindery::new(),
            diagnostics,
            outputter: None,
            principal_source: None,
        }
    }

    pub fn prepare(&mut self, stylesheet: &'a PreparedStylesheet) {
        self.bindery.allocate_globals(stylesheet.globals().len());
        self.bindery.allocate_locals(stylesheet.local_slots());
        self.stylesheet = Some(stylesheet);
    }

    /// Replaces the listener, keeping the recovery policy.
    pub fn with_error_listener(mut self, listener: Arc<dyn ErrorListener>) -> Self {
        self.diagnostics = Diagnostics::new(self.diagnostics.policy(), listener);
        self
    }

    pub fn stylesheet(&self) -> Result<&'a PreparedStylesheet, XsltError> {
        self.stylesheet
            .ok_or_else(|| XsltError::structural("Stylesheet has not been prepared"))
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn set_outputter(&mut self, outputter: Box<dyn Outputter>) {
        self.outputter = Some(outputter);
    }

    pub fn take_outputter(&mut self) -> Option<Box<dyn Outputter>> {
        self.outputter.take()
    }

    pub fn outputter(&mut self) -> Result<&mut dyn Outputter, XsltError> {
        self.outputter
            .as_deref_mut()
            .map(|o| o as &mut dyn Outputter)
            .ok_or_else(|| XsltError::structural("No output destination has been set"))
    }

    pub fn bindery(&self) -> &Bindery<'a> {
        &self.bindery
    }

    pub fn bindery_mut(&mut self) -> &mut Bindery<'a> {
        &mut self.bindery
    }

    /// Values for the stylesheet's global parameters.
    pub fn set_global_parameters(&mut self, params: ParameterSet<'a>) {
        self.bindery.define_global_parameters(params);
    }

    pub fn set_principal_source(&mut self, node: NodeRef<'a>) {
        self.principal_source = Some(node);
    }

    pub fn principal_source(&self) -> Option<NodeRef<'a>> {
        self.principal_source
    }

    /// A fresh context positioned on `node`.
    pub fn make_context(&self, node: NodeRef<'a>) -> Result<Context<'a>, XsltError> {
        Ok(Context::new(node).with_keys(self.stylesheet()?.keys()))
    }

    /// Transforms a whole document, starting at its root.
    pub fn transform_document(&mut self, doc: &'a TinyDocument) -> Result<(), XsltError> {
        let stylesheet = self.stylesheet()?;
        if !Arc::ptr_eq(doc.name_pool(), stylesheet.name_pool()) {
            return Err(XsltError::structural(
                "Source document and stylesheet must use the same name pool",
            ));
        }
        self.principal_source = Some(doc.root());
        let result = self.run(doc.root());
        self.stylesheet()?.keys().forget_document(doc.document_number());
        result
    }

    /// Evaluates the global variables, processes `node` in the default mode
    /// and flushes the output.
    pub fn run(&mut self, node: NodeRef<'a>) -> Result<(), XsltError> {
        if self.principal_source.is_none() {
            self.principal_source = Some(node);
        }
        let result = self.run_inner(node);
        match &result {
            Err(e) if !e.is_termination() => self.diagnostics.listener().error(e),
            _ => {}
        }
        result
    }

    fn run_inner(&mut self, node: NodeRef<'a>) -> Result<(), XsltError> {
        let stylesheet = self.stylesheet()?;
        log::debug!("Transforming from {}", node.path());
        for binding in stylesheet.globals() {
            self.evaluate_global(binding)?;
        }
        let ctx = self.make_context(node)?;
        self.apply_templates(
            &ctx,
            Some(Box::new(NodeListEnumeration::singleton(node))),
            ModeId::Default,
            None,
        )?;
        if let Some(out) = self.outputter.as_deref_mut() {
            out.finish()?;
        }
        Ok(())
    }

    /// Processes each node of `select` (the children of the context node
    /// when `None`) with the best rule of `mode`, or with the built-in rule
    /// when none matches.
    pub fn apply_templates(
        &mut self,
        ctx: &Context<'a>,
        select: Option<Box<dyn NodeEnumeration<'a> + 'a>>,
        mode: ModeId,
        params: Option<&ParameterSet<'a>>,
    ) -> Result<(), XsltError> {
        let stylesheet = self.stylesheet()?;
        let selection: Box<dyn NodeEnumeration<'a> + 'a> = match select {
            Some(select) => select,
            None => Box::new(ctx.context_node().enumerate(Axis::Child, NodeTest::AnyNode)),
        };
        let selection: Box<dyn NodeEnumeration<'a> + 'a> = if selection.is_last_position_finder() {
            selection
        } else {
            let sorted = selection.is_document_order_sorted();
            Box::new(LookaheadEnumeration::new(selection).sorted(sorted))
        };
        let shared: SharedEnumeration<'a> = Rc::new(RefCell::new(selection));
        let base = ctx
            .new_context()
            .with_last_source(LastSource::Sequence(shared.clone()))
            .with_mode(mode);

        let mut position = 0;
        loop {
            let next = shared.borrow_mut().next();
            let Some(node) = next else { break };
            position += 1;
            let node_ctx = base.clone().at(node, position);
            match stylesheet
                .rules()
                .get_handler(node, mode, &node_ctx, &self.diagnostics)?
            {
                Some(rule) => {
                    let node_ctx = node_ctx.with_current_template(Some(rule.clone()));
                    self.invoke(&rule, &node_ctx, params, rule.handler.needs_stack_frame())?;
                }
                None => self.default_action(node, &node_ctx)?,
            }
        }
        Ok(())
    }

    /// Processes the current node with the best rule whose precedence lies
    /// in `min..=max`, as `xsl:apply-imports` does.
    pub fn apply_imports(
        &mut self,
        ctx: &Context<'a>,
        mode: ModeId,
        min: i32,
        max: i32,
        params: Option<&ParameterSet<'a>>,
    ) -> Result<(), XsltError> {
        let node = ctx.current_node();
        let rule = self
            .stylesheet()?
            .rules()
            .get_handler_in_range(node, mode, min, max, ctx, &self.diagnostics)?;
        match rule {
            Some(rule) => {
                let ctx = ctx.clone().with_current_template(Some(rule.clone()));
                self.invoke(&rule, &ctx, params, true)
            }
            None => self.default_action(node, ctx),
        }
    }

    fn invoke(
        &mut self,
        rule: &Rule,
        ctx: &Context<'a>,
        params: Option<&ParameterSet<'a>>,
        with_frame: bool,
    ) -> Result<(), XsltError> {
        let result = if with_frame {
            self.bindery.open_stack_frame(params.cloned());
            let result = rule.handler.start(ctx, self);
            result.and(self.bindery.close_stack_frame())
        } else {
            rule.handler.start(ctx, self)
        };
        match result {
            // A recoverable error abandons this template only.
            Err(e) if e.is_recoverable() => self.report_recoverable_error(e),
            other => other,
        }
    }

    /// The built-in rule: element and root nodes process their children in
    /// the same mode, text and attribute nodes copy their value to the
    /// output, anything else is ignored.
    pub fn default_action(&mut self, node: NodeRef<'a>, ctx: &Context<'a>) -> Result<(), XsltError> {
        match node.kind() {
            NodeKind::Root | NodeKind::Element => {
                let ctx = ctx.clone().at(node, ctx.position());
                self.apply_templates(&ctx, None, ctx.mode(), None)
            }
            NodeKind::Text | NodeKind::Attribute => {
                self.outputter()?.characters(&node.string_value())?;
                Ok(())
            }
            NodeKind::Comment | NodeKind::ProcessingInstruction | NodeKind::Namespace => Ok(()),
        }
    }

    /// The value of a global variable, computed on first use. A definition
    /// that depends on itself fails with a circular-definition error.
    pub fn evaluate_global(&mut self, binding: &Binding) -> Result<Value<'a>, XsltError> {
        if let Some(value) = self.bindery.get_value(binding) {
            return Ok(value.clone());
        }
        self.bindery.set_executing(binding, true)?;
        let result = self.compute_global(binding);
        self.bindery.set_executing(binding, false)?;
        let value = result?;
        self.bindery.define_global_variable(binding, value.clone())?;
        Ok(value)
    }

    fn compute_global(&mut self, binding: &Binding) -> Result<Value<'a>, XsltError> {
        if binding.is_param && self.bindery.use_global_parameter(binding)? {
            return Ok(self.bindery.get_value(binding).cloned().unwrap_or_else(Value::empty));
        }
        match &binding.select {
            Some(select) => {
                let root = self
                    .principal_source
                    .ok_or_else(|| XsltError::structural("No source document for global variables"))?;
                let ctx = self.make_context(root)?;
                select.evaluate(&ctx, self)
            }
            None => Ok(Value::String(String::new())),
        }
    }

    /// Evaluates a local variable or parameter and binds it in the current
    /// frame.
    pub fn evaluate_local(&mut self, binding: &Binding, ctx: &Context<'a>) -> Result<Value<'a>, XsltError> {
        if binding.scope != Scope::Local {
            return Err(XsltError::structural(format!(
                "{} is not a local variable",
                binding.display_name
            )));
        }
        if binding.is_param && self.bindery.use_local_parameter(binding)? {
            return Ok(self.bindery.get_value(binding).cloned().unwrap_or_else(Value::empty));
        }
        let value = match &binding.select {
            Some(select) => select.evaluate(ctx, self)?,
            None => Value::String(String::new()),
        };
        self.bindery.define_local_variable(binding, value.clone())?;
        Ok(value)
    }

    /// Hands a recoverable error to the listener; `Err` means the policy
    /// does not allow recovery.
    pub fn report_recoverable_error(&self, error: XsltError) -> Result<(), XsltError> {
        self.diagnostics.report_recoverable(error)
    }

    /// Document order of two nodes.
    pub fn compare(&self, a: NodeRef<'_>, b: NodeRef<'_>) -> Ordering {
        a.compare_order(&b)
    }

    /// The error that stops the run, as `xsl:message terminate="yes"` does.
    pub fn terminate(&self, message: impl Into<String>) -> XsltError {
        let message = message.into();
        log::info!("Processing terminated: {message}");
        XsltError::Terminated(message)
    }
}
