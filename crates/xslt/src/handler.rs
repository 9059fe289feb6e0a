//! The executable side of rules and variables.
//!
//! A compiler hands the runtime objects implementing these traits; the
//! closure wrappers cover tests and programmatic stylesheets.
use crate::context::Context;
use crate::controller::Controller;
use crate::error::XsltError;
use crate::expression::Expression;
use crate::value::Value;
use std::sync::Arc;

/// The body of a template rule.
pub trait NodeHandler: Send + Sync {
    fn start<'a>(&self, ctx: &Context<'a>, controller: &mut Controller<'a>) -> Result<(), XsltError>;

    /// True when the body declares local variables or parameters, so a stack
    /// frame must be opened around it.
    fn needs_stack_frame(&self) -> bool {
        false
    }
}

pub struct FnHandler<F> {
    f: F,
    stack_frame: bool,
}

impl<F> FnHandler<F> {
    pub fn with_stack_frame(mut self) -> Self {
        self.stack_frame = true;
        self
    }
}

impl<F> NodeHandler for FnHandler<F>
where
    F: for<'a> Fn(&Context<'a>, &mut Controller<'a>) -> Result<(), XsltError> + Send + Sync,
{
    fn start<'a>(&self, ctx: &Context<'a>, controller: &mut Controller<'a>) -> Result<(), XsltError> {
        (self.f)(ctx, controller)
    }

    fn needs_stack_frame(&self) -> bool {
        self.stack_frame
    }
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&Context<'a>, &mut Controller<'a>) -> Result<(), XsltError> + Send + Sync,
{
    FnHandler { f, stack_frame: false }
}

/// Computes the value of a variable or parameter.
pub trait ValueSource: Send + Sync {
    fn evaluate<'a>(&self, ctx: &Context<'a>, controller: &mut Controller<'a>) -> Result<Value<'a>, XsltError>;
}

/// A `select` expression used as a variable's value.
#[derive(Debug, Clone)]
pub struct ExprValue(pub Arc<dyn Expression>);

impl ValueSource for ExprValue {
    fn evaluate<'a>(&self, ctx: &Context<'a>, _controller: &mut Controller<'a>) -> Result<Value<'a>, XsltError> {
        self.0.evaluate(ctx)
    }
}

pub struct FnValue<F>(F);

impl<F> ValueSource for FnValue<F>
where
    F: for<'a> Fn(&Context<'a>, &mut Controller<'a>) -> Result<Value<'a>, XsltError> + Send + Sync,
{
    fn evaluate<'a>(&self, ctx: &Context<'a>, controller: &mut Controller<'a>) -> Result<Value<'a>, XsltError> {
        (self.0)(ctx, controller)
    }
}

pub fn value_fn<F>(f: F) -> FnValue<F>
where
    F: for<'a> Fn(&Context<'a>, &mut Controller<'a>) -> Result<Value<'a>, XsltError> + Send + Sync,
{
    FnValue(f)
}
