//! The expression interface the runtime evaluates against a context.
//!
//! Full XPath evaluation lives outside this crate; what is here covers what
//! patterns, keys and dispatch need: location paths made of axis steps,
//! literals, the context item, and closures for anything else.

use crate::context::Context;
use crate::error::XsltError;
use crate::value::Value;
use arbor_tree::{Axis, NodeEnumeration, NodeListEnumeration, NodeRef, NodeTest};
use itertools::Itertools;
use std::fmt;

pub trait Expression: Send + Sync + fmt::Debug {
    fn evaluate<'a>(&self, ctx: &Context<'a>) -> Result<Value<'a>, XsltError>;

    /// The result as a node sequence. Fails for non-node-set results.
    fn enumerate<'a>(&self, ctx: &Context<'a>) -> Result<Box<dyn NodeEnumeration<'a> + 'a>, XsltError> {
        match self.evaluate(ctx)? {
            Value::NodeSet(nodes) => Ok(Box::new(NodeListEnumeration::new(nodes, true))),
            other => Err(XsltError::dynamic(format!(
                "Expression {self:?} does not return a node-set (got {other:?})"
            ))),
        }
    }
}

/// A relative location path: each step applies an axis and a node test to
/// every node selected by the previous step.
#[derive(Debug, Clone, Default)]
pub struct PathExpr {
    steps: Vec<(Axis, NodeTest)>,
}

impl PathExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, axis: Axis, test: NodeTest) -> Self {
        self.steps.push((axis, test));
        self
    }

    fn select<'a>(&self, origin: NodeRef<'a>) -> Vec<NodeRef<'a>> {
        let mut current = vec![origin];
        for &(axis, test) in &self.steps {
            current = current
                .iter()
                .flat_map(|node| node.enumerate(axis, test))
                .sorted()
                .dedup()
                .collect();
        }
        current
    }
}

impl Expression for PathExpr {
    fn evaluate<'a>(&self, ctx: &Context<'a>) -> Result<Value<'a>, XsltError> {
        Ok(Value::NodeSet(self.select(ctx.context_node())))
    }

    fn enumerate<'a>(&self, ctx: &Context<'a>) -> Result<Box<dyn NodeEnumeration<'a> + 'a>, XsltError> {
        match self.steps.as_slice() {
            // A single forward step can be iterated lazily as it stands.
            [(axis, test)] if axis.is_forward() => Ok(Box::new(ctx.context_node().enumerate(*axis, *test))),
            _ => Ok(Box::new(NodeListEnumeration::new(self.select(ctx.context_node()), true))),
        }
    }
}

/// A constant string, number or boolean.
#[derive(Debug, Clone)]
pub struct Literal(Value<'static>);

impl Literal {
    pub fn string(value: impl Into<String>) -> Self {
        Literal(Value::String(value.into()))
    }

    pub fn number(value: f64) -> Self {
        Literal(Value::Number(value))
    }

    pub fn boolean(value: bool) -> Self {
        Literal(Value::Boolean(value))
    }
}

impl Expression for Literal {
    fn evaluate<'a>(&self, _ctx: &Context<'a>) -> Result<Value<'a>, XsltError> {
        Ok(self.0.clone())
    }
}

/// The context node, `.`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextItem;

impl Expression for ContextItem {
    fn evaluate<'a>(&self, ctx: &Context<'a>) -> Result<Value<'a>, XsltError> {
        Ok(Value::NodeSet(vec![ctx.context_node()]))
    }
}

/// An expression backed by a closure.
pub struct FnExpression<F> {
    label: &'static str,
    f: F,
}

impl<F> fmt::Debug for FnExpression<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnExpression({})", self.label)
    }
}

impl<F> Expression for FnExpression<F>
where
    F: for<'a> Fn(&Context<'a>) -> Result<Value<'a>, XsltError> + Send + Sync,
{
    fn evaluate<'a>(&self, ctx: &Context<'a>) -> Result<Value<'a>, XsltError> {
        (self.f)(ctx)
    }
}

/// Wraps a closure as an [`Expression`]; `label` names it in diagnostics.
pub fn expr_fn<F>(label: &'static str, f: F) -> FnExpression<F>
where
    F: for<'a> Fn(&Context<'a>) -> Result<Value<'a>, XsltError> + Send + Sync,
{
    FnExpression { label, f }
}
