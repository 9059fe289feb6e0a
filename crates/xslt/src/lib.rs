//! Runtime core of an XSLT 1.0 processor over arbor trees.
//!
//! A [`PreparedStylesheet`] holds template rules partitioned by mode, key
//! definitions and global variable declarations. A [`Controller`] runs it
//! over a source document: it selects the best rule for each node with the
//! XSLT conflict-resolution rules, falls back to the built-in rules, and
//! keeps variable values in its [`Bindery`].

pub mod bindery;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod error_listener;
pub mod expression;
pub mod handler;
pub mod keys;
pub mod mode;
pub mod params;
pub mod pattern;
pub mod preview;
pub mod rule_manager;
pub mod stylesheet;
pub mod value;

pub use bindery::{Bindery, Binding, Scope};
pub use config::TransformConfig;
pub use context::{Context, LastSource};
pub use controller::Controller;
pub use error::XsltError;
pub use error_listener::{Diagnostics, ErrorListener, RecoveryPolicy, StandardErrorListener};
pub use expression::{ContextItem, Expression, Literal, PathExpr, expr_fn};
pub use handler::{ExprValue, NodeHandler, ValueSource, handler_fn, value_fn};
pub use keys::{KeyDefinition, KeyManager};
pub use mode::{Mode, ModeId, Rule};
pub use params::ParameterSet;
pub use pattern::{Pattern, PatternKind, StaticContext};
pub use preview::{PreviewDispatcher, PreviewManager};
pub use rule_manager::RuleManager;
pub use stylesheet::PreparedStylesheet;
pub use value::Value;
