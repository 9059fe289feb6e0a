//! A compact, read-only document tree for transformation engines.
//!
//! Documents are stored column-wise in a [`TinyDocument`]: each node is a row
//! in a handful of parallel vectors rather than a heap object. Names are
//! interned once in a shared [`NamePool`] and compared as integers. Navigation
//! goes through transient [`NodeRef`] views and lazy [`AxisEnumeration`]s.

pub mod axis;
pub mod builder;
pub mod document;
pub mod enumeration;
pub mod error;
pub mod namepool;
mod navigator;
pub mod node;
pub mod output;
pub mod parse;

pub use axis::Axis;
pub use builder::{Attribute, PreviewHandler, Receiver, TinyBuilder};
pub use document::{AttributeType, TinyDocument, UnparsedEntity};
pub use enumeration::{AxisEnumeration, LookaheadEnumeration, NodeEnumeration, NodeListEnumeration};
pub use error::TreeError;
pub use namepool::{Fingerprint, NameCode, NamePool, NamespaceCode};
pub use node::{NodeHandle, NodeId, NodeKind, NodeRef};
pub use node_test::NodeTest;
pub use output::{Outputter, TextOutputter, XmlOutputter};
pub use parse::{ParseOptions, parse_document};
