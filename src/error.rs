// src/error.rs
use arbor_tree::TreeError;
use arbor_xslt::XsltError;
use thiserror::Error;

/// Any error raised while loading, configuring or running a transformation.
#[derive(Error, Debug)]
pub enum ArborError {
    #[error("Tree construction failed: {0}")]
    Tree(#[from] TreeError),

    #[error("Transformation failed: {0}")]
    Xslt(#[from] XsltError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ArborError {
    /// True when the run was stopped on purpose rather than by a failure.
    pub fn is_termination(&self) -> bool {
        match self {
            ArborError::Xslt(e) => e.is_termination(),
            ArborError::Tree(TreeError::Preview(inner)) => inner
                .downcast_ref::<XsltError>()
                .is_some_and(XsltError::is_termination),
            _ => false,
        }
    }
}
