use arbor_tree::TreeError;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum XsltError {
    /// An error the recovery policy may downgrade to a warning.
    #[error("{message}")]
    Recoverable { message: String },

    #[error("Circular definition of variable {name}")]
    CircularDefinition { name: String },

    /// Misuse of the runtime by its caller, e.g. an empty frame stack.
    #[error("{0}")]
    Structural(String),

    /// Explicit request to stop the transformation.
    #[error("Processing terminated: {0}")]
    Terminated(String),

    #[error("{message}")]
    Dynamic {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Invalid pattern '{pattern}': {message}")]
    PatternParse { pattern: String, message: String },

    #[error("Key {name} has not been defined")]
    UndefinedKey { name: String },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl XsltError {
    pub fn dynamic(message: impl Into<String>) -> Self {
        XsltError::Dynamic {
            message: message.into(),
            source: None,
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        XsltError::Structural(message.into())
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        XsltError::Recoverable {
            message: message.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, XsltError::Recoverable { .. } | XsltError::UndefinedKey { .. })
    }

    /// True for a termination request, including one raised inside a preview
    /// callback and carried back through the tree builder.
    pub fn is_termination(&self) -> bool {
        match self {
            XsltError::Terminated(_) => true,
            XsltError::Tree(TreeError::Preview(inner)) => inner
                .downcast_ref::<XsltError>()
                .is_some_and(XsltError::is_termination),
            _ => false,
        }
    }
}
