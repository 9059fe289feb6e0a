use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Namepool has been sealed")]
    NamePoolSealed,

    #[error("Too many prefixes for one namespace URI: {uri}")]
    TooManyPrefixes { uri: String },

    #[error("Too many namespace URIs or prefixes in name pool")]
    TooManyCodes,

    #[error("Name pool is full")]
    NamePoolFull,

    #[error("Unknown name code {0}")]
    UnknownNameCode(u32),

    #[error("Unknown axis number {0}")]
    UnknownAxis(u8),

    #[error("Tree construction error: {0}")]
    Builder(String),

    #[error("Preview processing failed: {0}")]
    Preview(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for TreeError {
    fn from(e: quick_xml::Error) -> Self {
        TreeError::Output(e.to_string())
    }
}
