use crate::error_listener::{Diagnostics, RecoveryPolicy, StandardErrorListener};
use arbor_tree::ParseOptions;
use serde::{Deserialize, Serialize};

/// Settings for one transformation, usually read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub recovery_policy: RecoveryPolicy,
    /// Warnings logged before the standard listener falls silent.
    pub warning_limit: usize,
    pub line_numbering: bool,
    /// Mode applied to preview elements as soon as each one is built.
    pub preview_mode: Option<String>,
    pub preview_elements: Vec<String>,
    /// Drop whitespace-only text nodes from the source document.
    pub strip_whitespace: bool,
    /// Attribute names treated as IDs besides `xml:id`.
    pub id_attributes: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            recovery_policy: RecoveryPolicy::default(),
            warning_limit: StandardErrorListener::DEFAULT_WARNING_LIMIT,
            line_numbering: false,
            preview_mode: None,
            preview_elements: Vec::new(),
            strip_whitespace: false,
            id_attributes: Vec::new(),
        }
    }
}

impl TransformConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// A standard error listener with this configuration's policy and limit.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::standard(self.recovery_policy, self.warning_limit)
    }

    pub fn parse_options(&self, system_id: &str) -> ParseOptions {
        ParseOptions {
            system_id: system_id.to_string(),
            strip_whitespace: self.strip_whitespace,
            line_numbering: self.line_numbering,
            discard_comments: false,
            id_attributes: self.id_attributes.clone(),
        }
    }
}
