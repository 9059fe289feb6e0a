//! Template-rule transformations over compact XML trees.
//!
//! This crate ties together [`arbor_tree`] (the document store) and
//! [`arbor_xslt`] (rule dispatch and variables) behind two entry points,
//! [`transform_str`] and [`transform_file`]. Both build the source tree,
//! running preview templates while it is built when the stylesheet asks for
//! them, and then process the document from its root.

pub mod error;

pub use arbor_tree as tree;
pub use arbor_xslt as xslt;
pub use error::ArborError;

pub use arbor_tree::{NamePool, NodeRef, Outputter, ParseOptions, TextOutputter, TinyDocument, XmlOutputter};
pub use arbor_xslt::{
    Context, Controller, Diagnostics, ModeId, ParameterSet, PreparedStylesheet, RecoveryPolicy, TransformConfig,
    XsltError, handler_fn,
};

use arbor_tree::parse_document;
use arbor_xslt::PreviewDispatcher;
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// How result events are serialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMethod {
    #[default]
    Xml,
    /// Text content only; markup events are dropped.
    Text,
}

/// Reads a [`TransformConfig`] from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<TransformConfig, ArborError> {
    let text = fs::read_to_string(path)?;
    Ok(TransformConfig::from_json(&text)?)
}

/// Transforms the XML document in `source` and returns the serialised result.
pub fn transform_str(
    stylesheet: &PreparedStylesheet,
    source: &str,
    method: OutputMethod,
    config: &TransformConfig,
) -> Result<String, ArborError> {
    run(stylesheet, source, "", method, config)
}

/// Transforms the XML file at `input` and writes the result to `output`.
pub fn transform_file(
    stylesheet: &PreparedStylesheet,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    method: OutputMethod,
    config: &TransformConfig,
) -> Result<(), ArborError> {
    let input = input.as_ref();
    let source = fs::read_to_string(input)?;
    let result = run(stylesheet, &source, &input.to_string_lossy(), method, config)?;
    fs::write(output, result)?;
    Ok(())
}

fn run(
    stylesheet: &PreparedStylesheet,
    source: &str,
    system_id: &str,
    method: OutputMethod,
    config: &TransformConfig,
) -> Result<String, ArborError> {
    match method {
        OutputMethod::Xml => {
            let out = Rc::new(RefCell::new(XmlOutputter::new(Vec::new())));
            process(stylesheet, source, system_id, config, Box::new(out.clone()))?;
            Ok(out.replace(XmlOutputter::new(Vec::new())).into_string()?)
        }
        OutputMethod::Text => {
            let out = Rc::new(RefCell::new(TextOutputter::new()));
            process(stylesheet, source, system_id, config, Box::new(out.clone()))?;
            Ok(out.replace(TextOutputter::new()).into_string())
        }
    }
}

fn process(
    stylesheet: &PreparedStylesheet,
    source: &str,
    system_id: &str,
    config: &TransformConfig,
    outputter: Box<dyn Outputter>,
) -> Result<(), ArborError> {
    let options = config.parse_options(system_id);
    let pool = stylesheet.name_pool().clone();
    let (doc, outputter) = if stylesheet.preview().is_some() {
        let mut dispatcher = PreviewDispatcher::new(stylesheet, config.diagnostics()).with_outputter(outputter);
        let doc = parse_document(pool, source, &options, Some(&mut dispatcher))?;
        log::debug!("{} element(s) processed in preview mode", dispatcher.processed());
        (doc, dispatcher.take_outputter())
    } else {
        (parse_document(pool, source, &options, None)?, Some(outputter))
    };

    let mut controller = Controller::from_config(stylesheet, config);
    if let Some(outputter) = outputter {
        controller.set_outputter(outputter);
    }
    controller.transform_document(&doc)?;
    Ok(())
}
