//! Preview processing: running templates over selected elements while the
//! source document is still being built, so their subtrees can be dropped.
use crate::controller::Controller;
use crate::error::XsltError;
use crate::error_listener::Diagnostics;
use crate::mode::ModeId;
use crate::params::ParameterSet;
use crate::stylesheet::PreparedStylesheet;
use arbor_tree::{
    Fingerprint, NodeHandle, NodeListEnumeration, Outputter, PreviewHandler, TinyDocument, TreeError,
};
use std::collections::HashSet;

/// The preview mode and the elements it applies to.
#[derive(Debug, Clone)]
pub struct PreviewManager {
    mode: ModeId,
    elements: HashSet<Fingerprint>,
}

impl PreviewManager {
    pub fn new(mode: ModeId) -> Self {
        PreviewManager {
            mode,
            elements: HashSet::new(),
        }
    }

    pub fn add_element(&mut self, fingerprint: Fingerprint) {
        self.elements.insert(fingerprint);
    }

    pub fn mode(&self) -> ModeId {
        self.mode
    }

    pub fn is_preview_element(&self, fingerprint: Fingerprint) -> bool {
        self.elements.contains(&fingerprint)
    }
}

/// Hooks a stylesheet's preview settings into a tree builder.
///
/// Each completed preview element is processed by a fresh [`Controller`]
/// positioned on the partial document, so global variables are evaluated
/// again for every call and see only what has been built so far.
pub struct PreviewDispatcher<'s> {
    stylesheet: &'s PreparedStylesheet,
    diagnostics: Diagnostics,
    outputter: Option<Box<dyn Outputter>>,
    params: ParameterSet<'static>,
    processed: usize,
}

impl<'s> PreviewDispatcher<'s> {
    pub fn new(stylesheet: &'s PreparedStylesheet, diagnostics: Diagnostics) -> Self {
        PreviewDispatcher {
            stylesheet,
            diagnostics,
            outputter: None,
            params: ParameterSet::new(),
            processed: 0,
        }
    }

    pub fn with_outputter(mut self, outputter: Box<dyn Outputter>) -> Self {
        self.outputter = Some(outputter);
        self
    }

    pub fn with_global_parameters(mut self, params: ParameterSet<'static>) -> Self {
        self.params = params;
        self
    }

    pub fn take_outputter(&mut self) -> Option<Box<dyn Outputter>> {
        self.outputter.take()
    }

    /// Number of elements processed so far.
    pub fn processed(&self) -> usize {
        self.processed
    }

    fn run(&mut self, doc: &TinyDocument, element: NodeHandle) -> Result<(), XsltError> {
        let manager = self
            .stylesheet
            .preview()
            .ok_or_else(|| XsltError::structural("Stylesheet has no preview mode"))?;
        let node = doc
            .node(element)
            .ok_or_else(|| TreeError::Builder(format!("no preview element at {element:?}")))?;
        let mut controller = Controller::new(self.stylesheet, self.diagnostics.clone());
        if let Some(out) = self.outputter.take() {
            controller.set_outputter(out);
        }
        controller.set_global_parameters(self.params.clone());
        controller.set_principal_source(doc.root());
        let result = controller.make_context(node).and_then(|ctx| {
            for binding in self.stylesheet.globals() {
                controller.evaluate_global(binding)?;
            }
            controller.apply_templates(
                &ctx,
                Some(Box::new(NodeListEnumeration::singleton(node))),
                manager.mode(),
                None,
            )
        });
        self.outputter = controller.take_outputter();
        // The subtree is about to be truncated, so indexes over it go stale.
        self.stylesheet.keys().forget_document(doc.document_number());
        result
    }
}

impl PreviewHandler for PreviewDispatcher<'_> {
    fn is_preview_element(&self, fingerprint: Fingerprint) -> bool {
        self.stylesheet
            .preview()
            .is_some_and(|p| p.is_preview_element(fingerprint))
    }

    fn preview(&mut self, doc: &TinyDocument, element: NodeHandle) -> Result<(), TreeError> {
        self.run(doc, element).map_err(|e| TreeError::Preview(Box::new(e)))?;
        self.processed += 1;
        Ok(())
    }
}
