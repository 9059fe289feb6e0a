use arbor::tree::{ParseOptions, TinyDocument, parse_document};
use arbor::xslt::{ErrorListener, XsltError};
use arbor::{NamePool, PreparedStylesheet};
use std::sync::{Arc, Mutex};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn new_stylesheet() -> PreparedStylesheet {
    PreparedStylesheet::new(Arc::new(NamePool::new()))
}

pub fn parse(stylesheet: &PreparedStylesheet, xml: &str) -> Result<TinyDocument, Box<dyn std::error::Error>> {
    let options = ParseOptions {
        system_id: "test.xml".into(),
        ..ParseOptions::default()
    };
    Ok(parse_document(stylesheet.name_pool().clone(), xml, &options, None)?)
}

/// Collects recoverable errors instead of logging them.
#[derive(Default)]
pub struct CollectingListener {
    pub warnings: Mutex<Vec<String>>,
}

impl CollectingListener {
    pub fn messages(&self) -> Vec<String> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl ErrorListener for CollectingListener {
    fn warning(&self, error: XsltError) -> Result<(), XsltError> {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(error.to_string());
        }
        Ok(())
    }
}
