use crate::value::Value;
use arbor_tree::Fingerprint;

/// Parameters passed to a template or to the transformation, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet<'a> {
    entries: Vec<(Fingerprint, Value<'a>)>,
}

impl<'a> ParameterSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any earlier value of the same name.
    pub fn put(&mut self, name: Fingerprint, value: Value<'a>) {
        match self.entries.iter_mut().find(|(fp, _)| *fp == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: Fingerprint) -> Option<&Value<'a>> {
        self.entries
            .iter()
            .find(|(fp, _)| *fp == name)
            .map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
