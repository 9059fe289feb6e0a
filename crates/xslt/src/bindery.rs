//! Storage for variable and parameter values during a run.
//!
//! Globals live in a flat array indexed by slot and are assigned at most
//! once. Locals live in fixed-width frames, one per template invocation that
//! needs them; frames are kept after they are closed and reused by the next
//! invocation at the same depth.
use crate::error::XsltError;
use crate::handler::ValueSource;
use crate::params::ParameterSet;
use crate::value::Value;
use arbor_tree::Fingerprint;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Local,
}

/// A declared variable or parameter.
pub struct Binding {
    pub fingerprint: Fingerprint,
    pub display_name: String,
    pub slot: usize,
    pub scope: Scope,
    pub is_param: bool,
    /// Computes the value, or the default for a parameter that was not
    /// supplied. `None` means the empty string.
    pub select: Option<Arc<dyn ValueSource>>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.display_name)
            .field("slot", &self.slot)
            .field("scope", &self.scope)
            .field("is_param", &self.is_param)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Frame<'a> {
    params: Option<ParameterSet<'a>>,
    slots: Vec<Option<Value<'a>>>,
}

#[derive(Debug, Default)]
pub struct Bindery<'a> {
    globals: Vec<Option<Value<'a>>>,
    busy: Vec<bool>,
    global_params: ParameterSet<'a>,
    frames: Vec<Frame<'a>>,
    /// Number of open frames; the current one is `frames[top - 1]`.
    top: usize,
    local_space: usize,
}

impl<'a> Bindery<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_globals(&mut self, count: usize) {
        if count > self.globals.len() {
            self.globals.resize(count, None);
            self.busy.resize(count, false);
        }
    }

    /// Makes every frame opened from now on at least `count` slots wide.
    pub fn allocate_locals(&mut self, count: usize) {
        self.local_space = self.local_space.max(count);
    }

    pub fn define_global_parameters(&mut self, params: ParameterSet<'a>) {
        self.global_params = params;
    }

    /// Binds a global parameter to the value supplied for the run. Returns
    /// false when none was supplied.
    pub fn use_global_parameter(&mut self, binding: &Binding) -> Result<bool, XsltError> {
        match self.global_params.get(binding.fingerprint).cloned() {
            Some(value) => {
                self.define_global_variable(binding, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stores the value of a global. The first value stored is kept.
    pub fn define_global_variable(&mut self, binding: &Binding, value: Value<'a>) -> Result<(), XsltError> {
        let slot = self.global_slot(binding)?;
        if slot.is_none() {
            *slot = Some(value);
        }
        Ok(())
    }

    /// Marks a global as being evaluated, or no longer being evaluated.
    /// Marking one that is already being evaluated means its definition
    /// depends on itself.
    pub fn set_executing(&mut self, binding: &Binding, executing: bool) -> Result<(), XsltError> {
        let busy = self.busy.get_mut(binding.slot).ok_or_else(|| {
            XsltError::structural(format!("No global slot allocated for {}", binding.display_name))
        })?;
        if executing && *busy {
            return Err(XsltError::CircularDefinition {
                name: binding.display_name.clone(),
            });
        }
        *busy = executing;
        Ok(())
    }

    pub fn is_evaluated(&self, binding: &Binding) -> bool {
        self.globals.get(binding.slot).is_some_and(Option::is_some)
    }

    /// Opens a frame for a template invocation. All slots start unset.
    pub fn open_stack_frame(&mut self, params: Option<ParameterSet<'a>>) {
        if self.top == self.frames.len() {
            self.frames.push(Frame::default());
        }
        let frame = &mut self.frames[self.top];
        frame.params = params;
        frame.slots.clear();
        frame.slots.resize(self.local_space, None);
        self.top += 1;
    }

    pub fn close_stack_frame(&mut self) -> Result<(), XsltError> {
        self.top = self
            .top
            .checked_sub(1)
            .ok_or_else(|| XsltError::structural("Attempt to close a stack frame when none is open"))?;
        Ok(())
    }

    /// Binds a local parameter to the value the caller supplied. Returns
    /// false when none was supplied.
    pub fn use_local_parameter(&mut self, binding: &Binding) -> Result<bool, XsltError> {
        match self.get_local_parameter(binding.fingerprint).cloned() {
            Some(value) => {
                self.define_local_variable(binding, value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The value supplied for a parameter of the current invocation.
    pub fn get_local_parameter(&self, name: Fingerprint) -> Option<&Value<'a>> {
        self.current_frame()?.params.as_ref()?.get(name)
    }

    pub fn define_local_variable(&mut self, binding: &Binding, value: Value<'a>) -> Result<(), XsltError> {
        let top = self
            .top
            .checked_sub(1)
            .ok_or_else(|| XsltError::structural("Can't define local variable: stack is empty"))?;
        let slots = &mut self.frames[top].slots;
        if binding.slot >= slots.len() {
            slots.resize(binding.slot + 1, None);
        }
        slots[binding.slot] = Some(value);
        Ok(())
    }

    /// The current value of a variable: the global's, or the local's in the
    /// current frame.
    pub fn get_value(&self, binding: &Binding) -> Option<&Value<'a>> {
        match binding.scope {
            Scope::Global => self.globals.get(binding.slot)?.as_ref(),
            Scope::Local => self.current_frame()?.slots.get(binding.slot)?.as_ref(),
        }
    }

    /// The value of a local in an enclosing frame, as returned by
    /// [`get_frame_id`](Self::get_frame_id) while that frame was current.
    pub fn get_value_in_frame(&self, binding: &Binding, frame: usize) -> Option<&Value<'a>> {
        if frame == 0 || frame > self.top {
            return None;
        }
        self.frames[frame - 1].slots.get(binding.slot)?.as_ref()
    }

    /// Identifies the current frame; 0 when none is open.
    pub fn get_frame_id(&self) -> usize {
        self.top
    }

    /// Replaces the value of an existing variable.
    pub fn assign_variable(&mut self, binding: &Binding, value: Value<'a>) -> Result<(), XsltError> {
        match binding.scope {
            Scope::Global => {
                *self.global_slot(binding)? = Some(value);
                Ok(())
            }
            Scope::Local => self.define_local_variable(binding, value),
        }
    }

    fn current_frame(&self) -> Option<&Frame<'a>> {
        self.frames[..self.top].last()
    }

    fn global_slot(&mut self, binding: &Binding) -> Result<&mut Option<Value<'a>>, XsltError> {
        self.globals.get_mut(binding.slot).ok_or_else(|| {
            XsltError::structural(format!("No global slot allocated for {}", binding.display_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_tree::NamePool;

    fn binding(pool: &NamePool, name: &str, slot: usize, scope: Scope) -> Binding {
        Binding {
            fingerprint: pool.allocate("", "", name).unwrap().fingerprint(),
            display_name: name.to_string(),
            slot,
            scope,
            is_param: false,
            select: None,
        }
    }

    #[test]
    fn test_reopened_frame_is_cleared() {
        let pool = NamePool::new();
        let v = binding(&pool, "v", 2, Scope::Local);
        let mut bindery = Bindery::new();
        bindery.allocate_locals(3);
        bindery.open_stack_frame(None);
        bindery.define_local_variable(&v, Value::from("V")).unwrap();
        assert_eq!(bindery.get_value(&v).unwrap().as_string(), "V");
        bindery.close_stack_frame().unwrap();
        bindery.open_stack_frame(None);
        assert!(bindery.get_value(&v).is_none());
    }

    #[test]
    fn test_close_restores_previous_frame() {
        let pool = NamePool::new();
        let v = binding(&pool, "v", 0, Scope::Local);
        let mut bindery = Bindery::new();
        bindery.allocate_locals(1);
        bindery.open_stack_frame(None);
        bindery.define_local_variable(&v, Value::from(1.0)).unwrap();
        let outer = bindery.get_frame_id();
        bindery.open_stack_frame(None);
        bindery.close_stack_frame().unwrap();
        assert_eq!(bindery.get_frame_id(), outer);
        assert_eq!(bindery.get_value(&v).unwrap().as_number(), 1.0);
    }

    #[test]
    fn test_circular_definition_detected() {
        let pool = NamePool::new();
        let g = binding(&pool, "g", 0, Scope::Global);
        let mut bindery = Bindery::new();
        bindery.allocate_globals(1);
        bindery.set_executing(&g, true).unwrap();
        let err = bindery.set_executing(&g, true).unwrap_err();
        assert!(matches!(err, XsltError::CircularDefinition { ref name } if name == "g"));
        bindery.set_executing(&g, false).unwrap();
        bindery.set_executing(&g, true).unwrap();
    }

    #[test]
    fn test_globals_are_single_assignment() {
        let pool = NamePool::new();
        let g = binding(&pool, "g", 0, Scope::Global);
        let mut bindery = Bindery::new();
        bindery.allocate_globals(1);
        assert!(!bindery.is_evaluated(&g));
        bindery.define_global_variable(&g, Value::from("first")).unwrap();
        bindery.define_global_variable(&g, Value::from("second")).unwrap();
        assert!(bindery.is_evaluated(&g));
        assert_eq!(bindery.get_value(&g).unwrap().as_string(), "first");
        bindery.assign_variable(&g, Value::from("third")).unwrap();
        assert_eq!(bindery.get_value(&g).unwrap().as_string(), "third");
    }

    #[test]
    fn test_parameters() {
        let pool = NamePool::new();
        let p = binding(&pool, "p", 0, Scope::Local);
        let q = binding(&pool, "q", 1, Scope::Local);
        let g = binding(&pool, "g", 0, Scope::Global);
        let mut bindery = Bindery::new();
        bindery.allocate_globals(1);
        bindery.allocate_locals(2);

        let mut globals = ParameterSet::new();
        globals.put(g.fingerprint, Value::from("G"));
        bindery.define_global_parameters(globals);
        assert!(bindery.use_global_parameter(&g).unwrap());
        assert_eq!(bindery.get_value(&g).unwrap().as_string(), "G");

        let mut params = ParameterSet::new();
        params.put(p.fingerprint, Value::from("P"));
        bindery.open_stack_frame(Some(params));
        assert!(bindery.use_local_parameter(&p).unwrap());
        assert!(!bindery.use_local_parameter(&q).unwrap());
        assert_eq!(bindery.get_value(&p).unwrap().as_string(), "P");
        assert_eq!(bindery.get_value_in_frame(&p, 1).unwrap().as_string(), "P");
        assert!(bindery.get_value_in_frame(&p, 2).is_none());
    }

    #[test]
    fn test_empty_stack() {
        let pool = NamePool::new();
        let v = binding(&pool, "v", 0, Scope::Local);
        let mut bindery = Bindery::new();
        let err = bindery.define_local_variable(&v, Value::empty()).unwrap_err();
        assert_eq!(err.to_string(), "Can't define local variable: stack is empty");
        let err = bindery.close_stack_frame().unwrap_err();
        assert!(matches!(err, XsltError::Structural(_)));
        assert_eq!(bindery.get_frame_id(), 0);
        assert!(bindery.get_value(&v).is_none());
    }
}
