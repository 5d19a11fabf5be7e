use super::vm::Vm;
use crate::errors::RuntimeError;
use std::rc::Rc;

/// A host function exposed to Lua.
///
/// The callable reads its arguments through [`Vm::argument`], pushes its
/// results with [`Vm::push`], and returns how many it pushed. It may call
/// back into the VM.
pub(crate) struct NativeFunction {
    callback: Rc<dyn Fn(&mut Vm) -> Result<usize, RuntimeError>>,
}

impl NativeFunction {
    pub(crate) fn new(callback: impl Fn(&mut Vm) -> Result<usize, RuntimeError> + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    pub(crate) fn call(&self, vm: &mut Vm) -> Result<usize, RuntimeError> {
        (self.callback)(vm)
    }
}

impl Clone for NativeFunction {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}
