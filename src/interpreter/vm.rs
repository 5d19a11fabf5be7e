use super::call_frame::CallFrame;
use super::native_function::NativeFunction;
use super::object::{Closure, Object, ObjectRef};
use super::pool::Pool;
use super::table::Table;
use super::up_value::{UpValue, UpValueRef};
use super::value::Value;
use super::value_stack::ValueStack;
use crate::bytecode::Chunk;
use crate::errors::RuntimeError;
use smallvec::SmallVec;

/// Ceilings on the two axes a runaway program can grow along.
#[derive(Clone)]
pub struct VmLimits {
    pub max_registers: usize,
    pub max_call_depth: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            max_registers: 1_000_000,
            max_call_depth: 2_000,
        }
    }
}

/// The virtual machine: register stack, call frames, the object and upvalue
/// pools, and the distinguished environment.
///
/// A host loads a chunk, pushes arguments, and runs [`Vm::call`]; values
/// cross the boundary through the register stack. Native functions
/// registered with [`Vm::define_native_function`] appear as Lua globals and
/// may call back into the VM. Not safe for concurrent access.
pub struct Vm {
    pub(crate) registers: ValueStack,
    pub(crate) frames: SmallVec<[CallFrame; 16]>,
    pub(crate) objects: Pool<Object>,
    pub(crate) up_values: Pool<UpValue>,
    pub(crate) limits: VmLimits,
    environment: Value,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut objects = Pool::default();
        let slot = objects.alloc();
        objects.set(slot.index(), Object::Table(Table::default()));

        Self {
            registers: ValueStack::default(),
            frames: SmallVec::new(),
            objects,
            up_values: Pool::default(),
            limits: VmLimits::default(),
            environment: Value::Object(ObjectRef(slot)),
        }
    }

    pub fn with_chunk(chunk: &Chunk) -> Result<Self, RuntimeError> {
        let mut vm = Self::new();
        vm.load(chunk)?;
        Ok(vm)
    }

    /// Installs the chunk's root closure at register 0, binding its first
    /// upvalue to the distinguished environment. Requires no active call.
    pub fn load(&mut self, chunk: &Chunk) -> Result<(), RuntimeError> {
        if !self.frames.is_empty() {
            return Err(RuntimeError::LoadDuringCall);
        }

        log::debug!(
            "installing root closure ({} instructions)",
            chunk.root.instructions.len()
        );

        let mut up_values = SmallVec::new();

        for i in 0..chunk.root.up_values.len() {
            let slot = self.up_values.alloc();
            let value = if i == 0 {
                self.environment.clone()
            } else {
                Value::Nil
            };
            self.up_values.set(slot.index(), UpValue::Closed(value));
            up_values.push(UpValueRef(slot));
        }

        let object = self.alloc_object(Object::Closure(Closure {
            proto: chunk.root.clone(),
            up_values,
        }));

        self.registers.clear();
        self.registers.set(0, Value::Object(object));
        Ok(())
    }

    #[inline]
    pub fn push(&mut self, value: impl Into<Value>) {
        self.registers.push(value.into());
    }

    /// Pushes the global stored under `key`; shorthand for
    /// `push(env().get(key))`.
    pub fn push_global(&mut self, key: impl Into<Value>) {
        let value = self.env().get(key);
        self.registers.push(value);
    }

    /// Removes and returns the top of the stack. Return values pop in
    /// reverse order.
    #[inline]
    pub fn pop(&mut self) -> Value {
        self.registers.pop()
    }

    /// Drops the top `count` values.
    pub fn pop_n(&mut self, count: usize) {
        let len = self.registers.len().saturating_sub(count);
        self.registers.resize(len);
    }

    #[inline]
    pub fn stack_len(&self) -> usize {
        self.registers.len()
    }

    /// Argument `index` of the running native call. Outside any call this
    /// reads the stack from the bottom, which is where the results of a
    /// completed top-level call sit.
    pub fn argument(&self, index: usize) -> &Value {
        match self.frames.last() {
            Some(frame) => self.registers.slot(frame.func_idx + index + 1),
            None => self.registers.slot(index),
        }
    }

    pub fn num_arguments(&self) -> usize {
        match self.frames.last() {
            Some(frame) => self.registers.len() - frame.func_idx - 1,
            None => self.registers.len(),
        }
    }

    /// The distinguished environment: the global table bound to every root
    /// closure's first upvalue.
    pub fn env(&self) -> &Table {
        let Value::Object(obj) = &self.environment else {
            unreachable!()
        };

        match self.objects.get(obj.index()) {
            Some(Object::Table(table)) => table,
            _ => unreachable!(),
        }
    }

    pub fn env_mut(&mut self) -> &mut Table {
        let Value::Object(obj) = &self.environment else {
            unreachable!()
        };

        match self.objects.get_mut(obj.index()) {
            Some(Object::Table(table)) => table,
            _ => unreachable!(),
        }
    }

    /// Allocates a native-closure object, ready to store in the environment
    /// or any table.
    pub fn alloc_native_function(
        &mut self,
        callback: impl Fn(&mut Vm) -> Result<usize, RuntimeError> + 'static,
    ) -> Value {
        let object = self.alloc_object(Object::NativeClosure(NativeFunction::new(callback)));
        Value::Object(object)
    }

    /// `env().set(key, alloc_native_function(callback))`.
    pub fn define_native_function(
        &mut self,
        key: impl Into<Value>,
        callback: impl Fn(&mut Vm) -> Result<usize, RuntimeError> + 'static,
    ) {
        let function = self.alloc_native_function(callback);
        self.env_mut().set(key, function);
    }

    /// Calls the function sitting under `num_args` arguments, leaving
    /// exactly `num_results` results in its place.
    ///
    /// On failure the frames and values of the failed call are discarded;
    /// the VM stays usable.
    pub fn call(&mut self, num_args: usize, num_results: usize) -> Result<(), RuntimeError> {
        assert!(
            self.registers.len() > num_args,
            "call expects the function and its arguments on the stack"
        );

        let func_idx = self.registers.len() - num_args - 1;
        log::debug!("host call at {func_idx}: {num_args} args, {num_results} results");

        let entry_depth = self.frames.len();
        let result = self.run_call(func_idx, num_results as i32);

        if let Err(err) = &result {
            log::debug!("call failed: {err}");
            self.frames.truncate(entry_depth);
            self.registers.resize(func_idx);
        }

        result
    }

    fn run_call(&mut self, func_idx: usize, num_results: i32) -> Result<(), RuntimeError> {
        if !self.precall(func_idx, num_results)? {
            self.execute()?;
        }

        Ok(())
    }

    /// Current call-frame depth.
    #[inline]
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn limits(&self) -> &VmLimits {
        &self.limits
    }

    #[inline]
    pub fn set_limits(&mut self, limits: VmLimits) {
        self.limits = limits;
    }

    /// Lua-visible type of a value.
    pub fn type_name(&self, value: &Value) -> &'static str {
        match value {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Object(obj) => self
                .objects
                .get(obj.index())
                .map(Object::type_name)
                .unwrap_or("nil"),
        }
    }

    pub(crate) fn alloc_object(&mut self, object: Object) -> ObjectRef {
        let slot = self.objects.alloc();
        self.objects.set(slot.index(), object);
        ObjectRef(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_protocol() {
        let mut vm = Vm::new();
        vm.push(1);
        vm.push("two");
        vm.push(3.0);

        assert_eq!(vm.stack_len(), 3);
        assert_eq!(vm.pop(), Value::Float(3.0));

        vm.pop_n(2);
        assert!(vm.stack_len() == 0);
    }

    #[test]
    fn env_round_trip() {
        let mut vm = Vm::new();
        vm.env_mut().set("answer", 42);

        assert_eq!(vm.env().get("answer"), Value::Integer(42));
        assert_eq!(vm.env().get("missing"), Value::Nil);

        vm.push_global("answer");
        assert_eq!(vm.pop(), Value::Integer(42));
    }

    #[test]
    fn native_functions_are_function_typed() {
        let mut vm = Vm::new();
        vm.define_native_function("noop", |_| Ok(0));

        let value = vm.env().get("noop");
        assert_eq!(vm.type_name(&value), "function");
    }

    #[test]
    fn calling_a_non_function_fails_and_recovers() {
        let mut vm = Vm::new();
        vm.push(7);

        let err = vm.call(0, 1).unwrap_err();
        assert_eq!(err, RuntimeError::NotAFunction("number"));
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.call_depth(), 0);
    }
}
