use super::byte_string::ByteString;
use super::call_frame::{CallFrame, CallStatus, MULTIRET};
use super::instruction::{Instruction, OpCode, FIELDS_PER_FLUSH};
use super::object::{Closure, Object, ObjectRef};
use super::table::Table;
use super::up_value::{UpValue, UpValueRef};
use super::value::Value;
use super::vm::Vm;
use crate::bytecode::{Prototype, UpValueDesc};
use crate::errors::RuntimeError;
use smallvec::SmallVec;
use std::rc::Rc;

impl Vm {
    /// Runs the dispatch loop until the frame it entered on returns.
    ///
    /// The topmost frame is marked fresh; a RETURN that pops a fresh frame
    /// hands control back to the host, while every other RETURN just resumes
    /// the calling frame.
    pub(crate) fn execute(&mut self) -> Result<(), RuntimeError> {
        match self.frames.last_mut() {
            Some(frame) => frame.status |= CallStatus::FRESH,
            None => return Ok(()),
        }

        'frame: loop {
            let (func_idx, base, mut pc) = {
                let frame = self.frames.last().ok_or(RuntimeError::BadJump(0))?;
                (frame.func_idx, frame.base, frame.pc)
            };
            let proto = self.frame_proto(func_idx)?;

            loop {
                let Some(&inst) = proto.instructions.get(pc) else {
                    return Err(RuntimeError::BadJump(pc));
                };
                pc += 1;

                let Some(op) = inst.opcode() else {
                    return Err(RuntimeError::IllegalInstruction(inst.0));
                };

                let a = inst.a() as usize;
                let b = inst.b();
                let c = inst.c();

                match op {
                    OpCode::Move => {
                        let value = self.registers.get(base + b as usize);
                        self.registers.set(base + a, value);
                    }
                    OpCode::LoadK => {
                        let value = self.constant(&proto, inst.bx() as usize);
                        self.registers.set(base + a, value);
                    }
                    OpCode::LoadKx => {
                        let Some(&extra) = proto.instructions.get(pc) else {
                            return Err(RuntimeError::BadJump(pc));
                        };
                        pc += 1;

                        let value = self.constant(&proto, extra.ax() as usize);
                        self.registers.set(base + a, value);
                    }
                    OpCode::LoadBool => {
                        self.registers.set(base + a, Value::Bool(b != 0));

                        if c != 0 {
                            pc += 1;
                        }
                    }
                    OpCode::LoadNil => {
                        for i in 0..=b as usize {
                            self.registers.set(base + a + i, Value::Nil);
                        }
                    }
                    OpCode::GetUpVal => {
                        if let Some(handle) = self.up_value_handle(func_idx, b as usize) {
                            let value = self.read_up_value(&handle);
                            self.registers.set(base + a, value);
                        }
                    }
                    OpCode::GetTabUp => {
                        if let Some(handle) = self.up_value_handle(func_idx, b as usize) {
                            let container = self.read_up_value(&handle);
                            let key = self.rk(&proto, base, c);

                            if let Some(value) = self.index_table(&container, &key) {
                                self.registers.set(base + a, value);
                            }
                        }
                    }
                    OpCode::GetTable => {
                        let container = self.registers.get(base + b as usize);
                        let key = self.rk(&proto, base, c);

                        if let Some(value) = self.index_table(&container, &key) {
                            self.registers.set(base + a, value);
                        }
                    }
                    OpCode::SetTabUp => {
                        if let Some(handle) = self.up_value_handle(func_idx, a) {
                            let container = self.read_up_value(&handle);
                            let key = self.rk(&proto, base, b);
                            let value = self.rk(&proto, base, c);
                            self.write_table(&container, key, value);
                        }
                    }
                    OpCode::SetUpVal => {
                        if let Some(handle) = self.up_value_handle(func_idx, b as usize) {
                            let value = self.registers.get(base + a);
                            self.write_up_value(&handle, value);
                        }
                    }
                    OpCode::SetTable => {
                        let container = self.registers.get(base + a);
                        let key = self.rk(&proto, base, b);
                        let value = self.rk(&proto, base, c);
                        self.write_table(&container, key, value);
                    }
                    OpCode::NewTable => {
                        // size hints in B and C are ignored
                        let object = self.alloc_object(Object::Table(Table::default()));
                        self.registers.set(base + a, Value::Object(object));
                    }
                    OpCode::SelfOp => {
                        let container = self.registers.get(base + b as usize);
                        self.registers.set(base + a + 1, container.clone());

                        let key = self.rk(&proto, base, c);
                        if let Some(value) = self.index_table(&container, &key) {
                            self.registers.set(base + a, value);
                        }
                    }
                    OpCode::Add
                    | OpCode::Sub
                    | OpCode::Mul
                    | OpCode::Mod
                    | OpCode::Div
                    | OpCode::IDiv => {
                        let lhs = self.rk(&proto, base, b);
                        let rhs = self.rk(&proto, base, c);

                        if let Some(value) = arith(op, &lhs, &rhs) {
                            self.registers.set(base + a, value);
                        }
                    }
                    OpCode::Pow => {
                        let lhs = self.rk(&proto, base, b);
                        let rhs = self.rk(&proto, base, c);

                        if let (Some(x), Some(y)) = (lhs.to_number(), rhs.to_number()) {
                            self.registers.set(base + a, Value::Float(x.powf(y)));
                        }
                    }
                    OpCode::BAnd | OpCode::BOr | OpCode::BXor | OpCode::Shl | OpCode::Shr => {
                        let lhs = self.rk(&proto, base, b);
                        let rhs = self.rk(&proto, base, c);

                        if let (Some(x), Some(y)) = (lhs.to_integer(), rhs.to_integer()) {
                            let value = match op {
                                OpCode::BAnd => x & y,
                                OpCode::BOr => x | y,
                                OpCode::BXor => x ^ y,
                                OpCode::Shl => shift_left(x, y),
                                _ => shift_right(x, y),
                            };
                            self.registers.set(base + a, Value::Integer(value));
                        }
                    }
                    OpCode::Unm => {
                        let operand = self.registers.get(base + b as usize);

                        match operand {
                            Value::Integer(i) => {
                                self.registers.set(base + a, Value::Integer(i.wrapping_neg()));
                            }
                            _ => {
                                if let Some(f) = operand.to_number() {
                                    self.registers.set(base + a, Value::Float(-f));
                                }
                            }
                        }
                    }
                    OpCode::BNot => {
                        let operand = self.registers.get(base + b as usize);

                        if let Some(i) = operand.to_integer() {
                            self.registers.set(base + a, Value::Integer(!i));
                        }
                    }
                    OpCode::Not => {
                        let truthy = self.registers.get(base + b as usize).truthy();
                        self.registers.set(base + a, Value::Bool(!truthy));
                    }
                    OpCode::Len => {
                        let operand = self.registers.get(base + b as usize);

                        match &operand {
                            Value::String(s) => {
                                self.registers.set(base + a, Value::Integer(s.len() as i64));
                            }
                            Value::Object(obj) => {
                                if let Some(Object::Table(table)) = self.objects.get(obj.index()) {
                                    let len = table.len() as i64;
                                    self.registers.set(base + a, Value::Integer(len));
                                }
                            }
                            _ => {}
                        }
                    }
                    OpCode::Concat => {
                        let mut bytes = Vec::new();

                        for i in b as usize..=c as usize {
                            let value = self.registers.get(base + i);
                            bytes.extend_from_slice(self.tostring(&value).as_bytes());
                        }

                        self.registers
                            .set(base + a, Value::String(ByteString::from(bytes)));
                    }
                    OpCode::Jmp => {
                        if a != 0 {
                            self.close_up_values(base + a - 1);
                        }

                        pc = offset_pc(pc, inst.sbx())?;
                    }
                    OpCode::Eq | OpCode::Lt | OpCode::Le => {
                        let lhs = self.rk(&proto, base, b);
                        let rhs = self.rk(&proto, base, c);

                        let holds = match op {
                            OpCode::Eq => lhs == rhs,
                            OpCode::Lt => lhs.lua_lt(&rhs),
                            _ => lhs.lua_le(&rhs),
                        };

                        // the next instruction is the branch JMP
                        if holds != (a != 0) {
                            pc += 1;
                        }
                    }
                    OpCode::Test => {
                        let truthy = self.registers.get(base + a).truthy();

                        if truthy != (c != 0) {
                            pc += 1;
                        }
                    }
                    OpCode::TestSet => {
                        let value = self.registers.get(base + b as usize);

                        if value.truthy() == (c != 0) {
                            self.registers.set(base + a, value);
                        } else {
                            pc += 1;
                        }
                    }
                    OpCode::Call => {
                        let ra = base + a;

                        if b != 0 {
                            self.registers.resize(ra + b as usize);
                        }

                        self.frames.last_mut().ok_or(RuntimeError::BadJump(pc))?.pc = pc;
                        self.precall(ra, c as i32 - 1)?;
                        continue 'frame;
                    }
                    OpCode::TailCall => {
                        let ra = base + a;

                        if b != 0 {
                            self.registers.resize(ra + b as usize);
                        }

                        self.frames.last_mut().ok_or(RuntimeError::BadJump(pc))?.pc = pc;

                        if self.precall(ra, MULTIRET)? {
                            // native target: results are already placed, the
                            // RETURN 0 that follows will hand them on
                            continue 'frame;
                        }

                        if !proto.protos.is_empty() {
                            self.close_up_values(base);
                        }

                        self.collapse_tail_frame()?;
                        continue 'frame;
                    }
                    OpCode::Return => {
                        let ra = base + a;

                        if !proto.protos.is_empty() {
                            self.close_up_values(base);
                        }

                        let produced = if b == 0 {
                            self.registers.len().saturating_sub(ra)
                        } else {
                            b as usize - 1
                        };

                        let fresh = self
                            .frames
                            .last()
                            .map(CallFrame::is_fresh)
                            .unwrap_or_default();

                        self.postcall(ra, produced);

                        if fresh {
                            return Ok(());
                        }

                        continue 'frame;
                    }
                    OpCode::ForLoop => {
                        let ra = base + a;
                        let index = self.registers.get(ra);
                        let limit = self.registers.get(ra + 1);
                        let step = self.registers.get(ra + 2);

                        if let (Value::Integer(i), Value::Integer(l), Value::Integer(s)) =
                            (&index, &limit, &step)
                        {
                            let next = i.wrapping_add(*s);
                            self.registers.set(ra, Value::Integer(next));

                            if if *s > 0 { next <= *l } else { *l <= next } {
                                pc = offset_pc(pc, inst.sbx())?;
                                self.registers.set(ra + 3, Value::Integer(next));
                            }
                        } else if let (Some(i), Some(l), Some(s)) =
                            (index.to_number(), limit.to_number(), step.to_number())
                        {
                            let next = i + s;
                            self.registers.set(ra, Value::Float(next));

                            if if s > 0.0 { next <= l } else { l <= next } {
                                pc = offset_pc(pc, inst.sbx())?;
                                self.registers.set(ra + 3, Value::Float(next));
                            }
                        }
                    }
                    OpCode::ForPrep => {
                        let ra = base + a;
                        let init = self.registers.get(ra);
                        let limit = self.registers.get(ra + 1);
                        let step = self.registers.get(ra + 2);

                        let int_loop = matches!(step, Value::Integer(_));

                        if let (true, Some(i), Some(l), Some(s)) = (
                            int_loop,
                            init.to_integer(),
                            limit.to_integer(),
                            step.to_integer(),
                        ) {
                            self.registers.set(ra, Value::Integer(i.wrapping_sub(s)));
                            self.registers.set(ra + 1, Value::Integer(l));
                            self.registers.set(ra + 2, Value::Integer(s));
                        } else if let (Some(i), Some(l), Some(s)) =
                            (init.to_number(), limit.to_number(), step.to_number())
                        {
                            self.registers.set(ra, Value::Float(i - s));
                            self.registers.set(ra + 1, Value::Float(l));
                            self.registers.set(ra + 2, Value::Float(s));
                        }

                        pc = offset_pc(pc, inst.sbx())?;
                    }
                    OpCode::TForCall => {
                        let ra = base + a;
                        let callee = ra + 3;

                        for offset in 0..3 {
                            let value = self.registers.get(ra + offset);
                            self.registers.set(callee + offset, value);
                        }

                        self.registers.resize(callee + 3);
                        self.frames.last_mut().ok_or(RuntimeError::BadJump(pc))?.pc = pc;
                        self.precall(callee, c as i32)?;
                        continue 'frame;
                    }
                    OpCode::TForLoop => {
                        let ra = base + a;
                        let control = self.registers.get(ra + 1);

                        if !control.is_nil() {
                            self.registers.set(ra, control);
                            pc = offset_pc(pc, inst.sbx())?;
                        }
                    }
                    OpCode::SetList => {
                        let ra = base + a;

                        let count = if b == 0 {
                            self.registers.len().saturating_sub(ra + 1)
                        } else {
                            b as usize
                        };

                        let block = if c == 0 {
                            let Some(&extra) = proto.instructions.get(pc) else {
                                return Err(RuntimeError::BadJump(pc));
                            };
                            pc += 1;
                            extra.ax() as usize
                        } else {
                            c as usize
                        };

                        let first = block.saturating_sub(1) * FIELDS_PER_FLUSH;
                        let values: SmallVec<[Value; 8]> =
                            (1..=count).map(|i| self.registers.get(ra + i)).collect();

                        let target = self.registers.get(ra);
                        if let Value::Object(obj) = &target {
                            if let Some(Object::Table(table)) = self.objects.get_mut(obj.index()) {
                                for (i, value) in values.into_iter().enumerate() {
                                    table.set(Value::Integer((first + i + 1) as i64), value);
                                }
                            }
                        }

                        self.registers.resize(ra + 1);
                    }
                    OpCode::Closure => {
                        let Some(sub) = proto.protos.get(inst.bx() as usize).cloned() else {
                            return Err(RuntimeError::IllegalInstruction(inst.0));
                        };

                        let object = self.closure_for(&sub, base, func_idx);
                        self.registers.set(base + a, Value::Object(object));
                    }
                    OpCode::VarArg => {
                        let ra = base + a;
                        let fixed = proto.num_params as usize;
                        let available = (base - func_idx - 1).saturating_sub(fixed);

                        if b == 0 {
                            // all varargs, top moves to the end of the copy
                            self.registers.resize(ra);

                            for i in 0..available {
                                let value = self.registers.get(base - available + i);
                                self.registers.push(value);
                            }
                        } else {
                            for i in 0..b as usize - 1 {
                                let value = if i < available {
                                    self.registers.get(base - available + i)
                                } else {
                                    Value::Nil
                                };
                                self.registers.set(ra + i, value);
                            }
                        }
                    }
                    OpCode::ExtraArg => {
                        // only ever consumed by LOADKX and SETLIST
                        return Err(RuntimeError::IllegalInstruction(inst.0));
                    }
                }
            }
        }
    }

    /// Begins a call of the value at `func_idx`.
    ///
    /// Native targets run to completion here, results placed by `postcall`,
    /// and `true` comes back. Lua targets get their arguments adjusted and a
    /// frame pushed; the caller must run the dispatch loop.
    pub(crate) fn precall(
        &mut self,
        func_idx: usize,
        num_results: i32,
    ) -> Result<bool, RuntimeError> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(RuntimeError::StackOverflow);
        }

        let callee = self.registers.get(func_idx);
        let Value::Object(obj) = &callee else {
            return Err(RuntimeError::NotAFunction(self.type_name(&callee)));
        };

        match self.objects.get(obj.index()) {
            Some(Object::NativeClosure(callback)) => {
                let callback = callback.clone();
                self.frames
                    .push(CallFrame::new_native(func_idx, num_results));

                match callback.call(self) {
                    Ok(produced) => {
                        let available = self.registers.len().saturating_sub(func_idx + 1);

                        if produced > available {
                            self.frames.pop();
                            return Err(RuntimeError::Native(
                                "native function reported more results than it pushed",
                            ));
                        }

                        let first = self.registers.len() - produced;
                        self.postcall(first, produced);
                        Ok(true)
                    }
                    Err(err) => {
                        self.frames.pop();
                        Err(err)
                    }
                }
            }
            Some(Object::Closure(closure)) => {
                let proto = closure.proto.clone();
                let num_args = self.registers.len() - func_idx - 1;

                let base = if proto.is_vararg {
                    // move the fixed parameters up to a fresh frame base,
                    // leaving the varargs behind just below it
                    let base = self.registers.len();

                    for i in 0..proto.num_params as usize {
                        let value = if i < num_args {
                            self.registers.take(func_idx + 1 + i)
                        } else {
                            Value::Nil
                        };
                        self.registers.push(value);
                    }

                    base
                } else {
                    func_idx + 1
                };

                let top = base + proto.max_stack_size as usize;
                if top > self.limits.max_registers {
                    return Err(RuntimeError::StackOverflow);
                }

                self.registers.resize(top);
                self.frames
                    .push(CallFrame::new_lua(func_idx, num_results, base));
                Ok(false)
            }
            _ => Err(RuntimeError::NotAFunction(self.type_name(&callee))),
        }
    }

    /// Ends the current call: pops its frame and arranges `produced` results
    /// starting at `first_result` down over the function slot, honoring the
    /// frame's requested count. Returns false for a variable-length return.
    pub(crate) fn postcall(&mut self, first_result: usize, produced: usize) -> bool {
        let Some(frame) = self.frames.pop() else {
            return true;
        };

        let res = frame.func_idx;

        match frame.num_results {
            0 => {
                self.registers.resize(res);
                true
            }
            wanted if wanted < 0 => {
                for i in 0..produced {
                    let value = self.registers.take(first_result + i);
                    self.registers.set(res + i, value);
                }

                self.registers.resize(res + produced);
                false
            }
            wanted => {
                let wanted = wanted as usize;
                let copied = wanted.min(produced);

                for i in 0..copied {
                    let value = self.registers.take(first_result + i);
                    self.registers.set(res + i, value);
                }

                for i in copied..wanted {
                    self.registers.set(res + i, Value::Nil);
                }

                self.registers.resize(res + wanted);
                true
            }
        }
    }

    /// Folds the frame a tail call just pushed into its caller's frame:
    /// function and arguments shift down over the caller, the combined frame
    /// keeps the caller's slot and result count, and picks up TAIL.
    fn collapse_tail_frame(&mut self) -> Result<(), RuntimeError> {
        let tail = match self.frames.pop() {
            Some(frame) => frame,
            None => return Ok(()),
        };
        let proto = self.frame_proto(tail.func_idx)?;

        let Some(caller) = self.frames.last_mut() else {
            self.frames.push(tail);
            return Ok(());
        };

        let offset = tail.func_idx - caller.func_idx;
        let move_len = (tail.base - tail.func_idx) + proto.num_params as usize;
        let old_top = self.registers.len();

        for i in 0..move_len {
            let value = self.registers.take(tail.func_idx + i);
            self.registers.set(caller.func_idx + i, value);
        }

        caller.base = tail.base - offset;
        caller.pc = 0;
        caller.status |= CallStatus::LUA | CallStatus::TAIL;
        self.registers.resize(old_top - offset);

        Ok(())
    }

    /// Closes every open upvalue at or above `level`: the register's current
    /// value moves into the upvalue, which owns it from then on.
    pub(crate) fn close_up_values(&mut self, level: usize) {
        log::trace!("closing upvalues at level {level}");

        for index in 0..self.up_values.slot_count() {
            if self.up_values.ref_count(index) == 0 {
                continue;
            }

            let Some(UpValue::Open(at)) = self.up_values.get(index) else {
                continue;
            };
            let at = *at;

            if at >= level {
                let value = self.registers.get(at);
                self.up_values.set(index, UpValue::Closed(value));
            }
        }
    }

    /// Materializes (or reuses) the closure for a CLOSURE instruction.
    ///
    /// The prototype caches the last closure built from it; while every
    /// upvalue the cache resolved still equals what would be resolved now,
    /// the cached object is handed back instead of a new one.
    fn closure_for(
        &mut self,
        proto: &Rc<Prototype>,
        parent_base: usize,
        parent_func_idx: usize,
    ) -> ObjectRef {
        let cached = proto.closure_cache.borrow().clone();

        if let Some(cached) = cached {
            if self.cache_matches(&cached, proto, parent_base, parent_func_idx) {
                return cached;
            }
        }

        let mut up_values = SmallVec::new();

        for desc in &proto.up_values {
            let handle = if desc.in_stack {
                self.find_or_create_open(parent_base + desc.index as usize)
            } else {
                match self.up_value_handle(parent_func_idx, desc.index as usize) {
                    Some(handle) => handle,
                    None => {
                        let slot = self.up_values.alloc();
                        self.up_values.set(slot.index(), UpValue::Closed(Value::Nil));
                        UpValueRef(slot)
                    }
                }
            };

            up_values.push(handle);
        }

        let object = self.alloc_object(Object::Closure(Closure {
            proto: proto.clone(),
            up_values,
        }));

        *proto.closure_cache.borrow_mut() = Some(object.clone());
        object
    }

    fn cache_matches(
        &self,
        cached: &ObjectRef,
        proto: &Rc<Prototype>,
        parent_base: usize,
        parent_func_idx: usize,
    ) -> bool {
        let Some(Object::Closure(closure)) = self.objects.get(cached.index()) else {
            return false;
        };

        if !Rc::ptr_eq(&closure.proto, proto) || closure.up_values.len() != proto.up_values.len() {
            return false;
        }

        proto
            .up_values
            .iter()
            .zip(&closure.up_values)
            .all(|(desc, handle)| {
                self.resolved_up_value(desc, parent_base, parent_func_idx)
                    == self.read_up_value(handle)
            })
    }

    /// The value an upvalue descriptor would capture right now.
    fn resolved_up_value(
        &self,
        desc: &UpValueDesc,
        parent_base: usize,
        parent_func_idx: usize,
    ) -> Value {
        if desc.in_stack {
            self.registers.get(parent_base + desc.index as usize)
        } else {
            match self.up_value_handle(parent_func_idx, desc.index as usize) {
                Some(handle) => self.read_up_value(&handle),
                None => Value::Nil,
            }
        }
    }

    /// Finds the open upvalue at `level`, or allocates one.
    fn find_or_create_open(&mut self, level: usize) -> UpValueRef {
        let existing = self.up_values.iter().find_map(|(index, uv)| match uv {
            UpValue::Open(at) if *at == level => Some(index),
            _ => None,
        });

        match existing {
            Some(index) => UpValueRef(self.up_values.create_ref(index)),
            None => {
                let slot = self.up_values.alloc();
                self.up_values.set(slot.index(), UpValue::Open(level));
                UpValueRef(slot)
            }
        }
    }

    pub(crate) fn frame_proto(&self, func_idx: usize) -> Result<Rc<Prototype>, RuntimeError> {
        let callee = self.registers.get(func_idx);

        if let Value::Object(obj) = &callee {
            if let Some(Object::Closure(closure)) = self.objects.get(obj.index()) {
                return Ok(closure.proto.clone());
            }
        }

        Err(RuntimeError::NotAFunction(self.type_name(&callee)))
    }

    /// RK operand: a constant when the ninth bit is set, a register
    /// otherwise.
    fn rk(&self, proto: &Prototype, base: usize, operand: u32) -> Value {
        if Instruction::is_constant(operand) {
            self.constant(proto, Instruction::index(operand))
        } else {
            self.registers.get(base + Instruction::index(operand))
        }
    }

    fn constant(&self, proto: &Prototype, index: usize) -> Value {
        proto.constants.get(index).cloned().unwrap_or_default()
    }

    fn up_value_handle(&self, func_idx: usize, index: usize) -> Option<UpValueRef> {
        let Value::Object(obj) = self.registers.get(func_idx) else {
            return None;
        };

        let Some(Object::Closure(closure)) = self.objects.get(obj.index()) else {
            return None;
        };

        closure.up_values.get(index).cloned()
    }

    pub(crate) fn read_up_value(&self, handle: &UpValueRef) -> Value {
        match self.up_values.get(handle.index()) {
            Some(UpValue::Open(at)) => self.registers.get(*at),
            Some(UpValue::Closed(value)) => value.clone(),
            None => Value::Nil,
        }
    }

    pub(crate) fn write_up_value(&mut self, handle: &UpValueRef, value: Value) {
        match self.up_values.get_mut(handle.index()) {
            Some(UpValue::Open(at)) => {
                let at = *at;
                self.registers.set(at, value);
            }
            Some(UpValue::Closed(slot)) => *slot = value,
            None => {}
        }
    }

    /// Table read; `None` when the container is not a table (the destination
    /// register is then left untouched).
    fn index_table(&self, container: &Value, key: &Value) -> Option<Value> {
        let Value::Object(obj) = container else {
            return None;
        };

        let Some(Object::Table(table)) = self.objects.get(obj.index()) else {
            return None;
        };

        Some(table.get(key.clone()))
    }

    fn write_table(&mut self, container: &Value, key: Value, value: Value) {
        if let Value::Object(obj) = container {
            if let Some(Object::Table(table)) = self.objects.get_mut(obj.index()) {
                table.set(key, value);
            }
        }
    }

    /// String rendering for CONCAT and host display; objects render as
    /// opaque markers.
    pub(crate) fn tostring(&self, value: &Value) -> ByteString {
        match value {
            Value::Nil => "nil".into(),
            Value::Bool(true) => "true".into(),
            Value::Bool(false) => "false".into(),
            Value::Integer(i) => i.to_string().as_str().into(),
            Value::Float(f) => format_float(*f).as_str().into(),
            Value::String(s) => s.clone(),
            Value::Object(obj) => match self.objects.get(obj.index()) {
                Some(Object::Table(_)) => "table: <unknown>".into(),
                _ => "function: <unknown>".into(),
            },
        }
    }
}

fn offset_pc(pc: usize, sbx: i64) -> Result<usize, RuntimeError> {
    let target = pc as i64 + sbx;

    if target < 0 {
        return Err(RuntimeError::BadJump(pc));
    }

    Ok(target as usize)
}

fn arith(op: OpCode, lhs: &Value, rhs: &Value) -> Option<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        let (a, b) = (*a, *b);

        let result = match op {
            OpCode::Add => a.wrapping_add(b),
            OpCode::Sub => a.wrapping_sub(b),
            OpCode::Mul => a.wrapping_mul(b),
            OpCode::Mod => int_floor_mod(a, b)?,
            OpCode::Div | OpCode::IDiv => int_floor_div(a, b)?,
            _ => return None,
        };

        return Some(Value::Integer(result));
    }

    let a = lhs.to_number()?;
    let b = rhs.to_number()?;

    let result = match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Mod => float_mod(a, b),
        OpCode::Div => a / b,
        OpCode::IDiv => (a / b).floor(),
        _ => return None,
    };

    Some(Value::Float(result))
}

fn int_floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }

    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);

    if r != 0 && (r ^ b) < 0 {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn int_floor_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }

    let r = a.wrapping_rem(b);

    if r != 0 && (r ^ b) < 0 {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;

    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn shift_left(a: i64, n: i64) -> i64 {
    if !(-63..=63).contains(&n) {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> -n) as i64
    }
}

fn shift_right(a: i64, n: i64) -> i64 {
    if !(-63..=63).contains(&n) {
        0
    } else if n >= 0 {
        ((a as u64) >> n) as i64
    } else {
        ((a as u64) << -n) as i64
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f < 0.0 { "-inf" } else { "inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}
