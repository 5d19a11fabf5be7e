mod reader;

pub use reader::read_chunk;

use crate::interpreter::{ByteString, Instruction, ObjectRef, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// An upvalue descriptor: where the closure materializing this prototype
/// finds the variable, either in the parent frame's registers or in the
/// parent closure's own upvalue list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpValueDesc {
    pub in_stack: bool,
    pub index: u8,
}

/// A compiled function, read-only at runtime: layout, code, and constants,
/// without any runtime state except the closure cache.
#[derive(Debug, Default, PartialEq)]
pub struct Prototype {
    pub source: Option<ByteString>,
    pub line_defined: i64,
    pub last_line_defined: i64,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Value>,
    pub up_values: Vec<UpValueDesc>,
    pub protos: Vec<Rc<Prototype>>,
    /// Last closure materialized from this prototype, reused while the
    /// upvalues it resolved still match.
    pub(crate) closure_cache: RefCell<Option<ObjectRef>>,
}

/// A compiled chunk: the root prototype and its declared upvalue count.
#[derive(Debug, PartialEq)]
pub struct Chunk {
    pub num_up_values: u8,
    pub root: Rc<Prototype>,
}
