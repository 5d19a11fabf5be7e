mod byte_string;
mod call_frame;
mod execution;
mod instruction;
mod native_function;
mod object;
mod pool;
mod table;
mod up_value;
mod value;
mod value_stack;
mod vm;

pub use byte_string::ByteString;
pub use instruction::{Instruction, OpCode, FIELDS_PER_FLUSH};
pub use object::ObjectRef;
pub use table::Table;
pub use value::Value;
pub use vm::{Vm, VmLimits};
