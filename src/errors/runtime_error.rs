use thiserror::Error;

/// Failure surfaced while executing a call.
///
/// Only failures that make continuing meaningless abort a call; coercion
/// misses inside arithmetic, comparison, and indexing leave their destination
/// untouched instead (the pools and stacks stay consistent either way).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("attempt to call a {0} value")]
    NotAFunction(&'static str),
    #[error("register or call stack limit exceeded")]
    StackOverflow,
    #[error("load requires no active call frame")]
    LoadDuringCall,
    #[error("jump target {0} is outside the function")]
    BadJump(usize),
    #[error("illegal instruction {0:#010x}")]
    IllegalInstruction(u32),
    /// Failure raised by or about a host function: a callback returns it to
    /// abort the call, and the engine raises it when a callback reports more
    /// results than it pushed.
    #[error("native function error: {0}")]
    Native(&'static str),
}
