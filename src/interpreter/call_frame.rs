use bitflags::bitflags;

/// Result count meaning "keep every result the call produces".
pub(crate) const MULTIRET: i32 = -1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CallStatus: u8 {
        /// Frame runs interpreted code (has a base and a program counter).
        const LUA = 1 << 1;
        /// Frame that entered the dispatch loop; its return exits to the host.
        const FRESH = 1 << 3;
        /// Frame has absorbed at least one tail call.
        const TAIL = 1 << 5;
    }
}

/// One entry on the call stack.
pub(crate) struct CallFrame {
    /// Stack index of the function being called.
    pub(crate) func_idx: usize,
    /// Results the caller asked for; [`MULTIRET`] keeps them all.
    pub(crate) num_results: i32,
    pub(crate) status: CallStatus,
    /// First register index. Meaningful only for Lua frames.
    pub(crate) base: usize,
    /// Next instruction index. Meaningful only for Lua frames.
    pub(crate) pc: usize,
}

impl CallFrame {
    pub(crate) fn new_native(func_idx: usize, num_results: i32) -> Self {
        Self {
            func_idx,
            num_results,
            status: CallStatus::empty(),
            base: 0,
            pc: 0,
        }
    }

    pub(crate) fn new_lua(func_idx: usize, num_results: i32, base: usize) -> Self {
        Self {
            func_idx,
            num_results,
            status: CallStatus::LUA,
            base,
            pc: 0,
        }
    }

    #[inline]
    pub(crate) fn is_fresh(&self) -> bool {
        self.status.contains(CallStatus::FRESH)
    }
}
