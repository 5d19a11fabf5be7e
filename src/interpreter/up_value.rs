use super::pool::PoolRef;
use super::value::Value;

/// A captured variable.
///
/// Open while the register it was captured from is still live on the stack,
/// closed (owning its value) once that scope exits. The transition happens
/// exactly once, in `close_up_values`; a closed upvalue never reopens.
pub(crate) enum UpValue {
    /// Stack index of the captured register.
    Open(usize),
    /// The value, owned after close.
    Closed(Value),
}

/// Handle to a slot in the VM's upvalue pool.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct UpValueRef(pub(crate) PoolRef);

impl UpValueRef {
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.0.index()
    }
}

impl std::fmt::Debug for UpValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UpValueRef({:?})", self.0)
    }
}
