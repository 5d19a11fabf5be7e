use super::native_function::NativeFunction;
use super::pool::PoolRef;
use super::table::Table;
use super::up_value::UpValueRef;
use crate::bytecode::Prototype;
use smallvec::SmallVec;
use std::rc::Rc;

/// Pool-allocated data that a [`Value`](super::Value) can only carry by
/// reference: tables and both function flavors.
pub(crate) enum Object {
    Table(Table),
    Closure(Closure),
    NativeClosure(NativeFunction),
}

impl Object {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Object::Table(_) => "table",
            Object::Closure(_) | Object::NativeClosure(_) => "function",
        }
    }
}

/// A Lua closure: a prototype plus one resolved upvalue handle per
/// descriptor, in prototype order.
pub(crate) struct Closure {
    pub(crate) proto: Rc<Prototype>,
    pub(crate) up_values: SmallVec<[UpValueRef; 4]>,
}

/// Handle to a slot in the VM's object pool.
///
/// Copies share the slot and keep it alive; equality is slot identity, which
/// is exactly Lua's object identity.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectRef(pub(crate) PoolRef);

impl ObjectRef {
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.0.index()
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectRef({:?})", self.0)
    }
}
