use smallvec::SmallVec;
use std::rc::{Rc, Weak};

/// One arena slot.
///
/// `liveness` observes the keep-alive token shared by every handle to this
/// slot; once the last handle drops, the weak goes dead and the slot can be
/// reclaimed.
struct PoolSlot<T> {
    value: Option<T>,
    liveness: Weak<()>,
}

impl<T> PoolSlot<T> {
    fn handle_count(&self) -> usize {
        self.liveness.strong_count()
    }
}

/// Stable reference to a pool slot. Cloning and dropping adjust the slot's
/// refcount without touching the pool, and the index stays valid for the
/// handle's whole life because occupied slots never move.
#[derive(Clone)]
pub(crate) struct PoolRef {
    index: usize,
    #[allow(dead_code)]
    token: Rc<()>,
}

impl PoolRef {
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

impl PartialEq for PoolRef {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for PoolRef {}

impl std::fmt::Debug for PoolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index)
    }
}

/// Slot-reusing arena.
///
/// A slot's refcount is the strong count of the token its handles share.
/// Allocation walks the slots from the bottom: every slot whose count has
/// reached zero is cleared on the way past (releasing whatever its contents
/// referenced), and the lowest such slot is reused. Only when no slot is
/// free does the pool grow. Growth appends; existing indices never move.
pub(crate) struct Pool<T> {
    slots: SmallVec<[PoolSlot<T>; 8]>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            slots: SmallVec::new(),
        }
    }
}

impl<T> Pool<T> {
    /// Returns a handle to an unassigned slot whose refcount is 1; the caller
    /// installs the value with [`Pool::set`].
    pub(crate) fn alloc(&mut self) -> PoolRef {
        let mut free = None;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.handle_count() == 0 {
                if slot.value.take().is_some() {
                    log::trace!("pool: released slot {index}");
                }

                if free.is_none() {
                    free = Some(index);
                }
            }
        }

        match free {
            Some(index) => {
                log::trace!("pool: reusing slot {index}");
                self.attach(index)
            }
            None => {
                let index = self.slots.len();
                self.slots.push(PoolSlot {
                    value: None,
                    liveness: Weak::new(),
                });
                log::trace!("pool: grown to {} slots", self.slots.len());
                self.attach(index)
            }
        }
    }

    /// Additional handle to a live slot.
    pub(crate) fn create_ref(&mut self, index: usize) -> PoolRef {
        self.attach(index)
    }

    /// Joins the slot's keep-alive token, minting a fresh one when no handle
    /// is currently alive.
    fn attach(&mut self, index: usize) -> PoolRef {
        let slot = &mut self.slots[index];

        let token = match slot.liveness.upgrade() {
            Some(token) => token,
            None => {
                let token = Rc::new(());
                slot.liveness = Rc::downgrade(&token);
                token
            }
        };

        PoolRef { index, token }
    }

    pub(crate) fn set(&mut self, index: usize, value: T) {
        self.slots[index].value = Some(value);
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots
            .get_mut(index)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Live handle count for a slot.
    pub(crate) fn ref_count(&self, index: usize) -> usize {
        self.slots
            .get(index)
            .map(PoolSlot::handle_count)
            .unwrap_or_default()
    }

    /// Total slots, free ones included.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterates slots that are assigned and still referenced.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            if slot.handle_count() == 0 {
                return None;
            }

            slot.value.as_ref().map(|value| (index, value))
        })
    }
}
