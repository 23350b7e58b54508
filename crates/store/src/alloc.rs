use std::cell::Cell;
use std::rc::Rc;

use crate::Id;

/// Monotonic id allocator shared by all tables of one game state.
///
/// The allocator itself is part of the persisted state: the engine advances
/// it and the chain driver must snapshot it together with the tables so that
/// a rolled-back block does not reuse ids differently on replay.
#[derive(Clone, Debug)]
pub struct IdAllocator {
    next: Rc<Cell<Id>>,
}

impl IdAllocator {
    /// Creates an allocator whose first handed-out id is `first`.
    pub fn new(first: Id) -> Self {
        assert!(first > 0, "id 0 is reserved");
        Self {
            next: Rc::new(Cell::new(first)),
        }
    }

    /// Hands out the next id and advances the counter.
    pub fn next_id(&self) -> Id {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }

    /// Returns the id that the next call to [`IdAllocator::next_id`] will
    /// hand out, without advancing.
    pub fn peek(&self) -> Id {
        self.next.get()
    }

    /// Resets the counter.  Meant for tests and for restoring a snapshot.
    pub fn set_next_id(&self, next: Id) {
        assert!(next > 0, "id 0 is reserved");
        self.next.set(next);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}
