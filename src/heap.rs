//! Binary min-heap of registration attempts, ordered by next-action time.
//!
//! The heap does not own its elements — [`crate::registration::RegBucket`]
//! does, via a slab keyed by [`AttemptKey`]. Attempts carry their own heap
//! slot (`heap_index`) as a back-pointer, so removal by key is `O(log n)`
//! instead of a linear scan. The [`HeapArena`] trait is the seam between this
//! module's pure heap mechanics and wherever the attempts actually live.

use crate::clock::Instant;

/// A stable index into whatever arena owns the heap's elements.
pub type AttemptKey = usize;

/// The owner of the elements an [`AttemptHeap`] orders.
///
/// Implemented by the registration bucket's attempt slab. All three methods
/// must agree: `heap_index_of(k)` reflects the position the heap most
/// recently wrote via `set_heap_index(k, _)`.
pub trait HeapArena {
    /// The ordering key: the element's next scheduled action time.
    fn time_of(&self, key: AttemptKey) -> Instant;
    /// The element's current heap slot, or a negative sentinel if it isn't
    /// queued (see `RegAttempt::heap_index` in [`crate::registration`]).
    fn heap_index_of(&self, key: AttemptKey) -> isize;
    /// Record the element's new heap slot.
    fn set_heap_index(&mut self, key: AttemptKey, index: isize);
}

/// A binary min-heap over [`AttemptKey`]s, ordered by `HeapArena::time_of`.
#[derive(Debug, Default, Clone)]
pub struct AttemptHeap {
    slots: Vec<AttemptKey>,
}

impl AttemptHeap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the heap has no queued elements.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The earliest-scheduled element, without removing it.
    pub fn peek(&self) -> Option<AttemptKey> {
        self.slots.first().copied()
    }

    /// Insert `key` into the heap.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if `key` is already queued — callers must
    /// check `heap_index_of(key) < 0` first, per the invariant in
    /// `SPEC_FULL.md` §4.2.
    pub fn push<A: HeapArena>(&mut self, key: AttemptKey, arena: &mut A) {
        debug_assert!(
            arena.heap_index_of(key) < 0,
            "push called on an attempt that is already queued"
        );
        let idx = self.slots.len();
        self.slots.push(key);
        arena.set_heap_index(key, idx as isize);
        self.sift_up(idx, arena);
    }

    /// Remove `key` from the heap in `O(log n)`, using its own back-pointer
    /// to find its slot rather than scanning.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not currently queued.
    pub fn remove<A: HeapArena>(&mut self, key: AttemptKey, arena: &mut A) {
        let idx = arena.heap_index_of(key);
        assert!(idx >= 0, "remove called on an attempt that isn't queued");
        let idx = idx as usize;
        debug_assert_eq!(self.slots[idx], key);

        let last = self.slots.len() - 1;
        if idx != last {
            self.slots.swap(idx, last);
        }
        self.slots.pop();
        arena.set_heap_index(key, -1);

        if idx < self.slots.len() {
            arena.set_heap_index(self.slots[idx], idx as isize);
            self.sift_down(idx, arena);
            self.sift_up(idx, arena);
        }
    }

    fn sift_up<A: HeapArena>(&mut self, mut idx: usize, arena: &mut A) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if arena.time_of(self.slots[idx]) < arena.time_of(self.slots[parent]) {
                self.swap_slots(idx, parent, arena);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down<A: HeapArena>(&mut self, mut idx: usize, arena: &mut A) {
        let len = self.slots.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < len && arena.time_of(self.slots[left]) < arena.time_of(self.slots[smallest]) {
                smallest = left;
            }
            if right < len && arena.time_of(self.slots[right]) < arena.time_of(self.slots[smallest]) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap_slots(idx, smallest, arena);
            idx = smallest;
        }
    }

    fn swap_slots<A: HeapArena>(&mut self, i: usize, j: usize, arena: &mut A) {
        self.slots.swap(i, j);
        arena.set_heap_index(self.slots[i], i as isize);
        arena.set_heap_index(self.slots[j], j as isize);
    }
}
