//! FIFO queue that can store a small number of elements inline.
//!
//! Backs the per-key queue of pending operations. Most keys hold zero or one queued operation at
//! any time, so the inline part avoids a heap allocation for the common case, while a burst of
//! submissions to a hot key grows the heap part geometrically.

use std::{
    mem::MaybeUninit,
    ptr::drop_in_place,
    fmt::{self, Formatter, Debug},
};


// heap allocation size to make in elements upon first heap allocating
const INITIAL_ALLOC_LEN: usize = 16;


/// FIFO queue that can store a small number of elements inline.
pub struct SmallQueue<T, const N: usize> {
    // memory layout:
    //
    // - parts 1 and 2 concatenated together form the space of "storage indices"
    // - a "logical index" exists if it's in [0, len)
    // - a logical index i maps to the storage index (start + i) % cap
    // - storage locations are assumed to be initialized iff a logical index maps to them
    // - invariant: start < cap, or start == 0 if cap == 0
    start: usize,
    len: usize,
    part_1: [MaybeUninit<T>; N],
    // we don't need to use Option because we rely on stdlib to fake the heap allocation of ZSTs
    part_2: Box<[MaybeUninit<T>]>,
}

impl<T, const N: usize> SmallQueue<T, N> {
    /// Construct empty.
    pub fn new() -> Self {
        Self::with_alloc_cap(0)
    }

    // construct empty with a given capacity of the heap allocated part.
    fn with_alloc_cap(alloc_cap: usize) -> Self {
        SmallQueue {
            start: 0,
            len: 0,
            part_1: [const { MaybeUninit::uninit() }; N],
            part_2: Box::new_uninit_slice(alloc_cap),
        }
    }

    /// Current length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity of the heap allocated part, in elements.
    #[cfg(test)]
    pub fn alloc_cap(&self) -> usize {
        self.part_2.len()
    }

    // currently allocated capacity, including both in-place and heap parts.
    fn cap(&self) -> usize {
        N + self.part_2.len()
    }

    // convert from logical index to storage index, or panic on out-of-bounds.
    fn storage_idx(&self, idx: usize) -> usize {
        debug_assert!(self.len() <= self.cap(), "SmallQueue len > cap (internal bug)");
        assert!(idx < self.len(), "SmallQueue index out of bounds");
        (self.start + idx) % self.cap()
    }

    // get raw pointer by logical index, or panic on out-of-bounds.
    fn pointer(&self, idx: usize) -> *const T {
        let storage_idx = self.storage_idx(idx);
        if storage_idx < N {
            self.part_1[storage_idx].as_ptr()
        } else {
            self.part_2[storage_idx - N].as_ptr()
        }
    }

    // get raw pointer by logical index (mutably), or panic on out-of-bounds.
    fn pointer_mut(&mut self, idx: usize) -> *mut T {
        let storage_idx = self.storage_idx(idx);
        if storage_idx < N {
            self.part_1[storage_idx].as_mut_ptr()
        } else {
            self.part_2[storage_idx - N].as_mut_ptr()
        }
    }

    /// Push to back of queue.
    pub fn push_back(&mut self, elem: T) {
        // maybe upsize
        if self.len() == self.cap() {
            // decide upsized size
            let new_alloc_cap = (self.part_2.len() * 2).max(INITIAL_ALLOC_LEN);
            // allocate
            let mut new_self = Self::with_alloc_cap(new_alloc_cap);
            new_self.len = self.len();
            // move elements over, front first
            for i in 0..self.len() {
                unsafe { new_self.pointer_mut(i).write(self.pointer(i).read()); }
            }
            // mark old elements as uninitialized to prevent their destructors running
            self.len = 0;
            // drop old self's allocations and replace with new self
            *self = new_self;
        }

        // add element
        let idx = self.len;
        self.len += 1;
        unsafe { self.pointer_mut(idx).write(elem); }
    }

    /// Pop from front of queue.
    pub fn pop_front(&mut self) -> Option<T> {
        // short-circuit if empty
        if self.len() == 0 { return None; }

        // take element, mark as no longer initialized / updated indexes
        let elem = unsafe { self.pointer(0).read() };
        self.len -= 1;
        self.start = if self.len == 0 { 0 } else { (self.start + 1) % self.cap() };

        // done
        Some(elem)
    }

    /// Give back the heap allocated part if the queue is empty and the allocation is larger than
    /// `keep` elements.
    ///
    /// Returns whether an allocation was released.
    pub fn shrink_if_empty(&mut self, keep: usize) -> bool {
        if self.is_empty() && self.part_2.len() > keep {
            *self = Self::new();
            true
        } else {
            false
        }
    }

    /// Create iterator from front to back by reference.
    pub fn iter(&self) -> impl Iterator<Item=&T> {
        // safety: `pointer` does bounds checking
        (0..self.len()).map(move |i| unsafe { &*self.pointer(i) })
    }
}

impl<T, const N: usize> Drop for SmallQueue<T, N> {
    fn drop(&mut self) {
        // drop initialized elements
        for i in 0..self.len() {
            unsafe { drop_in_place(self.pointer_mut(i)); }
        }
    }
}

impl<T, const N: usize> Default for SmallQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug, const N: usize> Debug for SmallQueue<T, N> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
