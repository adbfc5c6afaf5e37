//! Low-level concurrency utility.

use std::{
    mem::MaybeUninit,
    cell::UnsafeCell,
    sync::atomic::{
        Ordering::AcqRel,
        AtomicBool,
    },
};

/// Like an atomic `Option<T>` that can be `take`n once.
///
/// This is what makes a busy slot impossible to release twice: whichever party wins the `take`
/// owns the release, and every other party observes `None`.
pub(crate) struct AtomicTake<T> {
    // val is initialized if is_some is true. the thread that transitions it from true to false
    // claims the right to read it and take ownership of it.
    is_some: AtomicBool,
    val: UnsafeCell<MaybeUninit<T>>,
}

// safety: the value is only ever moved out by the single thread that wins the swap, so sharing
// the cell across threads only requires that the value itself may be sent.
unsafe impl<T: Send> Send for AtomicTake<T> {}
unsafe impl<T: Send> Sync for AtomicTake<T> {}

impl<T> AtomicTake<T> {
    /// Construct with a value.
    pub(crate) const fn some(val: T) -> Self {
        AtomicTake {
            is_some: AtomicBool::new(true),
            val: UnsafeCell::new(MaybeUninit::new(val)),
        }
    }

    /// Try to atomically take the value.
    pub(crate) fn take(&self) -> Option<T> {
        if self.is_some.swap(false, AcqRel) {
            Some(unsafe { (*self.val.get()).as_ptr().read() })
        } else {
            None
        }
    }

    /// Whether the value has already been taken.
    pub(crate) fn is_taken(&self) -> bool {
        !self.is_some.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl<T> Drop for AtomicTake<T> {
    fn drop(&mut self) {
        // make sure the value gets dropped if not yet taken
        drop(self.take());
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{Arc, atomic::{AtomicUsize, Ordering::Relaxed}},
        thread,
    };

    #[test]
    fn only_one_thread_wins() {
        for _ in 0..100 {
            let cell = Arc::new(AtomicTake::some(String::from("slot")));
            let wins = Arc::new(AtomicUsize::new(0));
            let joins = (0..4)
                .map(|_| {
                    let cell = Arc::clone(&cell);
                    let wins = Arc::clone(&wins);
                    thread::spawn(move || {
                        if cell.take().is_some() {
                            wins.fetch_add(1, Relaxed);
                        }
                    })
                })
                .collect::<Vec<_>>();
            for join in joins {
                join.join().unwrap();
            }
            assert_eq!(wins.load(Relaxed), 1);
            assert!(cell.is_taken());
        }
    }

    #[test]
    fn drops_untaken_value() {
        let marker = Arc::new(());
        let cell = AtomicTake::some(Arc::clone(&marker));
        assert_eq!(Arc::strong_count(&marker), 2);
        drop(cell);
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
