use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const SET: u8 = 2;

/// A slot that is written exactly once and read-only afterwards.
///
/// Holds the single kernel context object so the trap entry points can reach
/// it. Unlike a lazily initialized cell, the value is produced by the boot
/// path and stored explicitly with [`OnceSlot::set`].
pub struct OnceSlot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for OnceSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceSlot<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns the stored value, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == SET {
            // SAFETY: SET is only published after the write completed.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Stores `value` and returns a reference to it.
    ///
    /// # Errors
    /// Hands `value` back if the slot was already written (or is being
    /// written).
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        // SAFETY: WRITING makes us the only writer.
        let stored = unsafe { (*self.value.get()).write(value) };
        self.state.store(SET, Ordering::Release);
        Ok(&*stored)
    }

    /// Waits for a concurrent [`set`](Self::set) to finish.
    pub fn wait(&self) -> &T {
        loop {
            if let Some(v) = self.get() {
                return v;
            }
            spin_loop();
        }
    }
}

impl<T> Drop for OnceSlot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == SET {
            // SAFETY: SET means the value was fully written.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

// Safety: shared after SET; writing is single-writer.
unsafe impl<T: Sync + Send> Sync for OnceSlot<T> {}
unsafe impl<T: Send> Send for OnceSlot<T> {}
