use crate::irq::{InterruptControl, IrqGuard};
use crate::spin_lock::{SpinLock, SpinLockGuard};
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// A value that is only touched with interrupts masked and a lock held.
///
/// Entering saves the interrupt state and masks interrupts, then takes the
/// spin lock. Leaving releases the lock first and restores the interrupt
/// state last, so an interrupt can never observe the lock held by the code it
/// interrupted.
pub struct CriticalSection<T, I: InterruptControl> {
    lock: SpinLock<T>,
    _control: PhantomData<fn() -> I>,
}

// Safety: the spin lock provides exclusion; the marker carries no data.
unsafe impl<T: Send, I: InterruptControl> Sync for CriticalSection<T, I> {}

impl<T, I: InterruptControl> CriticalSection<T, I> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: SpinLock::new(value),
            _control: PhantomData,
        }
    }

    /// Masks interrupts and locks; both are undone when the guard drops.
    #[inline]
    pub fn enter(&self) -> CriticalGuard<'_, T, I> {
        let irq = IrqGuard::new();
        let guard = self.lock.lock();
        CriticalGuard { guard, _irq: irq }
    }

    /// Runs `f` inside the critical section.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.enter();
        f(&mut g)
    }

    /// Direct access when no other reference can exist.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.lock.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.lock.into_inner()
    }
}

impl<T: fmt::Debug, I: InterruptControl> fmt::Debug for CriticalSection<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lock.try_lock() {
            Some(g) => f.debug_tuple("CriticalSection").field(&*g).finish(),
            None => f.write_str("CriticalSection(<held>)"),
        }
    }
}

/// Guard returned by [`CriticalSection::enter`].
///
/// Field order matters: the lock guard is dropped before the interrupt guard.
pub struct CriticalGuard<'a, T, I: InterruptControl> {
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard<I>,
}

impl<T, I: InterruptControl> Deref for CriticalGuard<'_, T, I> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, I: InterruptControl> DerefMut for CriticalGuard<'_, T, I> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
