#![cfg_attr(not(any(test, feature = "std")), no_std)]

// Exception and trap dispatch core.
// Root holds the arch-neutral pieces (console sink, logger, interrupt-safe
// locking). Everything that touches hardware layouts lives in x86_64/.
// Host builds (tests or the `std` feature) swap the privileged instructions
// for mocks, so the x86_64 module is compiled there on any architecture.

pub mod console;
pub mod interrupts;
pub mod logger;

#[cfg(any(target_arch = "x86_64", test, feature = "std"))]
pub mod x86_64;
#[cfg(any(target_arch = "x86_64", test, feature = "std"))]
pub use self::x86_64 as arch;

#[cfg(test)]
mod testing;

pub use console::{CONSOLE, Color, Console, ConsoleSink, Segment};

use core::mem::ManuallyDrop;
use ks_utils::{Mutex, MutexGuard};

/// Spin lock that masks interrupts while held.
///
/// Anything an exception handler can reach must be guarded by this (or by
/// its `try_lock`) so the handler never waits on a lock held by the code it
/// interrupted.
pub struct IrqSafeLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSafeLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> IrqSafeLockGuard<'_, T> {
        let state = interrupts::disable();
        let guard = self.inner.lock();
        IrqSafeLockGuard {
            guard: ManuallyDrop::new(guard),
            state,
        }
    }

    /// Acquire without spinning. Interrupt state is left untouched on failure.
    pub fn try_lock(&self) -> Option<IrqSafeLockGuard<'_, T>> {
        let state = interrupts::disable();
        if let Some(guard) = self.inner.try_lock() {
            Some(IrqSafeLockGuard {
                guard: ManuallyDrop::new(guard),
                state,
            })
        } else {
            interrupts::restore(state);
            None
        }
    }
}

pub struct IrqSafeLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    state: u64,
}

impl<T> core::ops::Deref for IrqSafeLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for IrqSafeLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSafeLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here, before interrupts come back.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        interrupts::restore(self.state);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
