// x86_64 interrupt-flag (RFLAGS.IF) control.

const INTERRUPT_FLAG: u64 = 1 << 9;

#[cfg(not(any(test, feature = "std")))]
mod real_impl {
    use super::INTERRUPT_FLAG;
    use ::x86_64::instructions::interrupts;
    use ::x86_64::registers::rflags;

    pub fn disable() -> u64 {
        let flags = rflags::read_raw();
        interrupts::disable();
        flags & INTERRUPT_FLAG
    }

    pub unsafe fn enable() {
        interrupts::enable();
    }

    pub fn is_enabled() -> bool {
        interrupts::are_enabled()
    }
}

// Per-thread flag so parallel host tests never observe each other's masking.
#[cfg(any(test, feature = "std"))]
mod mock_impl {
    use super::INTERRUPT_FLAG;
    use std::cell::Cell;

    std::thread_local! {
        static ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    pub fn disable() -> u64 {
        let was_enabled = ENABLED.with(|flag| flag.replace(false));
        if was_enabled { INTERRUPT_FLAG } else { 0 }
    }

    pub unsafe fn enable() {
        ENABLED.with(|flag| flag.set(true));
    }

    pub fn is_enabled() -> bool {
        ENABLED.with(Cell::get)
    }
}

#[cfg(not(any(test, feature = "std")))]
pub use real_impl::*;

#[cfg(any(test, feature = "std"))]
pub use mock_impl::*;

/// Re-enables interrupts only if `state` says they were on.
#[inline(always)]
pub fn restore(state: u64) {
    if (state & INTERRUPT_FLAG) != 0 {
        unsafe { enable() };
    }
}
