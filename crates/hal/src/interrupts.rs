// Generic interrupt-flag control.
// Delegates to the x86_64 implementation (real or mocked); other targets
// get inert stand-ins.

#[cfg(any(target_arch = "x86_64", test, feature = "std"))]
use crate::x86_64::interrupts as arch_interrupts;

/// Masks interrupts and returns the previous state for [`restore`].
#[inline(always)]
pub fn disable() -> u64 {
    #[cfg(any(target_arch = "x86_64", test, feature = "std"))]
    {
        arch_interrupts::disable()
    }
    #[cfg(not(any(target_arch = "x86_64", test, feature = "std")))]
    {
        0
    }
}

/// Unconditionally unmasks interrupts.
///
/// # Safety
/// Every gate the CPU can reach must be installed and the gate table sealed.
#[inline(always)]
pub unsafe fn enable() {
    #[cfg(any(target_arch = "x86_64", test, feature = "std"))]
    {
        unsafe { arch_interrupts::enable() }
    }
}

/// Restores a state returned by [`disable`].
#[inline(always)]
pub fn restore(state: u64) {
    #[cfg(any(target_arch = "x86_64", test, feature = "std"))]
    {
        arch_interrupts::restore(state)
    }
    #[cfg(not(any(target_arch = "x86_64", test, feature = "std")))]
    {
        let _ = state;
    }
}

#[inline(always)]
pub fn is_enabled() -> bool {
    #[cfg(any(target_arch = "x86_64", test, feature = "std"))]
    {
        arch_interrupts::is_enabled()
    }
    #[cfg(not(any(target_arch = "x86_64", test, feature = "std")))]
    {
        true
    }
}
