//! x86_64 privileged control instructions with mock support.
//!
//! The exception core needs three things from the CPU: loading the IDT
//! register, reading the fault-address register (CR2) and parking the core.
//! Host builds route all three through thread-local mocks so the tables and
//! handlers can be exercised by unit tests.

pub use ::x86_64::structures::DescriptorTablePointer;

/// Panic message of the mocked [`halt`]; tests match on it.
pub const HALT_MESSAGE: &str = "cpu halted";

// =============================================================================
// Real implementation for bare metal (no_std)
// =============================================================================

#[cfg(not(any(test, feature = "std")))]
mod real_impl {
    use super::DescriptorTablePointer;
    use ::x86_64::instructions::{hlt, interrupts, tables};
    use ::x86_64::registers::control::Cr2;

    pub unsafe fn lidt(ptr: &DescriptorTablePointer) {
        unsafe { tables::lidt(ptr) };
    }

    /// Linear address of the last page fault.
    #[inline(always)]
    pub fn read_cr2() -> u64 {
        Cr2::read_raw()
    }

    /// Parks this core for good. NMIs still wake `hlt`, hence the loop.
    pub fn halt() -> ! {
        loop {
            interrupts::disable();
            hlt();
        }
    }
}

// =============================================================================
// Mock implementation for std feature (user-space tests)
// =============================================================================

#[cfg(any(test, feature = "std"))]
mod mock_impl {
    use super::{DescriptorTablePointer, HALT_MESSAGE};
    use std::cell::Cell;

    std::thread_local! {
        static IDT_BASE: Cell<u64> = const { Cell::new(0) };
        static IDT_LIMIT: Cell<u16> = const { Cell::new(0) };
        static CR2: Cell<u64> = const { Cell::new(0) };
    }

    pub unsafe fn lidt(ptr: &DescriptorTablePointer) {
        IDT_BASE.with(|base| base.set(ptr.base.as_u64()));
        IDT_LIMIT.with(|limit| limit.set(ptr.limit));
    }

    pub fn read_cr2() -> u64 {
        CR2.with(Cell::get)
    }

    #[allow(clippy::panic)]
    pub fn halt() -> ! {
        panic!("{HALT_MESSAGE}");
    }

    // --- Verification Helpers ---

    /// Simulates the CPU latching a faulting address.
    pub fn set_cr2(address: u64) {
        CR2.with(|cr2| cr2.set(address));
    }

    pub fn get_idt() -> (u64, u16) {
        (IDT_BASE.with(Cell::get), IDT_LIMIT.with(Cell::get))
    }
}

// =============================================================================
// Public API
// =============================================================================

#[cfg(not(any(test, feature = "std")))]
pub use real_impl::*;

#[cfg(any(test, feature = "std"))]
pub use mock_impl::*;
