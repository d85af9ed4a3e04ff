// x86_64 trap dispatch.
//
// Boot order on the bootstrap core: `init()` fills and loads the shared
// gate table, then `enable_interrupts()` seals it and unmasks. Secondary
// cores only call `GATES.load()` before unmasking.

pub mod cpu;
pub mod exceptions;
pub mod interrupts;

use cpu::{GateError, GateTable};

/// The kernel's gate table, shared by every core.
pub static GATES: GateTable = GateTable::new();

/// Installs the exception vectors into [`GATES`] and loads it on this core.
pub fn init() -> Result<(), GateError> {
    let mut gates = GATES.writer()?;
    exceptions::init_exception_vectors(&mut gates)?;
    drop(gates);
    GATES.load();
    Ok(())
}

/// Seals [`GATES`] and unmasks interrupts on this core.
///
/// # Safety
/// [`init`] must have completed. If [`exceptions::assign_fault_stacks`]
/// ran on the table, this core's TSS must provide that stack.
pub unsafe fn enable_interrupts() -> Result<(), GateError> {
    GATES.seal()?;
    // SAFETY: the table is complete and can no longer change.
    unsafe { interrupts::enable() };
    Ok(())
}
