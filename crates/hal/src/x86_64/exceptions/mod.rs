//! CPU exceptions (vectors 0..=31).
//! Reference: Intel SDM Vol. 3A, 6.15 "Exception and Interrupt Reference".

pub mod decode;
pub mod entry;
pub mod handlers;
pub mod snapshot;
pub mod vectors;

pub use decode::{AccessKind, AccessOrigin, DescriptorTable, PageFaultErrorCode, SelectorErrorCode};
pub use entry::entry_point;
pub use handlers::{
    Disposition, ExceptionHandler, dispatch, dispatch_snapshot, fatal, general_protection,
    invalid_tss, page_fault, unexpected,
};
pub use snapshot::RegisterSnapshot;
pub use vectors::{
    ExceptionVector, FAULT_STACK_INDEX, FaultClass, Severity, VectorSlot, defined, slot,
};

use crate::x86_64::cpu::{GateError, GateWriter};

/// Installs a gate for every defined exception and leaves reserved
/// vectors untouched. Re-running it rewrites identical gates.
///
/// Every gate runs on the interrupted stack (IST 0), including gates a
/// previous [`assign_fault_stacks`] moved.
///
/// Must run before interrupts are unmasked on any core using the table;
/// holding a [`GateWriter`] already guarantees the table is not live.
pub fn init_exception_vectors(gates: &mut GateWriter<'_>) -> Result<(), GateError> {
    let mut installed = 0;
    for vector in defined() {
        // Every defined vector has a stub; a missing one stays absent.
        let Some(handler) = entry_point(vector.number) else {
            continue;
        };
        let number = usize::from(vector.number);
        gates.install(number, vector.gate, handler, vector.privilege())?;
        installed += 1;
    }
    log::debug!("exceptions: {installed} vectors installed");
    Ok(())
}

/// Moves NMI, #DF and #MC onto interrupt stack [`FAULT_STACK_INDEX`].
///
/// # Safety
/// Every core that loads this table must have IST slot
/// [`FAULT_STACK_INDEX`] of its TSS pointing at a valid stack, or the
/// CPU escalates the next NMI, #DF or #MC to a triple fault.
pub unsafe fn assign_fault_stacks(gates: &mut GateWriter<'_>) -> Result<(), GateError> {
    for vector in defined().filter(|vector| vector.stack != 0) {
        if entry_point(vector.number).is_some() {
            gates.set_stack_index(usize::from(vector.number), vector.stack)?;
        }
    }
    Ok(())
}
