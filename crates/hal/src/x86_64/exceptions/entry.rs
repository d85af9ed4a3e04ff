//! Entry stubs: the addresses the gate table points at.
//!
//! Each stub makes the stack uniform (a zero stands in for the error code
//! on vectors where the CPU pushes none), pushes its vector number and
//! jumps to the common entry. That saves every general register, hands a
//! [`RegisterSnapshot`](super::RegisterSnapshot) to the dispatcher and
//! unwinds it again if the handler returns.

use super::vectors::EXCEPTION_VECTORS;

/// Raw entry point of one vector.
pub type EntryStub = unsafe extern "C" fn();

#[cfg(not(any(test, feature = "std")))]
macro_rules! exception_entry {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym common_entry,
            );
        }
    };
    ($name:ident, $vector:literal, error_code) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            core::arch::naked_asm!(
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym common_entry,
            );
        }
    };
}

// Host builds: distinct, callable addresses with no privileged code.
#[cfg(any(test, feature = "std"))]
macro_rules! exception_entry {
    ($name:ident, $vector:literal $(, error_code)?) => {
        unsafe extern "C" fn $name() {
            let _ = core::hint::black_box($vector as u8);
        }
    };
}

/// Pushes r15..rax below vector and error code, so `rsp` then points at a
/// complete snapshot. 176 bytes on top of the 16-byte aligned hardware
/// frame keeps the call aligned.
#[cfg(not(any(test, feature = "std")))]
#[unsafe(naked)]
unsafe extern "C" fn common_entry() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "cld",
        "call {dispatch}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "add rsp, 16", // vector + error code
        "iretq",
        dispatch = sym super::handlers::dispatch,
    );
}

exception_entry!(divide_error_entry, 0);
exception_entry!(debug_entry, 1);
exception_entry!(nmi_entry, 2);
exception_entry!(int3_entry, 3);
exception_entry!(overflow_entry, 4);
exception_entry!(bounds_entry, 5);
exception_entry!(undefined_opcode_entry, 6);
exception_entry!(device_not_available_entry, 7);
exception_entry!(double_fault_entry, 8, error_code);
exception_entry!(coprocessor_segment_overrun_entry, 9);
exception_entry!(invalid_tss_entry, 10, error_code);
exception_entry!(segment_not_present_entry, 11, error_code);
exception_entry!(stack_segment_fault_entry, 12, error_code);
exception_entry!(general_protection_entry, 13, error_code);
exception_entry!(page_fault_entry, 14, error_code);
exception_entry!(x87_fpu_error_entry, 16);
exception_entry!(alignment_check_entry, 17, error_code);
exception_entry!(machine_check_entry, 18);
exception_entry!(simd_exception_entry, 19);
exception_entry!(virtualization_exception_entry, 20);

static ENTRY_POINTS: [Option<EntryStub>; EXCEPTION_VECTORS] = {
    let mut stubs: [Option<EntryStub>; EXCEPTION_VECTORS] = [None; EXCEPTION_VECTORS];
    stubs[0] = Some(divide_error_entry);
    stubs[1] = Some(debug_entry);
    stubs[2] = Some(nmi_entry);
    stubs[3] = Some(int3_entry);
    stubs[4] = Some(overflow_entry);
    stubs[5] = Some(bounds_entry);
    stubs[6] = Some(undefined_opcode_entry);
    stubs[7] = Some(device_not_available_entry);
    stubs[8] = Some(double_fault_entry);
    stubs[9] = Some(coprocessor_segment_overrun_entry);
    stubs[10] = Some(invalid_tss_entry);
    stubs[11] = Some(segment_not_present_entry);
    stubs[12] = Some(stack_segment_fault_entry);
    stubs[13] = Some(general_protection_entry);
    stubs[14] = Some(page_fault_entry);
    stubs[16] = Some(x87_fpu_error_entry);
    stubs[17] = Some(alignment_check_entry);
    stubs[18] = Some(machine_check_entry);
    stubs[19] = Some(simd_exception_entry);
    stubs[20] = Some(virtualization_exception_entry);
    stubs
};

/// Address of the stub for `vector`, if it has one.
pub fn entry_point(vector: u8) -> Option<u64> {
    ENTRY_POINTS
        .get(usize::from(vector))
        .copied()
        .flatten()
        .map(|stub| stub as usize as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_vectors_have_no_stub() {
        assert_eq!(entry_point(15), None);
        assert!((21..=255).all(|vector| entry_point(vector).is_none()));
    }

    #[test]
    fn test_stub_addresses_are_distinct() {
        let mut addresses: Vec<u64> = (0..=20).filter_map(entry_point).collect();
        assert_eq!(addresses.len(), 20);
        addresses.sort_unstable();
        addresses.dedup();
        assert_eq!(addresses.len(), 20);
        assert!(addresses.iter().all(|&address| address != 0));
    }
}
