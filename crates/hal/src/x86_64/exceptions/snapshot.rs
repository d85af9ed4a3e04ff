//! Register state captured by the entry stubs.

use core::mem::{offset_of, size_of};

use crate::x86_64::cpu::idt::KERNEL_CODE_SELECTOR;

/// CPU state at exception entry, laid out exactly as the entry stub leaves
/// it on the stack: general registers (last pushed first), the vector and
/// error code pushed by the stub, then the frame pushed by the CPU.
///
/// Handlers only ever see `&RegisterSnapshot`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    /// Hardware error code, or 0 for vectors that do not push one.
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

// The entry stub and this layout must agree; 176 also keeps the call 16-byte aligned.
const _: () = assert!(size_of::<RegisterSnapshot>() == 176);
const _: () = assert!(offset_of!(RegisterSnapshot, vector) == 15 * 8);
const _: () = assert!(offset_of!(RegisterSnapshot, rip) == 17 * 8);

impl RegisterSnapshot {
    /// A kernel-mode snapshot with only the fields diagnostics read filled in.
    pub const fn new(vector: u8, error_code: u64, rip: u64, rsp: u64) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            vector: vector as u64,
            error_code,
            rip,
            cs: KERNEL_CODE_SELECTOR as u64,
            rflags: 0x2,
            rsp,
            ss: 0,
        }
    }

    pub const fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    pub const fn stack_pointer(&self) -> u64 {
        self.rsp
    }
}
