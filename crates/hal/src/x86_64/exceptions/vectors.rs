//! Catalogue of the architecture-defined exception vectors.
//!
//! Every vector below [`EXCEPTION_VECTORS`] resolves to a [`VectorSlot`]:
//! either a defined exception with everything the initializer and the
//! dispatcher need, or a reserved hole. Vectors from 32 up belong to
//! external interrupts and are [`VectorSlot::Absent`] here.

use ::x86_64::PrivilegeLevel;

use super::handlers::{self, ExceptionHandler};
use crate::console::Color;
use crate::x86_64::cpu::GateKind;

/// Vectors 0..=31 are reserved for exceptions by the architecture.
pub const EXCEPTION_VECTORS: usize = 32;
/// Highest vector the initializer installs (#VE).
pub const LAST_INSTALLED_VECTOR: u8 = 20;
/// IST slot for vectors that must not trust the interrupted stack.
pub const FAULT_STACK_INDEX: u8 = 1;

/// Severity tag printed in front of every diagnostic line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Interrupt,
    Trap,
    ErrorTrap,
    Error,
    Terminate,
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Interrupt => "INT",
            Self::Trap => "TRAP",
            Self::ErrorTrap => "ERROR / TRAP",
            Self::Error => "ERROR",
            Self::Terminate => "Terminate",
        }
    }

    pub const fn color(self) -> Color {
        match self {
            Self::Interrupt => Color::Blue,
            Self::Trap => Color::Yellow,
            Self::ErrorTrap | Self::Error | Self::Terminate => Color::Red,
        }
    }
}

/// Whether a vector could in principle be survived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultClass {
    /// The fault is confined to the interrupted context.
    Contained,
    /// Machine state is no longer trustworthy; the core must stop.
    Fatal,
}

#[derive(Clone, Copy, Debug)]
pub struct ExceptionVector {
    pub number: u8,
    pub mnemonic: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub class: FaultClass,
    pub gate: GateKind,
    /// The CPU pushes an error code for this vector.
    pub error_code: bool,
    /// IST slot, 0 for the interrupted stack.
    pub stack: u8,
    pub handler: ExceptionHandler,
}

const fn exception(
    number: u8,
    mnemonic: &'static str,
    name: &'static str,
    severity: Severity,
    gate: GateKind,
) -> ExceptionVector {
    ExceptionVector {
        number,
        mnemonic,
        name,
        severity,
        class: FaultClass::Contained,
        gate,
        error_code: false,
        stack: 0,
        handler: ExceptionHandler::Diverging(handlers::fatal),
    }
}

impl ExceptionVector {
    const fn with_error_code(mut self) -> Self {
        self.error_code = true;
        self
    }

    const fn fatal(mut self) -> Self {
        self.class = FaultClass::Fatal;
        self
    }

    const fn on_fault_stack(mut self) -> Self {
        self.stack = FAULT_STACK_INDEX;
        self
    }

    const fn handled_by(mut self, handler: ExceptionHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Privilege a software `int` needs to raise this vector.
    pub const fn privilege(&self) -> PrivilegeLevel {
        self.gate.privilege()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum VectorSlot {
    Defined(ExceptionVector),
    /// Held back by Intel; never installed.
    Reserved(u8),
    /// Outside the exception range.
    Absent(u8),
}

impl VectorSlot {
    pub const fn number(&self) -> u8 {
        match self {
            Self::Defined(vector) => vector.number,
            Self::Reserved(number) | Self::Absent(number) => *number,
        }
    }

    pub const fn defined(&self) -> Option<&ExceptionVector> {
        match self {
            Self::Defined(vector) => Some(vector),
            Self::Reserved(_) | Self::Absent(_) => None,
        }
    }
}

static CATALOGUE: [VectorSlot; EXCEPTION_VECTORS] = build_catalogue();

const fn build_catalogue() -> [VectorSlot; EXCEPTION_VECTORS] {
    use ExceptionHandler::{Diverging, Returning};
    use GateKind::{Interrupt, SystemTrap, Trap};
    use Severity::{Error, ErrorTrap, Terminate};

    let mut table = [VectorSlot::Reserved(0); EXCEPTION_VECTORS];
    let mut number = 0;
    while number < EXCEPTION_VECTORS {
        table[number] = VectorSlot::Reserved(number as u8);
        number += 1;
    }

    let defined = [
        exception(0, "#DE", "divide_error", Error, Trap),
        exception(1, "#DB", "debug", ErrorTrap, Trap),
        exception(2, "NMI", "nmi", Severity::Interrupt, Interrupt).on_fault_stack(),
        exception(3, "#BP", "int3", Severity::Trap, SystemTrap),
        exception(4, "#OF", "overflow", Severity::Trap, SystemTrap),
        exception(5, "#BR", "bounds", Error, SystemTrap),
        exception(6, "#UD", "undefined_opcode", Error, Trap),
        exception(7, "#NM", "device_not_available", Error, Trap),
        exception(8, "#DF", "double_fault", Terminate, Trap)
            .with_error_code()
            .fatal()
            .on_fault_stack(),
        exception(9, "CSO", "coprocessor_segment_overrun", Error, Trap),
        exception(10, "#TS", "invalid_tss", Error, Trap)
            .with_error_code()
            .handled_by(Diverging(handlers::invalid_tss)),
        exception(11, "#NP", "segment_not_present", Error, Trap).with_error_code(),
        exception(12, "#SS", "stack_segment_fault", Error, Trap).with_error_code(),
        exception(13, "#GP", "general_protection", Error, Trap)
            .with_error_code()
            .handled_by(Returning(handlers::general_protection)),
        exception(14, "#PF", "page_fault", Error, Trap)
            .with_error_code()
            .handled_by(Diverging(handlers::page_fault)),
        exception(16, "#MF", "x87_fpu_error", Error, Trap),
        exception(17, "#AC", "alignment_check", Error, Trap).with_error_code(),
        exception(18, "#MC", "machine_check", Error, Trap).fatal().on_fault_stack(),
        exception(19, "#XM", "simd_exception", Error, Trap),
        exception(20, "#VE", "virtualization_exception", Error, Trap),
    ];

    let mut i = 0;
    while i < defined.len() {
        table[defined[i].number as usize] = VectorSlot::Defined(defined[i]);
        i += 1;
    }
    table
}

/// Resolves `vector` to its catalogue slot.
pub fn slot(vector: u8) -> VectorSlot {
    CATALOGUE
        .get(usize::from(vector))
        .copied()
        .unwrap_or(VectorSlot::Absent(vector))
}

/// Defined exceptions in vector order.
pub fn defined() -> impl Iterator<Item = &'static ExceptionVector> {
    CATALOGUE.iter().filter_map(VectorSlot::defined)
}
