//! x86_64 CPU Compartment
//!
//! - **Control** - privileged instructions (`lidt`, CR2, `hlt`), mocked on the host
//! - **IDT** - the gate table and its single-writer installer

pub mod control;
pub mod idt;

pub use control::{DescriptorTablePointer, halt, lidt, read_cr2};
pub use idt::{GateError, GateKind, GateTable, GateWriter, Idt, IdtEntry};
