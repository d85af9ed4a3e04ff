//! Typed views over the error codes the CPU pushes.
//! Reference: Intel SDM Vol. 3A, 6.13 "Error Code" and 4.7 "Page-Fault Exceptions".

use bitflags::bitflags;

bitflags! {
    /// Selector error code pushed by #TS, #NP, #SS and #GP.
    ///
    /// Bits 3..=15 hold the selector index; they are kept as unnamed bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SelectorErrorCode: u64 {
        /// Raised while delivering an event external to the program.
        const EXTERNAL = 1 << 0;
        /// Selector indexes the IDT. Overrides `TABLE_INDICATOR`.
        const IDT = 1 << 1;
        /// Selector indexes the current LDT rather than the GDT.
        const TABLE_INDICATOR = 1 << 2;
    }
}

/// Mask that strips the external/IDT/TI bits, leaving the selector index.
pub const SELECTOR_INDEX_MASK: u64 = 0xFFF8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorTable {
    Idt,
    Ldt,
    Gdt,
}

impl DescriptorTable {
    pub const fn description(self) -> &'static str {
        match self {
            Self::Idt => "Refers to a descriptor in the IDT.",
            Self::Ldt => "Refers to a descriptor in the current LDT.",
            Self::Gdt => "Refers to a descriptor in the GDT.",
        }
    }
}

impl SelectorErrorCode {
    pub const fn new(raw: u64) -> Self {
        Self::from_bits_retain(raw)
    }

    pub const fn is_external(self) -> bool {
        self.contains(Self::EXTERNAL)
    }

    pub const fn table(self) -> DescriptorTable {
        if self.contains(Self::IDT) {
            DescriptorTable::Idt
        } else if self.contains(Self::TABLE_INDICATOR) {
            DescriptorTable::Ldt
        } else {
            DescriptorTable::Gdt
        }
    }

    /// The error code with its low three flag bits masked off.
    pub const fn selector_index(self) -> u64 {
        self.bits() & SELECTOR_INDEX_MASK
    }

    /// Every applicable cause, in bit order. The index is reported separately.
    pub fn causes(self) -> impl Iterator<Item = &'static str> {
        let external = self.is_external().then_some(
            "The exception occurred during delivery of an event external to the program.",
        );
        [external, Some(self.table().description())].into_iter().flatten()
    }
}

bitflags! {
    /// Page-fault error code (#PF, vector 14).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFaultErrorCode: u64 {
        /// Clear: page not present. Set: protection violation.
        const PROTECTION_VIOLATION = 1 << 0;
        const CAUSED_BY_WRITE = 1 << 1;
        const USER_MODE = 1 << 2;
        const MALFORMED_TABLE = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
        const PROTECTION_KEY = 1 << 5;
        const SHADOW_STACK = 1 << 6;
        const SGX = 1 << 15;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessOrigin {
    Supervisor,
    User,
}

impl PageFaultErrorCode {
    pub const fn new(raw: u64) -> Self {
        Self::from_bits_retain(raw)
    }

    pub const fn is_not_present(self) -> bool {
        !self.contains(Self::PROTECTION_VIOLATION)
    }

    pub const fn is_protection_violation(self) -> bool {
        self.contains(Self::PROTECTION_VIOLATION)
    }

    pub const fn access(self) -> AccessKind {
        if self.contains(Self::CAUSED_BY_WRITE) {
            AccessKind::Write
        } else {
            AccessKind::Read
        }
    }

    pub const fn origin(self) -> AccessOrigin {
        if self.contains(Self::USER_MODE) {
            AccessOrigin::User
        } else {
            AccessOrigin::Supervisor
        }
    }

    /// A reserved bit was set in some paging-structure entry.
    pub const fn is_reserved_bit_violation(self) -> bool {
        self.contains(Self::MALFORMED_TABLE)
    }

    pub const fn is_instruction_fetch(self) -> bool {
        self.contains(Self::INSTRUCTION_FETCH)
    }

    /// Every applicable cause, one line each. Presence, access and origin
    /// always yield exactly one line; the remaining bits only when set.
    pub fn causes(self) -> impl Iterator<Item = &'static str> {
        let presence = if self.is_not_present() {
            "Page does not exist."
        } else {
            "Page-level protection violation."
        };
        let access = match self.access() {
            AccessKind::Write => "Fault occurred during operation: writing",
            AccessKind::Read => "Fault occurred during operation: reading",
        };
        let origin = match self.origin() {
            AccessOrigin::User => "Fault in user level(3).",
            AccessOrigin::Supervisor => "Fault in supervisor level(0,1,2).",
        };
        let flag = |set: bool, text: &'static str| set.then_some(text);
        [
            Some(presence),
            Some(access),
            Some(origin),
            flag(self.is_reserved_bit_violation(), "Reserved bit caused the fault."),
            flag(self.is_instruction_fetch(), "Fault occurred during fetching instruction."),
            flag(self.contains(Self::PROTECTION_KEY), "Protection-key rights disallow the access."),
            flag(self.contains(Self::SHADOW_STACK), "Fault during a shadow-stack access."),
            flag(self.contains(Self::SGX), "SGX access-control violation."),
        ]
        .into_iter()
        .flatten()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
