//! Interrupt Descriptor Table (gate table) for x86_64.
//! Reference: Intel SDM Vol. 3A, 6.14.1 "64-Bit Mode IDT".
//!
//! The table has two phases. While *writable*, exactly one [`GateWriter`]
//! may exist at a time (it owns the table lock), and every write goes
//! through it. Once [`GateTable::seal`] runs, the table is *live*: the CPU
//! may dispatch through it at any moment and no writer can be obtained.

use core::mem::size_of;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering, fence};

use ::x86_64::{PrivilegeLevel, VirtAddr};
use bytemuck::{Pod, Zeroable};
use ks_error::define_kernel_error;
use ks_utils::{Mutex, MutexGuard};

use super::control::{self, DescriptorTablePointer};

/// Kernel code segment selector every gate jumps through.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const GATE_COUNT: usize = 256;
/// Highest interrupt stack table slot; 0 means "stay on the current stack".
pub const MAX_STACK_INDEX: u8 = 7;

const PRESENT: u8 = 1 << 7;
const DPL_SHIFT: u8 = 5;
const TYPE_MASK: u8 = 0x0F;
const TYPE_INTERRUPT: u8 = 0xE;
const TYPE_TRAP: u8 = 0xF;

define_kernel_error! {
    pub enum GateError(0x01) {
        VectorOutOfRange = 0x01 => "Vector outside the 256-entry gate table",
        TableLive = 0x02 => "Gate table is live and no longer writable",
        WriterBusy = 0x03 => "Gate table already has an active writer",
        InvalidStackIndex = 0x04 => "Interrupt stack index out of range",
    }
}

/// How the CPU enters a handler through a gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateKind {
    /// Masks maskable interrupts on entry. Kernel-only.
    Interrupt,
    /// Leaves the interrupt flag alone. Kernel-only.
    Trap,
    /// Trap gate user code may raise directly (`int3`, `into`, `bound`).
    SystemTrap,
}

impl GateKind {
    /// Lowest privilege allowed to raise the vector with a software `int`.
    pub const fn privilege(self) -> PrivilegeLevel {
        match self {
            Self::SystemTrap => PrivilegeLevel::Ring3,
            Self::Interrupt | Self::Trap => PrivilegeLevel::Ring0,
        }
    }

    const fn gate_type(self) -> u8 {
        match self {
            Self::Interrupt => TYPE_INTERRUPT,
            Self::Trap | Self::SystemTrap => TYPE_TRAP,
        }
    }
}

/// One 16-byte hardware gate descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    zero: u32,
}

const _: () = assert!(size_of::<IdtEntry>() == 16);

impl IdtEntry {
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            zero: 0,
        }
    }

    pub fn new(handler: u64, kind: GateKind, dpl: PrivilegeLevel) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE_SELECTOR,
            ist: 0,
            type_attr: PRESENT | ((dpl as u8) << DPL_SHIFT) | kind.gate_type(),
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            zero: 0,
        }
    }

    pub fn is_present(&self) -> bool {
        self.type_attr & PRESENT != 0
    }

    pub fn handler_address(&self) -> u64 {
        u64::from(self.offset_low)
            | (u64::from(self.offset_mid) << 16)
            | (u64::from(self.offset_high) << 32)
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        PrivilegeLevel::from_u16(u16::from((self.type_attr >> DPL_SHIFT) & 0b11))
    }

    pub fn stack_index(&self) -> u8 {
        self.ist & 0b111
    }

    /// Reads the kind back from type and DPL: a trap gate user code may
    /// raise is a [`GateKind::SystemTrap`]. `None` for absent slots.
    pub fn kind(&self) -> Option<GateKind> {
        if !self.is_present() {
            return None;
        }
        match self.type_attr & TYPE_MASK {
            TYPE_INTERRUPT => Some(GateKind::Interrupt),
            TYPE_TRAP if self.privilege() == PrivilegeLevel::Ring3 => Some(GateKind::SystemTrap),
            TYPE_TRAP => Some(GateKind::Trap),
            _ => None,
        }
    }
}

#[repr(C, align(16))]
pub struct Idt([IdtEntry; GATE_COUNT]);

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    pub const fn new() -> Self {
        Self([IdtEntry::missing(); GATE_COUNT])
    }

    pub fn entry(&self, vector: u8) -> IdtEntry {
        self.0[usize::from(vector)]
    }

    /// Raw descriptor bytes, exactly as the CPU reads them.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }

    pub fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (size_of::<Self>() - 1) as u16,
            base: VirtAddr::from_ptr(self as *const Self),
        }
    }

    /// Publishes `entry` so the dispatch hardware never sees a half-written
    /// descriptor: the body lands with the present bit clear, then the
    /// attribute byte carrying the present bit is stored last.
    fn publish(&mut self, index: usize, entry: IdtEntry) {
        let slot: *mut IdtEntry = &mut self.0[index];
        let mut staged = entry;
        staged.type_attr &= !PRESENT;
        // SAFETY: `slot` comes from a live `&mut` into the table and
        // `IdtEntry` has alignment 1, so both volatile stores are in bounds
        // and aligned.
        unsafe {
            ptr::write_volatile(&raw mut (*slot).type_attr, 0);
            fence(Ordering::Release);
            ptr::write_volatile(slot, staged);
            fence(Ordering::Release);
            ptr::write_volatile(&raw mut (*slot).type_attr, entry.type_attr);
        }
    }
}

fn checked_vector(vector: usize) -> Result<usize, GateError> {
    if vector < GATE_COUNT {
        Ok(vector)
    } else {
        Err(GateError::VectorOutOfRange)
    }
}

/// Process-wide gate table with an explicit writable -> live lifecycle.
pub struct GateTable {
    idt: Mutex<Idt>,
    live: AtomicBool,
}

impl Default for GateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GateTable {
    pub const fn new() -> Self {
        Self {
            idt: Mutex::new(Idt::new()),
            live: AtomicBool::new(false),
        }
    }

    /// The sole way to modify the table. Fails once the table is live or
    /// while another writer exists.
    pub fn writer(&self) -> Result<GateWriter<'_>, GateError> {
        let idt = self.idt.try_lock().ok_or(GateError::WriterBusy)?;
        if self.live.load(Ordering::Acquire) {
            return Err(GateError::TableLive);
        }
        Ok(GateWriter { idt })
    }

    /// Points the IDT register of the calling core at this table.
    /// Each core must do this itself before unmasking interrupts.
    pub fn load(&self) {
        let pointer = self.idt.lock().pointer();
        // SAFETY: `self` lives for as long as any core can dispatch through
        // it (the kernel table is a static), so the base stays valid.
        unsafe { control::lidt(&pointer) };
    }

    /// Ends the writable phase. Must happen before interrupts are unmasked.
    pub fn seal(&self) -> Result<(), GateError> {
        let _idt = self.idt.try_lock().ok_or(GateError::WriterBusy)?;
        self.live.store(true, Ordering::Release);
        log::info!("idt: gate table sealed");
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn entry(&self, vector: u8) -> IdtEntry {
        self.idt.lock().entry(vector)
    }

    /// Runs `f` against a consistent view of the whole table.
    pub fn inspect<R>(&self, f: impl FnOnce(&Idt) -> R) -> R {
        f(&self.idt.lock())
    }
}

/// Exclusive write access to a [`GateTable`] during its writable phase.
pub struct GateWriter<'a> {
    idt: MutexGuard<'a, Idt>,
}

impl GateWriter<'_> {
    /// Binds `vector` to `handler`. Overwrites whatever was there (last
    /// write wins) and resets the slot's interrupt stack index to 0.
    pub fn install(
        &mut self,
        vector: usize,
        kind: GateKind,
        handler: u64,
        dpl: PrivilegeLevel,
    ) -> Result<(), GateError> {
        let index = checked_vector(vector)?;
        self.idt.publish(index, IdtEntry::new(handler, kind, dpl));
        log::trace!("idt: vector {vector:3} -> {handler:#018x} ({kind:?}, dpl {})", dpl as u8);
        Ok(())
    }

    /// Runs `vector` on interrupt stack `ist` (1..=7), or on the current stack for 0.
    pub fn set_stack_index(&mut self, vector: usize, ist: u8) -> Result<(), GateError> {
        let index = checked_vector(vector)?;
        if ist > MAX_STACK_INDEX {
            return Err(GateError::InvalidStackIndex);
        }
        let mut entry = self.idt.0[index];
        entry.ist = ist;
        self.idt.publish(index, entry);
        Ok(())
    }

    /// Marks `vector` absent.
    pub fn clear(&mut self, vector: usize) -> Result<(), GateError> {
        let index = checked_vector(vector)?;
        self.idt.publish(index, IdtEntry::missing());
        Ok(())
    }

    pub fn table(&self) -> &Idt {
        &self.idt
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86_64::cpu::control::get_idt;

    #[test]
    fn test_idt_entry_layout() {
        let entry = IdtEntry::new(0xDEAD_BEEF_CAFE_BABE, GateKind::Trap, PrivilegeLevel::Ring0);

        // Local copies: fields of a packed struct cannot be borrowed.
        let offset_low = entry.offset_low;
        let offset_mid = entry.offset_mid;
        let offset_high = entry.offset_high;
        let type_attr = entry.type_attr;
        let selector = entry.selector;

        assert_eq!(offset_low, 0xBABE);
        assert_eq!(offset_mid, 0xCAFE);
        assert_eq!(offset_high, 0xDEAD_BEEF);
        assert_eq!(selector, KERNEL_CODE_SELECTOR);
        assert_eq!(type_attr, 0x8F);
        assert_eq!(entry.handler_address(), 0xDEAD_BEEF_CAFE_BABE);
    }

    #[test]
    fn test_gate_kind_attribute_bytes() {
        let interrupt = IdtEntry::new(0x1000, GateKind::Interrupt, PrivilegeLevel::Ring0);
        let system = IdtEntry::new(0x1000, GateKind::SystemTrap, GateKind::SystemTrap.privilege());
        let (interrupt_attr, system_attr) = (interrupt.type_attr, system.type_attr);

        assert_eq!(interrupt_attr, 0x8E);
        assert_eq!(system_attr, 0xEF);
        assert_eq!(interrupt.kind(), Some(GateKind::Interrupt));
        assert_eq!(system.kind(), Some(GateKind::SystemTrap));
        assert_eq!(system.privilege(), PrivilegeLevel::Ring3);
        assert_eq!(IdtEntry::missing().kind(), None);
    }

    #[test]
    fn test_install_rejects_out_of_range_vector() {
        let table = GateTable::new();
        let mut gates = table.writer().unwrap();

        assert_eq!(
            gates.install(256, GateKind::Trap, 0x1000, PrivilegeLevel::Ring0),
            Err(GateError::VectorOutOfRange)
        );
        assert_eq!(gates.set_stack_index(300, 1), Err(GateError::VectorOutOfRange));
        assert_eq!(gates.clear(usize::MAX), Err(GateError::VectorOutOfRange));
        assert!(gates.install(255, GateKind::Trap, 0x1000, PrivilegeLevel::Ring0).is_ok());
    }

    #[test]
    fn test_install_overwrites_previous_gate() {
        let table = GateTable::new();
        {
            let mut gates = table.writer().unwrap();
            gates.install(3, GateKind::Trap, 0x1000, PrivilegeLevel::Ring0).unwrap();
            gates.set_stack_index(3, 2).unwrap();
            gates
                .install(3, GateKind::SystemTrap, 0x2000, PrivilegeLevel::Ring3)
                .unwrap();
        }
        let entry = table.entry(3);
        assert_eq!(entry.handler_address(), 0x2000);
        assert_eq!(entry.kind(), Some(GateKind::SystemTrap));
        assert_eq!(entry.stack_index(), 0);
    }

    #[test]
    fn test_stack_index_bounds() {
        let table = GateTable::new();
        let mut gates = table.writer().unwrap();
        gates.install(8, GateKind::Trap, 0x3000, PrivilegeLevel::Ring0).unwrap();

        assert_eq!(gates.set_stack_index(8, 8), Err(GateError::InvalidStackIndex));
        gates.set_stack_index(8, MAX_STACK_INDEX).unwrap();

        let entry = gates.table().entry(8);
        assert_eq!(entry.stack_index(), MAX_STACK_INDEX);
        assert!(entry.is_present());
        assert_eq!(entry.handler_address(), 0x3000);
    }

    #[test]
    fn test_clear_marks_absent() {
        let table = GateTable::new();
        let mut gates = table.writer().unwrap();
        gates.install(20, GateKind::Trap, 0x4000, PrivilegeLevel::Ring0).unwrap();
        gates.clear(20).unwrap();
        assert_eq!(gates.table().entry(20), IdtEntry::missing());
    }

    #[test]
    fn test_single_writer() {
        let table = GateTable::new();
        let gates = table.writer().unwrap();
        assert!(matches!(table.writer(), Err(GateError::WriterBusy)));
        assert_eq!(table.seal(), Err(GateError::WriterBusy));
        drop(gates);
        assert!(table.writer().is_ok());
    }

    #[test]
    fn test_sealed_table_rejects_writers() {
        let table = GateTable::new();
        assert!(!table.is_live());
        table.seal().unwrap();
        assert!(table.is_live());
        assert!(matches!(table.writer(), Err(GateError::TableLive)));
    }

    #[test]
    fn test_idt_load() {
        let table = GateTable::new();
        table.load();

        let (base, limit) = get_idt();
        let expected = table.inspect(|idt| idt as *const Idt as u64);
        assert_eq!(base, expected);
        assert_eq!(limit as usize, size_of::<Idt>() - 1);
    }

    #[test]
    fn test_as_bytes_covers_whole_table() {
        let idt = Idt::new();
        assert_eq!(idt.as_bytes().len(), GATE_COUNT * 16);
        assert!(idt.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_gate_error_codes() {
        assert_eq!(GateError::VectorOutOfRange.code(), 0x0101);
        assert_eq!(GateError::from_code(0x0102), Some(GateError::TableLive));
    }
}
