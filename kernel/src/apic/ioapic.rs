//! I/O APIC driver: the two-word `IOREGSEL`/`IOWIN` MMIO protocol, GSI
//! redirection-entry programming, and routing of the legacy ISA interrupts
//! this kernel cares about (§4.7).

use alloc::vec::Vec;
use spin::Mutex;

use crate::acpi::IoApicEntry;
use crate::cfg::PAGE_SIZE;
use crate::memory::vmm::{VmFlags, Vmm};

const IOREGSEL: usize = 0x00;
const IOWIN: usize = 0x10;

const REG_REDIRECTION_BASE: u32 = 0x10;

struct IoApic {
    mmio_base: u64,
    gsi_base: u32,
}

impl IoApic {
    fn select(&self, index: u32) {
        unsafe { core::ptr::write_volatile((self.mmio_base as usize + IOREGSEL) as *mut u32, index) };
    }

    fn read(&self, index: u32) -> u32 {
        self.select(index);
        unsafe { core::ptr::read_volatile((self.mmio_base as usize + IOWIN) as *const u32) }
    }

    fn write(&self, index: u32, value: u32) {
        self.select(index);
        unsafe { core::ptr::write_volatile((self.mmio_base as usize + IOWIN) as *mut u32, value) };
    }

    /// A redirection entry is 64 bits reached through the 32-bit `IOWIN`
    /// register, so it is always two separate reads (low dword, then high
    /// dword) rather than one 64-bit access — there is no MMIO path that
    /// would make a single 8-byte read meaningful here.
    fn read_redirection(&self, gsi_index: u32) -> u64 {
        let reg = REG_REDIRECTION_BASE + 2 * gsi_index;
        let low = self.read(reg) as u64;
        let high = self.read(reg + 1) as u64;
        (high << 32) | low
    }

    fn write_redirection(&self, gsi_index: u32, entry: u64) {
        let reg = REG_REDIRECTION_BASE + 2 * gsi_index;
        self.write(reg, entry as u32);
        self.write(reg + 1, (entry >> 32) as u32);
    }
}

unsafe impl Send for IoApic {}

static IO_APICS: Mutex<Vec<IoApic>> = Mutex::new(Vec::new());

/// Maps every discovered I/O APIC's MMIO window into the kernel address
/// space.
///
/// # Safety
/// Must run once at boot, after the kernel `Vmm` exists and the legacy PIC
/// has been disabled.
pub unsafe fn init(kernel_vmm: &mut Vmm, entries: &[IoApicEntry]) {
    let mut table = IO_APICS.lock();
    for entry in entries {
        let object = kernel_vmm
            .alloc(PAGE_SIZE, VmFlags::WRITE | VmFlags::MMIO, Some(entry.phys_addr))
            .expect("failed to map I/O APIC MMIO window");
        table.push(IoApic { mmio_base: object.va_start, gsi_base: entry.gsi_base });
    }
}

fn find_for_gsi(table: &[IoApic], gsi: u32) -> Option<&IoApic> {
    table.iter().filter(|a| a.gsi_base <= gsi).max_by_key(|a| a.gsi_base)
}

/// Programs GSI `gsi` to fire `vector` on the CPU identified by
/// `destination_apic_id`, physical fixed delivery, edge-triggered,
/// active-high, unmasked. Program order is low dword then high dword
/// (§4.7): the low dword carries the bit-packed LVT-style record, the high
/// dword carries the destination APIC ID in bits 24-31.
pub fn route(gsi: u32, vector: u8, destination_apic_id: u8) {
    let table = IO_APICS.lock();
    let Some(apic) = find_for_gsi(&table, gsi) else {
        panic!("no I/O APIC owns GSI {gsi}");
    };
    let index = gsi - apic.gsi_base;

    // Low dword: vector with delivery mode 0 (fixed), physical destination
    // mode, edge-triggered, active-high, unmasked. High dword: destination
    // APIC ID in bits 56-63 of the 64-bit entry (bits 24-31 of the high
    // dword). `write_redirection` issues the low write before the high one.
    let entry = (vector as u64) | ((destination_apic_id as u64) << 56);
    apic.write_redirection(index, entry);
}

pub fn is_masked(gsi: u32) -> bool {
    let table = IO_APICS.lock();
    let Some(apic) = find_for_gsi(&table, gsi) else { return true };
    let index = gsi - apic.gsi_base;
    apic.read_redirection(index) & (1 << 16) != 0
}
