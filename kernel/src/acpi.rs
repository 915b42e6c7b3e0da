//! Hand-rolled ACPI table walk, scoped to exactly what the interrupt and
//! timer planes need: the MADT (LAPIC/IOAPIC discovery) and HPET tables
//! (§4.12). No AML, no DSDT, no general table discovery — the `acpi` crate
//! pulls in all of that, so this codebase reads the handful of bytes it
//! actually needs itself.

use crate::memory::paging::phys_to_virt;

#[repr(C, packed)]
struct RsdpV1 {
    signature: [u8; 8],
    checksum: u8,
    oem_id: [u8; 6],
    revision: u8,
    rsdt_address: u32,
}

#[repr(C, packed)]
struct RsdpV2Extra {
    length: u32,
    xsdt_address: u64,
    extended_checksum: u8,
    reserved: [u8; 3],
}

#[repr(C, packed)]
struct SdtHeader {
    signature: [u8; 4],
    length: u32,
    revision: u8,
    checksum: u8,
    oem_id: [u8; 6],
    oem_table_id: [u8; 8],
    oem_revision: u32,
    creator_id: u32,
    creator_revision: u32,
}

fn checksum_ok(base: u64, len: usize) -> bool {
    let bytes = unsafe { core::slice::from_raw_parts(base as *const u8, len) };
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

/// Validates the RSDP's checksum over its full declared length (V1 20-byte
/// checksum for the base fields, full-structure checksum for V2+) and
/// returns the physical address of the XSDT.
///
/// # Panics
/// If either checksum fails: a corrupt RSDP means the rest of ACPI
/// discovery cannot be trusted.
pub fn xsdt_address(rsdp_phys: u64) -> u64 {
    let v1 = unsafe { &*(phys_to_virt(rsdp_phys) as *const RsdpV1) };
    assert!(checksum_ok(phys_to_virt(rsdp_phys), core::mem::size_of::<RsdpV1>()), "RSDP v1 checksum mismatch");

    if v1.revision < 2 {
        panic!("ACPI revision {} has no XSDT; this kernel requires ACPI 2.0+", { v1.revision });
    }

    let extra = unsafe { &*(phys_to_virt(rsdp_phys + core::mem::size_of::<RsdpV1>() as u64) as *const RsdpV2Extra) };
    assert!(checksum_ok(phys_to_virt(rsdp_phys), extra.length as usize), "RSDP extended checksum mismatch");

    extra.xsdt_address
}

fn validate_table(phys: u64) -> &'static SdtHeader {
    let header = unsafe { &*(phys_to_virt(phys) as *const SdtHeader) };
    assert!(checksum_ok(phys_to_virt(phys), header.length as usize), "ACPI table {:?} checksum mismatch", { header.signature });
    header
}

/// Walks the XSDT's array of 64-bit physical pointers, calling `f` for
/// every entry whose signature is `APIC` or `HPET` (the only tables this
/// kernel interprets).
pub fn for_each_relevant_table(xsdt_phys: u64, mut f: impl FnMut(&'static [u8])) {
    let header = validate_table(xsdt_phys);
    let entry_count = (header.length as usize - core::mem::size_of::<SdtHeader>()) / 8;
    let entries_base = xsdt_phys + core::mem::size_of::<SdtHeader>() as u64;
    let entries = unsafe { core::slice::from_raw_parts(phys_to_virt(entries_base) as *const u64, entry_count) };

    for &table_phys in entries {
        let table_header = validate_table(table_phys);
        if &table_header.signature == b"APIC" || &table_header.signature == b"HPET" {
            let bytes = unsafe { core::slice::from_raw_parts(phys_to_virt(table_phys) as *const u8, table_header.length as usize) };
            f(bytes);
        }
    }
}

/// MADT (`APIC`) record kinds this kernel cares about.
#[derive(Debug)]
pub struct Madt {
    pub local_apic_phys: u64,
    pub io_apics: alloc::vec::Vec<IoApicEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct IoApicEntry {
    pub id: u8,
    pub phys_addr: u64,
    pub gsi_base: u32,
}

const MADT_RECORD_IO_APIC: u8 = 1;
const MADT_RECORD_LOCAL_APIC_OVERRIDE: u8 = 5;

/// Parses a MADT body (the bytes `for_each_relevant_table` hands back for
/// signature `APIC`) into its local-APIC base address and I/O APIC list.
pub fn parse_madt(bytes: &[u8]) -> Madt {
    // Fixed MADT header: SDTHeader (36 bytes) + local_apic_addr:u32 + flags:u32.
    let mut local_apic_phys = u32::from_le_bytes(bytes[36..40].try_into().unwrap()) as u64;
    let mut io_apics = alloc::vec::Vec::new();

    let mut offset = 44usize;
    while offset + 2 <= bytes.len() {
        let record_type = bytes[offset];
        let record_len = bytes[offset + 1] as usize;
        if record_len == 0 || offset + record_len > bytes.len() {
            break;
        }
        let record = &bytes[offset..offset + record_len];

        match record_type {
            MADT_RECORD_IO_APIC => {
                io_apics.push(IoApicEntry {
                    id: record[2],
                    phys_addr: u32::from_le_bytes(record[4..8].try_into().unwrap()) as u64,
                    gsi_base: u32::from_le_bytes(record[8..12].try_into().unwrap()),
                });
            }
            MADT_RECORD_LOCAL_APIC_OVERRIDE => {
                local_apic_phys = u64::from_le_bytes(record[4..12].try_into().unwrap());
            }
            _ => {}
        }

        offset += record_len;
    }

    Madt { local_apic_phys, io_apics }
}

#[derive(Debug, Clone, Copy)]
pub struct HpetDescriptor {
    pub address: u64,
    pub min_clock_tick: u16,
    pub hardware_rev_id: u8,
    pub page_protection: u8,
}

/// Parses an HPET table body (signature `HPET`).
pub fn parse_hpet(bytes: &[u8]) -> HpetDescriptor {
    // SDTHeader (36) + event_timer_block_id:u32 + base_address (ACPI GAS, 12
    // bytes, address at offset +4) + hpet_number:u8 + min_clock_tick:u16 +
    // page_protection:u8.
    let address = u64::from_le_bytes(bytes[44..52].try_into().unwrap());
    let min_clock_tick = u16::from_le_bytes(bytes[53..55].try_into().unwrap());
    let page_protection = bytes[55];
    let hardware_rev_id = bytes[36];

    HpetDescriptor { address, min_clock_tick, hardware_rev_id, page_protection }
}
