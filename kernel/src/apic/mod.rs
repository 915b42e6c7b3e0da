//! Local APIC, I/O APIC and legacy-PIC-disable (§4.6, §4.7).

pub mod ioapic;
pub mod lapic;
pub mod pic;
