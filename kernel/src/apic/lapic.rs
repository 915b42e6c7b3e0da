//! Local APIC driver: MMIO register access, spurious-vector enable, EOI and
//! IPI delivery (§4.6).

use raw_cpuid::CpuId;
use spin::Mutex;

use crate::arch::msr::{self, IA32_APIC_BASE};
use crate::cfg::{PAGE_SIZE, VECTOR_SPURIOUS};
use crate::memory::vmm::{VmFlags, Vmm};

const REG_EOI: usize = 0xB0;
const REG_SVR: usize = 0xF0;
const REG_ICR_LOW: usize = 0x300;
const REG_ICR_HIGH: usize = 0x310;
pub(crate) const REG_LVT_TIMER: usize = 0x320;

const SVR_ENABLE: u32 = 1 << 8;
const ICR_DELIVERY_STATUS: u32 = 1 << 12;

struct Lapic {
    mmio_base: u64,
}

impl Lapic {
    fn read(&self, reg: usize) -> u32 {
        unsafe { core::ptr::read_volatile((self.mmio_base as usize + reg) as *const u32) }
    }

    fn write(&self, reg: usize, value: u32) {
        unsafe { core::ptr::write_volatile((self.mmio_base as usize + reg) as *mut u32, value) }
    }
}

unsafe impl Send for Lapic {}

static LAPIC: Mutex<Option<Lapic>> = Mutex::new(None);

/// `CPUID.1.EDX[9]`.
pub fn is_present() -> bool {
    CpuId::new().get_feature_info().map(|f| f.has_apic()).unwrap_or(false)
}

/// Reads the LAPIC's physical base out of `IA32_APIC_BASE` (bits 12-51),
/// maps it into the kernel address space as MMIO, enables the LAPIC by
/// setting bit 8 of the Spurious Interrupt Vector register and writing the
/// spurious vector into its low byte (§4.6).
///
/// # Safety
/// Must run once at boot, after the kernel `Vmm` exists.
pub unsafe fn init(kernel_vmm: &mut Vmm) {
    let apic_base_msr = unsafe { msr::rdmsr(IA32_APIC_BASE) };
    let phys_base = apic_base_msr & 0x000f_ffff_ffff_f000;

    let object = kernel_vmm
        .alloc(PAGE_SIZE, VmFlags::WRITE | VmFlags::MMIO, Some(phys_base))
        .expect("failed to map LAPIC MMIO window");

    let lapic = Lapic { mmio_base: object.va_start };
    lapic.write(REG_SVR, lapic.read(REG_SVR) | SVR_ENABLE | VECTOR_SPURIOUS as u32);

    *LAPIC.lock() = Some(lapic);
}

pub fn send_eoi() {
    if let Some(lapic) = LAPIC.lock().as_ref() {
        lapic.write(REG_EOI, 0);
    }
}

pub(crate) fn read_reg(reg: usize) -> u32 {
    LAPIC.lock().as_ref().expect("LAPIC not initialized").read(reg)
}

pub(crate) fn write_reg(reg: usize, value: u32) {
    LAPIC.lock().as_ref().expect("LAPIC not initialized").write(reg, value);
}

#[derive(Clone, Copy, Debug)]
pub enum DeliveryMode {
    Fixed,
    Init,
    StartUp,
}

fn delivery_mode_bits(mode: DeliveryMode) -> u32 {
    match mode {
        DeliveryMode::Fixed => 0b000 << 8,
        DeliveryMode::Init => 0b101 << 8,
        DeliveryMode::StartUp => 0b110 << 8,
    }
}

/// Sends an IPI: high half (destination APIC ID) first, then low half
/// (vector, delivery mode), then polls Delivery Status until it clears
/// (§4.6).
pub fn send_ipi(destination_apic_id: u8, vector: u8, mode: DeliveryMode) {
    let guard = LAPIC.lock();
    let lapic = guard.as_ref().expect("LAPIC not initialized");

    lapic.write(REG_ICR_HIGH, (destination_apic_id as u32) << 24);
    lapic.write(REG_ICR_LOW, vector as u32 | delivery_mode_bits(mode));

    while lapic.read(REG_ICR_LOW) & ICR_DELIVERY_STATUS != 0 {
        core::hint::spin_loop();
    }
}
