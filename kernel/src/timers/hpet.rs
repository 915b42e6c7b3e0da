//! HPET: brought up unconditionally (its ACPI table is mandatory, §4.12)
//! and held in reserve for comparator-routed one-shot work neither APIC
//! timer backend covers (§4.8), rather than competing with them for the
//! timer vector.

use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

use spin::Mutex;

use crate::acpi::HpetDescriptor;
use crate::apic::ioapic;
use crate::cfg::{PAGE_SIZE, VECTOR_HPET};
use crate::memory::vmm::{VmFlags, Vmm};

const REG_CAPABILITIES: usize = 0x00;
const REG_CONFIG: usize = 0x10;
const REG_MAIN_COUNTER: usize = 0xF0;
const REG_COMPARATOR_BASE: usize = 0x100;
const COMPARATOR_STRIDE: usize = 0x20;
const COMPARATOR_VALUE_OFFSET: usize = 0x08;

const CAP_COUNT_SIZE: u64 = 1 << 13;
const CONFIG_ENABLE_CNF: u64 = 1 << 0;
const CONFIG_LEGACY_RT_CNF: u64 = 1 << 1;

const COMPARATOR_ROUTE_SHIFT: u64 = 9;
const COMPARATOR_ROUTE_MASK: u64 = 0x1F << COMPARATOR_ROUTE_SHIFT;
const COMPARATOR_INT_ENABLE: u64 = 1 << 2;
const COMPARATOR_PERIODIC: u64 = 1 << 3;
const COMPARATOR_ALLOWED_ROUTES_SHIFT: u32 = 32;

const FEMTOS_PER_MS: u64 = 1_000_000_000_000;

struct Hpet {
    mmio_base: u64,
    period_fs: u64,
}

impl Hpet {
    fn read(&self, reg: usize) -> u64 {
        unsafe { core::ptr::read_volatile((self.mmio_base as usize + reg) as *const u64) }
    }

    fn write(&self, reg: usize, value: u64) {
        unsafe { core::ptr::write_volatile((self.mmio_base as usize + reg) as *mut u64, value) }
    }

    fn comparator_config(&self, n: usize) -> usize {
        REG_COMPARATOR_BASE + n * COMPARATOR_STRIDE
    }

    fn comparator_value(&self, n: usize) -> usize {
        self.comparator_config(n) + COMPARATOR_VALUE_OFFSET
    }
}

unsafe impl Send for Hpet {}

static HPET: Mutex<Option<Hpet>> = Mutex::new(None);
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Maps the HPET's MMIO window, verifies it reports a 64-bit main counter
/// (fatal if not — this kernel has no 32-bit wraparound handling), takes it
/// out of legacy-replacement routing, and enables the main counter.
///
/// # Safety
/// Must run once at boot, after the kernel `Vmm` exists.
pub unsafe fn init(kernel_vmm: &mut Vmm, descriptor: &HpetDescriptor) {
    let object = kernel_vmm
        .alloc(PAGE_SIZE, VmFlags::WRITE | VmFlags::MMIO, Some(descriptor.address))
        .expect("failed to map HPET MMIO window");

    let hpet = Hpet { mmio_base: object.va_start, period_fs: 0 };
    let capabilities = hpet.read(REG_CAPABILITIES);
    assert!(capabilities & CAP_COUNT_SIZE != 0, "HPET main counter is not 64-bit; this kernel requires one");
    let period_fs = capabilities >> COMPARATOR_ALLOWED_ROUTES_SHIFT;

    let mut config = hpet.read(REG_CONFIG);
    config &= !CONFIG_LEGACY_RT_CNF;
    config |= CONFIG_ENABLE_CNF;
    hpet.write(REG_CONFIG, config);

    *HPET.lock() = Some(Hpet { mmio_base: hpet.mmio_base, period_fs });
}

pub fn on_interrupt() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

pub fn tick_count() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Routes comparator 0 to the lowest GSI its allowed-routes mask permits and
/// arms it periodic for `duration`.
fn arm_comparator(hpet: &Hpet, duration: Duration) {
    let comparator = 0;
    let config_reg = hpet.comparator_config(comparator);
    let raw_config = hpet.read(config_reg);
    let allowed_routes = (raw_config >> COMPARATOR_ALLOWED_ROUTES_SHIFT) as u32;
    let gsi = allowed_routes.trailing_zeros();
    assert!(gsi < 32, "HPET comparator 0 has no allowed GSI routes");

    let mut config = raw_config & !COMPARATOR_ROUTE_MASK;
    config |= (gsi as u64) << COMPARATOR_ROUTE_SHIFT;
    config |= COMPARATOR_INT_ENABLE | COMPARATOR_PERIODIC;
    hpet.write(config_reg, config);

    ioapic::route(gsi, VECTOR_HPET, 0);

    let period_fs = hpet.period_fs.max(1);
    let ticks = (duration.as_millis() as u64 * FEMTOS_PER_MS / period_fs).max(1);
    let now = hpet.read(REG_MAIN_COUNTER);
    hpet.write(hpet.comparator_value(comparator), now + ticks);
}

pub struct HpetBackend;

impl HpetBackend {
    pub fn new() -> Self {
        HpetBackend
    }

    pub fn arm(&mut self, duration: Duration) {
        let guard = HPET.lock();
        if let Some(hpet) = guard.as_ref() {
            arm_comparator(hpet, duration);
        }
    }

    pub fn sleep(&mut self, duration: Duration) {
        crate::timers::pit::sleep(duration);
    }
}

impl Default for HpetBackend {
    fn default() -> Self {
        Self::new()
    }
}
