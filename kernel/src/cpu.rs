//! CPU feature detection (§3, §4.8): one `raw-cpuid` probe at boot, cached
//! in a write-once cell and consulted afterwards by the APIC and timer
//! planes instead of each re-reading CPUID.

use conquer_once::spin::OnceCell;
use raw_cpuid::CpuId;

/// Snapshot of the feature bits the rest of the kernel cares about. Leaves
/// this CPU doesn't report degrade to `None`/`false` rather than panicking
/// (§8 property 11) — the two TSC checks in §4.8 are the only fatal ones,
/// and those live in `timers::tsc_deadline`, not here.
#[derive(Debug, Clone, Copy)]
pub struct CpuFeatures {
    pub has_apic: bool,
    pub has_tsc: bool,
    pub has_tsc_deadline: bool,
    pub has_invariant_tsc: bool,
    pub has_arat: bool,
    pub crystal_hz: Option<u64>,
    pub base_mhz: Option<u64>,
}

static FEATURES: OnceCell<CpuFeatures> = OnceCell::uninit();

fn probe() -> CpuFeatures {
    let cpuid = CpuId::new();

    let (has_apic, has_tsc, has_tsc_deadline) = match cpuid.get_feature_info() {
        Some(info) => (info.has_apic(), info.has_tsc(), info.has_tsc_deadline()),
        None => (false, false, false),
    };

    let has_invariant_tsc = cpuid.get_advanced_power_mgmt_info().map(|i| i.has_invariant_tsc()).unwrap_or(false);

    let has_arat = cpuid.get_thermal_power_info().map(|i| i.has_arat()).unwrap_or(false);

    let crystal_hz = cpuid.get_tsc_info().and_then(|info| {
        let (numerator, denominator, crystal) = (info.numerator(), info.denominator(), info.nominal_frequency());
        if numerator != 0 && denominator != 0 && crystal != 0 {
            Some(crystal as u64 * numerator as u64 / denominator as u64)
        } else {
            None
        }
    });

    let base_mhz = cpuid.get_processor_frequency_info().map(|info| info.processor_base_frequency() as u64).filter(|&mhz| mhz != 0);

    CpuFeatures { has_apic, has_tsc, has_tsc_deadline, has_invariant_tsc, has_arat, crystal_hz, base_mhz }
}

/// # Safety
/// Must run once at boot, before anything consults [`features`].
pub unsafe fn init() {
    FEATURES.try_init_once(probe).expect("cpu::init called more than once");
}

pub fn features() -> CpuFeatures {
    *FEATURES.get().expect("cpu::init not called yet")
}
