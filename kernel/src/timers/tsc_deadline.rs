//! TSC-deadline timer: the CPU itself raises the timer vector when `RDTSC`
//! would return a value at or past the programmed deadline (§4.8).

use core::time::Duration;
use raw_cpuid::CpuId;

use crate::arch::msr::{self, IA32_TSC_DEADLINE};

fn ticks_per_ms() -> u64 {
    let cpuid = CpuId::new();

    if let Some(tsc_info) = cpuid.get_tsc_info() {
        if let (Some(_denom), Some(numer), Some(core_hz)) =
            (Some(tsc_info.denominator()), tsc_info.numerator(), tsc_info.nominal_frequency())
        {
            if numer != 0 && core_hz != 0 {
                return core_hz as u64 / 1000;
            }
        }
    }

    if let Some(processor_freq) = cpuid.get_processor_frequency_info() {
        let mhz = processor_freq.processor_base_frequency() as u64;
        if mhz != 0 {
            return mhz * 1000;
        }
    }

    // Fall back to a PIT-calibrated sample, same method the LAPIC timer uses.
    crate::timers::lapic_timer::calibrate()
}

/// `CPUID.1.EDX[4]` (TSC present, fatal if absent — checked by the caller,
/// this function is only reached once that held) and `CPUID.1.ECX[24]`
/// (TSC-deadline, fatal if absent).
pub fn is_available() -> bool {
    let cpuid = CpuId::new();
    let Some(feature_info) = cpuid.get_feature_info() else { return false };
    assert!(feature_info.has_tsc(), "CPU reports no TSC; this kernel requires one");

    if let Some(apm) = cpuid.get_advanced_power_mgmt_info() {
        if !apm.has_invariant_tsc() {
            crate::klog!(WARN, "TSC is not invariant; timing may drift under frequency scaling");
        }
    }

    feature_info.has_tsc_deadline()
}

pub struct TscDeadlineBackend {
    ticks_per_ms: u64,
}

impl TscDeadlineBackend {
    pub fn new() -> Self {
        TscDeadlineBackend { ticks_per_ms: ticks_per_ms() }
    }

    pub fn arm(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let deadline = msr::rdtsc() + ms * self.ticks_per_ms;
        unsafe { msr::wrmsr(IA32_TSC_DEADLINE, deadline) };
    }

    pub fn sleep(&mut self, duration: Duration) {
        crate::timers::pit::sleep(duration);
    }
}
