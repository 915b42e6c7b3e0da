//! LAPIC timer: one-shot mode, calibrated against the PIT (§4.8).

use core::time::Duration;

use crate::apic::lapic::{self, REG_LVT_TIMER};
use crate::cfg::{CALIBRATION_SAMPLE_MS, VECTOR_LAPIC_TIMER};

const REG_DIVIDE_CONFIG: usize = 0x3E0;
const REG_INITIAL_COUNT: usize = 0x380;
const REG_CURRENT_COUNT: usize = 0x390;

const DIVIDE_BY_4: u32 = 0b001;
const LVT_TIMER_MODE_ONE_SHOT: u32 = 0b00 << 17;

/// Programs divisor 4, arms a one-shot max-count timer, brackets a
/// `PIT.sleep(50ms)` with two snapshots of the current-count register, and
/// returns `ceil(delta / 50)` (§4.8).
pub fn calibrate() -> u64 {
    lapic::write_reg(REG_DIVIDE_CONFIG, DIVIDE_BY_4);
    lapic::write_reg(REG_INITIAL_COUNT, u32::MAX);

    let before = lapic::read_reg(REG_CURRENT_COUNT);
    crate::timers::pit::sleep(Duration::from_millis(CALIBRATION_SAMPLE_MS));
    let after = lapic::read_reg(REG_CURRENT_COUNT);

    let delta = before.saturating_sub(after) as u64;
    delta.div_ceil(CALIBRATION_SAMPLE_MS)
}

pub struct LapicTimerBackend {
    ticks_per_ms: u64,
}

impl LapicTimerBackend {
    pub fn new(ticks_per_ms: u64) -> Self {
        LapicTimerBackend { ticks_per_ms }
    }

    pub fn arm(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let count = (self.ticks_per_ms * ms).clamp(1, u32::MAX as u64) as u32;

        lapic::write_reg(REG_DIVIDE_CONFIG, DIVIDE_BY_4);
        lapic::write_reg(REG_LVT_TIMER, VECTOR_LAPIC_TIMER as u32 | LVT_TIMER_MODE_ONE_SHOT);
        lapic::write_reg(REG_INITIAL_COUNT, count);
    }

    pub fn sleep(&mut self, duration: Duration) {
        crate::timers::pit::sleep(duration);
    }
}

