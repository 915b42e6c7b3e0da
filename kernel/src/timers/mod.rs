//! Timing plane: four backends, one of which is selected at boot by
//! CPU-feature probe order, represented as a tagged variant rather than a
//! function-pointer table (§4.8, §9 Design Notes) since there is exactly
//! one of each live per boot and a `match` reads clearer than an indirect
//! call here.

pub mod hpet;
pub mod lapic_timer;
pub mod pit;
pub mod tsc_deadline;

use core::time::Duration;
use spin::Mutex;

pub enum TimerBackend {
    Pit(pit::PitBackend),
    Lapic(lapic_timer::LapicTimerBackend),
    TscDeadline(tsc_deadline::TscDeadlineBackend),
    Hpet(hpet::HpetBackend),
}

impl TimerBackend {
    pub fn arm(&mut self, duration: Duration) {
        match self {
            TimerBackend::Pit(b) => b.arm(duration),
            TimerBackend::Lapic(b) => b.arm(duration),
            TimerBackend::TscDeadline(b) => b.arm(duration),
            TimerBackend::Hpet(b) => b.arm(duration),
        }
    }

    pub fn sleep(&mut self, duration: Duration) {
        match self {
            TimerBackend::Pit(b) => b.sleep(duration),
            TimerBackend::Lapic(b) => b.sleep(duration),
            TimerBackend::TscDeadline(b) => b.sleep(duration),
            TimerBackend::Hpet(b) => b.sleep(duration),
        }
    }
}

static ACTIVE_BACKEND: Mutex<Option<TimerBackend>> = Mutex::new(None);

/// Picks TSC-deadline if the CPU supports it, otherwise the LAPIC timer
/// (always calibrated against the PIT regardless of which backend ends up
/// armed for periodic ticks). HPET is brought up separately and held in
/// reserve for comparator-routed one-shot work neither APIC timer backend
/// covers.
///
/// # Safety
/// Must run once at boot, after the LAPIC and I/O APIC are initialized.
pub unsafe fn init() {
    let ticks_per_ms = lapic_timer::calibrate();

    let backend = if tsc_deadline::is_available() {
        TimerBackend::TscDeadline(tsc_deadline::TscDeadlineBackend::new())
    } else {
        TimerBackend::Lapic(lapic_timer::LapicTimerBackend::new(ticks_per_ms))
    };

    *ACTIVE_BACKEND.lock() = Some(backend);
}

/// Arms the active backend to fire the timer vector once, `duration` from
/// now.
pub fn arm(duration: Duration) {
    if let Some(backend) = ACTIVE_BACKEND.lock().as_mut() {
        backend.arm(duration);
    }
}

/// Busy-waits `duration` using the PIT directly, independent of whichever
/// backend drives the timer vector — used for calibration and any caller
/// that cannot tolerate being preempted mid-wait.
pub fn sleep(duration: Duration) {
    pit::sleep(duration);
}
