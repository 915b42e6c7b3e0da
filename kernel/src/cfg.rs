//! Build-time configuration constants.
//!
//! Centralizes the magic numbers this codebase used to sprinkle across
//! `memory.rs`, `apic/mod.rs` and friends: page size, growth increments,
//! stack sizes, and the fixed interrupt-vector assignments from the boot
//! protocol section of the design doc.

/// The only page size this kernel ever maps (§9: a non-default value would
/// require rethinking the 48-bit virtual address split).
pub const PAGE_SIZE: u64 = 4096;

/// Fixed virtual address the kernel heap's reserved window starts at,
/// carved out ahead of the general-purpose kernel `Vmm`'s bump frontier so
/// the two never collide.
pub const HEAP_VA_BASE: u64 = 0xffff_9000_0000_0000;

/// Where the kernel `Vmm`'s bump-allocated VA frontier starts, well above
/// any plausible heap growth.
pub const KERNEL_VMM_REGION_BASE: u64 = 0xffff_a000_0000_0000;

/// Initial kernel heap size, in bytes, carved from the HHDM-backed VMM
/// region at boot.
pub const HEAP_INITIAL_SIZE: u64 = 1024 * 1024;

/// Size by which the heap grows when a request cannot be satisfied, or
/// `current_len` if larger.
pub const HEAP_GROWTH_INCREMENT: u64 = 4096;

/// Minimum usable payload of a heap chunk, in bytes.
pub const HEAP_MIN_PAYLOAD: u64 = 16;

/// Kernel stack size for newly created processes.
pub const KERNEL_STACK_SIZE: u64 = 4096 * 4;

/// Upper bound on Limine memory map entries, so the map can be copied out
/// of the bootloader-owned response into a stack buffer before the kernel
/// heap exists. Real firmware maps rarely exceed a few dozen entries.
pub const MAX_MEMORY_REGIONS: usize = 128;

/// Per-process backing buffer used to host its page tables and bookkeeping.
pub const PROCESS_VMM_BUFFER_SIZE: u64 = 64 * 1024;

/// IST index reserved for the double-fault handler's emergency stack.
pub const DOUBLE_FAULT_IST_INDEX: u8 = 1;
/// Size of the double-fault emergency stack.
pub const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

/// Fixed interrupt vector assignments (§6 External interfaces).
pub const VECTOR_PIT: u8 = 0x20;
pub const VECTOR_KEYBOARD: u8 = 0x21;
pub const VECTOR_HPET: u8 = 0x30;
pub const VECTOR_LAPIC_TIMER: u8 = 0x40;
pub const VECTOR_SPURIOUS: u8 = 0xFF;

/// GSI wiring for the legacy ISA devices routed through the I/O APIC.
pub const GSI_PIT: u32 = 2;
pub const GSI_KEYBOARD: u32 = 1;

/// PS/2 scancode event ring buffer capacity.
pub const KEY_EVENT_RING_CAPACITY: usize = 64;

/// PIT reference frequency in Hz.
pub const PIT_FREQUENCY_HZ: u64 = 1_193_182;

/// Sample window used to calibrate the LAPIC timer and, as a fallback, the
/// TSC-deadline rate, against the PIT.
pub const CALIBRATION_SAMPLE_MS: u64 = 50;

/// Scheduler time slice: how long a process runs before the timer vector
/// preempts it.
pub const SCHEDULER_QUANTUM_MS: u64 = 10;
