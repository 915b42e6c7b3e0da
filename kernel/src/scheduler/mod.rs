//! Cooperative, preemptive round-robin scheduler (§4.9).
//!
//! A process switch is nothing more than overwriting the saved
//! [`InterruptFrame`] in place: the common interrupt stub's trailing
//! `iretq` pops `rip, cs, rflags, rsp, ss` off whatever that frame points
//! at, so handing `schedule` a different process's saved frame *is* the
//! context switch.
//!
//! Every process still runs under the kernel's one loaded CR3. `own_vmm`
//! mirrors the per-process address space the data model calls for, but
//! nothing is ever mapped into its lower half and CR3 is never switched —
//! there is no user-mode entry path in this kernel that would make a
//! private mapping observable. It exists for the data model's sake, not
//! because anything reads it yet (§9).

mod ring;

pub use ring::{ProcessState, RingNode, SlotId};

use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;
use spin::Mutex;

use crate::cfg::{KERNEL_STACK_SIZE, SCHEDULER_QUANTUM_MS};
use crate::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use crate::idt::InterruptFrame;
use crate::memory::paging;
use crate::memory::pfa;
use crate::memory::vmm::{VmFlags, VmObject, Vmm};
use ring::RingCore;

pub struct Process {
    pub pid: u32,
    pub name: String,
    state: ProcessState,
    context: InterruptFrame,
    next: SlotId,
    /// Private upper-half PML4 copy; see the module note on why it is
    /// never loaded.
    own_vmm: Vmm,
    /// Kernel stack and guard page carved out of the shared kernel `Vmm`;
    /// `None` for the idle process, whose stack is the boot stack and isn't
    /// owned by any `Vmm`. Reclaimed from `kernel_vmm` on reap.
    stack: Option<VmObject>,
    guard: Option<VmObject>,
}

impl RingNode for Process {
    fn state(&self) -> ProcessState {
        self.state
    }
    fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }
    fn next(&self) -> SlotId {
        self.next
    }
    fn set_next(&mut self, next: SlotId) {
        self.next = next;
    }
}

struct Scheduler {
    processes: Vec<Option<Process>>,
    current: SlotId,
    next_pid: u32,
    /// The shared kernel `Vmm`, `'static`-leaked by `memory::init_kernel_vmm`
    /// before `init` runs; reap needs it to free a dead process's stack and
    /// guard page.
    kernel_vmm: *mut Vmm,
}

// `*mut Vmm` is not `Send` by default; the kernel is single-core and the
// pointer is only ever touched under `SCHEDULER`'s lock.
unsafe impl Send for Scheduler {}

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

/// Copies the kernel PML4's upper 256 entries into a fresh table; the
/// lower half is left zeroed since nothing ever runs in user mode to
/// populate it (§3, §9).
fn new_process_address_space(kernel_pml4_phys: u64) -> u64 {
    let pml4_phys = pfa::alloc_page().expect("out of memory allocating process PML4");
    let dst = unsafe { &mut *(paging::phys_to_virt(pml4_phys) as *mut [u64; 512]) };
    let src = unsafe { &*(paging::phys_to_virt(kernel_pml4_phys) as *const [u64; 512]) };
    for word in dst.iter_mut() {
        *word = 0;
    }
    dst[256..].copy_from_slice(&src[256..]);
    pml4_phys
}

fn initial_frame(entry: u64, stack_top: u64, arg: u64) -> InterruptFrame {
    InterruptFrame {
        rax: 0,
        rbx: 0,
        rcx: 0,
        rdx: 0,
        rsi: 0,
        rdi: arg,
        rbp: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
        vector: 0,
        error_code: 0,
        rip: entry,
        cs: KERNEL_CODE_SELECTOR as u64,
        rflags: 0x202, // reserved bit 1 set, IF set
        rsp: stack_top,
        ss: KERNEL_DATA_SELECTOR as u64,
    }
}

extern "C" fn idle_entry(_arg: u64) -> ! {
    loop {
        crate::arch::enable_interrupts();
        crate::arch::hlt();
    }
}

/// Creates the idle process as the ring's sole member, current and
/// running.
///
/// # Safety
/// Must run once at boot, after the kernel `Vmm` and heap exist. `kernel_vmm`
/// must reference the `'static`-leaked kernel `Vmm` (the one
/// `memory::init_kernel_vmm` hands back): the scheduler keeps a raw pointer
/// to it for the lifetime of the kernel, to free a dead process's stack and
/// guard page during reaping.
pub unsafe fn init(kernel_pml4_phys: u64, kernel_vmm: &mut Vmm) {
    let own_vmm = Vmm::new(new_process_address_space(kernel_pml4_phys), 0);
    let idle = Process {
        pid: 0,
        name: String::from("idle"),
        state: ProcessState::Running,
        context: initial_frame(idle_entry as u64, 0, 0),
        next: SlotId(0),
        own_vmm,
        stack: None,
        guard: None,
    };
    *SCHEDULER.lock() = Some(Scheduler {
        processes: alloc::vec![Some(idle)],
        current: SlotId(0),
        next_pid: 1,
        kernel_vmm: kernel_vmm as *mut Vmm,
    });
}

/// Allocates a kernel stack plus a guard page below it from the shared
/// kernel `Vmm`, gives the new process its own (inert) address space, and
/// links it into the ring right after whichever process is current.
///
/// # Safety
/// Must run after [`init`].
pub unsafe fn create_process(kernel_vmm: &mut Vmm, kernel_pml4_phys: u64, name: &str, entry: extern "C" fn(u64) -> !, arg: u64) -> SlotId {
    let guard = kernel_vmm.alloc(crate::cfg::PAGE_SIZE, VmFlags::DISABLED, None).expect("out of virtual space for guard page");
    let stack = kernel_vmm.alloc(KERNEL_STACK_SIZE, VmFlags::WRITE, None).expect("out of memory allocating process stack");
    let stack_top = stack.va_start + stack.length;

    let own_vmm = Vmm::new(new_process_address_space(kernel_pml4_phys), 0);
    let process = Process {
        pid: 0,
        name: String::from(name),
        state: ProcessState::Ready,
        context: initial_frame(entry as u64, stack_top, arg),
        next: SlotId(0),
        own_vmm,
        stack: Some(stack),
        guard: Some(guard),
    };

    let mut guard = SCHEDULER.lock();
    let scheduler = guard.as_mut().expect("scheduler not initialized");
    let pid = scheduler.next_pid;
    scheduler.next_pid += 1;

    let slot = match scheduler.processes.iter().position(|p| p.is_none()) {
        Some(index) => index,
        None => {
            scheduler.processes.push(None);
            scheduler.processes.len() - 1
        }
    };
    let mut process = process;
    process.pid = pid;

    let current = scheduler.current;
    let current_next = scheduler.processes[current.0 as usize].as_ref().unwrap().next();
    process.next = current_next;
    scheduler.processes[slot] = Some(process);
    scheduler.processes[current.0 as usize].as_mut().unwrap().set_next(SlotId(slot as u32));

    SlotId(slot as u32)
}

/// Reclaims a dead process's resources (§4.9): its kernel stack and guard
/// page go back to the shared kernel `Vmm`, and its private PML4 frame goes
/// back to the PFA. The slot record itself is already gone — `RingCore`
/// took it out of the arena before handing it here.
fn reap(kernel_vmm: *mut Vmm, dead: Process) {
    let vmm = unsafe { &mut *kernel_vmm };
    if let Some(stack) = dead.stack {
        vmm.free(stack);
    }
    if let Some(guard) = dead.guard {
        vmm.free(guard);
    }
    let _ = pfa::free(dead.own_vmm.pml4_phys(), crate::cfg::PAGE_SIZE);
}

/// Called from the LAPIC-timer interrupt path: saves `frame` into the
/// current process, advances the ring, and overwrites `frame` with the
/// next process's saved context.
pub fn schedule(frame: &mut InterruptFrame) {
    let mut guard = SCHEDULER.lock();
    let Some(scheduler) = guard.as_mut() else { return };

    let current = scheduler.current;
    if let Some(process) = scheduler.processes[current.0 as usize].as_mut() {
        process.context = *frame;
        if process.state == ProcessState::Running {
            process.set_state(ProcessState::Ready);
        }
    }

    let kernel_vmm = scheduler.kernel_vmm;
    let next = {
        let mut ring = RingCore::new(&mut scheduler.processes);
        ring.advance_with(current, |_, dead| reap(kernel_vmm, dead))
    };

    if let Some(process) = scheduler.processes[next.0 as usize].as_mut() {
        process.set_state(ProcessState::Running);
        *frame = process.context;
    }
    scheduler.current = next;
    drop(guard);

    // The LAPIC timer backend is one-shot (§4.8): rearm for the next slice
    // before returning, or ticks stop after this one.
    crate::timers::arm(Duration::from_millis(SCHEDULER_QUANTUM_MS));
}

/// Marks the currently running process dead; it is reaped the next time
/// [`schedule`] walks past its slot.
pub fn exit_current() {
    let mut guard = SCHEDULER.lock();
    let Some(scheduler) = guard.as_mut() else { return };
    let current = scheduler.current;
    if let Some(process) = scheduler.processes[current.0 as usize].as_mut() {
        process.set_state(ProcessState::Dead);
    }
}
