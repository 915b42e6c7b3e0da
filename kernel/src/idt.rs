//! Interrupt Descriptor Table: hand-packed gate descriptors plus a
//! vector-stub table assembled with `global_asm!` (§4.5). No `x86-interrupt`
//! ABI and no crate-provided `InterruptDescriptorTable`: every stub saves
//! the full general-purpose register file itself before handing off to
//! [`dispatch`].

use core::arch::global_asm;
use core::mem::size_of;

use crate::cfg::DOUBLE_FAULT_IST_INDEX;
use crate::gdt::KERNEL_CODE_SELECTOR;
use crate::{apic, keyboard, klog, println, scheduler, timers};

/// Register snapshot built by the common stub, in the order it pushes them.
/// A pointer to this is handed to [`dispatch`]; mutating `rip`/`rsp`/the GPRs
/// changes what the trailing `iretq` resumes into, which is how the
/// scheduler switches tasks.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

extern "C" {
    /// 256 8-byte entries, one per vector, filled in by the asm below.
    static stub_table: [u64; 256];
}

global_asm!(
    r#"
.altmacro
.intel_syntax noprefix

.macro gen_stub vector, has_error_code
.global stub_\vector
stub_\vector:
.if \has_error_code == 0
    push 0
.endif
    push \vector
    jmp common_interrupt_entry
.endm

gen_stub 0, 0
gen_stub 1, 0
gen_stub 2, 0
gen_stub 3, 0
gen_stub 4, 0
gen_stub 5, 0
gen_stub 6, 0
gen_stub 7, 0
gen_stub 8, 1
gen_stub 9, 0
gen_stub 10, 1
gen_stub 11, 1
gen_stub 12, 1
gen_stub 13, 1
gen_stub 14, 1
gen_stub 15, 0
gen_stub 16, 0
gen_stub 17, 1
gen_stub 18, 0
gen_stub 19, 0
gen_stub 20, 0
gen_stub 21, 1
gen_stub 22, 0
gen_stub 23, 0
gen_stub 24, 0
gen_stub 25, 0
gen_stub 26, 0
gen_stub 27, 0
gen_stub 28, 0
gen_stub 29, 1
gen_stub 30, 1
gen_stub 31, 0

.set i, 32
.rept 224
    gen_stub %i, 0
    .set i, i+1
.endr

.macro quad_of vector
    .quad stub_\vector
.endm

.section .rodata
.global stub_table
.align 8
stub_table:
.irp vector, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31
    quad_of \vector
.endr
.set i, 32
.rept 224
    quad_of %i
    .set i, i+1
.endr

.text
common_interrupt_entry:
    push r15
    push r14
    push r13
    push r12
    push r11
    push r10
    push r9
    push r8
    push rbp
    push rdi
    push rsi
    push rdx
    push rcx
    push rbx
    push rax

    mov rdi, rsp
    call {dispatch}

    pop rax
    pop rbx
    pop rcx
    pop rdx
    pop rsi
    pop rdi
    pop rbp
    pop r8
    pop r9
    pop r10
    pop r11
    pop r12
    pop r13
    pop r14
    pop r15

    add rsp, 16
    iretq
"#,
    dispatch = sym dispatch_trampoline,
);

/// Bridges the asm `call` (which passes the frame pointer in `rdi` per the
/// System V calling convention used above) to the safe dispatcher.
extern "C" fn dispatch_trampoline(frame: *mut InterruptFrame) {
    let frame = unsafe { &mut *frame };
    dispatch(frame);
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        IdtEntry { offset_low: 0, selector: 0, ist: 0, type_attr: 0, offset_mid: 0, offset_high: 0, reserved: 0 }
    }

    fn new(handler: u64, ist: u8) -> Self {
        IdtEntry {
            offset_low: handler as u16,
            selector: KERNEL_CODE_SELECTOR,
            ist,
            type_attr: 0b1000_1110, // present, DPL=0, 64-bit interrupt gate
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            reserved: 0,
        }
    }
}

#[repr(C, align(16))]
struct Idt([IdtEntry; 256]);

static mut IDT: Idt = Idt([IdtEntry::missing(); 256]);

const DOUBLE_FAULT_VECTOR: usize = 8;

/// # Safety
/// Must run once, after `gdt::init`, with interrupts disabled.
pub unsafe fn init() {
    unsafe {
        for vector in 0..256usize {
            let handler = stub_table[vector];
            let ist = if vector == DOUBLE_FAULT_VECTOR { DOUBLE_FAULT_IST_INDEX } else { 0 };
            IDT.0[vector] = IdtEntry::new(handler, ist);
        }

        let pointer = DescriptorTablePointer {
            limit: (size_of::<Idt>() - 1) as u16,
            base: (&raw const IDT) as u64,
        };
        core::arch::asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}

fn exception_name(vector: u64) -> &'static str {
    match vector {
        0 => "#DE divide error",
        1 => "#DB debug",
        2 => "NMI",
        3 => "#BP breakpoint",
        4 => "#OF overflow",
        5 => "#BR bound range exceeded",
        6 => "#UD invalid opcode",
        7 => "#NM device not available",
        8 => "#DF double fault",
        10 => "#TS invalid TSS",
        11 => "#NP segment not present",
        12 => "#SS stack-segment fault",
        13 => "#GP general protection fault",
        14 => "#PF page fault",
        16 => "#MF x87 floating point",
        17 => "#AC alignment check",
        18 => "#MC machine check",
        19 => "#XM SIMD floating point",
        20 => "#VE virtualization exception",
        21 => "#CP control protection exception",
        _ => "reserved exception",
    }
}

/// Fatal exceptions that this kernel does not attempt to recover from.
fn is_fatal(vector: u64) -> bool {
    !matches!(vector, 1 | 3)
}

fn dispatch(frame: &mut InterruptFrame) {
    match frame.vector {
        0..=31 => handle_exception(frame),
        v if v == crate::cfg::VECTOR_PIT as u64 => {
            timers::pit::on_interrupt();
            apic::lapic::send_eoi();
        }
        v if v == crate::cfg::VECTOR_KEYBOARD as u64 => {
            keyboard::on_interrupt();
            apic::lapic::send_eoi();
        }
        v if v == crate::cfg::VECTOR_HPET as u64 => {
            timers::hpet::on_interrupt();
            apic::lapic::send_eoi();
        }
        v if v == crate::cfg::VECTOR_LAPIC_TIMER as u64 => {
            apic::lapic::send_eoi();
            scheduler::schedule(frame);
        }
        v if v == crate::cfg::VECTOR_SPURIOUS as u64 => {
            // Intel SDM: the spurious vector must not be acknowledged with EOI.
        }
        other => panic!("unhandled interrupt: vector {other}"),
    }
}

fn handle_exception(frame: &mut InterruptFrame) {
    let vector = frame.vector;
    let name = exception_name(vector);

    if vector == 14 {
        let fault_addr = crate::arch::read_cr2();
        klog!(ERROR, "page fault at {:#x} (error code {:#x}, rip {:#x})", fault_addr, frame.error_code, frame.rip);
    } else {
        klog!(ERROR, "{} (vector {}, error code {:#x}, rip {:#x})", name, vector, frame.error_code, frame.rip);
    }

    if is_fatal(vector) {
        println!("fatal exception, halting");
        loop {
            crate::arch::disable_interrupts();
            crate::arch::hlt();
        }
    }
}
