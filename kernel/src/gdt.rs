//! Hand-packed Global Descriptor Table and Task State Segment.
//!
//! Limine hands control off in long mode with its own transient GDT; this
//! kernel replaces it with its own, minimal one before loading the IDT, in
//! keeping with the rest of this codebase's "pack the bytes ourselves"
//! style rather than reaching for a crate's `GlobalDescriptorTable` type.
//! There is no usermode here, so just a null descriptor, a 64-bit kernel
//! code/data pair, and a TSS descriptor carrying the double-fault IST
//! stack.

use core::arch::asm;
use core::mem::size_of;

use crate::cfg::{DOUBLE_FAULT_IST_INDEX, DOUBLE_FAULT_STACK_SIZE};

pub const KERNEL_CODE_SELECTOR: u16 = 1 << 3;
pub const KERNEL_DATA_SELECTOR: u16 = 2 << 3;
const TSS_SELECTOR: u16 = 3 << 3;

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

#[repr(C, packed)]
struct TaskStateSegment {
    reserved0: u32,
    privilege_stack_table: [u64; 3],
    reserved1: u64,
    interrupt_stack_table: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        TaskStateSegment {
            reserved0: 0,
            privilege_stack_table: [0; 3],
            reserved1: 0,
            interrupt_stack_table: [0; 7],
            reserved2: 0,
            reserved3: 0,
            iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

static mut TSS: TaskStateSegment = TaskStateSegment::new();
static mut DOUBLE_FAULT_STACK: [u8; DOUBLE_FAULT_STACK_SIZE] = [0; DOUBLE_FAULT_STACK_SIZE];

/// Five 8-byte GDT slots: null, kernel code, kernel data, and a 16-byte
/// (two-slot) TSS descriptor.
#[repr(C, align(16))]
struct Gdt([u64; 5]);

static mut GDT: Gdt = Gdt([0; 5]);

const fn code_segment_descriptor() -> u64 {
    // 64-bit code segment: L=1, present, DPL=0, code/data=1, executable,
    // readable. Base/limit are ignored by the CPU in long mode.
    let access = 0b1001_1010u64; // P=1 DPL=00 S=1 Type=1010 (exec/read)
    let flags = 0b1010u64; // G=1 L=1
    (access << 40) | (flags << 52) | 0x0000_FFFF
}

const fn data_segment_descriptor() -> u64 {
    let access = 0b1001_0010u64; // P=1 DPL=00 S=1 Type=0010 (read/write)
    let flags = 0b1100u64; // G=1 D/B=1
    (access << 40) | (flags << 52) | 0x0000_FFFF
}

fn tss_descriptor(tss_addr: u64) -> (u64, u64) {
    let limit = (size_of::<TaskStateSegment>() - 1) as u64;
    let base_low = tss_addr & 0xFFFF_FFFF;
    let base_high = tss_addr >> 32;

    let low = (limit & 0xFFFF)
        | ((base_low & 0xFFFFFF) << 16)
        | (0b1000_1001u64 << 40) // P=1 DPL=00 Type=0b1001 (64-bit TSS, available)
        | (((limit >> 16) & 0xF) << 48)
        | (((base_low >> 24) & 0xFF) << 56);

    (low, base_high)
}

/// # Safety
/// Must be called once, before `idt::init`, with interrupts disabled.
pub unsafe fn init() {
    unsafe {
        let stack_top =
            (&raw const DOUBLE_FAULT_STACK) as u64 + DOUBLE_FAULT_STACK_SIZE as u64;
        TSS.interrupt_stack_table[(DOUBLE_FAULT_IST_INDEX - 1) as usize] = stack_top;

        let tss_addr = (&raw const TSS) as u64;
        let (tss_low, tss_high) = tss_descriptor(tss_addr);

        GDT.0[0] = 0;
        GDT.0[1] = code_segment_descriptor();
        GDT.0[2] = data_segment_descriptor();
        GDT.0[3] = tss_low;
        GDT.0[4] = tss_high;

        let pointer = DescriptorTablePointer {
            limit: (size_of::<Gdt>() - 1) as u16,
            base: (&raw const GDT) as u64,
        };

        asm!(
            "lgdt [{ptr}]",
            // Reload CS via a far-return trampoline, then the data segments directly.
            "push {code_sel}",
            "lea {tmp}, [2f + rip]",
            "push {tmp}",
            "retfq",
            "2:",
            "mov ax, {data_sel:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "ltr {tss_sel:x}",
            ptr = in(reg) &pointer,
            code_sel = in(reg) KERNEL_CODE_SELECTOR as u64,
            data_sel = in(reg) KERNEL_DATA_SELECTOR,
            tss_sel = in(reg) TSS_SELECTOR,
            tmp = out(reg) _,
            options(preserves_flags),
        );
    }
}
