#![no_std]
#![no_main]

extern crate alloc;

use core::time::Duration;

use limine::request::{ExecutableAddressRequest, FramebufferRequest, HhdmRequest, MemoryMapRequest, RequestsEndMarker, RequestsStartMarker, RsdpRequest};
use limine::BaseRevision;
use limine::memory_map::EntryType;

use kernel::memory::paging::PteFlags;
use kernel::memory::{KernelSection, MemoryRegion, MemoryRegionKind};
use kernel::memory::heap::KernelAllocator;
use kernel::{acpi, apic, arch, cfg, console, cpu, idt, keyboard, klog, memory, scheduler, timers};

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static RSDP_REQUEST: RsdpRequest = RsdpRequest::new();

#[used]
#[link_section = ".requests"]
static EXECUTABLE_ADDRESS_REQUEST: ExecutableAddressRequest = ExecutableAddressRequest::new();

#[used]
#[link_section = ".requests"]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

#[used]
#[link_section = ".requests_start_marker"]
static REQUESTS_START: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[link_section = ".requests_end_marker"]
static REQUESTS_END: RequestsEndMarker = RequestsEndMarker::new();

extern "C" {
    static __kernel_requests_start: u8;
    static __kernel_requests_end: u8;
    static __kernel_text_start: u8;
    static __kernel_text_end: u8;
    static __kernel_rodata_start: u8;
    static __kernel_rodata_end: u8;
    static __kernel_data_start: u8;
    static __kernel_data_end: u8;
}

core::arch::global_asm!(
    r#"
.intel_syntax noprefix
.global _start
_start:
    lea rsp, [rip + __kernel_stack_top]
    call {main}
"#,
    main = sym kmain,
);

fn region_kind(entry_type: EntryType) -> MemoryRegionKind {
    match entry_type {
        EntryType::USABLE => MemoryRegionKind::Usable,
        EntryType::BOOTLOADER_RECLAIMABLE => MemoryRegionKind::BootloaderReclaimable,
        EntryType::ACPI_RECLAIMABLE => MemoryRegionKind::AcpiReclaimable,
        EntryType::ACPI_NVS => MemoryRegionKind::AcpiNvs,
        EntryType::BAD_MEMORY => MemoryRegionKind::BadMemory,
        EntryType::KERNEL_AND_MODULES => MemoryRegionKind::ExecutableAndModules,
        EntryType::FRAMEBUFFER => MemoryRegionKind::Framebuffer,
        _ => MemoryRegionKind::Reserved,
    }
}

fn addr_of(sym: &u8) -> u64 {
    sym as *const u8 as u64
}

/// Resolves the linker script's section-boundary symbols (§6) into the
/// plain table `memory::build_kernel_address_space` consumes. This is the
/// one place in the kernel that reaches for an `extern "C"` linker symbol
/// outside of the entry stub above.
fn kernel_sections() -> [KernelSection; 4] {
    unsafe {
        [
            KernelSection {
                virt_start: addr_of(&__kernel_requests_start),
                virt_end: addr_of(&__kernel_requests_end),
                flags: PteFlags::PRESENT | PteFlags::NO_EXECUTE,
            },
            KernelSection {
                virt_start: addr_of(&__kernel_text_start),
                virt_end: addr_of(&__kernel_text_end),
                flags: PteFlags::PRESENT,
            },
            KernelSection {
                virt_start: addr_of(&__kernel_rodata_start),
                virt_end: addr_of(&__kernel_rodata_end),
                flags: PteFlags::PRESENT | PteFlags::NO_EXECUTE,
            },
            KernelSection {
                virt_start: addr_of(&__kernel_data_start),
                virt_end: addr_of(&__kernel_data_end),
                flags: PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::NO_EXECUTE,
            },
        ]
    }
}

extern "C" fn shell_entry(_arg: u64) -> ! {
    loop {
        if let Some(event) = keyboard::pop_event() {
            klog!(INFO, "key event: {:?}", event);
        }
        arch::enable_interrupts();
        arch::hlt();
    }
}

extern "C" fn kmain() -> ! {
    unsafe {
        console::init();
        kernel::gdt::init();
        idt::init();
        cpu::init();
    }

    klog!(INFO, "boot: gdt, idt and cpu feature probe done");

    // Copied out into a stack buffer, not a `Vec`: the kernel heap doesn't
    // exist yet (it comes up inside `init_kernel_vmm`, below), and this is
    // the very first thing boot touches.
    let memmap_response = MEMORY_MAP_REQUEST.get_response().expect("Limine did not answer the memory map request");
    let mut region_buf = [MemoryRegion { base: 0, length: 0, kind: MemoryRegionKind::Reserved }; cfg::MAX_MEMORY_REGIONS];
    let mut region_count = 0usize;
    for e in memmap_response.entries().iter() {
        if region_count == region_buf.len() {
            klog!(WARN, "boot: memory map has more than {} entries, dropping the rest", cfg::MAX_MEMORY_REGIONS);
            break;
        }
        region_buf[region_count] = MemoryRegion { base: e.base, length: e.length, kind: region_kind(e.entry_type) };
        region_count += 1;
    }
    let regions = &region_buf[..region_count];

    let hhdm_response = HHDM_REQUEST.get_response().expect("Limine did not answer the HHDM request");
    unsafe { memory::paging::set_hhdm_offset(hhdm_response.offset()) };

    let exec_response = EXECUTABLE_ADDRESS_REQUEST.get_response().expect("Limine did not answer the executable address request");
    let kernel_phys_base = exec_response.physical_base();
    let kernel_virt_base = exec_response.virtual_base();
    let kernel_phys_end = kernel_phys_base + (unsafe { addr_of(&__kernel_data_end) } - kernel_virt_base);

    let pfa = unsafe { memory::init_pfa(regions, kernel_phys_base, kernel_phys_end) };
    unsafe { memory::pfa::install(pfa) };

    let sections = kernel_sections();
    let pml4_phys = unsafe { memory::build_kernel_address_space(regions, kernel_phys_base, kernel_virt_base, &sections) };
    klog!(INFO, "boot: own CR3 installed at {:#x}", pml4_phys);

    let manager = unsafe { memory::init_kernel_vmm(pml4_phys, cfg::KERNEL_VMM_REGION_BASE) };
    let kernel_vmm = manager.kernel_vmm;

    if let Some(fb_response) = FRAMEBUFFER_REQUEST.get_response() {
        if let Some(fb) = fb_response.framebuffers().next() {
            let framebuffer = unsafe {
                console::framebuffer::Framebuffer::new(fb.addr(), fb.width() as usize, fb.height() as usize, fb.pitch() as usize, (fb.bpp() / 8) as usize)
            };
            console::attach_framebuffer(framebuffer);
        }
    }

    let rsdp_response = RSDP_REQUEST.get_response().expect("Limine did not answer the RSDP request");
    let rsdp_phys = rsdp_response.address() as u64 - hhdm_response.offset();
    let xsdt_phys = acpi::xsdt_address(rsdp_phys);

    let mut madt = None;
    let mut hpet_descriptor = None;
    acpi::for_each_relevant_table(xsdt_phys, |bytes| {
        if &bytes[0..4] == b"APIC" {
            madt = Some(acpi::parse_madt(bytes));
        } else if &bytes[0..4] == b"HPET" {
            hpet_descriptor = Some(acpi::parse_hpet(bytes));
        }
    });
    let madt = madt.expect("MADT table not present; this kernel requires one");
    let hpet_descriptor = hpet_descriptor.expect("HPET table not present; this kernel requires one");
    klog!(INFO, "boot: ACPI tables parsed ({} I/O APIC(s))", madt.io_apics.len());

    apic::pic::disable();
    unsafe { apic::lapic::init(kernel_vmm) };
    unsafe { apic::ioapic::init(kernel_vmm, &madt.io_apics) };
    apic::ioapic::route(cfg::GSI_PIT, cfg::VECTOR_PIT, 0);
    apic::ioapic::route(cfg::GSI_KEYBOARD, cfg::VECTOR_KEYBOARD, 0);

    unsafe { timers::hpet::init(kernel_vmm, &hpet_descriptor) };
    unsafe { keyboard::init() };

    arch::enable_interrupts();
    klog!(INFO, "boot: external interrupts enabled");

    unsafe { timers::init() };
    timers::arm(Duration::from_millis(cfg::SCHEDULER_QUANTUM_MS));
    klog!(INFO, "boot: timer plane calibrated and armed");

    unsafe { scheduler::init(pml4_phys, kernel_vmm) };
    unsafe { scheduler::create_process(kernel_vmm, pml4_phys, "shell", shell_entry, 0) };
    klog!(INFO, "boot: idle process running, shell task created");

    loop {
        arch::enable_interrupts();
        arch::hlt();
    }
}
