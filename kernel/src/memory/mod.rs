//! Boot-time memory bring-up: the physical frame allocator, the four-level
//! mapper, the per-address-space VMM and the kernel heap (§4.1–§4.4).
//!
//! This module takes plain, bootloader-agnostic data (a memory-region
//! slice, a kernel-section table) rather than `limine` types directly,
//! mirroring the boundary the teacher's own memory module drew against
//! `bootloader_api::info::MemoryRegions` — only `main.rs` talks to `limine`.

pub mod heap;
pub mod paging;
pub mod pfa;
pub mod vmm;

use crate::cfg::PAGE_SIZE;
use paging::PteFlags;
use vmm::Vmm;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    BootloaderReclaimable,
    ExecutableAndModules,
    Framebuffer,
}

#[derive(Clone, Copy, Debug)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

/// Physical/virtual bounds of one linked kernel section, read from the
/// symbols the linker script (§6) exports. Resolving those symbols is the
/// bootloader glue's job (only `main.rs` touches `extern "C"` linker
/// symbols, mirroring the `limine`-type boundary this module already draws)
/// — this module just consumes the bounds it's handed.
#[derive(Clone, Copy, Debug)]
pub struct KernelSection {
    pub virt_start: u64,
    pub virt_end: u64,
    pub flags: PteFlags,
}

fn boot_region_flags(kind: MemoryRegionKind) -> Option<PteFlags> {
    match kind {
        MemoryRegionKind::Usable | MemoryRegionKind::BootloaderReclaimable | MemoryRegionKind::ExecutableAndModules => {
            Some(PteFlags::PRESENT | PteFlags::WRITABLE)
        }
        MemoryRegionKind::Framebuffer | MemoryRegionKind::AcpiReclaimable | MemoryRegionKind::AcpiNvs => {
            Some(PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::WRITE_THROUGH | PteFlags::NO_CACHE)
        }
        MemoryRegionKind::Reserved | MemoryRegionKind::BadMemory => None,
    }
}

/// Marks every usable frame free (skipping frame 0, the NULL trap) then
/// reserves every frame the kernel image occupies, building the PFA's
/// backing bitmap out of a slice carved from the bump frontier above the
/// highest usable region (§4.1).
///
/// # Safety
/// Must run once at boot, before paging or the VMM.
pub unsafe fn init_pfa(regions: &[MemoryRegion], kernel_phys_start: u64, kernel_phys_end: u64) -> pfa::Pfa {
    let highest = regions.iter().map(|r| r.base + r.length).max().unwrap_or(0);
    let frame_count = (highest / PAGE_SIZE) as usize;
    let word_count = frame_count.div_ceil(64);

    // Carve the bitmap's own backing storage out of the largest usable
    // region, as a region of whole frames reserved immediately below.
    let bitmap_bytes = (word_count * 8) as u64;
    let bitmap_region = regions
        .iter()
        .filter(|r| r.kind == MemoryRegionKind::Usable && r.length >= bitmap_bytes)
        .max_by_key(|r| r.length)
        .expect("no usable region large enough for the PFA bitmap");
    let bitmap_phys = bitmap_region.base;
    let bitmap_ptr = paging::phys_to_virt(bitmap_phys) as *mut u64;
    let words: &'static mut [u64] = unsafe { core::slice::from_raw_parts_mut(bitmap_ptr, word_count) };

    let mut pfa = unsafe { pfa::Pfa::new(words, 0, frame_count) };

    for region in regions {
        if region.kind != MemoryRegionKind::Usable {
            continue;
        }
        let mut addr = region.base;
        let end = region.base + region.length;
        while addr < end {
            if addr != 0 {
                pfa.mark_free(addr);
            }
            addr += PAGE_SIZE;
        }
    }

    // Reserve the frames backing the bitmap itself.
    let mut addr = bitmap_phys;
    let bitmap_end = bitmap_phys + bitmap_bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE;
    while addr < bitmap_end {
        pfa.mark_reserved(addr);
        addr += PAGE_SIZE;
    }

    let mut addr = kernel_phys_start & !(PAGE_SIZE - 1);
    while addr < kernel_phys_end {
        pfa.mark_reserved(addr);
        addr += PAGE_SIZE;
    }

    pfa
}

/// Builds a fresh kernel PML4: HHDM mappings per the boot region policy,
/// plus the section-accurate kernel self-map, then loads it into CR3
/// (§4.2). `sections` is the linker-script-derived section table the
/// bootloader glue already resolved (§6).
///
/// # Safety
/// Must run once at boot, after `init_pfa`, with the HHDM offset already
/// installed via `paging::set_hhdm_offset`.
pub unsafe fn build_kernel_address_space(
    regions: &[MemoryRegion],
    kernel_phys_base: u64,
    kernel_virt_base: u64,
    sections: &[KernelSection],
) -> u64 {
    let pml4_phys = pfa::alloc_page().expect("out of memory allocating the kernel PML4");
    for word in unsafe { &mut *(paging::phys_to_virt(pml4_phys) as *mut [u64; 512]) }.iter_mut() {
        *word = 0;
    }

    let hhdm = paging::hhdm_offset();
    for region in regions {
        let Some(flags) = boot_region_flags(region.kind) else { continue };
        let _ = paging::map_range(pml4_phys, hhdm + region.base, region.base, region.length, flags);
    }

    for section in sections {
        let length = section.virt_end - section.virt_start;
        let phys_start = kernel_phys_base + (section.virt_start - kernel_virt_base);
        let _ = paging::map_range(pml4_phys, section.virt_start, phys_start, length, section.flags);
    }

    unsafe { paging::switch_to(pml4_phys) };
    pml4_phys
}

/// Owns the kernel's own VMM, leaked to `'static` since it lives for the
/// entire uptime of the kernel. Constructed *after* `heap::init`, so the
/// `Vec`-backed object list it needs to push to has a working allocator
/// behind it.
pub struct MemoryManager {
    pub kernel_vmm: &'static mut Vmm,
}

/// # Safety
/// Must run once, right after `build_kernel_address_space`. Brings up the
/// heap over its own fixed VA window first (§4.4), then constructs the
/// general-purpose kernel `Vmm` whose bump frontier starts above it.
pub unsafe fn init_kernel_vmm(pml4_phys: u64, vmm_region_base: u64) -> MemoryManager {
    unsafe { heap::init(pml4_phys) };
    let kernel_vmm: &'static mut Vmm = alloc::boxed::Box::leak(alloc::boxed::Box::new(Vmm::new(pml4_phys, vmm_region_base)));
    MemoryManager { kernel_vmm }
}
