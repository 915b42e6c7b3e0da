//! Virtual Memory Manager: owns one address space's PML4 root and the list
//! of `VmObject`s mapped into it (§4.3).

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::cfg::PAGE_SIZE;
use crate::errors::VmmError;
use crate::memory::paging::{self, PteFlags};
use crate::memory::pfa;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VmFlags: u32 {
        const WRITE = 1 << 0;
        const USER = 1 << 1;
        const EXEC = 1 << 2;
        const MMIO = 1 << 3;
        /// Guard pages: record the VA window but never install a PTE for it,
        /// so any access faults.
        const DISABLED = 1 << 4;
    }
}

fn to_pte_flags(flags: VmFlags) -> PteFlags {
    let mut pte = PteFlags::PRESENT;
    if flags.contains(VmFlags::WRITE) {
        pte |= PteFlags::WRITABLE;
    }
    if flags.contains(VmFlags::USER) {
        pte |= PteFlags::USER;
    }
    if !flags.contains(VmFlags::EXEC) {
        pte |= PteFlags::NO_EXECUTE;
    }
    if flags.contains(VmFlags::MMIO) {
        pte |= PteFlags::NO_CACHE | PteFlags::WRITE_THROUGH;
    }
    pte
}

#[derive(Clone, Copy, Debug)]
pub struct VmObject {
    pub va_start: u64,
    pub length: u64,
    pub flags: VmFlags,
    /// `true` for MMIO-style mappings whose physical backing the PFA does
    /// not own and must not free.
    pub reserved: bool,
}

pub struct Vmm {
    pml4_phys: u64,
    frontier: u64,
    free_windows: Vec<(u64, u64)>,
    objects: Vec<VmObject>,
}

impl Vmm {
    pub fn new(pml4_phys: u64, region_base: u64) -> Self {
        Vmm { pml4_phys, frontier: region_base, free_windows: Vec::new(), objects: Vec::new() }
    }

    pub fn pml4_phys(&self) -> u64 {
        self.pml4_phys
    }

    fn take_window(&mut self, length: u64) -> u64 {
        if let Some(pos) = self.free_windows.iter().position(|&(_, len)| len >= length) {
            let (start, len) = self.free_windows.remove(pos);
            if len > length {
                self.free_windows.push((start + length, len - length));
            }
            return start;
        }
        let start = self.frontier;
        self.frontier += length;
        start
    }

    /// Picks the next free VA window that fits, maps it (contiguous
    /// physical via the PFA unless `physical_base` is given, for MMIO),
    /// and registers the object.
    pub fn alloc(&mut self, size: u64, flags: VmFlags, physical_base: Option<u64>) -> Result<VmObject, VmmError> {
        let length = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let va_start = self.take_window(length);

        let reserved = physical_base.is_some();
        let phys_base = match physical_base {
            Some(p) => p,
            None => pfa::alloc(length).map_err(|_| VmmError::OutOfMemory)?,
        };

        if !flags.contains(VmFlags::DISABLED) {
            paging::map_range(self.pml4_phys, va_start, phys_base, length, to_pte_flags(flags))?;
        }

        let object = VmObject { va_start, length, flags, reserved };
        self.objects.push(object);
        Ok(object)
    }

    /// Explicit mapping when the backing frames are already chosen.
    pub fn map(&mut self, va_start: u64, length: u64, backing: Option<u64>, flags: VmFlags) -> Result<VmObject, VmmError> {
        if !flags.contains(VmFlags::DISABLED) {
            let phys = backing.ok_or(VmmError::OutOfMemory)?;
            paging::map_range(self.pml4_phys, va_start, phys, length, to_pte_flags(flags))?;
        }
        let object = VmObject { va_start, length, flags, reserved: true };
        self.objects.push(object);
        Ok(object)
    }

    pub fn free(&mut self, region: VmObject) {
        self.objects.retain(|o| o.va_start != region.va_start);

        if region.flags.contains(VmFlags::DISABLED) {
            self.free_windows.push((region.va_start, region.length));
            return;
        }

        let pages = region.length / PAGE_SIZE;
        for i in 0..pages {
            let va = region.va_start + i * PAGE_SIZE;
            if region.reserved {
                paging::unmap_page_keep_frame(self.pml4_phys, va);
            } else {
                paging::unmap_page(self.pml4_phys, va);
            }
        }
        self.free_windows.push((region.va_start, region.length));
    }
}
