//! Four-level x86_64 paging: raw, bit-packed page-table entries walked and
//! built by hand rather than through a crate's `Mapper` trait, since the
//! VMM above it needs to reason about the exact PTE bits (§4.2, §4.3).

use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::cfg::PAGE_SIZE;
use crate::errors::VmmError;
use crate::memory::pfa;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const NO_EXECUTE = 1 << 63;
    }
}

const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

/// The HHDM (Higher-Half Direct Map) offset Limine reports; every physical
/// frame is reachable at `HHDM_OFFSET + phys`. Set once at boot.
static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// # Safety
/// Must be called exactly once at boot with the offset Limine's HHDM
/// response reports, before any `phys_to_virt`/`virt_to_phys` call.
pub unsafe fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Relaxed);
}

pub fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Relaxed)
}

pub fn phys_to_virt(phys: u64) -> u64 {
    hhdm_offset() + phys
}

/// Valid only for addresses inside the HHDM window (§4.2).
pub fn virt_to_phys(virt: u64) -> u64 {
    virt - hhdm_offset()
}

fn table_at(phys: u64) -> &'static mut [u64; 512] {
    unsafe { &mut *(phys_to_virt(phys) as *mut [u64; 512]) }
}

struct Indices {
    pml4: usize,
    pdpt: usize,
    pd: usize,
    pt: usize,
}

fn split(va: u64) -> Indices {
    Indices {
        pml4: ((va >> 39) & 0x1FF) as usize,
        pdpt: ((va >> 30) & 0x1FF) as usize,
        pd: ((va >> 21) & 0x1FF) as usize,
        pt: ((va >> 12) & 0x1FF) as usize,
    }
}

/// Walks from `pml4_phys` down to the leaf table that would hold `va`'s PTE,
/// creating any missing intermediate table along the way. Intermediate
/// tables are always `Present|Writable(|User)` (§4.2): permission
/// enforcement happens at the leaf.
fn walk_create(pml4_phys: u64, va: u64, user: bool) -> Result<(&'static mut [u64; 512], usize), VmmError> {
    let idx = split(va);
    let mut table_phys = pml4_phys;

    for &index in &[idx.pml4, idx.pdpt, idx.pd] {
        let table = table_at(table_phys);
        let entry = table[index];
        if entry & PteFlags::PRESENT.bits() == 0 {
            let new_table_phys = pfa::alloc_page().map_err(|_| VmmError::OutOfMemory)?;
            for word in table_at(new_table_phys).iter_mut() {
                *word = 0;
            }
            let mut flags = PteFlags::PRESENT | PteFlags::WRITABLE;
            if user {
                flags |= PteFlags::USER;
            }
            table[index] = (new_table_phys & ADDR_MASK) | flags.bits();
            table_phys = new_table_phys;
        } else {
            table_phys = entry & ADDR_MASK;
        }
    }

    Ok((table_at(table_phys), idx.pt))
}

/// Walks without creating; returns `None` if any intermediate table is
/// absent.
fn walk_existing(pml4_phys: u64, va: u64) -> Option<(&'static mut [u64; 512], usize)> {
    let idx = split(va);
    let mut table_phys = pml4_phys;

    for &index in &[idx.pml4, idx.pdpt, idx.pd] {
        let table = table_at(table_phys);
        let entry = table[index];
        if entry & PteFlags::PRESENT.bits() == 0 {
            return None;
        }
        table_phys = entry & ADDR_MASK;
    }

    Some((table_at(table_phys), idx.pt))
}

pub fn map_page(pml4_phys: u64, va: u64, pa: u64, flags: PteFlags) -> Result<(), VmmError> {
    let va = va & !(PAGE_SIZE - 1);
    let pa = pa & !(PAGE_SIZE - 1);
    let (pt, pt_index) = walk_create(pml4_phys, va, flags.contains(PteFlags::USER))?;
    pt[pt_index] = (pa & ADDR_MASK) | flags.bits();
    Ok(())
}

pub fn map_range(pml4_phys: u64, va: u64, pa: u64, length: u64, flags: PteFlags) -> Result<(), VmmError> {
    let pages = length.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        map_page(pml4_phys, va + i * PAGE_SIZE, pa + i * PAGE_SIZE, flags)?;
    }
    Ok(())
}

/// Clears the leaf's Present bit, invalidates the TLB entry, frees the
/// backing frame, then recursively frees any intermediate table that just
/// became fully empty (§4.2), keeping page-table memory proportional to
/// live mappings.
pub fn unmap_page(pml4_phys: u64, va: u64) {
    unmap_page_inner(pml4_phys, va, true);
}

/// Like `unmap_page`, but leaves the backing frame's PFA accounting alone.
/// Used for MMIO-style mappings the PFA never owned.
pub fn unmap_page_keep_frame(pml4_phys: u64, va: u64) {
    unmap_page_inner(pml4_phys, va, false);
}

fn unmap_page_inner(pml4_phys: u64, va: u64, free_frame: bool) {
    let va = va & !(PAGE_SIZE - 1);
    let Some((pt, pt_index)) = walk_existing(pml4_phys, va) else { return };

    let entry = pt[pt_index];
    if entry & PteFlags::PRESENT.bits() == 0 {
        return;
    }
    let frame = entry & ADDR_MASK;
    pt[pt_index] = 0;
    crate::arch::invlpg(va);
    if free_frame {
        let _ = pfa::free(frame, PAGE_SIZE);
    }

    reap_empty_parents(pml4_phys, va);
}

fn table_is_empty(table: &[u64; 512]) -> bool {
    table.iter().all(|&e| e & PteFlags::PRESENT.bits() == 0)
}

fn reap_empty_parents(pml4_phys: u64, va: u64) {
    let idx = split(va);
    let pml4 = table_at(pml4_phys);

    let pdpt_entry = pml4[idx.pml4];
    if pdpt_entry & PteFlags::PRESENT.bits() == 0 {
        return;
    }
    let pdpt_phys = pdpt_entry & ADDR_MASK;
    let pdpt = table_at(pdpt_phys);

    let pd_entry = pdpt[idx.pdpt];
    if pd_entry & PteFlags::PRESENT.bits() == 0 {
        return;
    }
    let pd_phys = pd_entry & ADDR_MASK;
    let pd = table_at(pd_phys);

    let pt_entry = pd[idx.pd];
    if pt_entry & PteFlags::PRESENT.bits() == 0 {
        return;
    }
    let pt_phys = pt_entry & ADDR_MASK;
    let pt = table_at(pt_phys);

    if !table_is_empty(pt) {
        return;
    }
    pd[idx.pd] = 0;
    let _ = pfa::free(pt_phys, PAGE_SIZE);

    if !table_is_empty(pd) {
        return;
    }
    pdpt[idx.pdpt] = 0;
    let _ = pfa::free(pd_phys, PAGE_SIZE);

    if !table_is_empty(pdpt) {
        return;
    }
    pml4[idx.pml4] = 0;
    let _ = pfa::free(pdpt_phys, PAGE_SIZE);
}

/// # Safety
/// `pml4_phys` must address a fully-formed hierarchy mapping the currently
/// executing code and stack.
pub unsafe fn switch_to(pml4_phys: u64) {
    unsafe { crate::arch::write_cr3(pml4_phys) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_split_matches_canonical_bit_layout() {
        // 0xffffffff80000000, the top-2GiB kernel base from the linker script.
        let idx = split(0xffff_ffff_8000_0000);
        assert_eq!(idx.pml4, 511);
        assert_eq!(idx.pdpt, 510);
        assert_eq!(idx.pd, 0);
        assert_eq!(idx.pt, 0);
    }

    #[test]
    fn pte_flags_round_trip_through_bit_packing() {
        let flags = PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::NO_EXECUTE;
        let packed = (0x1000u64 & ADDR_MASK) | flags.bits();
        assert_eq!(packed & PteFlags::PRESENT.bits(), PteFlags::PRESENT.bits());
        assert_eq!(packed & ADDR_MASK, 0x1000);
        assert_ne!(packed & PteFlags::NO_EXECUTE.bits(), 0);
    }
}
