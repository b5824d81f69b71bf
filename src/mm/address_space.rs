// Per-process address spaces (mtags) over the shared Sv39 kernel-half
// tables, plus the one-time kernel init sequence.

use crate::lib::error::KernelError;
use crate::mm::page_pool::{alloc_page, free_page, PAGE_SIZE};
use crate::mm::sv39::{self, PageTable, PteFlags};
use spin::Mutex;

/// Low 2 GiB: MMIO, identity-mapped R|W|G.
pub const MMIO_IDENTITY_END: usize = 2 * 1024 * 1024 * 1024;
/// Kernel image, heap, and free-page pool live in the third gigabyte up.
pub const RAM_START: usize = 0x8000_0000;

pub const USER_START_VMA: usize = 0x1000_0000;
pub const USER_END_VMA: usize = 0x3000_0000;
pub const USER_STACK_VMA: usize = USER_END_VMA - PAGE_SIZE;

/// Opaque address-space identifier: an `satp` value plus the root table's
/// physical address (kept alongside since `satp` only carries its PPN).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mtag {
    pub satp: usize,
    pub root_phys: usize,
}

static KERNEL_ROOT: Mutex<usize> = Mutex::new(0);
static NEXT_ASID: Mutex<usize> = Mutex::new(1);

fn kernel_root_phys() -> usize {
    *KERNEL_ROOT.lock()
}

/// Builds the kernel master tables, activates paging, and seeds the heap
/// and physical page pool. `ram_end` is the first address past usable RAM.
///
/// The page pool has to exist before the first `alloc_page()` call: the
/// root table itself, and every intermediate table `sv39::walk` creates
/// while mapping the ranges below, come out of it. There is no paging yet
/// at this point in boot (satp is still 0), so physical addresses are
/// plain addresses; seeding the pool over `[heap_end, ram_end)` up front
/// is safe before any table exists to map that range into.
pub fn init(kernel_text_start: usize, kernel_text_end: usize, kernel_rodata_end: usize, kernel_end: usize, ram_end: usize) {
    let heap_end = kernel_end + crate::mm::heap::HEAP_SIZE;
    crate::mm::heap::init(kernel_end, heap_end);
    crate::mm::page_pool::init(heap_end, ram_end);

    let root_phys = alloc_page();
    *KERNEL_ROOT.lock() = root_phys;
    let root = PageTable::zeroed_at(root_phys);

    map_giant_identity(root, 0, MMIO_IDENTITY_END, PteFlags::KERNEL_RW_GLOBAL);

    map_range(root, kernel_text_start, kernel_text_end, kernel_text_start, PteFlags::KERNEL_RX_GLOBAL);
    map_range(root, kernel_text_end, kernel_rodata_end, kernel_text_end, PteFlags::KERNEL_RO_GLOBAL);
    map_range(root, kernel_rodata_end, kernel_end, kernel_rodata_end, PteFlags::KERNEL_RW_GLOBAL);
    map_range(root, kernel_end, heap_end, kernel_end, PteFlags::KERNEL_RW_GLOBAL);
    map_range(root, heap_end, ram_end, heap_end, PteFlags::KERNEL_RW_GLOBAL);

    let satp = sv39::make_satp(0, root_phys);
    sv39::write_satp(satp);
}

fn map_giant_identity(root: &mut PageTable, start: usize, end: usize, flags: PteFlags) {
    map_range(root, start, end, start, flags);
}

fn map_range(root: &mut PageTable, va_start: usize, va_end: usize, pa_start: usize, flags: PteFlags) {
    let mut va = sv39::page_round_down(va_start);
    let end = (va_end + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    let mut pa = pa_start & !(PAGE_SIZE - 1);
    while va < end {
        if let Some(pte) = sv39::walk(root, va, true) {
            pte.set(pa, flags | PteFlags::V | PteFlags::A | PteFlags::D);
        }
        va += PAGE_SIZE;
        pa += PAGE_SIZE;
    }
}

fn next_asid() -> usize {
    let mut n = NEXT_ASID.lock();
    let v = *n;
    *n += 1;
    v
}

/// The distinguished kernel-only space: no user mappings, asid 0.
pub fn main_space() -> Mtag {
    let root = kernel_root_phys();
    Mtag { satp: sv39::make_satp(0, root), root_phys: root }
}

/// A fresh process space sharing the kernel half by reference. Per-process
/// root tables are allocated, but the two upper-level entries covering the
/// kernel's half of the address space point at the exact same physical
/// sub-tables as the main space; nothing is copied or mutated in the
/// parent's tables.
pub fn space_create() -> Mtag {
    let new_root_phys = alloc_page();
    let new_root = PageTable::zeroed_at(new_root_phys);
    let kernel_root = PageTable::zeroed_at(kernel_root_phys());

    // The user range [USER_START_VMA, USER_END_VMA) lives entirely below
    // the kernel image on this layout, so every top-level index touched by
    // user mappings is distinct from every index the kernel half occupies;
    // share all kernel-half top-level entries by value (same sub-table
    // pointer, G bit already set), leave the rest empty for user use.
    for i in 0..512 {
        let pte = kernel_root.entries[i];
        if pte.is_valid() {
            new_root.entries[i] = pte;
        }
    }

    Mtag { satp: sv39::make_satp(next_asid(), new_root_phys), root_phys: new_root_phys }
}

/// `space_create`, then an eager physical copy of every user-visible leaf
/// in the currently active space.
pub fn space_clone(active: &Mtag) -> Mtag {
    let child = space_create();
    let active_root = PageTable::zeroed_at(active.root_phys);
    let child_root = PageTable::zeroed_at(child.root_phys);

    let mut va = USER_START_VMA;
    while va < USER_END_VMA {
        if let Some(pte) = sv39::walk(active_root, va, false) {
            if pte.is_valid() && pte.flags().contains(PteFlags::U) {
                let new_frame = alloc_page();
                unsafe {
                    core::ptr::copy_nonoverlapping(pte.phys_addr() as *const u8, new_frame as *mut u8, PAGE_SIZE);
                }
                if let Some(child_pte) = sv39::walk(child_root, va, true) {
                    child_pte.set(new_frame, pte.flags());
                }
            }
        }
        va += PAGE_SIZE;
    }
    child
}

/// Frees every frame reachable through a `U=1` leaf in `mtag`'s own
/// tables, leaving the space itself (and the kernel half) intact. Used
/// both by `exit` (which switches away afterward) and by `exec` (which
/// keeps running in the same space it is about to repopulate).
pub fn unmap_user_range(mtag: &Mtag) {
    sv39::sfence_vma_all();
    let root = PageTable::zeroed_at(mtag.root_phys);
    let mut va = USER_START_VMA;
    while va < USER_END_VMA {
        if let Some(pte) = sv39::walk(root, va, false) {
            if pte.is_valid() && pte.flags().contains(PteFlags::U) {
                free_page(pte.phys_addr());
                pte.set(0, sv39::PteFlags::empty());
            }
        }
        va += PAGE_SIZE;
    }
    sv39::sfence_vma_all();
}

/// `unmap_user_range`, then switch back to the main space. Kernel-half
/// frames are untouched.
pub fn space_reclaim(active: &Mtag) {
    unmap_user_range(active);
    space_switch(&main_space());
}

pub fn space_switch(target: &Mtag) {
    sv39::write_satp(target.satp);
}

/// Allocates a frame, walks with `create=1`, writes the leaf, and flushes.
pub fn alloc_and_map(mtag: &Mtag, va: usize, flags: PteFlags) -> Result<usize, KernelError> {
    let root = PageTable::zeroed_at(mtag.root_phys);
    let frame = alloc_page();
    match sv39::walk(root, va, true) {
        Some(pte) => {
            pte.set(frame, flags | PteFlags::V | PteFlags::A | PteFlags::D);
            sv39::sfence_vma_all();
            Ok(frame)
        }
        None => {
            free_page(frame);
            Err(KernelError::InvalidArgument)
        }
    }
}

pub fn alloc_and_map_range(mtag: &Mtag, va_start: usize, size: usize, flags: PteFlags) -> Result<(), KernelError> {
    if size % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let mut va = va_start;
    while va < va_start + size {
        alloc_and_map(mtag, va, flags)?;
        va += PAGE_SIZE;
    }
    Ok(())
}

pub fn set_page_flags(mtag: &Mtag, va: usize, flags: PteFlags) -> Result<(), KernelError> {
    let root = PageTable::zeroed_at(mtag.root_phys);
    match sv39::walk(root, va, false) {
        Some(pte) if pte.is_valid() => {
            let phys = pte.phys_addr();
            let preserved = pte.flags() & (PteFlags::V | PteFlags::A | PteFlags::D);
            pte.set(phys, preserved | flags);
            sv39::sfence_vma_all();
            Ok(())
        }
        _ => Err(KernelError::InvalidArgument),
    }
}
