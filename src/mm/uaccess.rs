// User-pointer validation: the only entry points through which kernel code
// is allowed to touch a user-mode address. Flag containment must be a
// bitwise subset check (`page_flags & need_flags == need_flags`) — a
// boolean-AND check that only asks "is some flag nonzero" is a correctness
// bug, not an acceptable simplification, and is explicitly tested against
// below.

use crate::lib::error::KernelError;
use crate::mm::address_space::Mtag;
use crate::mm::sv39::{self, PageTable, PteFlags};

fn page_flags_at(mtag: &Mtag, va: usize) -> Option<PteFlags> {
    let root = PageTable::zeroed_at(mtag.root_phys);
    sv39::walk(root, va, false).filter(|pte| pte.is_valid()).map(|pte| pte.flags())
}

fn has_required_flags(actual: PteFlags, needed: PteFlags) -> bool {
    actual.contains(needed)
}

/// Verifies that every page touched by `[ptr, ptr+len)` is mapped with at
/// least `need_flags` (and `V`). Returns `BadFormat` on any gap.
pub fn validate_vptr_len(mtag: &Mtag, ptr: usize, len: usize, need_flags: PteFlags) -> Result<(), KernelError> {
    if len == 0 {
        return Ok(());
    }
    let start = sv39::page_round_down(ptr);
    let end = sv39::page_round_down(ptr + len - 1);
    let mut va = start;
    loop {
        match page_flags_at(mtag, va) {
            Some(flags) if has_required_flags(flags, need_flags | PteFlags::V) => {}
            _ => return Err(KernelError::BadFormat),
        }
        if va == end {
            break;
        }
        va += crate::mm::page_pool::PAGE_SIZE;
    }
    Ok(())
}

/// Like `validate_vptr_len`, but for a NUL-terminated string of unknown
/// length: walks page by page until the first zero byte is found within a
/// mapped, sufficiently-permissioned region. Returns the string's length
/// (excluding the terminator) on success.
pub fn validate_vstr(mtag: &Mtag, ptr: usize, need_flags: PteFlags) -> Result<usize, KernelError> {
    let page_size = crate::mm::page_pool::PAGE_SIZE;
    let mut va = sv39::page_round_down(ptr);
    let mut offset_in_page = ptr - va;
    let mut len = 0usize;
    loop {
        match page_flags_at(mtag, va) {
            Some(flags) if has_required_flags(flags, need_flags | PteFlags::V) => {}
            _ => return Err(KernelError::BadFormat),
        }
        let page_base = va;
        while offset_in_page < page_size {
            let byte = unsafe { core::ptr::read((page_base + offset_in_page) as *const u8) };
            if byte == 0 {
                return Ok(len);
            }
            len += 1;
            offset_in_page += 1;
        }
        offset_in_page = 0;
        va += page_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitwise_subset_check_rejects_partial_match() {
        // R-only must not satisfy a need of R|W: a boolean-AND regression
        // (`actual.bits() != 0 && needed.bits() != 0`) would wrongly pass this.
        let actual = PteFlags::V | PteFlags::R;
        let needed = PteFlags::R | PteFlags::W;
        assert!(!has_required_flags(actual, needed));
    }

    #[test]
    fn bitwise_subset_check_accepts_superset() {
        let actual = PteFlags::V | PteFlags::R | PteFlags::W | PteFlags::U;
        let needed = PteFlags::R | PteFlags::W;
        assert!(has_required_flags(actual, needed));
    }
}
