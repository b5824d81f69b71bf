// Demand-page fault handling. Only load/store faults inside the user
// virtual range are recoverable; everything else is fatal. There is no
// copy-on-write in this kernel: `space_clone` already copies eagerly, so a
// fault handler only ever needs the zero-fill demand-allocation path.

use crate::lib::error::KernelError;
use crate::mm::address_space::{self, USER_END_VMA, USER_START_VMA};
use crate::mm::sv39::{self, PteFlags};

pub fn handle_page_fault(faulting_va: usize) -> Result<(), KernelError> {
    if faulting_va < USER_START_VMA || faulting_va >= USER_END_VMA {
        return Err(KernelError::BadFormat);
    }

    let mtag = crate::process::current::current_mtag();
    let page_va = sv39::page_round_down(faulting_va);
    // alloc_page zero-fills the frame, so the new mapping is zero-filled
    // without any extra work here.
    address_space::alloc_and_map(&mtag, page_va, PteFlags::USER_RW)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_address_outside_user_range() {
        assert_eq!(handle_page_fault(USER_END_VMA), Err(KernelError::BadFormat));
        assert_eq!(handle_page_fault(0), Err(KernelError::BadFormat));
    }
}
