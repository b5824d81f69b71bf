// Process image replacement: tear down the current process's user
// mappings and load a fresh ELF image to run in their place. Never
// returns on success.

use crate::arch::riscv64::context;
use crate::arch::riscv64::trap::{TrapFrame, SSTATUS_SPIE};
use crate::io_cap::IoCap;
use crate::lib::error::KernelError;
use crate::mm::address_space::{self, USER_STACK_VMA};
use crate::process::elf;
use crate::process::{process, thread};

pub fn exec_current(pid: u32, io: IoCap) -> Result<isize, KernelError> {
    let mtag = process::mtag_of(pid);
    address_space::unmap_user_range(&mtag);

    let entry = elf::load(&io, &mtag)?;

    let mut frame = TrapFrame::zeroed();
    frame.regs[1] = USER_STACK_VMA; // x2 / sp; the stack page itself is
    // created lazily by the first store fault, matching every other
    // demand-paged user mapping.
    frame.sepc = entry;
    frame.sstatus = SSTATUS_SPIE;

    jump_to_user_on_riscv(&frame, thread::kstack_top_of(thread::current_tid()))
}

#[cfg(target_arch = "riscv64")]
fn jump_to_user_on_riscv(frame: &TrapFrame, kstack: usize) -> ! {
    context::jump_to_user(frame, kstack)
}
#[cfg(not(target_arch = "riscv64"))]
fn jump_to_user_on_riscv(_frame: &TrapFrame, _kstack: usize) -> ! {
    loop {
        thread::yield_current();
    }
}
