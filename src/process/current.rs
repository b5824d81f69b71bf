// Accessors for "the currently running process", the software analogue of
// reading the hardware thread pointer register and following it to the
// process it belongs to.

use crate::mm::address_space::Mtag;
use crate::process::{process, thread};

pub fn current_pid() -> u32 {
    thread::current_process().expect("current: running thread has no owning process")
}

pub fn current_mtag() -> Mtag {
    process::mtag_of(current_pid())
}

/// Tears down the current process and terminates its thread. Does not
/// return.
pub fn exit_current(code: i32) -> ! {
    process::exit_current(current_pid(), code)
}

/// Accepts the calling thread's trap frame at the `ecall` it's currently
/// servicing and forks the current process from it.
pub fn fork_current(frame: &crate::arch::riscv64::trap::TrapFrame) -> Result<u32, crate::lib::error::KernelError> {
    process::fork(current_pid(), frame)
}
