// Syscall decode and dispatch. Every user pointer argument passes through
// `mm::uaccess` before the kernel touches it; nothing else is trusted
// from `a0..a2`.

use crate::arch::riscv64::trap::TrapFrame;
use crate::io_cap;
use crate::lib::error::KernelError;
use crate::lib::printk;
use crate::mm::sv39::PteFlags;
use crate::mm::uaccess;
use crate::process::{current, process, thread};
use alloc::vec::Vec;

pub const SYS_EXIT: usize = 0;
pub const SYS_MSGOUT: usize = 1;
pub const SYS_DEVOPEN: usize = 2;
pub const SYS_FSOPEN: usize = 3;
pub const SYS_CLOSE: usize = 4;
pub const SYS_READ: usize = 5;
pub const SYS_WRITE: usize = 6;
pub const SYS_IOCTL: usize = 7;
pub const SYS_EXEC: usize = 8;
pub const SYS_FORK: usize = 9;
pub const SYS_WAIT: usize = 10;
pub const SYS_USLEEP: usize = 11;
pub const SYS_PIOREF: usize = 12;

const MAX_MSG_LEN: usize = 256;
const MAX_NAME_LEN: usize = 32;

/// Decodes and runs one syscall named by `frame.a7()`, returning the value
/// to place in `a0` (negative errno on failure). Called with `sepc`
/// already advanced past the `ecall` that trapped here.
pub fn dispatch(frame: &mut TrapFrame) -> isize {
    let num = frame.a7();
    if num == SYS_EXIT {
        current::exit_current(frame.a0() as i32);
    }
    match run(num, frame) {
        Ok(v) => v,
        Err(e) => e.as_errno(),
    }
}

fn run(num: usize, frame: &mut TrapFrame) -> Result<isize, KernelError> {
    match num {
        SYS_MSGOUT => sys_msgout(frame),
        SYS_DEVOPEN => sys_open(frame, OpenKind::Device),
        SYS_FSOPEN => sys_open(frame, OpenKind::File),
        SYS_CLOSE => sys_close(frame),
        SYS_READ => sys_read(frame),
        SYS_WRITE => sys_write(frame),
        SYS_IOCTL => sys_ioctl(frame),
        SYS_EXEC => sys_exec(frame),
        SYS_FORK => sys_fork(frame),
        SYS_WAIT => sys_wait(frame),
        SYS_USLEEP => sys_usleep(frame),
        SYS_PIOREF => sys_pioref(frame),
        _ => Err(KernelError::Unsupported),
    }
}

fn read_user_string(ptr: usize, max_len: usize) -> Result<Vec<u8>, KernelError> {
    let mtag = current::current_mtag();
    let len = uaccess::validate_vstr(&mtag, ptr, PteFlags::U | PteFlags::R)?;
    if len > max_len {
        return Err(KernelError::InvalidArgument);
    }
    let mut out = alloc::vec![0u8; len];
    unsafe { core::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), len) };
    Ok(out)
}

fn user_bytes_mut(ptr: usize, len: usize) -> Result<&'static mut [u8], KernelError> {
    let mtag = current::current_mtag();
    uaccess::validate_vptr_len(&mtag, ptr, len, PteFlags::U | PteFlags::W)?;
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) })
}

fn user_bytes(ptr: usize, len: usize) -> Result<&'static [u8], KernelError> {
    let mtag = current::current_mtag();
    uaccess::validate_vptr_len(&mtag, ptr, len, PteFlags::U | PteFlags::R)?;
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len) })
}

fn sys_msgout(frame: &TrapFrame) -> Result<isize, KernelError> {
    let bytes = read_user_string(frame.a0(), MAX_MSG_LEN)?;
    let msg = core::str::from_utf8(&bytes).map_err(|_| KernelError::BadFormat)?;
    printk::msgout(current::current_pid(), msg);
    Ok(0)
}

enum OpenKind {
    Device,
    File,
}

fn sys_open(frame: &TrapFrame, kind: OpenKind) -> Result<isize, KernelError> {
    let requested_fd = frame.a0() as isize;
    let name_bytes = read_user_string(frame.a1(), MAX_NAME_LEN)?;
    let name = core::str::from_utf8(&name_bytes).map_err(|_| KernelError::BadFormat)?;
    let cap = match kind {
        OpenKind::Device => {
            let instno = frame.a2();
            crate::virtio::blk::open_device(name, instno)?
        }
        OpenKind::File => crate::fs::open(name)?,
    };
    let pid = current::current_pid();
    match process::install_fd(pid, requested_fd, cap.clone()) {
        Ok(fd) => Ok(fd as isize),
        Err(e) => {
            io_cap::release(cap);
            Err(e)
        }
    }
}

fn sys_close(frame: &TrapFrame) -> Result<isize, KernelError> {
    process::close_fd(current::current_pid(), frame.a0())?;
    Ok(0)
}

fn sys_read(frame: &TrapFrame) -> Result<isize, KernelError> {
    let cap = process::get_fd(current::current_pid(), frame.a0())?;
    let buf = user_bytes_mut(frame.a1(), frame.a2())?;
    let n = cap.lock().read(buf)?;
    Ok(n as isize)
}

fn sys_write(frame: &TrapFrame) -> Result<isize, KernelError> {
    let cap = process::get_fd(current::current_pid(), frame.a0())?;
    let buf = user_bytes(frame.a1(), frame.a2())?;
    let n = cap.lock().write(buf)?;
    Ok(n as isize)
}

fn sys_ioctl(frame: &TrapFrame) -> Result<isize, KernelError> {
    let cap = process::get_fd(current::current_pid(), frame.a0())?;
    let cmd = frame.a1() as u32;
    let arg = frame.a2();
    let result = cap.lock().ioctl(cmd, arg);
    result
}

fn sys_exec(frame: &TrapFrame) -> Result<isize, KernelError> {
    let fd = frame.a0();
    let pid = current::current_pid();
    let cap = process::get_fd(pid, fd)?;
    crate::process::exec::exec_current(pid, cap)
}

fn sys_fork(frame: &mut TrapFrame) -> Result<isize, KernelError> {
    let child_pid = current::fork_current(frame)?;
    let child_tid = process::tid_of(child_pid).ok_or(KernelError::NotFound)?;
    Ok(child_tid as isize)
}

fn sys_wait(frame: &TrapFrame) -> Result<isize, KernelError> {
    let target_tid = frame.a0() as i64;
    if target_tid < 0 || target_tid as usize >= thread::MAX_THREADS {
        return Err(KernelError::NotFound);
    }
    let tid = target_tid as thread::Tid;
    let _ = thread::join(tid);
    Ok(tid as isize)
}

fn sys_usleep(frame: &TrapFrame) -> Result<isize, KernelError> {
    let micros = frame.a0() as u64;
    crate::arch::riscv64::timer::sleep_micros(micros);
    Ok(0)
}

fn sys_pioref(frame: &TrapFrame) -> Result<isize, KernelError> {
    let pid = current::current_pid();
    let cap = process::get_fd(pid, frame.a0())?;
    let new_fd = process::install_fd(pid, frame.a1() as isize, cap)?;
    Ok(new_fd as isize)
}
