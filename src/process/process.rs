// Process table and the `fork`/`exec`/`exit` semantics built on top of the
// address-space manager (mm::address_space) and the thread layer
// (process::thread).

use crate::arch::riscv64::context;
use crate::arch::riscv64::trap::{without_interrupts, TrapFrame, SSTATUS_SPIE};
use crate::io_cap::{self, IoCap};
use crate::lib::error::KernelError;
use crate::mm::address_space::{self, Mtag, USER_STACK_VMA};
use crate::process::thread::{self, Tid};
use spin::Mutex;

pub const MAX_PROCESSES: usize = 16;
pub const IOTAB_SIZE: usize = 16;
const KERNEL_STACK_SIZE: usize = 4096 * 4;

pub struct Process {
    pub pid: u32,
    pub tid: Tid,
    pub mtag: Mtag,
    pub iotab: [Option<IoCap>; IOTAB_SIZE],
}

impl Process {
    const fn empty(pid: u32) -> Self {
        const NONE: Option<IoCap> = None;
        Self { pid, tid: 0, mtag: Mtag { satp: 0, root_phys: 0 }, iotab: [NONE; IOTAB_SIZE] }
    }
}

struct ProcessTable {
    slots: [Option<Process>; MAX_PROCESSES],
}

static TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable { slots: { const NONE: Option<Process> = None; [NONE; MAX_PROCESSES] } });

/// Per-process kernel stack storage, indexed by pid. Fixed-size, matching
/// the fixed-size process table.
static mut KSTACKS: [[u8; KERNEL_STACK_SIZE]; MAX_PROCESSES] = [[0; KERNEL_STACK_SIZE]; MAX_PROCESSES];

fn kstack_top(pid: u32) -> usize {
    unsafe { core::ptr::addr_of_mut!(KSTACKS[pid as usize]) as usize + KERNEL_STACK_SIZE }
}

fn alloc_fd(iotab: &[Option<IoCap>; IOTAB_SIZE], requested: isize) -> Result<usize, KernelError> {
    if requested >= 0 {
        let idx = requested as usize;
        if idx >= IOTAB_SIZE {
            return Err(KernelError::InvalidArgument);
        }
        if iotab[idx].is_some() {
            return Err(KernelError::Busy);
        }
        Ok(idx)
    } else {
        (0..IOTAB_SIZE).find(|&i| iotab[i].is_none()).ok_or(KernelError::TooManyOpen)
    }
}

/// Installs `cap` at `requested` (or the lowest free slot if negative).
pub fn install_fd(pid: u32, requested: isize, cap: IoCap) -> Result<usize, KernelError> {
    let mut table = TABLE.lock();
    let proc = table.slots[pid as usize].as_mut().ok_or(KernelError::NotFound)?;
    let idx = alloc_fd(&proc.iotab, requested)?;
    proc.iotab[idx] = Some(cap);
    Ok(idx)
}

pub fn tid_of(pid: u32) -> Option<Tid> {
    if pid as usize >= MAX_PROCESSES {
        return None;
    }
    without_interrupts(|| TABLE.lock().slots[pid as usize].as_ref().map(|p| p.tid))
}

pub fn mtag_of(pid: u32) -> Mtag {
    without_interrupts(|| TABLE.lock().slots[pid as usize].as_ref().expect("process: mtag_of on empty slot").mtag)
}

pub fn get_fd(pid: u32, fd: usize) -> Result<IoCap, KernelError> {
    if fd >= IOTAB_SIZE {
        return Err(KernelError::BadDescriptor);
    }
    let table = TABLE.lock();
    let proc = table.slots[pid as usize].as_ref().ok_or(KernelError::BadDescriptor)?;
    proc.iotab[fd].clone().ok_or(KernelError::BadDescriptor)
}

pub fn close_fd(pid: u32, fd: usize) -> Result<(), KernelError> {
    if fd >= IOTAB_SIZE {
        return Err(KernelError::BadDescriptor);
    }
    let cap = {
        let mut table = TABLE.lock();
        let proc = table.slots[pid as usize].as_mut().ok_or(KernelError::BadDescriptor)?;
        proc.iotab[fd].take().ok_or(KernelError::BadDescriptor)?
    };
    io_cap::release(cap);
    Ok(())
}

/// Side channel carrying pid 0's boot image capability from `spawn_init`
/// into `init_thread_entry`, for the same reason `PENDING_FORK_FRAMES`
/// exists: `thread::spawn`'s `(entry_fn, arg: usize)` shape can't carry a
/// fat pointer like `IoCap`.
static PENDING_INIT_IO: Mutex<Option<IoCap>> = Mutex::new(None);

/// Spawns pid 0, the kernel's initial process, loading and entering the
/// ELF image read through `io`. Never returns.
pub fn spawn_init(io: IoCap) -> ! {
    let mtag = address_space::space_create();

    let mut table = TABLE.lock();
    let mut proc = Process::empty(0);
    proc.mtag = mtag;
    table.slots[0] = Some(proc);
    drop(table);

    *PENDING_INIT_IO.lock() = Some(io);

    let kstack = kstack_top(0);
    let tid = thread::spawn(init_thread_entry, 0, kstack, kstack, None).expect("process: failed to spawn pid 0");
    thread::set_current_process_for(tid, 0);
    without_interrupts(|| {
        TABLE.lock().slots[0].as_mut().unwrap().tid = tid;
    });
    thread::yield_current();
    unreachable!("init thread returned to spawn_init");
}

extern "C" fn init_thread_entry(_arg: usize) -> ! {
    let io = PENDING_INIT_IO.lock().take().expect("process: no pending init image");
    let mtag = without_interrupts(|| TABLE.lock().slots[0].as_ref().unwrap().mtag);
    address_space::space_switch(&mtag);
    let entry = crate::process::elf::load(&io, &mtag).expect("process: failed to load init image");
    io_cap::release(io);

    let mut frame = TrapFrame::zeroed();
    frame.regs[1] = USER_STACK_VMA; // x2 / sp; mapped lazily on first store fault
    frame.sepc = entry;
    frame.sstatus = SSTATUS_SPIE;
    jump_to_user_on_riscv(&frame, kstack_top(0));
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

/// Clones the calling process into a new process-table slot, copying
/// every live descriptor's reference. The new thread's first action once
/// scheduled is `finish_fork`, which returns the saved frame to U-mode
/// with `a0` zeroed; the caller (the parent, via the syscall path) sees
/// the child's tid as its own return value.
pub fn fork(parent_pid: u32, parent_frame: &TrapFrame) -> Result<u32, KernelError> {
    let child_pid = {
        let table = TABLE.lock();
        (1..MAX_PROCESSES as u32).find(|&p| table.slots[p as usize].is_none()).ok_or(KernelError::TooManyOpen)?
    };

    let parent_mtag = without_interrupts(|| TABLE.lock().slots[parent_pid as usize].as_ref().unwrap().mtag);
    let child_mtag = address_space::space_clone(&parent_mtag);

    let mut child = Process::empty(child_pid);
    child.mtag = child_mtag;
    {
        let table = TABLE.lock();
        let parent = table.slots[parent_pid as usize].as_ref().unwrap();
        for i in 0..IOTAB_SIZE {
            child.iotab[i] = parent.iotab[i].clone();
        }
    }

    let mut child_frame = TrapFrame::zeroed();
    child_frame.restore_from_for_fork_child(parent_frame);

    without_interrupts(|| TABLE.lock().slots[child_pid as usize] = Some(child));

    let kstack = kstack_top(child_pid);
    let tid = thread::spawn(finish_fork_entry, child_pid as usize, kstack, kstack, Some(thread::current_tid()))
        .ok_or(KernelError::TooManyOpen)?;
    without_interrupts(|| TABLE.lock().slots[child_pid as usize].as_mut().unwrap().tid = tid);
    thread::set_current_process_for(tid, child_pid);
    store_pending_fork_frame(tid, child_frame);

    Ok(child_pid)
}

// A small side table handing the child's exact trap frame from `fork` to
// `finish_fork_entry`, keyed by the child's newly assigned tid. The thread
// layer's context only carries a generic `(entry, arg)` pair, not a whole
// frame, so the frame rides alongside rather than through `swtch`.
static PENDING_FORK_FRAMES: Mutex<[Option<(Tid, TrapFrame)>; MAX_PROCESSES]> =
    Mutex::new({ const NONE: Option<(Tid, TrapFrame)> = None; [NONE; MAX_PROCESSES] });

fn store_pending_fork_frame(tid: Tid, frame: TrapFrame) {
    let mut slots = PENDING_FORK_FRAMES.lock();
    let slot = slots.iter_mut().find(|s| s.is_none()).expect("process: pending fork frame table full");
    *slot = Some((tid, frame));
}

fn take_pending_fork_frame(tid: Tid) -> TrapFrame {
    let mut slots = PENDING_FORK_FRAMES.lock();
    let idx = slots.iter().position(|s| matches!(s, Some((t, _)) if *t == tid)).expect("process: no pending fork frame for tid");
    slots[idx].take().unwrap().1
}

extern "C" fn finish_fork_entry(child_pid: usize) -> ! {
    let tid = thread::current_tid();
    let frame = take_pending_fork_frame(tid);
    let mtag = without_interrupts(|| TABLE.lock().slots[child_pid].as_ref().unwrap().mtag);
    address_space::space_switch(&mtag);
    jump_to_user_on_riscv(&frame, thread::kstack_top_of(tid));
}

/// Tears down the current process's user mappings and address space, then
/// terminates its thread. Does not return.
pub fn exit_current(pid: u32, code: i32) -> ! {
    let mtag = without_interrupts(|| TABLE.lock().slots[pid as usize].as_ref().unwrap().mtag);
    address_space::space_reclaim(&mtag);

    let fds: alloc::vec::Vec<IoCap> = {
        let mut table = TABLE.lock();
        let proc = table.slots[pid as usize].as_mut().unwrap();
        let mut v = alloc::vec::Vec::new();
        for slot in proc.iotab.iter_mut() {
            if let Some(cap) = slot.take() {
                v.push(cap);
            }
        }
        v
    };
    for cap in fds {
        io_cap::release(cap);
    }

    let tid = without_interrupts(|| {
        let mut table = TABLE.lock();
        let tid = table.slots[pid as usize].as_ref().unwrap().tid;
        table.slots[pid as usize] = None;
        tid
    });
    thread::set_exit_code(tid, code as isize);
    thread::exit_current_thread();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_fd_rejects_occupied_explicit_slot() {
        const NONE: Option<IoCap> = None;
        let mut iotab = [NONE; IOTAB_SIZE];
        iotab[2] = Some(io_cap::wrap(crate::io_cap::MemoryLiteral::new(alloc::vec![0u8; 4])));
        assert_eq!(alloc_fd(&iotab, 2), Err(KernelError::Busy));
        assert_eq!(alloc_fd(&iotab, 3), Ok(3));
    }

    #[test]
    fn alloc_fd_auto_assigns_lowest_free() {
        const NONE: Option<IoCap> = None;
        let mut iotab = [NONE; IOTAB_SIZE];
        iotab[0] = Some(io_cap::wrap(crate::io_cap::MemoryLiteral::new(alloc::vec![0u8; 4])));
        assert_eq!(alloc_fd(&iotab, -1), Ok(1));
    }
}
