// Kernel thread table, ready queue, and the primitives built directly on
// `swtch`: creation, voluntary yield, exit, and join. Condition variables
// and sleep locks (process::sync) are layered on top of `block_current`/
// `wake`.

use crate::arch::riscv64::context::{self, ThreadContext};
use crate::arch::riscv64::trap::without_interrupts;
use alloc::collections::VecDeque;
use spin::Mutex;

pub type Tid = u32;

pub const MAX_THREADS: usize = 17; // 16 process threads + 1 idle thread
const IDLE_STACK_SIZE: usize = 4096 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Waiting,
    Exited,
}

pub struct Thread {
    pub tid: Tid,
    pub ctx: ThreadContext,
    pub state: ThreadState,
    pub parent: Option<Tid>,
    pub process: Option<u32>,
    pub kstack_top: usize,
    pub exit_code: isize,
}

impl Thread {
    const fn empty(tid: Tid) -> Self {
        Self {
            tid,
            ctx: ThreadContext::zeroed(),
            state: ThreadState::Exited,
            parent: None,
            process: None,
            kstack_top: 0,
            exit_code: 0,
        }
    }
}

struct Scheduler {
    slots: [Option<Thread>; MAX_THREADS],
    ready: VecDeque<Tid>,
    current: Tid,
    idle_tid: Tid,
    exit_waiters: [VecDeque<Tid>; MAX_THREADS], // indexed by target tid, who's join()ing it
}

const IDLE_TID: Tid = 0;

impl Scheduler {
    const fn new() -> Self {
        const NONE: Option<Thread> = None;
        const EMPTY_Q: VecDeque<Tid> = VecDeque::new();
        Self {
            slots: [NONE; MAX_THREADS],
            ready: VecDeque::new(),
            current: IDLE_TID,
            idle_tid: IDLE_TID,
            exit_waiters: [EMPTY_Q; MAX_THREADS],
        }
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        (0..MAX_THREADS).find(|&i| matches!(self.slots[i], None) || matches!(self.slots[i].as_ref().unwrap().state, ThreadState::Exited))
    }
}

static SCHED: Mutex<Scheduler> = Mutex::new(Scheduler::new());
static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];

/// Must run once, on the boot stack, before any other thread API is used.
pub fn init() {
    let idle_stack_top = unsafe { core::ptr::addr_of_mut!(IDLE_STACK) as usize + IDLE_STACK_SIZE };
    let mut sched = SCHED.lock();
    let mut idle = Thread::empty(IDLE_TID);
    idle.state = ThreadState::Running;
    idle.kstack_top = idle_stack_top;
    sched.slots[IDLE_TID as usize] = Some(idle);
    sched.current = IDLE_TID;
}

pub fn current_tid() -> Tid {
    without_interrupts(|| SCHED.lock().current)
}

pub fn current_process() -> Option<u32> {
    without_interrupts(|| {
        let sched = SCHED.lock();
        let cur = sched.current as usize;
        sched.slots[cur].as_ref().and_then(|t| t.process)
    })
}

pub fn set_current_process(pid: u32) {
    without_interrupts(|| {
        let mut sched = SCHED.lock();
        let cur = sched.current as usize;
        if let Some(t) = sched.slots[cur].as_mut() {
            t.process = Some(pid);
        }
    });
}

/// Like `set_current_process`, but for a thread other than the one
/// currently running (used right after `spawn` creates a not-yet-scheduled
/// child).
pub fn set_current_process_for(tid: Tid, pid: u32) {
    without_interrupts(|| {
        if let Some(t) = SCHED.lock().slots[tid as usize].as_mut() {
            t.process = Some(pid);
        }
    });
}

/// Creates a new thread running `entry(arg)` on a fresh `stack` (top
/// address), returning its tid. The process back-reference is set
/// separately via `set_current_process` once scheduled.
pub fn spawn(entry: extern "C" fn(usize) -> !, arg: usize, stack_top: usize, kstack_top: usize, parent: Option<Tid>) -> Option<Tid> {
    without_interrupts(|| {
        let mut sched = SCHED.lock();
        let slot = sched.alloc_slot()?;
        let mut t = Thread::empty(slot as Tid);
        t.state = ThreadState::Ready;
        t.parent = parent;
        t.kstack_top = kstack_top;
        context::prepare_new_thread(&mut t.ctx, stack_top, entry as usize, arg);
        let tid = t.tid;
        sched.slots[slot] = Some(t);
        sched.ready.push_back(tid);
        Some(tid)
    })
}

/// Moves the running thread to the ready queue's tail and switches to the
/// head of the queue (or the idle thread if none is ready).
pub fn yield_current() {
    without_interrupts(|| {
        let (old_ptr, new_ptr) = {
            let mut sched = SCHED.lock();
            let old_tid = sched.current;
            if old_tid != sched.idle_tid {
                sched.slots[old_tid as usize].as_mut().unwrap().state = ThreadState::Ready;
                sched.ready.push_back(old_tid);
            }
            pick_next(&mut sched, old_tid)
        };
        unsafe { context::swtch(old_ptr, new_ptr) };
    });
}

fn pick_next(sched: &mut Scheduler, old_tid: Tid) -> (*mut ThreadContext, *const ThreadContext) {
    let next_tid = sched.ready.pop_front().unwrap_or(sched.idle_tid);
    sched.current = next_tid;
    sched.slots[next_tid as usize].as_mut().unwrap().state = ThreadState::Running;
    let old_ptr = &mut sched.slots[old_tid as usize].as_mut().unwrap().ctx as *mut ThreadContext;
    let new_ptr = &sched.slots[next_tid as usize].as_ref().unwrap().ctx as *const ThreadContext;
    (old_ptr, new_ptr)
}

/// Called from the timer-interrupt path: equivalent to a forced yield.
pub fn preempt() {
    yield_current();
}

/// Marks the running thread `Waiting` and switches away, invoking `link`
/// with the scheduler still locked and its tid, so the caller can thread
/// it onto a wait list (an exit-waiter list) in the same
/// interrupt-disabled window as the state transition. Doing the state
/// change and the linking separately would leave a window where a
/// broadcast arriving between them finds the thread still `Running` and
/// drops the wakeup on the floor.
fn block_on_sched<F: FnOnce(&mut Scheduler, Tid)>(link: F) {
    without_interrupts(|| {
        let (old_ptr, new_ptr) = {
            let mut sched = SCHED.lock();
            let old_tid = sched.current;
            sched.slots[old_tid as usize].as_mut().unwrap().state = ThreadState::Waiting;
            link(&mut sched, old_tid);
            pick_next(&mut sched, old_tid)
        };
        unsafe { context::swtch(old_ptr, new_ptr) };
    });
}

/// Like `block_on_sched`, but for callers (condition variables) whose wait
/// list lives in their own lock, not the scheduler's.
pub fn block_on<F: FnOnce(Tid)>(link: F) {
    block_on_sched(|_sched, tid| link(tid));
}

/// Moves `tid` from `Waiting` back to `Ready` and onto the run queue.
pub fn wake(tid: Tid) {
    without_interrupts(|| {
        let mut sched = SCHED.lock();
        if let Some(t) = sched.slots[tid as usize].as_mut() {
            if t.state == ThreadState::Waiting {
                t.state = ThreadState::Ready;
                sched.ready.push_back(tid);
            }
        }
    });
}

pub fn exit_current_thread() -> ! {
    without_interrupts(|| {
        let mut sched = SCHED.lock();
        let tid = sched.current;
        sched.slots[tid as usize].as_mut().unwrap().state = ThreadState::Exited;
        let waiters: VecDeque<Tid> = core::mem::take(&mut sched.exit_waiters[tid as usize]);
        for w in waiters {
            if let Some(waiter) = sched.slots[w as usize].as_mut() {
                if waiter.state == ThreadState::Waiting {
                    waiter.state = ThreadState::Ready;
                    sched.ready.push_back(w);
                }
            }
        }
    });
    yield_current();
    unreachable!("exited thread was rescheduled");
}

pub fn exit_code(tid: Tid) -> isize {
    without_interrupts(|| SCHED.lock().slots[tid as usize].as_ref().map(|t| t.exit_code).unwrap_or(-1))
}

pub fn set_exit_code(tid: Tid, code: isize) {
    without_interrupts(|| {
        if let Some(t) = SCHED.lock().slots[tid as usize].as_mut() {
            t.exit_code = code;
        }
    });
}

/// Blocks until `tid` has exited, returning its exit code.
pub fn join(tid: Tid) -> isize {
    loop {
        let already_done = without_interrupts(|| matches!(SCHED.lock().slots[tid as usize].as_ref().map(|t| t.state), Some(ThreadState::Exited) | None));
        if already_done {
            return exit_code(tid);
        }
        block_on_sched(|sched, waiter| sched.exit_waiters[tid as usize].push_back(waiter));
    }
}

/// Returns the first child of the current thread observed to have exited,
/// blocking if none has yet. Ordering among exited children is whichever
/// this scan encounters first (FIFO by tid).
pub fn join_any(children: &[Tid]) -> Option<Tid> {
    if children.is_empty() {
        return None;
    }
    loop {
        let found = without_interrupts(|| {
            let sched = SCHED.lock();
            children.iter().copied().find(|&c| sched.slots[c as usize].as_ref().map(|t| t.state == ThreadState::Exited).unwrap_or(true))
        });
        if let Some(tid) = found {
            return Some(tid);
        }
        // Register on every child's exit-waiter list; whichever wakes us
        // first is the one we'll find on the next scan.
        block_on_sched(|sched, waiter| {
            for &c in children {
                sched.exit_waiters[c as usize].push_back(waiter);
            }
        });
    }
}

pub fn kstack_top_of(tid: Tid) -> usize {
    without_interrupts(|| SCHED.lock().slots[tid as usize].as_ref().map(|t| t.kstack_top).unwrap_or(0))
}
