// Legacy platform-level interrupt controller (not the Advanced Interrupt
// Architecture). QEMU's virt machine layout: priority registers at
// base+4*irq, per-context enable bits at base+0x2000+0x80*ctx,
// threshold/claim at base+0x200000+0x1000*ctx.

use core::ptr::{read_volatile, write_volatile};
use spin::Mutex;

const PRIORITY_BASE: usize = 0x0000;
const ENABLE_BASE: usize = 0x2000;
const ENABLE_STRIDE: usize = 0x80;
const CONTEXT_BASE: usize = 0x20_0000;
const CONTEXT_STRIDE: usize = 0x1000;

struct Plic {
    base: usize,
    /// hart 0, S-mode context index on QEMU virt (context 1)
    context: usize,
}

static PLIC: Mutex<Option<Plic>> = Mutex::new(None);

type IsrFn = fn();

const MAX_SOURCES: usize = 64;
static HANDLERS: Mutex<[Option<(u32, IsrFn)>; MAX_SOURCES]> = Mutex::new([None; MAX_SOURCES]);

pub fn init(base: usize, context: usize) {
    *PLIC.lock() = Some(Plic { base, context });
}

/// Register `handler` for `irq` at `priority` (1 is lowest meaningful
/// priority; 0 disables a source entirely) and enable it for our context.
pub fn register(irq: u32, priority: u32, handler: IsrFn) {
    let guard = PLIC.lock();
    let plic = guard.as_ref().expect("plic: register before init");
    unsafe {
        write_volatile((plic.base + PRIORITY_BASE + 4 * irq as usize) as *mut u32, priority);
        let enable_addr = plic.base + ENABLE_BASE + ENABLE_STRIDE * plic.context + 4 * (irq as usize / 32);
        let bit = 1u32 << (irq % 32);
        let cur = read_volatile(enable_addr as *const u32);
        write_volatile(enable_addr as *mut u32, cur | bit);
        let threshold_addr = plic.base + CONTEXT_BASE + CONTEXT_STRIDE * plic.context;
        write_volatile(threshold_addr as *mut u32, 0);
    }
    drop(guard);

    let mut handlers = HANDLERS.lock();
    for slot in handlers.iter_mut() {
        if slot.is_none() {
            *slot = Some((irq, handler));
            return;
        }
    }
    panic!("plic: handler table full");
}

/// Called from the trap handler on a supervisor external interrupt: claim
/// the highest-priority pending source, run its handler, and acknowledge.
pub fn dispatch() {
    let guard = PLIC.lock();
    let plic = match guard.as_ref() {
        Some(p) => p,
        None => return,
    };
    let claim_addr = plic.base + CONTEXT_BASE + CONTEXT_STRIDE * plic.context;
    let irq = unsafe { read_volatile(claim_addr as *const u32) };
    if irq == 0 {
        return;
    }
    let base = plic.base;
    let context = plic.context;
    drop(guard);

    let handler = {
        let handlers = HANDLERS.lock();
        handlers.iter().find_map(|slot| match slot {
            Some((id, f)) if *id == irq => Some(*f),
            _ => None,
        })
    };
    if let Some(f) = handler {
        f();
    }

    let claim_addr = base + CONTEXT_BASE + CONTEXT_STRIDE * context;
    unsafe { write_volatile(claim_addr as *mut u32, irq) };
}
