// S-mode trap entry and dispatch. A saved trap frame (x1, x3..x31, sepc,
// sstatus — x2/sp is folded in at a fixed slot) is pushed on the
// interrupted thread's own kernel stack on every entry, whether the trap
// came from U-mode or from S-mode (nested via a kernel-mode timer tick).
// `sscratch` holds the current thread's kernel-stack top while it runs in
// U-mode, and is cleared to the in-kernel convention of "already on my own
// stack" (detected via `sstatus.SPP`) while running in S-mode.

use crate::lib::error::KernelError;
use core::arch::global_asm;

pub const SSTATUS_SIE: usize = 1 << 1;
pub const SSTATUS_SPIE: usize = 1 << 5;
pub const SSTATUS_SPP: usize = 1 << 8;

/// Registers x1 and x3..x31 at slots 0 and 2..30; x2 (sp) at slot 1;
/// sepc at slot 31; sstatus at slot 32. Matches the layout `_trap_entry`
/// pushes in assembly.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub regs: [usize; 31],
    pub sepc: usize,
    pub sstatus: usize,
}

impl TrapFrame {
    pub const fn zeroed() -> Self {
        Self { regs: [0; 31], sepc: 0, sstatus: 0 }
    }

    fn reg(&self, x: usize) -> usize {
        debug_assert!(x >= 1 && x <= 31);
        self.regs[x - 1]
    }
    fn set_reg(&mut self, x: usize, v: usize) {
        debug_assert!(x >= 1 && x <= 31);
        self.regs[x - 1] = v;
    }

    pub fn a0(&self) -> usize { self.reg(10) }
    pub fn a1(&self) -> usize { self.reg(11) }
    pub fn a2(&self) -> usize { self.reg(12) }
    pub fn a7(&self) -> usize { self.reg(17) }
    pub fn set_a0(&mut self, v: isize) { self.set_reg(10, v as usize); }

    /// Overwrite every GPR except a0 from `other`, and sepc/sstatus. Used by
    /// fork completion: the child inherits the parent's trap frame verbatim
    /// except its return value.
    pub fn restore_from_for_fork_child(&mut self, other: &TrapFrame) {
        *self = *other;
        self.set_reg(10, 0);
    }
}

#[cfg(target_arch = "riscv64")]
#[inline]
pub fn disable_intr() {
    unsafe { riscv::register::sstatus::clear_sie() };
}

#[cfg(target_arch = "riscv64")]
#[inline]
pub fn enable_intr() {
    unsafe { riscv::register::sstatus::set_sie() };
}

#[cfg(not(target_arch = "riscv64"))]
#[inline]
pub fn disable_intr() {}
#[cfg(not(target_arch = "riscv64"))]
#[inline]
pub fn enable_intr() {}

#[cfg(target_arch = "riscv64")]
pub fn intr_enabled() -> bool {
    riscv::register::sstatus::read().sie()
}
#[cfg(not(target_arch = "riscv64"))]
pub fn intr_enabled() -> bool { false }

/// Disable interrupts for the duration of `f`, restoring the prior state
/// on return (not just unconditionally re-enabling). Every shared mutable
/// kernel structure touched from both thread and interrupt context (the
/// page pool, the ready queue, condition wait lists, the block device's
/// request state) is manipulated inside one of these windows.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let was_enabled = intr_enabled();
    disable_intr();
    let r = f();
    if was_enabled {
        enable_intr();
    }
    r
}

/// Install `_trap_entry` as the S-mode trap vector (direct mode).
#[cfg(target_arch = "riscv64")]
pub fn init() {
    unsafe extern "C" {
        fn _trap_entry();
    }
    unsafe {
        riscv::register::stvec::write(_trap_entry as usize, riscv::register::stvec::TrapMode::Direct);
    }
}
#[cfg(not(target_arch = "riscv64"))]
pub fn init() {}

/// Record `kstack_top` in `sscratch` so the next trap from U-mode can
/// recover this thread's kernel stack. Called by `jump_to_user`.
#[cfg(target_arch = "riscv64")]
pub fn set_kernel_stack(kstack_top: usize) {
    unsafe { riscv::register::sscratch::write(kstack_top) };
}
#[cfg(not(target_arch = "riscv64"))]
pub fn set_kernel_stack(_kstack_top: usize) {}

#[unsafe(no_mangle)]
extern "C" fn rust_trap_entry(frame: &mut TrapFrame) {
    let cause = read_scause();
    let is_interrupt = (cause as isize) < 0;
    let code = cause & !(1usize << 63);

    if is_interrupt {
        match code {
            5 => {
                // supervisor timer interrupt
                crate::arch::riscv64::timer::on_tick();
                crate::process::scheduler::on_timer_tick();
            }
            9 => {
                // supervisor external interrupt, routed through the PLIC
                crate::arch::riscv64::plic::dispatch();
            }
            _ => {}
        }
        return;
    }

    match code {
        8 => {
            // ecall from U-mode
            frame.sepc = frame.sepc.wrapping_add(4);
            let ret = crate::syscall::dispatch(frame);
            frame.set_a0(ret);
        }
        13 | 15 => {
            // load / store page fault
            let stval = read_stval();
            if let Err(e) = crate::mm::fault::handle_page_fault(stval) {
                kill_current_process(e);
            }
        }
        _ => {
            kill_current_process(KernelError::Unsupported);
        }
    }
}

fn kill_current_process(reason: KernelError) {
    crate::error!("fatal trap in current process: {}", reason);
    crate::process::current::exit_current(-1);
}

#[cfg(target_arch = "riscv64")]
fn read_scause() -> usize {
    riscv::register::scause::read().bits()
}
#[cfg(not(target_arch = "riscv64"))]
fn read_scause() -> usize { 0 }

#[cfg(target_arch = "riscv64")]
fn read_stval() -> usize {
    riscv::register::stval::read()
}
#[cfg(not(target_arch = "riscv64"))]
fn read_stval() -> usize { 0 }

#[cfg(target_arch = "riscv64")]
global_asm!(
    r#"
.section .text
.global _trap_entry
.align 4
_trap_entry:
    csrr t0, sstatus
    andi t0, t0, 0x100
    bnez t0, 1f

    # trap from U-mode: sp <-> sscratch swaps in the kernel stack top
    csrrw sp, sscratch, sp
    addi sp, sp, -264
    csrr t0, sscratch
    sd t0, 8(sp)
    j 2f

1:
    # trap from S-mode: already on our own kernel stack
    mv t0, sp
    addi sp, sp, -264
    sd t0, 8(sp)

2:
    sd x1, 0(sp)
    sd x3, 16(sp)
    sd x4, 24(sp)
    sd x5, 32(sp)
    sd x6, 40(sp)
    sd x7, 48(sp)
    sd x8, 56(sp)
    sd x9, 64(sp)
    sd x10, 72(sp)
    sd x11, 80(sp)
    sd x12, 88(sp)
    sd x13, 96(sp)
    sd x14, 104(sp)
    sd x15, 112(sp)
    sd x16, 120(sp)
    sd x17, 128(sp)
    sd x18, 136(sp)
    sd x19, 144(sp)
    sd x20, 152(sp)
    sd x21, 160(sp)
    sd x22, 168(sp)
    sd x23, 176(sp)
    sd x24, 184(sp)
    sd x25, 192(sp)
    sd x26, 200(sp)
    sd x27, 208(sp)
    sd x28, 216(sp)
    sd x29, 224(sp)
    sd x30, 232(sp)
    sd x31, 240(sp)
    csrr t0, sepc
    sd t0, 248(sp)
    csrr t0, sstatus
    sd t0, 256(sp)

    mv a0, sp
    call rust_trap_entry

    ld t0, 248(sp)
    csrw sepc, t0
    ld t0, 256(sp)
    csrw sstatus, t0
    andi t1, t0, 0x100

    ld x1, 0(sp)
    ld x3, 16(sp)
    ld x4, 24(sp)
    ld x5, 32(sp)
    ld x6, 40(sp)
    ld x7, 48(sp)
    ld x8, 56(sp)
    ld x9, 64(sp)
    ld x10, 72(sp)
    ld x11, 80(sp)
    ld x12, 88(sp)
    ld x13, 96(sp)
    ld x14, 104(sp)
    ld x15, 112(sp)
    ld x16, 120(sp)
    ld x17, 128(sp)
    ld x18, 136(sp)
    ld x19, 144(sp)
    ld x20, 152(sp)
    ld x21, 160(sp)
    ld x22, 168(sp)
    ld x23, 176(sp)
    ld x24, 184(sp)
    ld x25, 192(sp)
    ld x26, 200(sp)
    ld x27, 208(sp)
    ld x28, 216(sp)
    ld x29, 224(sp)
    ld x30, 232(sp)
    ld x31, 240(sp)

    bnez t1, 3f
    # returning to U-mode: re-point sscratch at our kernel stack top
    addi t2, sp, 264
    csrw sscratch, t2
3:
    ld x2, 8(sp)
    sret
"#
);
