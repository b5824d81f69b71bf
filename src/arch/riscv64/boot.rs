// Boot/link glue: out of scope for the core this kernel implements (the
// real entry sequence is board- and firmware-specific), kept to the bare
// minimum that gets a single hart from firmware handoff into
// `kernel_main` with a valid stack. Assumes S-mode entry with a0=hartid,
// already arranged by the platform's SBI firmware.

use core::arch::global_asm;

const BOOT_STACK_SIZE: usize = 4096 * 16;

#[repr(align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

#[unsafe(no_mangle)]
static mut BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

#[cfg(target_arch = "riscv64")]
global_asm!(
    r#"
.section .text._start
.global _start
.align 4
_start:
    la sp, {stack}
    li t0, {stack_size}
    add sp, sp, t0
    call riscv64_main
1:
    wfi
    j 1b
"#,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
);

#[unsafe(no_mangle)]
extern "C" fn riscv64_main() -> ! {
    crate::kernel_main();
}
