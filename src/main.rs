#![no_std]
#![no_main]
#![feature(alloc_error_handler)]

//! Supervisor-mode kernel for a single-hart RISC-V Sv39 target: per-process
//! address spaces, a virtio-mmio block device, a flat file system, and a
//! cooperative scheduler, booting straight into a shipped `init` program.

extern crate alloc;

pub mod arch;
pub mod buildinfo;
pub mod fs;
pub mod io_cap;
pub mod lib;
pub mod mm;
pub mod process;
pub mod syscall;
pub mod uart;
pub mod virtio;

use core::panic::PanicInfo;

unsafe extern "C" {
    static __text_start: u8;
    static __text_end: u8;
    static __rodata_end: u8;
    static __kernel_end: u8;
}

/// QEMU virt machine constants. The real figures for a given board are a
/// platform-description problem this kernel doesn't solve; these are the
/// fixed values `-machine virt` hands out.
const RAM_SIZE: usize = 256 * 1024 * 1024;
const PLIC_BASE: usize = 0x0c00_0000;
const PLIC_CONTEXT_S_MODE_HART0: usize = 1;
const VIRTIO_MMIO_BASE: usize = 0x1000_1000;
const VIRTIO_MMIO_IRQ: u32 = 1;
const INIT_PROGRAM_NAME: &str = "init";

#[panic_handler]
fn on_panic(info: &PanicInfo) -> ! {
    lib::panic::panic_handler(info)
}

/// Entered once, from `arch::riscv64::boot::riscv64_main`, on the boot
/// hart with a valid stack and nothing else set up yet. Never returns.
pub fn kernel_main() -> ! {
    let (text_start, text_end, rodata_end, kernel_end) = unsafe {
        (
            &__text_start as *const u8 as usize,
            &__text_end as *const u8 as usize,
            &__rodata_end as *const u8 as usize,
            &__kernel_end as *const u8 as usize,
        )
    };
    let ram_end = mm::address_space::RAM_START + RAM_SIZE;

    mm::address_space::init(text_start, text_end, rodata_end, kernel_end, ram_end);
    arch::riscv64::trap::init();
    process::scheduler::init();
    arch::riscv64::timer::init();
    arch::riscv64::plic::init(PLIC_BASE, PLIC_CONTEXT_S_MODE_HART0);

    info!("boot: {}", buildinfo::SUMMARY);

    let devno = virtio::blk::attach(VIRTIO_MMIO_BASE, VIRTIO_MMIO_IRQ);
    let blk = virtio::blk::open_device("blk0", devno).expect("main: failed to open block device");
    fs::mount(blk).expect("main: failed to mount file system");

    let init_image = fs::open(INIT_PROGRAM_NAME).expect("main: init program missing from file system");
    process::process::spawn_init(init_image);
}
