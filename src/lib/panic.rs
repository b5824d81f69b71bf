// Panic handler: disables interrupts, prints a crash report, halts.

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);
const RECENT_LOG_LINES: usize = 16;

pub fn panic_handler(info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        crate::uart::write_bytes(b"\n!!! PANIC WHILE PANICKING !!!\n");
        halt();
    }

    let panic_num = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;

    crate::arch::riscv64::trap::disable_intr();

    crate::uart::write_bytes(b"\n==== KERNEL PANIC ====\n");
    print_line("build", crate::buildinfo::SUMMARY);
    print_num("panic #", panic_num);

    if let Some(loc) = info.location() {
        crate::uart::write_bytes(b"at ");
        crate::uart::write_bytes(loc.file().as_bytes());
        crate::uart::write_bytes(b":");
        print_num("", loc.line() as u64);
    }

    let msg = alloc::format!("{}", info.message());
    print_line("message", &msg);

    print_recent_logs();

    crate::uart::write_bytes(b"==== HALT ====\n");
    halt();
}

fn print_line(label: &str, value: &str) {
    crate::uart::write_bytes(label.as_bytes());
    crate::uart::write_bytes(b": ");
    crate::uart::write_bytes(value.as_bytes());
    crate::uart::write_bytes(b"\n");
}

fn print_num(label: &str, n: u64) {
    if !label.is_empty() {
        crate::uart::write_bytes(label.as_bytes());
        crate::uart::write_bytes(b": ");
    }
    let s = alloc::format!("{}\n", n);
    crate::uart::write_bytes(s.as_bytes());
}

fn print_recent_logs() {
    use crate::lib::printk::LogEntry;
    let mut logs = [LogEntry { timestamp_ticks: 0, level: crate::lib::printk::LogLevel::Debug, message: [0; 128], len: 0 }; RECENT_LOG_LINES];
    let n = crate::lib::printk::recent(&mut logs);
    crate::uart::write_bytes(b"-- recent log --\n");
    for entry in &logs[..n] {
        crate::uart::write_bytes(entry.level.as_str().as_bytes());
        crate::uart::write_bytes(b": ");
        crate::uart::write_bytes(&entry.message[..entry.len]);
        crate::uart::write_bytes(b"\n");
    }
}

fn halt() -> ! {
    loop {
        crate::arch::riscv64::trap::disable_intr();
        riscv::asm::wfi();
    }
}
