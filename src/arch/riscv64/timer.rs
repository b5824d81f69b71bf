// SBI-driven preemption tick. Single-hart only, matching the scheduling
// model's Non-goals.

use super::sbi;
use core::sync::atomic::{AtomicU64, Ordering};

/// mtime increments per tick; QEMU's virt machine clocks this at 10 MHz.
pub const TIMEBASE_HZ: u64 = 10_000_000;
pub const TICK_INTERVAL: u64 = TIMEBASE_HZ / 100; // 10ms ticks

static TICKS: AtomicU64 = AtomicU64::new(0);

#[cfg(target_arch = "riscv64")]
fn read_mtime() -> u64 {
    riscv::register::time::read64()
}
#[cfg(not(target_arch = "riscv64"))]
fn read_mtime() -> u64 {
    0
}

/// Arm the first timer interrupt. Called once during boot.
pub fn init() {
    sbi::set_timer(read_mtime() + TICK_INTERVAL);
}

/// Called from the trap handler on every timer interrupt: counts the tick
/// and re-arms the next one.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    sbi::set_timer(read_mtime() + TICK_INTERVAL);
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Tick count `usleep(microseconds)` should wait for, rounded up.
pub fn ticks_from_micros(micros: u64) -> u64 {
    let ticks_per_sec = TIMEBASE_HZ / TICK_INTERVAL;
    (micros * ticks_per_sec + 999_999) / 1_000_000
}

/// The `usleep` backing function: yields repeatedly until the target tick
/// count is reached. There is no general cancellation in this kernel, so
/// this loop is uninterruptible by design, matching `join`/`wait`.
pub fn sleep_micros(micros: u64) {
    let target = ticks() + ticks_from_micros(micros);
    while ticks() < target {
        crate::process::thread::yield_current();
    }
}
