// The scheduling policy layered over `process::thread`'s mechanism: plain
// round-robin, preempted once per timer tick. There is no priority or
// fairness accounting beyond FIFO ready-queue order.

use crate::process::thread;

pub fn init() {
    thread::init();
}

/// Invoked from the timer-interrupt path on every tick. A single-hart
/// kernel can't preempt itself mid-instruction, so this is just a forced
/// voluntary yield taken at a safe point (the trap return path).
pub fn on_timer_tick() {
    thread::preempt();
}
