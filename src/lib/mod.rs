// Core library utilities for the kernel: logging, error taxonomy, panic, debug.

pub mod error;
pub mod printk;
pub mod debug;
pub mod panic;
pub mod bootlog;
