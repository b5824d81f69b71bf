pub mod blk;
pub mod mmio;
pub mod virtqueue;
