// virtio-mmio v2 transport registers. One `MmioTransport` per attached
// device region; the region itself lives in the low-2GiB identity-mapped
// window set up by `mm::address_space::init`, so `base` doubles as both
// the virtual and physical address.

use core::ptr::{read_volatile, write_volatile};

const MAGIC_VALUE: usize = 0x000;
const DEVICE_ID: usize = 0x008;
const DEVICE_FEATURES: usize = 0x010;
const DEVICE_FEATURES_SEL: usize = 0x014;
const DRIVER_FEATURES: usize = 0x020;
const DRIVER_FEATURES_SEL: usize = 0x024;
const QUEUE_SEL: usize = 0x030;
const QUEUE_NUM: usize = 0x038;
const QUEUE_READY: usize = 0x044;
const QUEUE_NOTIFY: usize = 0x050;
const INTERRUPT_STATUS: usize = 0x060;
const INTERRUPT_ACK: usize = 0x064;
const STATUS: usize = 0x070;
const QUEUE_DESC_LOW: usize = 0x080;
const QUEUE_DESC_HIGH: usize = 0x084;
const QUEUE_DRIVER_LOW: usize = 0x090;
const QUEUE_DRIVER_HIGH: usize = 0x094;
const QUEUE_DEVICE_LOW: usize = 0x0a0;
const QUEUE_DEVICE_HIGH: usize = 0x0a4;
const CONFIG_BASE: usize = 0x100;

pub const VIRTIO_MAGIC: u32 = 0x7472_6976; // "virt"
pub const DEVICE_ID_BLOCK: u32 = 2;

pub const STATUS_ACKNOWLEDGE: u32 = 1;
pub const STATUS_DRIVER: u32 = 2;
pub const STATUS_DRIVER_OK: u32 = 4;
pub const STATUS_FEATURES_OK: u32 = 8;

pub const FEATURE_RING_RESET: u64 = 1 << 40;
pub const FEATURE_INDIRECT_DESC: u64 = 1 << 28;
pub const FEATURE_BLK_SIZE: u64 = 1 << 6;
pub const FEATURE_TOPOLOGY: u64 = 1 << 10;

pub struct MmioTransport {
    base: usize,
}

impl MmioTransport {
    /// SAFETY: `base` must be the base of a live virtio-mmio register
    /// region, mapped and readable for the lifetime of this value.
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn read32(&self, off: usize) -> u32 {
        unsafe { read_volatile((self.base + off) as *const u32) }
    }
    fn write32(&self, off: usize, v: u32) {
        unsafe { write_volatile((self.base + off) as *mut u32, v) }
    }

    pub fn is_virtio_block_device(&self) -> bool {
        self.read32(MAGIC_VALUE) == VIRTIO_MAGIC && self.read32(DEVICE_ID) == DEVICE_ID_BLOCK
    }

    pub fn reset(&self) {
        self.write32(STATUS, 0);
    }

    pub fn set_status(&self, bits: u32) {
        self.write32(STATUS, self.read32(STATUS) | bits);
    }

    pub fn features(&self) -> u64 {
        self.write32(DEVICE_FEATURES_SEL, 0);
        let low = self.read32(DEVICE_FEATURES) as u64;
        self.write32(DEVICE_FEATURES_SEL, 1);
        let high = self.read32(DEVICE_FEATURES) as u64;
        low | (high << 32)
    }

    pub fn accept_features(&self, accepted: u64) {
        self.write32(DRIVER_FEATURES_SEL, 0);
        self.write32(DRIVER_FEATURES, accepted as u32);
        self.write32(DRIVER_FEATURES_SEL, 1);
        self.write32(DRIVER_FEATURES, (accepted >> 32) as u32);
    }

    pub fn setup_queue(&self, queue: u32, size: u32, desc: usize, driver: usize, device: usize) {
        self.write32(QUEUE_SEL, queue);
        self.write32(QUEUE_NUM, size);
        self.write32(QUEUE_DESC_LOW, desc as u32);
        self.write32(QUEUE_DESC_HIGH, (desc as u64 >> 32) as u32);
        self.write32(QUEUE_DRIVER_LOW, driver as u32);
        self.write32(QUEUE_DRIVER_HIGH, (driver as u64 >> 32) as u32);
        self.write32(QUEUE_DEVICE_LOW, device as u32);
        self.write32(QUEUE_DEVICE_HIGH, (device as u64 >> 32) as u32);
        self.write32(QUEUE_READY, 1);
    }

    pub fn notify(&self, queue: u32) {
        self.write32(QUEUE_NOTIFY, queue);
    }

    pub fn interrupt_status(&self) -> u32 {
        self.read32(INTERRUPT_STATUS)
    }

    pub fn interrupt_ack(&self, bits: u32) {
        self.write32(INTERRUPT_ACK, bits);
    }

    /// virtio-blk config space: 64-bit sector capacity at offset 0.
    pub fn capacity_sectors(&self) -> u64 {
        let low = self.read32(CONFIG_BASE) as u64;
        let high = self.read32(CONFIG_BASE + 4) as u64;
        low | (high << 32)
    }
}

// SAFETY: every access goes through volatile reads/writes at a fixed MMIO
// address; nothing here assumes hart-local state.
unsafe impl Send for MmioTransport {}
unsafe impl Sync for MmioTransport {}
