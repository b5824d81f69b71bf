// virtio-blk driver: device bring-up, the single-request-in-flight
// request cycle, and the `IoObject` surface `devopen` hands back to user
// code.

use crate::arch::riscv64::plic;
use crate::arch::riscv64::trap::without_interrupts;
use crate::io_cap::{self, IoCap, IoObject};
use crate::lib::error::KernelError;
use crate::process::sync::{Condition, SleepLock};
use crate::virtio::mmio::{self, MmioTransport};
use crate::virtio::virtqueue::{Desc, Virtqueue, DESC_F_NEXT, DESC_F_WRITE};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

pub const BLOCK_SIZE: usize = 4096;
const SECTOR_SIZE: u64 = 512;
const SECTORS_PER_BLOCK: u64 = BLOCK_SIZE as u64 / SECTOR_SIZE;

const REQ_IN: u32 = 0;
const REQ_OUT: u32 = 1;
const STATUS_OK: u8 = 0;

#[repr(C)]
struct ReqHeader {
    typ: u32,
    reserved: u32,
    sector: u64,
}

struct RequestSlot {
    header: ReqHeader,
    status: u8,
}

struct Device {
    transport: MmioTransport,
    queue: Box<Virtqueue>,
    slot: Mutex<RequestSlot>,
    request_lock: SleepLock,
    used_updated: Condition,
}

const MAX_DEVICES: usize = 4;
static DEVICES: Mutex<Vec<Arc<Device>>> = Mutex::new(Vec::new());

/// Brings up one virtio-blk instance at `mmio_base` and wires its
/// completion interrupt through the PLIC. `mmio_base` must already be
/// mapped (identity, in the low-2GiB window). Returns the instance index
/// `devopen`'s `instno` argument selects.
pub fn attach(mmio_base: usize, irq: u32) -> usize {
    let transport = unsafe { MmioTransport::new(mmio_base) };
    assert!(transport.is_virtio_block_device(), "virtio: no block device at {:#x}", mmio_base);

    transport.reset();
    transport.set_status(mmio::STATUS_ACKNOWLEDGE);
    transport.set_status(mmio::STATUS_DRIVER);

    let available = transport.features();
    let required = mmio::FEATURE_RING_RESET | mmio::FEATURE_INDIRECT_DESC;
    assert_eq!(available & required, required, "virtio: device missing a required feature");
    let optional = available & (mmio::FEATURE_BLK_SIZE | mmio::FEATURE_TOPOLOGY);
    transport.accept_features(required | optional);
    transport.set_status(mmio::STATUS_FEATURES_OK);

    let queue = Box::new(Virtqueue::zero());
    transport.setup_queue(0, crate::virtio::virtqueue::QUEUE_SIZE as u32, queue.desc_phys(), queue.avail_phys(), queue.used_phys());

    transport.set_status(mmio::STATUS_DRIVER_OK);

    let device = Arc::new(Device {
        transport,
        queue,
        slot: Mutex::new(RequestSlot { header: ReqHeader { typ: 0, reserved: 0, sector: 0 }, status: 0xff }),
        request_lock: SleepLock::new(),
        used_updated: Condition::new(),
    });

    let idx = {
        let mut devices = DEVICES.lock();
        assert!(devices.len() < MAX_DEVICES, "virtio: too many block device instances");
        devices.push(device);
        devices.len() - 1
    };

    plic::register(irq, 1, isr_for(idx));
    idx
}

fn isr_for(idx: usize) -> fn() {
    match idx {
        0 => isr_0,
        1 => isr_1,
        2 => isr_2,
        _ => isr_3,
    }
}
fn isr_0() {
    handle_interrupt(0)
}
fn isr_1() {
    handle_interrupt(1)
}
fn isr_2() {
    handle_interrupt(2)
}
fn isr_3() {
    handle_interrupt(3)
}

fn handle_interrupt(idx: usize) {
    let device = DEVICES.lock()[idx].clone();
    let status = device.transport.interrupt_status();
    if status & 0x1 != 0 {
        device.transport.interrupt_ack(status);
        device.used_updated.broadcast();
    }
}

impl Device {
    /// One `BLOCK_SIZE`-byte transfer at `block_index`; `write` selects
    /// direction. `data` must be exactly `BLOCK_SIZE` bytes.
    fn request(&self, block_index: u64, data: &mut [u8], write: bool) -> Result<(), KernelError> {
        self.request_lock.lock_acquire();

        {
            let mut slot = self.slot.lock();
            slot.header = ReqHeader { typ: if write { REQ_OUT } else { REQ_IN }, reserved: 0, sector: block_index * SECTORS_PER_BLOCK };
            slot.status = 0xff;
        }

        // SAFETY: `request_lock` serializes every caller to one request
        // in flight per device, so this is the only live mutable access
        // to the queue at any time; the queue's storage is boxed once in
        // `attach` and never moves for the device's lifetime.
        #[allow(invalid_reference_casting)]
        let queue = unsafe { &mut *(self.queue.as_ref() as *const Virtqueue as *mut Virtqueue) };
        {
            let slot = self.slot.lock();
            queue.indirect[0] = Desc { addr: &slot.header as *const _ as u64, len: core::mem::size_of::<ReqHeader>() as u32, flags: DESC_F_NEXT, next: 1 };
            queue.indirect[1] = Desc {
                addr: data.as_ptr() as u64,
                len: BLOCK_SIZE as u32,
                flags: DESC_F_NEXT | if write { 0 } else { DESC_F_WRITE },
                next: 2,
            };
            queue.indirect[2] = Desc { addr: &slot.status as *const _ as u64, len: 1, flags: DESC_F_WRITE, next: 0 };
        }
        queue.submit();

        without_interrupts(|| {
            self.transport.notify(0);
            self.used_updated.wait();
        });
        queue.consume_completion();

        let status = self.slot.lock().status;
        self.request_lock.lock_release();

        if status != STATUS_OK {
            return Err(KernelError::IoError);
        }
        Ok(())
    }

    fn capacity_bytes(&self) -> u64 {
        self.transport.capacity_sectors() * SECTOR_SIZE
    }
}

struct BlkFile {
    device: Arc<Device>,
    position: u64,
}

impl IoObject for BlkFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        if buf.len() % BLOCK_SIZE != 0 || self.position % BLOCK_SIZE as u64 != 0 {
            return Err(KernelError::Unsupported);
        }
        let mut done = 0;
        while done < buf.len() {
            let block_index = self.position / BLOCK_SIZE as u64;
            self.device.request(block_index, &mut buf[done..done + BLOCK_SIZE], false)?;
            self.position += BLOCK_SIZE as u64;
            done += BLOCK_SIZE;
        }
        Ok(done)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError> {
        if buf.len() % BLOCK_SIZE != 0 || self.position % BLOCK_SIZE as u64 != 0 {
            return Err(KernelError::Unsupported);
        }
        let mut scratch = alloc::vec![0u8; BLOCK_SIZE];
        let mut done = 0;
        while done < buf.len() {
            scratch.copy_from_slice(&buf[done..done + BLOCK_SIZE]);
            let block_index = self.position / BLOCK_SIZE as u64;
            self.device.request(block_index, &mut scratch, true)?;
            self.position += BLOCK_SIZE as u64;
            done += BLOCK_SIZE;
        }
        Ok(done)
    }

    fn ioctl(&mut self, cmd: u32, arg: usize) -> Result<isize, KernelError> {
        match cmd {
            io_cap::IOCTL_GETLEN => Ok(self.device.capacity_bytes() as isize),
            io_cap::IOCTL_GETPOS => Ok(self.position as isize),
            io_cap::IOCTL_SETPOS => {
                let pos = arg as u64;
                if pos > self.device.capacity_bytes() {
                    return Err(KernelError::InvalidArgument);
                }
                self.position = pos;
                Ok(0)
            }
            io_cap::IOCTL_GETBLKSZ => Ok(BLOCK_SIZE as isize),
            _ => Err(KernelError::Unsupported),
        }
    }

    fn close(&mut self) {}
}

/// Hands back a fresh handle onto the block device instance `instno`
/// names. `name` is accepted but unused: device instances are addressed
/// purely by index, matching the ABI's `devopen(fd, name, instno)`.
pub fn open_device(_name: &str, instno: usize) -> Result<IoCap, KernelError> {
    let device = DEVICES.lock().get(instno).cloned().ok_or(KernelError::NotFound)?;
    Ok(io_cap::wrap(BlkFile { device, position: 0 }))
}
