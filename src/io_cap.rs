// The uniform I/O capability: the same four-method interface over a
// block device, an open file, and an in-memory byte buffer, expressed as
// a trait object rather than inheritance so the concrete backends stay
// unrelated types. Reference counting rides on `Arc`: `ref` is `Arc::clone`,
// and `close` only reaches the backend when the last handle is dropped.

use crate::lib::error::KernelError;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

pub trait IoObject: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError>;
    fn ioctl(&mut self, cmd: u32, arg: usize) -> Result<isize, KernelError>;
    /// Called exactly once, when the last reference is released.
    fn close(&mut self);
}

/// A shared handle to an I/O backend. `fork` shares one of these across
/// parent and child by cloning it; the backend's `close` runs when the
/// last clone is dropped.
pub type IoCap = Arc<Mutex<dyn IoObject>>;

pub fn wrap<T: IoObject + 'static>(obj: T) -> IoCap {
    Arc::new(Mutex::new(obj))
}

/// Drops a slot's capability, invoking `close` on the backend if this was
/// the last live reference. Mirrors `fork`'s `ref` (`Arc::clone`) from the
/// other direction.
pub fn release(cap: IoCap) {
    if Arc::strong_count(&cap) == 1 {
        cap.lock().close();
    }
    drop(cap);
}

/// Backs mounted-from-memory initialization and in-kernel tests: the same
/// four operations implemented directly over a host buffer.
pub struct MemoryLiteral {
    buf: Vec<u8>,
    pos: usize,
}

impl MemoryLiteral {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }
}

pub const IOCTL_GETLEN: u32 = 1;
pub const IOCTL_GETPOS: u32 = 2;
pub const IOCTL_SETPOS: u32 = 3;
pub const IOCTL_GETBLKSZ: u32 = 4;

impl IoObject for MemoryLiteral {
    fn read(&mut self, out: &mut [u8]) -> Result<usize, KernelError> {
        let avail = self.buf.len().saturating_sub(self.pos);
        let n = avail.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        let end = (self.pos + data.len()).min(self.buf.len());
        let n = end.saturating_sub(self.pos);
        self.buf[self.pos..end].copy_from_slice(&data[..n]);
        self.pos += n;
        Ok(n)
    }

    fn ioctl(&mut self, cmd: u32, arg: usize) -> Result<isize, KernelError> {
        match cmd {
            IOCTL_GETLEN => Ok(self.buf.len() as isize),
            IOCTL_GETPOS => Ok(self.pos as isize),
            IOCTL_SETPOS => {
                if arg > self.buf.len() {
                    return Err(KernelError::InvalidArgument);
                }
                self.pos = arg;
                Ok(0)
            }
            IOCTL_GETBLKSZ => Ok(4096),
            _ => Err(KernelError::Unsupported),
        }
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn memory_literal_read_write_roundtrip() {
        let mut m = MemoryLiteral::new(vec![0u8; 8]);
        assert_eq!(m.write(b"hello").unwrap(), 5);
        m.ioctl(IOCTL_SETPOS, 0).unwrap();
        let mut out = [0u8; 5];
        assert_eq!(m.read(&mut out).unwrap(), 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn ref_and_release_only_closes_at_zero() {
        use core::sync::atomic::{AtomicUsize, Ordering};
        static CLOSES: AtomicUsize = AtomicUsize::new(0);
        struct Counting;
        impl IoObject for Counting {
            fn read(&mut self, _b: &mut [u8]) -> Result<usize, KernelError> { Ok(0) }
            fn write(&mut self, _b: &[u8]) -> Result<usize, KernelError> { Ok(0) }
            fn ioctl(&mut self, _c: u32, _a: usize) -> Result<isize, KernelError> { Ok(0) }
            fn close(&mut self) { CLOSES.fetch_add(1, Ordering::SeqCst); }
        }
        let cap = wrap(Counting);
        let cap2 = cap.clone();
        release(cap);
        assert_eq!(CLOSES.load(Ordering::SeqCst), 0);
        release(cap2);
        assert_eq!(CLOSES.load(Ordering::SeqCst), 1);
    }
}
