// Early boot byte-ring logger, fed by every console write so a panic
// or host debugger can recover console history after the fact.
//
// A plain circular byte buffer, not the generic log-entry ring `printk`
// uses: bytes, not `LogEntry`s, and every access already goes through
// `BOOTLOG`'s own lock, so the indices don't need to be atomics.

use spin::Mutex;

const BOOTLOG_CAP: usize = 64 * 1024; // 64 KiB

struct ByteRing {
    buffer: [u8; BOOTLOG_CAP],
    head: usize,
    tail: usize,
}

impl ByteRing {
    const fn new() -> Self {
        Self { buffer: [0; BOOTLOG_CAP], head: 0, tail: 0 }
    }

    fn push(&mut self, byte: u8) {
        let next_head = (self.head + 1) % BOOTLOG_CAP;
        if next_head == self.tail {
            // full: drop the oldest byte to make room
            self.tail = (self.tail + 1) % BOOTLOG_CAP;
        }
        self.buffer[self.head] = byte;
        self.head = next_head;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }
        let byte = self.buffer[self.tail];
        self.tail = (self.tail + 1) % BOOTLOG_CAP;
        Some(byte)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.pop() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }
}

static BOOTLOG: Mutex<ByteRing> = Mutex::new(ByteRing::new());

/// Write raw bytes to the early boot log ring.
pub fn write(bytes: &[u8]) {
    BOOTLOG.lock().write(bytes);
}

/// Drain bytes from the boot log into `buf`, returning the count written;
/// subsequent calls see whatever bytes remain.
pub fn drain(buf: &mut [u8]) -> usize {
    BOOTLOG.lock().drain_into(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_drain_roundtrips() {
        let mut ring = ByteRing::new();
        ring.write(b"boot");
        let mut out = [0u8; 4];
        assert_eq!(ring.drain_into(&mut out), 4);
        assert_eq!(&out, b"boot");
        assert_eq!(ring.drain_into(&mut out), 0);
    }

    #[test]
    fn overflow_drops_oldest_byte() {
        let mut ring = ByteRing::new();
        // Exactly `BOOTLOG_CAP` pushes fills the ring and forces one
        // eviction on the last push (only `BOOTLOG_CAP - 1` bytes fit
        // at once, since head==tail means empty).
        for i in 0..BOOTLOG_CAP {
            ring.push((i % 256) as u8);
        }
        let mut out = [0u8; 1];
        ring.drain_into(&mut out);
        assert_eq!(out[0], 1u8);
    }
}
