// The flat file system: a boot block directory, fixed-size inodes, and
// raw data blocks, all reached through a single block-device `IoCap`.
// Every metadata access — directory scan, inode load/store, the shared
// inode buffer itself — goes through one global sleep lock, so file I/O
// across the whole kernel is strictly serialized. That is a deliberate
// concurrency ceiling, not an oversight: see the handle table below.

use crate::io_cap::{self, IoCap, IoObject};
use crate::lib::error::KernelError;
use alloc::vec::Vec;
use spin::Mutex;

use crate::process::sync::SleepLock;

pub const BLOCK_SIZE: usize = 4096;
const DENTRY_COUNT: usize = 63;
const DENTRY_SIZE: usize = 64;
const NAME_LEN: usize = 32;
const INODE_BLOCK_COUNT: usize = 1023;
const MAX_HANDLES: usize = 32;

struct Dentry {
    name: [u8; NAME_LEN],
    inode: u32,
}

struct BootBlock {
    num_dentry: u32,
    num_inodes: u32,
    dentries: Vec<Dentry>,
}

impl BootBlock {
    fn parse(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() < BLOCK_SIZE {
            return Err(KernelError::BadFormat);
        }
        let num_dentry = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let num_inodes = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if num_dentry as usize > DENTRY_COUNT {
            return Err(KernelError::BadFormat);
        }
        let table_off = 64;
        let mut dentries = Vec::with_capacity(DENTRY_COUNT);
        for i in 0..DENTRY_COUNT {
            let off = table_off + i * DENTRY_SIZE;
            let mut name = [0u8; NAME_LEN];
            name.copy_from_slice(&bytes[off..off + NAME_LEN]);
            let inode = u32::from_le_bytes(bytes[off + NAME_LEN..off + NAME_LEN + 4].try_into().unwrap());
            dentries.push(Dentry { name, inode });
        }
        Ok(Self { num_dentry, num_inodes, dentries })
    }
}

fn dentry_name_matches(name: &[u8; NAME_LEN], target: &str) -> bool {
    let target = target.as_bytes();
    if target.len() > NAME_LEN {
        return false;
    }
    &name[..target.len()] == target && (target.len() == NAME_LEN || name[target.len()] == 0)
}

/// One open file. No cached inode: per `mount`'s design, every read and
/// write re-reads the inode through the single shared buffer below, so
/// there is nothing here worth caching without reintroducing the
/// coherency problem that buffer exists to avoid.
struct Handle {
    file_pos: u64,
    file_size: u64,
    inode_number: u32,
    in_use: bool,
}

impl Handle {
    const fn empty() -> Self {
        Self { file_pos: 0, file_size: 0, inode_number: 0, in_use: false }
    }
}

struct FsState {
    device: Option<IoCap>,
    boot: BootBlock,
    handles: [Handle; MAX_HANDLES],
    inode_buf: Vec<u8>,
}

impl FsState {
    const fn empty() -> Self {
        const EMPTY: Handle = Handle::empty();
        Self { device: None, boot: BootBlock { num_dentry: 0, num_inodes: 0, dentries: Vec::new() }, handles: [EMPTY; MAX_HANDLES], inode_buf: Vec::new() }
    }
}

static FS_LOCK: SleepLock = SleepLock::new();
static FS: Mutex<FsState> = Mutex::new(FsState::empty());

fn read_block(io: &IoCap, block_index: u64, buf: &mut [u8]) -> Result<(), KernelError> {
    let mut cap = io.lock();
    cap.ioctl(io_cap::IOCTL_SETPOS, block_index as usize * BLOCK_SIZE)?;
    let mut done = 0;
    while done < buf.len() {
        let n = cap.read(&mut buf[done..])?;
        if n == 0 {
            return Err(KernelError::IoError);
        }
        done += n;
    }
    Ok(())
}

fn write_block(io: &IoCap, block_index: u64, buf: &[u8]) -> Result<(), KernelError> {
    let mut cap = io.lock();
    cap.ioctl(io_cap::IOCTL_SETPOS, block_index as usize * BLOCK_SIZE)?;
    let mut done = 0;
    while done < buf.len() {
        let n = cap.write(&buf[done..])?;
        if n == 0 {
            return Err(KernelError::IoError);
        }
        done += n;
    }
    Ok(())
}

fn inode_byte_len(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[0..4].try_into().unwrap())
}
fn inode_block_at(buf: &[u8], i: usize) -> u32 {
    let off = 4 + i * 4;
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

/// Absolute block number of the `data_idx`-th data block, given the
/// mounted volume's inode-region size. Blocks `0` is the boot block,
/// `1..1+num_inodes` are inode blocks, and everything past that is data.
fn absolute_data_block(num_inodes: u32, data_idx: u32) -> u64 {
    1 + num_inodes as u64 + data_idx as u64
}

/// Loads the boot block and resets the handle table. All later file I/O
/// flows through `io`.
pub fn mount(io: IoCap) -> Result<(), KernelError> {
    FS_LOCK.lock_acquire();
    let outcome = (|| -> Result<(), KernelError> {
        let mut boot_bytes = alloc::vec![0u8; BLOCK_SIZE];
        read_block(&io, 0, &mut boot_bytes)?;
        let boot = BootBlock::parse(&boot_bytes)?;

        let mut fs = FS.lock();
        fs.device = Some(io.clone());
        fs.boot = boot;
        fs.inode_buf = alloc::vec![0u8; BLOCK_SIZE];
        for h in fs.handles.iter_mut() {
            *h = Handle::empty();
        }
        Ok(())
    })();
    FS_LOCK.lock_release();
    outcome
}

/// Scans the directory for `name`, loads its inode, and hands back a
/// fresh capability over it. `name` is capped at 32 bytes.
pub fn open(name: &str) -> Result<IoCap, KernelError> {
    if name.len() > NAME_LEN {
        return Err(KernelError::InvalidArgument);
    }
    FS_LOCK.lock_acquire();
    let outcome = (|| -> Result<usize, KernelError> {
        let (inode_number, device) = {
            let fs = FS.lock();
            let device = fs.device.clone().ok_or(KernelError::NotFound)?;
            let dentry = fs.boot.dentries.iter().take(fs.boot.num_dentry as usize).find(|d| dentry_name_matches(&d.name, name)).ok_or(KernelError::NotFound)?;
            (dentry.inode, device)
        };

        let mut fs = FS.lock();
        read_block(&device, 1 + inode_number as u64, &mut fs.inode_buf)?;
        let byte_len = inode_byte_len(&fs.inode_buf);

        let slot = fs.handles.iter().position(|h| !h.in_use).ok_or(KernelError::Busy)?;
        fs.handles[slot] = Handle { file_pos: 0, file_size: byte_len as u64, inode_number, in_use: true };
        Ok(slot)
    })();
    FS_LOCK.lock_release();

    let slot = outcome?;
    Ok(io_cap::wrap(FsFile { handle_index: slot }))
}

fn fs_read(handle_index: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
    FS_LOCK.lock_acquire();
    let outcome = (|| -> Result<usize, KernelError> {
        let (device, num_inodes, file_pos, remaining) = {
            let fs = FS.lock();
            let h = &fs.handles[handle_index];
            if !h.in_use {
                return Err(KernelError::BadDescriptor);
            }
            let device = fs.device.clone().ok_or(KernelError::NotFound)?;
            (device, fs.boot.num_inodes, h.file_pos, h.file_size.saturating_sub(h.file_pos))
        };

        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }

        let inode_number = FS.lock().handles[handle_index].inode_number;
        let mut done = 0usize;
        let mut block_buf = alloc::vec![0u8; BLOCK_SIZE];
        while done < want {
            let abs_pos = file_pos + done as u64;
            let block_in_file = (abs_pos / BLOCK_SIZE as u64) as usize;
            let offset = (abs_pos % BLOCK_SIZE as u64) as usize;

            let data_idx = {
                let mut fs = FS.lock();
                read_block(&device, 1 + inode_number as u64, &mut fs.inode_buf)?;
                inode_block_at(&fs.inode_buf, block_in_file)
            };
            let abs_block = absolute_data_block(num_inodes, data_idx);
            read_block(&device, abs_block, &mut block_buf)?;

            let n = (BLOCK_SIZE - offset).min(want - done);
            buf[done..done + n].copy_from_slice(&block_buf[offset..offset + n]);
            done += n;
        }

        FS.lock().handles[handle_index].file_pos += done as u64;
        Ok(done)
    })();
    FS_LOCK.lock_release();
    outcome
}

fn fs_write(handle_index: usize, buf: &[u8]) -> Result<usize, KernelError> {
    FS_LOCK.lock_acquire();
    let outcome = (|| -> Result<usize, KernelError> {
        let (device, num_inodes, file_pos, file_size, inode_number) = {
            let fs = FS.lock();
            let h = &fs.handles[handle_index];
            if !h.in_use {
                return Err(KernelError::BadDescriptor);
            }
            let device = fs.device.clone().ok_or(KernelError::NotFound)?;
            (device, fs.boot.num_inodes, h.file_pos, h.file_size, h.inode_number)
        };

        // Writes never grow the file: the limit is the number of blocks
        // the inode already allocates, derived from its byte length.
        let allocated_blocks = (file_size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64;

        let mut done = 0usize;
        let mut block_buf = alloc::vec![0u8; BLOCK_SIZE];
        while done < buf.len() {
            let abs_pos = file_pos + done as u64;
            let block_in_file = (abs_pos / BLOCK_SIZE as u64) as usize;
            if block_in_file as u64 >= allocated_blocks || block_in_file >= INODE_BLOCK_COUNT {
                break;
            }
            let offset = (abs_pos % BLOCK_SIZE as u64) as usize;

            let data_idx = {
                let mut fs = FS.lock();
                read_block(&device, 1 + inode_number as u64, &mut fs.inode_buf)?;
                inode_block_at(&fs.inode_buf, block_in_file)
            };
            let abs_block = absolute_data_block(num_inodes, data_idx);

            read_block(&device, abs_block, &mut block_buf)?;
            let n = (BLOCK_SIZE - offset).min(buf.len() - done);
            block_buf[offset..offset + n].copy_from_slice(&buf[done..done + n]);
            write_block(&device, abs_block, &block_buf)?;

            {
                let mut fs = FS.lock();
                read_block(&device, 1 + inode_number as u64, &mut fs.inode_buf)?;
                write_block(&device, 1 + inode_number as u64, &fs.inode_buf)?;
            }

            done += n;
        }

        FS.lock().handles[handle_index].file_pos += done as u64;
        Ok(done)
    })();
    FS_LOCK.lock_release();
    outcome
}

fn fs_ioctl(handle_index: usize, cmd: u32, arg: usize) -> Result<isize, KernelError> {
    FS_LOCK.lock_acquire();
    let outcome = (|| -> Result<isize, KernelError> {
        let mut fs = FS.lock();
        let h = fs.handles.get_mut(handle_index).ok_or(KernelError::BadDescriptor)?;
        if !h.in_use {
            return Err(KernelError::BadDescriptor);
        }
        match cmd {
            io_cap::IOCTL_GETLEN => Ok(h.file_size as isize),
            io_cap::IOCTL_GETPOS => Ok(h.file_pos as isize),
            io_cap::IOCTL_SETPOS => {
                let pos = arg as u64;
                if pos > h.file_size {
                    return Err(KernelError::InvalidArgument);
                }
                h.file_pos = pos;
                Ok(0)
            }
            io_cap::IOCTL_GETBLKSZ => Ok(BLOCK_SIZE as isize),
            _ => Err(KernelError::Unsupported),
        }
    })();
    FS_LOCK.lock_release();
    outcome
}

fn fs_close(handle_index: usize) {
    FS_LOCK.lock_acquire();
    FS.lock().handles[handle_index] = Handle::empty();
    FS_LOCK.lock_release();
}

struct FsFile {
    handle_index: usize,
}

impl IoObject for FsFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        fs_read(self.handle_index, buf)
    }
    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError> {
        fs_write(self.handle_index, buf)
    }
    fn ioctl(&mut self, cmd: u32, arg: usize) -> Result<isize, KernelError> {
        fs_ioctl(self.handle_index, cmd, arg)
    }
    fn close(&mut self) {
        fs_close(self.handle_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn build_image(file_bytes: &[u8]) -> Vec<u8> {
        // Layout: block 0 boot, block 1 inode, block 2.. data. One file
        // "hello" covering ceil(len/4096) blocks.
        let data_blocks = (file_bytes.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let data_blocks = data_blocks.max(1);
        let mut image = vec![0u8; BLOCK_SIZE * (2 + data_blocks)];

        image[0..4].copy_from_slice(&1u32.to_le_bytes()); // num_dentry
        image[4..8].copy_from_slice(&1u32.to_le_bytes()); // num_inodes
        image[8..12].copy_from_slice(&(data_blocks as u32).to_le_bytes());

        let dentry_off = 64;
        image[dentry_off..dentry_off + 5].copy_from_slice(b"hello");
        image[dentry_off + NAME_LEN..dentry_off + NAME_LEN + 4].copy_from_slice(&0u32.to_le_bytes());

        let inode_off = BLOCK_SIZE;
        image[inode_off..inode_off + 4].copy_from_slice(&(file_bytes.len() as u32).to_le_bytes());
        for i in 0..data_blocks {
            let off = inode_off + 4 + i * 4;
            image[off..off + 4].copy_from_slice(&(i as u32).to_le_bytes());
        }

        let data_off = BLOCK_SIZE * 2;
        image[data_off..data_off + file_bytes.len()].copy_from_slice(file_bytes);
        image
    }

    #[test]
    fn mount_and_read_hello_world() {
        let image = build_image(b"Hello, World!");
        let dev = io_cap::wrap(crate::io_cap::MemoryLiteral::new(image));
        mount(dev).unwrap();

        let file = open("hello").unwrap();
        let mut buf = [0u8; 13];
        let n = file.lock().read(&mut buf).unwrap();
        assert_eq!(n, 13);
        assert_eq!(&buf, b"Hello, World!");
    }

    #[test]
    fn setpos_then_read_returns_suffix() {
        let image = build_image(b"Hello, World!");
        let dev = io_cap::wrap(crate::io_cap::MemoryLiteral::new(image));
        mount(dev).unwrap();

        let file = open("hello").unwrap();
        file.lock().ioctl(io_cap::IOCTL_SETPOS, 7).unwrap();
        let mut buf = [0u8; 6];
        let n = file.lock().read(&mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf, b"World!");
    }

    #[test]
    fn write_then_reopen_round_trips_without_growing_file_size() {
        let body = vec![0u8; BLOCK_SIZE * 2];
        let image = build_image(&body);
        let dev = io_cap::wrap(crate::io_cap::MemoryLiteral::new(image));
        mount(dev).unwrap();

        {
            let file = open("hello").unwrap();
            let payload = vec![0xabu8; BLOCK_SIZE];
            let n = file.lock().write(&payload).unwrap();
            assert_eq!(n, BLOCK_SIZE);
            let len = file.lock().ioctl(io_cap::IOCTL_GETLEN, 0).unwrap();
            assert_eq!(len as usize, BLOCK_SIZE * 2);
        }

        let file = open("hello").unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        let n = file.lock().read(&mut buf).unwrap();
        assert_eq!(n, BLOCK_SIZE);
        assert!(buf.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn open_missing_name_is_not_found() {
        let image = build_image(b"x");
        let dev = io_cap::wrap(crate::io_cap::MemoryLiteral::new(image));
        mount(dev).unwrap();
        assert_eq!(open("missing").err(), Some(KernelError::NotFound));
    }
}
