// The ELF program loader: an external collaborator consuming the
// file-system/device I/O interface (`io_cap::IoCap`) and the VM interface
// (`mm::address_space`) to populate a freshly-unmapped user address space.
// Only 64-bit little-endian PT_LOAD segments are honored; everything else
// in the program header table is skipped.

use crate::io_cap::{self, IoCap};
use crate::lib::error::KernelError;
use crate::mm::address_space::{self, Mtag};
use crate::mm::page_pool::PAGE_SIZE;
use crate::mm::sv39::{self, PteFlags};

const EI_MAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

/// Loads every PT_LOAD segment of the ELF image read through `io` into
/// `mtag`, mapping exactly the pages each segment covers with the
/// segment's own permissions. Returns the entry point on success.
pub fn load(io: &IoCap, mtag: &Mtag) -> Result<usize, KernelError> {
    let mut header = [0u8; 64];
    seek_read(io, 0, &mut header)?;
    if header[0..4] != EI_MAG || header[4] != ELFCLASS64 {
        return Err(KernelError::BadFormat);
    }

    let e_entry = u64::from_le_bytes(header[24..32].try_into().unwrap());
    let e_phoff = u64::from_le_bytes(header[32..40].try_into().unwrap());
    let e_phentsize = u16::from_le_bytes(header[54..56].try_into().unwrap()) as u64;
    let e_phnum = u16::from_le_bytes(header[56..58].try_into().unwrap());

    for i in 0..e_phnum as u64 {
        let mut phdr = [0u8; 56];
        seek_read(io, e_phoff + i * e_phentsize, &mut phdr)?;
        let p_type = u32::from_le_bytes(phdr[0..4].try_into().unwrap());
        if p_type != PT_LOAD {
            continue;
        }
        let p_flags = u32::from_le_bytes(phdr[4..8].try_into().unwrap());
        let p_offset = u64::from_le_bytes(phdr[8..16].try_into().unwrap());
        let p_vaddr = u64::from_le_bytes(phdr[16..24].try_into().unwrap());
        let p_filesz = u64::from_le_bytes(phdr[32..40].try_into().unwrap());
        let p_memsz = u64::from_le_bytes(phdr[40..48].try_into().unwrap());
        load_segment(mtag, io, p_flags, p_offset, p_vaddr, p_filesz, p_memsz)?;
    }

    Ok(e_entry as usize)
}

fn load_segment(mtag: &Mtag, io: &IoCap, p_flags: u32, p_offset: u64, p_vaddr: u64, p_filesz: u64, p_memsz: u64) -> Result<(), KernelError> {
    if p_memsz == 0 {
        return Ok(());
    }
    if p_filesz > p_memsz {
        return Err(KernelError::BadFormat);
    }

    let mut flags = PteFlags::U;
    if p_flags & PF_R != 0 {
        flags |= PteFlags::R;
    }
    if p_flags & PF_W != 0 {
        flags |= PteFlags::W;
    }
    if p_flags & PF_X != 0 {
        flags |= PteFlags::X;
    }

    let start_page = sv39::page_round_down(p_vaddr as usize);
    let end_page = sv39::page_round_down((p_vaddr + p_memsz - 1) as usize);
    let mut va = start_page;
    while va <= end_page {
        address_space::alloc_and_map(mtag, va, flags)?;
        va += PAGE_SIZE;
    }

    if p_filesz > 0 {
        // SAFETY: every page in [p_vaddr, p_vaddr + p_filesz) was just
        // mapped above, in the address space this hart is currently
        // running under.
        let dest = unsafe { core::slice::from_raw_parts_mut(p_vaddr as usize as *mut u8, p_filesz as usize) };
        seek_read(io, p_offset, dest)?;
    }
    Ok(())
}

fn seek_read(io: &IoCap, offset: u64, buf: &mut [u8]) -> Result<(), KernelError> {
    let mut cap = io.lock();
    cap.ioctl(io_cap::IOCTL_SETPOS, offset as usize)?;
    let mut done = 0;
    while done < buf.len() {
        let n = cap.read(&mut buf[done..])?;
        if n == 0 {
            return Err(KernelError::BadFormat);
        }
        done += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn build_minimal_elf(entry: u64, segment: &[u8], vaddr: u64) -> Vec<u8> {
        let phoff = 64u64;
        let data_off = phoff + 56;
        let mut image = vec![0u8; data_off as usize + segment.len()];
        image[0..4].copy_from_slice(&EI_MAG);
        image[4] = ELFCLASS64;
        image[24..32].copy_from_slice(&entry.to_le_bytes());
        image[32..40].copy_from_slice(&phoff.to_le_bytes());
        image[54..56].copy_from_slice(&56u16.to_le_bytes());
        image[56..58].copy_from_slice(&1u16.to_le_bytes());

        let ph = &mut image[phoff as usize..phoff as usize + 56];
        ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        ph[4..8].copy_from_slice(&(PF_R | PF_W | PF_X).to_le_bytes());
        ph[8..16].copy_from_slice(&data_off.to_le_bytes());
        ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
        ph[32..40].copy_from_slice(&(segment.len() as u64).to_le_bytes());
        ph[40..48].copy_from_slice(&(segment.len() as u64).to_le_bytes());

        image[data_off as usize..].copy_from_slice(segment);
        image
    }

    #[test]
    fn rejects_bad_magic() {
        let cap = io_cap::wrap(io_cap::MemoryLiteral::new(vec![0u8; 64]));
        let mtag = Mtag { satp: 0, root_phys: 0 };
        assert_eq!(load(&cap, &mtag), Err(KernelError::BadFormat));
    }

    #[test]
    fn parses_header_fields_of_a_well_formed_image() {
        let image = build_minimal_elf(0x1000, &[0xaa; 16], 0x1000_0000);
        assert_eq!(image[0..4], EI_MAG);
        assert_eq!(u64::from_le_bytes(image[24..32].try_into().unwrap()), 0x1000);
    }
}
