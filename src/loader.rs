// Guest ELF loading. The image is pulled through the VFS, its PT_LOAD
// segments are copied into guest memory (BSS zeroed), and control transfers
// by installing the entry point as the next pc.

use crate::fs::{SEEK_END, SEEK_SET};
use crate::memory::Bus;
use crate::processor::Machine;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use thiserror::Error;

const EM_RISCV: u16 = 243;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("no such file '{0}'")]
    NotFound(String),
    #[error("short read while loading image")]
    ShortRead,
    #[error("not an ELF image")]
    BadMagic,
    #[error("cannot parse ELF: {0}")]
    Parse(#[from] goblin::error::Error),
    #[error("unexpected machine type {0}")]
    WrongMachine(u16),
    #[error("unexpected program header size {0}")]
    BadPhentSize(u16),
    #[error("segment 0x{vaddr:08x}+0x{len:x} outside guest memory")]
    BadSegment { vaddr: u32, len: u32 },
}

// Copies PT_LOAD segments of an in-memory ELF into guest RAM and returns the
// entry address. Works for either ELF class; goblin normalizes the headers.
pub fn load_elf_bytes(bus: &mut Bus, bytes: &[u8]) -> Result<u32, LoaderError> {
    if bytes.len() < 4 || &bytes[..4] != b"\x7fELF" {
        return Err(LoaderError::BadMagic);
    }
    let elf = Elf::parse(bytes)?;
    if elf.header.e_machine != EM_RISCV {
        return Err(LoaderError::WrongMachine(elf.header.e_machine));
    }
    let expected = if elf.is_64 { 56 } else { 32 };
    if elf.header.e_phentsize != expected {
        return Err(LoaderError::BadPhentSize(elf.header.e_phentsize));
    }
    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }
        let vaddr = ph.p_vaddr as u32;
        let filesz = ph.p_filesz as usize;
        let memsz = (ph.p_memsz as usize).max(filesz);
        if filesz > 0 {
            let offset = ph.p_offset as usize;
            let src = bytes.get(offset..offset + filesz).ok_or(LoaderError::ShortRead)?;
            let dst = bus.ram_mut(vaddr, filesz).map_err(|_| LoaderError::BadSegment {
                vaddr,
                len: filesz as u32,
            })?;
            dst.copy_from_slice(src);
        }
        if memsz > filesz {
            let tail = vaddr.wrapping_add(filesz as u32);
            let dst = bus.ram_mut(tail, memsz - filesz).map_err(|_| LoaderError::BadSegment {
                vaddr: tail,
                len: (memsz - filesz) as u32,
            })?;
            for byte in dst.iter_mut() {
                *byte = 0;
            }
        }
    }
    Ok(elf.header.e_entry as u32)
}

// The guest cold start: open through the file table, read the whole image,
// load, and jump. The descriptor is closed before parsing, on every path.
pub fn naive_uload(m: &mut Machine, filename: &str) -> Result<(), LoaderError> {
    let fd = m.fs.open(filename, 0, 0);
    if fd < 0 {
        return Err(LoaderError::NotFound(filename.to_string()));
    }
    let fd = fd as usize;
    let size = m.fs.lseek(fd, 0, SEEK_END).unwrap_or(0);
    let _ = m.fs.lseek(fd, 0, SEEK_SET);
    let mut bytes = vec![0u8; size];
    let n = m.fs.read_host(fd, &mut bytes);
    m.fs.close(fd);
    if n != size {
        return Err(LoaderError::ShortRead);
    }
    let entry = load_elf_bytes(&mut m.bus, &bytes)?;
    log::info!("Jump to entry = 0x{:08x}", entry);
    m.cpu.pc = entry;
    m.cpu.npc = entry;
    Ok(())
}
