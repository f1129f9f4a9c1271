// src/process/elf.rs
//! Minimal ELF32 program loader for `execve`. Parses just enough of the
//! header and program-header table to map `PT_LOAD` segments and find the
//! entry point; no dynamic linking, no section headers.

use core::mem;

use crate::errors::{KernelError, ProcessError};
use crate::mm::pdt::Pdt;
use crate::mm::pt::flags;
use crate::mm::types::VirtAddr;

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32 = 1,
    Elf64 = 2,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfData {
    LittleEndian = 1,
    BigEndian = 2,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    None = 0,
    I386 = 3,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

pub mod phdr_flags {
    pub const PF_X: u32 = 1 << 0;
    pub const PF_W: u32 = 1 << 1;
    pub const PF_R: u32 = 1 << 2;
}

const PT_LOAD: u32 = 1;

#[derive(Debug)]
pub enum ElfError {
    InvalidMagic,
    UnsupportedClass,
    UnsupportedEndian,
    UnsupportedArch,
    FileTooSmall,
    InvalidProgramHeader,
    MapFailed,
}

impl From<ElfError> for KernelError {
    fn from(_: ElfError) -> Self {
        ProcessError::AddressSpaceFailure.into()
    }
}

impl Elf32Header {
    /// # Safety
    /// `data` must be at least `size_of::<Elf32Header>()` bytes.
    pub unsafe fn from_bytes(data: &[u8]) -> Result<&Self, ElfError> {
        if data.len() < mem::size_of::<Elf32Header>() {
            return Err(ElfError::FileTooSmall);
        }
        let header = unsafe { &*(data.as_ptr().cast::<Elf32Header>()) };
        if header.e_ident[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if header.e_ident[4] != ElfClass::Elf32 as u8 {
            return Err(ElfError::UnsupportedClass);
        }
        if header.e_ident[5] != ElfData::LittleEndian as u8 {
            return Err(ElfError::UnsupportedEndian);
        }
        if header.e_machine != ElfMachine::I386 as u16 {
            return Err(ElfError::UnsupportedArch);
        }
        Ok(header)
    }

    /// # Safety
    /// `data` must contain valid program headers at `e_phoff`.
    pub unsafe fn program_headers<'a>(&self, data: &'a [u8]) -> Result<&'a [Elf32ProgramHeader], ElfError> {
        let phoff = self.e_phoff as usize;
        let phnum = self.e_phnum as usize;
        let phentsize = self.e_phentsize as usize;
        if phentsize != mem::size_of::<Elf32ProgramHeader>() {
            return Err(ElfError::InvalidProgramHeader);
        }
        let total = phnum.checked_mul(phentsize).ok_or(ElfError::InvalidProgramHeader)?;
        if data.len() < phoff + total {
            return Err(ElfError::FileTooSmall);
        }
        let ptr = unsafe { data.as_ptr().add(phoff).cast::<Elf32ProgramHeader>() };
        Ok(unsafe { core::slice::from_raw_parts(ptr, phnum) })
    }
}

impl Elf32ProgramHeader {
    #[must_use]
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    #[must_use]
    pub fn page_flags(&self) -> u32 {
        let mut bits = flags::PRESENT | flags::USER;
        if self.p_flags & phdr_flags::PF_W != 0 {
            bits |= flags::WRITABLE;
        }
        bits
    }
}

/// Maps every `PT_LOAD` segment of `image` into `pdt`'s user space and
/// returns the entry point. Segments are mapped writable during the copy
/// and left that way — this loader does not enforce W^X.
pub fn load(pdt: &mut Pdt, image: &[u8]) -> Result<VirtAddr, KernelError> {
    let header = unsafe { Elf32Header::from_bytes(image)? };
    let phdrs = unsafe { header.program_headers(image)? };

    for phdr in phdrs {
        if !phdr.is_load() || phdr.p_memsz == 0 {
            continue;
        }
        let start = VirtAddr::new(phdr.p_vaddr).align_down(crate::mm::PAGE_SIZE);
        let end = VirtAddr::new(phdr.p_vaddr)
            .checked_add(phdr.p_memsz as usize)
            .ok_or(ElfError::MapFailed)?
            .align_up(crate::mm::PAGE_SIZE)
            .map_err(|_| ElfError::MapFailed)?;

        let mut page = start;
        while page < end {
            pdt.allocate(page, phdr.page_flags(), None, false)
                .map_err(|_| ElfError::MapFailed)?;
            page = page + crate::mm::PAGE_SIZE;
        }

        let file_start = phdr.p_offset as usize;
        let file_end = file_start + phdr.p_filesz as usize;
        let src = image.get(file_start..file_end).ok_or(ElfError::FileTooSmall)?;

        // Segments can span several, non-contiguous physical frames, so the
        // copy walks page by page rather than trusting one translation for
        // the whole range.
        let vaddr = phdr.p_vaddr as usize;
        let memsz = phdr.p_memsz as usize;
        let filesz = phdr.p_filesz as usize;
        let mut done = 0usize;
        while done < memsz {
            let page_addr = VirtAddr::new((vaddr + done) as u32).align_down(crate::mm::PAGE_SIZE);
            let page_off = (vaddr + done) - page_addr.as_usize();
            let chunk = (crate::mm::PAGE_SIZE - page_off).min(memsz - done);
            let phys = pdt.translate(page_addr).ok_or(ElfError::MapFailed)?;
            let dest = unsafe { crate::mm::phys_to_kernel_virt(phys).as_mut_ptr::<u8>().add(page_off) };

            let file_chunk_start = done.min(filesz);
            let file_chunk_end = (done + chunk).min(filesz);
            let file_len = file_chunk_end.saturating_sub(file_chunk_start);
            if file_len > 0 {
                unsafe {
                    core::ptr::copy_nonoverlapping(src[file_chunk_start..].as_ptr(), dest, file_len);
                }
            }
            if chunk > file_len {
                unsafe {
                    core::ptr::write_bytes(dest.add(file_len), 0, chunk - file_len);
                }
            }
            done += chunk;
        }
    }

    Ok(VirtAddr::new(header.e_entry))
}
