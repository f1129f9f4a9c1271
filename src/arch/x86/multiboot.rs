// src/arch/x86/multiboot.rs
//! Thin wrapper over the `multiboot` crate's `Multiboot1` info struct:
//! the usable-RAM map and the boot module list GRUB hands us, both as
//! plain arrays the boot sequence can consume without touching the
//! crate's own iterator/trait surface anywhere else.
//!
//! The exact shape of `multiboot::information::Multiboot`'s memory-map
//! and module accessors is not verified against the crate's published
//! docs in this environment; `MemoryManagement::paddr_to_slice` is
//! implemented here against the kernel's identity-mapped low window,
//! which is the only part of the contract this code actually depends on.

use multiboot::information::{MemoryManagement, Multiboot, PAddr};

use crate::mm::frame::UsableRange;
use crate::mm::types::PhysAddr;
use crate::mm::phys_to_kernel_virt;

const MAX_RANGES: usize = 32;
const MAX_MODULES: usize = 8;

/// One GRUB-loaded boot module: a physical byte range plus whatever name
/// string followed the kernel's command line in the module cmdline, if
/// any.
#[derive(Clone, Copy)]
pub struct BootModule {
    pub start: u32,
    pub end: u32,
}

pub struct BootInfo {
    pub ranges: [UsableRange; MAX_RANGES],
    pub range_count: usize,
    pub modules: [BootModule; MAX_MODULES],
    pub module_count: usize,
}

struct IdentityMap;

impl MemoryManagement for IdentityMap {
    unsafe fn paddr_to_slice(&self, addr: PAddr, length: usize) -> Option<&'static [u8]> {
        let virt = phys_to_kernel_virt(PhysAddr::new(addr as u32));
        Some(unsafe { core::slice::from_raw_parts(virt.as_ptr::<u8>(), length) })
    }

    unsafe fn allocate(&mut self, _length: usize, _align: usize) -> Option<(PAddr, &'static mut [u8])> {
        None
    }

    unsafe fn deallocate(&mut self, _addr: PAddr) {}
}

/// Parses the `multiboot_info_t` GRUB left at `mb_info_phys`, returning
/// the usable memory ranges and boot modules it reports. Anything past
/// `MAX_RANGES`/`MAX_MODULES` is silently dropped rather than panicking
/// boot over a pathological memory map.
#[must_use]
pub fn parse(mb_info_phys: u32) -> BootInfo {
    let mut mm = IdentityMap;
    let mut info = BootInfo {
        ranges: [UsableRange { start: 0, end: 0 }; MAX_RANGES],
        range_count: 0,
        modules: [BootModule { start: 0, end: 0 }; MAX_MODULES],
        module_count: 0,
    };

    let Some(mb) = (unsafe { Multiboot::from_ptr(mb_info_phys as PAddr, &mut mm) }) else {
        return info;
    };

    if let Some(regions) = mb.memory_regions() {
        for region in regions {
            if region.memory_type() != multiboot::information::MemoryType::Available {
                continue;
            }
            if info.range_count >= MAX_RANGES {
                break;
            }
            let start = region.base_address() as u32;
            let end = start.saturating_add(region.length() as u32);
            info.ranges[info.range_count] = UsableRange { start, end };
            info.range_count += 1;
        }
    }

    if let Some(modules) = mb.modules() {
        for module in modules {
            if info.module_count >= MAX_MODULES {
                break;
            }
            info.modules[info.module_count] = BootModule { start: module.start, end: module.end };
            info.module_count += 1;
        }
    }

    info
}
