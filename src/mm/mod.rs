// src/mm/mod.rs
//! Memory management: physical frames, two-level x86 paging (PDT/PT), and
//! the kernel heap built on top of both.

pub mod frame;
pub mod heap;
pub mod pdt;
pub mod pt;
pub mod types;

pub use types::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE, LARGE_PAGE_SIZE, PAGE_SIZE};

/// Linker-exported higher-half split: everything the kernel itself occupies
/// lives at or above this virtual address.
pub const KERNEL_VIRTUAL_BASE: u32 = 0xC000_0000;

unsafe extern "C" {
    static kernel_physical_start: u8;
    static kernel_physical_end: u8;
    static kernel_virtual_start: u8;
    static kernel_virtual_end: u8;
    static kernel_temp_pt_slot: u8;
}

/// Physical address of the kernel image's first byte.
#[must_use]
pub fn kernel_physical_start_addr() -> PhysAddr {
    PhysAddr::new(core::ptr::addr_of!(kernel_physical_start) as u32)
}

/// Physical address one past the kernel image's last byte.
#[must_use]
pub fn kernel_physical_end_addr() -> PhysAddr {
    PhysAddr::new(core::ptr::addr_of!(kernel_physical_end) as u32)
}

/// Virtual address of the temporary PT slot reserved by the linker script,
/// used by `Pdt::allocate`'s new-PT bootstrap (section 4.2).
#[must_use]
pub fn temp_pt_slot() -> VirtAddr {
    VirtAddr::new(core::ptr::addr_of!(kernel_temp_pt_slot) as u32)
}

/// The kernel's low physical memory (everything below the image's own
/// physical footprint, plus the image itself) is identity-mapped at
/// `phys + KERNEL_VIRTUAL_BASE` by the boot trampoline. Kernel-owned paging
/// structures (the PDT itself, PTs, frames staged through the temp slot)
/// live in that window so the kernel can address them without a dedicated
/// mapping step.
#[inline]
#[must_use]
pub fn phys_to_kernel_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(phys.as_u32() + KERNEL_VIRTUAL_BASE)
}

#[inline]
#[must_use]
pub fn kernel_virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new(virt.as_u32() - KERNEL_VIRTUAL_BASE)
}
