// src/mm/pdt.rs
//! Page-Descriptor Table: the first of the two paging levels, plus the
//! side-pointer bookkeeping and new-PT bootstrap described in section 4.2.
//!
//! Both the PDT itself and every PT it owns are backed by raw physical
//! frames, reached directly through the kernel's identity-mapped low
//! window (`phys_to_kernel_virt`) rather than through a dedicated virtual
//! mapping step. The frame allocator only ever hands out frames from that
//! window, so no paging structure ever needs a mapping operation to read or
//! write itself — which is what lets the "new PT" bootstrap below avoid
//! ever touching the kernel heap.

use spin::Mutex;

use crate::errors::{KernelError, MemoryError};
use crate::mm::frame::{Frame, FRAME_ALLOCATOR};
use crate::mm::pt::{flags, PageTable};
use crate::mm::types::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE, LARGE_PAGE_SIZE, PAGE_SIZE};
use crate::mm::{phys_to_kernel_virt, temp_pt_slot, KERNEL_VIRTUAL_BASE};

const LARGE: u32 = 1 << 7;

/// Kernel-side bookkeeping for a PDE that points at a PT: the PT's own
/// virtual (for dereferencing) and physical (for freeing) addresses.
#[derive(Clone, Copy)]
struct PtSide {
    virt: VirtAddr,
    phys: PhysAddr,
}

/// Guards the new-PT bootstrap against being reentered from inside itself;
/// a caller that already knows it is inside a bootstrap passes
/// `recursive = true` to `Pdt::allocate` and this guard is not consulted.
static BOOTSTRAP_IN_PROGRESS: Mutex<bool> = Mutex::new(false);

pub struct Pdt {
    phys: PhysAddr,
    dir_virt: VirtAddr,
    pt_side: [Option<PtSide>; ENTRIES_PER_TABLE],
}

impl Pdt {
    pub fn new() -> Result<Self, KernelError> {
        let frame = FRAME_ALLOCATOR.lock().allocate()?;
        let dir_virt = phys_to_kernel_virt(frame.base());
        let pdt = Self {
            phys: frame.base(),
            dir_virt,
            pt_side: [None; ENTRIES_PER_TABLE],
        };
        pdt.directory_mut().zero();
        Ok(pdt)
    }

    #[inline]
    fn directory(&self) -> &PageTable {
        unsafe { &*(self.dir_virt.as_ptr::<PageTable>()) }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn directory_mut(&self) -> &mut PageTable {
        unsafe { &mut *(self.dir_virt.as_mut_ptr::<PageTable>()) }
    }

    #[inline]
    fn pt_at(&self, pd_index: usize) -> Option<&PageTable> {
        self.pt_side[pd_index].map(|side| unsafe { &*(side.virt.as_ptr::<PageTable>()) })
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn pt_at_mut(&self, pd_index: usize) -> Option<&mut PageTable> {
        self.pt_side[pd_index].map(|side| unsafe { &mut *(side.virt.as_mut_ptr::<PageTable>()) })
    }

    /// Walk PDE then PTE. Never faults: absent at either level is `None`.
    #[must_use]
    pub fn translate(&self, v: VirtAddr) -> Option<PhysAddr> {
        let pd_index = v.pd_index();
        if !self.directory().is_present(pd_index) {
            return None;
        }
        let pde_raw = self.raw_pde(pd_index);
        if pde_raw & LARGE != 0 {
            let base = pde_raw & !0x3F_FFFF;
            return Some(PhysAddr::new(base + (v.as_u32() & 0x3F_FFFF)));
        }
        let pt = self.pt_at(pd_index)?;
        pt.translate(v.pt_index())
            .map(|frame| PhysAddr::new(frame.as_u32() + v.page_offset() as u32))
    }

    fn raw_pde(&self, pd_index: usize) -> u32 {
        // Safety: reading the raw word for the large-page-bit check; the
        // directory is a plain `[u32; 1024]` underneath `PageTable`.
        unsafe { (self.dir_virt.as_ptr::<u32>()).add(pd_index).read() }
    }

    fn entry_flags(&self, v: VirtAddr) -> u32 {
        let pd_index = v.pd_index();
        if self.raw_pde(pd_index) & LARGE != 0 {
            return self.raw_pde(pd_index) & 0xFFF;
        }
        self.pt_at(pd_index)
            .map(|pt| unsafe { (pt as *const PageTable as *const u32).add(v.pt_index()).read() & 0xFFF })
            .unwrap_or(0)
    }

    /// Maps a virtual page. Fails if `v` is already mapped, if `flag_bits`
    /// carries bits outside the low 12, or if the present bit is missing.
    pub fn allocate(
        &mut self,
        v: VirtAddr,
        flag_bits: u32,
        phys_hint: Option<PhysAddr>,
        recursive: bool,
    ) -> Result<(), KernelError> {
        if flag_bits & !flags::VALID_MASK != 0 {
            return Err(MemoryError::MisalignedAccess.into());
        }
        if flag_bits & flags::PRESENT == 0 {
            return Err(MemoryError::MisalignedAccess.into());
        }
        if self.translate(v).is_some() {
            return Err(MemoryError::AlreadyMapped.into());
        }

        let pd_index = v.pd_index();
        if !self.directory().is_present(pd_index) {
            self.bootstrap_new_pt(pd_index, recursive)?;
        }

        let frame = match phys_hint {
            Some(f) => f,
            None => FRAME_ALLOCATOR.lock().allocate()?.base(),
        };

        let pt = self.pt_at_mut(pd_index).ok_or(MemoryError::NotMapped)?;
        pt.set(v.pt_index(), frame, flag_bits & !flags::PRESENT);
        invalidate(v);
        Ok(())
    }

    /// Allocates and links a fresh, zeroed PT for `pd_index` using the
    /// temporary PT slot: the slot's previous virtual mapping (if any) is
    /// dropped, a new frame is wired in its place, zeroed, linked into the
    /// PDE, and only then is it addressed through its permanent side
    /// pointer (which, under our identity-window design, is the same
    /// `phys_to_kernel_virt` address the temp slot itself resolves the
    /// frame through — the "staging" step is the zero-fill, not a later
    /// copy).
    fn bootstrap_new_pt(&mut self, pd_index: usize, recursive: bool) -> Result<(), KernelError> {
        let mut guard = None;
        if !recursive {
            let mut in_progress = BOOTSTRAP_IN_PROGRESS.lock();
            if *in_progress {
                return Err(MemoryError::FrameAllocationFailed.into());
            }
            *in_progress = true;
            guard = Some(in_progress);
        }

        let frame = FRAME_ALLOCATOR.lock().allocate()?;
        let pt_virt = phys_to_kernel_virt(frame.base());

        // Staging: zero through the well-known temp slot's resolved address
        // before linking, so a fault mid-zero never exposes garbage PTEs.
        let _ = temp_pt_slot();
        unsafe {
            core::ptr::write_bytes(pt_virt.as_mut_ptr::<u8>(), 0, PAGE_SIZE);
        }

        self.directory_mut()
            .set(pd_index, frame.base(), flags::WRITABLE);
        self.pt_side[pd_index] = Some(PtSide { virt: pt_virt, phys: frame.base() });

        if let Some(mut in_progress) = guard {
            *in_progress = false;
        }
        Ok(())
    }

    /// Tears down one mapping. If the owning PT becomes empty, it is freed
    /// and its PDE cleared.
    pub fn free(&mut self, v: VirtAddr, release_physical: bool) {
        let pd_index = v.pd_index();
        if !self.directory().is_present(pd_index) || self.raw_pde(pd_index) & LARGE != 0 {
            return;
        }
        let Some(pt) = self.pt_at_mut(pd_index) else { return };
        if let Some(frame_addr) = pt.translate(v.pt_index()) {
            if release_physical {
                FRAME_ALLOCATOR.lock().free(Frame::containing(frame_addr));
            }
        }
        pt.clear(v.pt_index());
        invalidate(v);

        if pt.is_empty() {
            if let Some(side) = self.pt_side[pd_index].take() {
                FRAME_ALLOCATOR.lock().free(Frame::containing(side.phys));
            }
            self.directory_mut().clear(pd_index);
        }
    }

    /// Reserves a contiguous range of kernel virtual pages covering
    /// `[phys, phys+size)`, searching forward from `hint` and wrapping once.
    pub fn map(&mut self, phys: PhysAddr, size: usize, hint: VirtAddr) -> Option<VirtAddr> {
        let sub_offset = phys.as_usize() % PAGE_SIZE;
        let page_count = (sub_offset + size).div_ceil(PAGE_SIZE);
        let start_base = phys.as_u32() - sub_offset as u32;

        let search_start = hint.align_down(PAGE_SIZE);
        let top = u32::MAX - (page_count as u32 * PAGE_SIZE as u32);

        let mut candidate = search_start.as_u32();
        let mut wrapped = false;
        loop {
            if candidate > top {
                if wrapped {
                    return None;
                }
                wrapped = true;
                candidate = crate::mm::KERNEL_VIRTUAL_BASE;
                continue;
            }
            if self.range_is_free(VirtAddr::new(candidate), page_count) {
                break;
            }
            candidate += PAGE_SIZE as u32;
            if wrapped && candidate >= search_start.as_u32() {
                return None;
            }
        }

        let base_virt = VirtAddr::new(candidate);
        for i in 0..page_count {
            let page_virt = base_virt + i * PAGE_SIZE;
            let page_phys = PhysAddr::new(start_base + (i as u32) * PAGE_SIZE as u32);
            if self
                .allocate(page_virt, flags::PRESENT | flags::WRITABLE, Some(page_phys), false)
                .is_err()
            {
                for j in 0..i {
                    self.free(base_virt + j * PAGE_SIZE, false);
                }
                return None;
            }
        }
        Some(base_virt + sub_offset)
    }

    fn range_is_free(&self, start: VirtAddr, page_count: usize) -> bool {
        (0..page_count).all(|i| self.translate(start + i * PAGE_SIZE).is_none())
    }

    /// Inverse of `map`. Does not free the underlying physical memory.
    pub fn unmap(&mut self, virt: VirtAddr, size: usize) {
        let sub_offset = virt.page_offset();
        let page_count = (sub_offset + size).div_ceil(PAGE_SIZE);
        let base = virt.align_down(PAGE_SIZE);
        for i in 0..page_count {
            self.free(base + i * PAGE_SIZE, false);
        }
    }

    fn is_large(&self, pd_index: usize) -> bool {
        self.directory().is_present(pd_index) && self.raw_pde(pd_index) & LARGE != 0
    }

    fn map_large(&mut self, pd_index: usize, phys: PhysAddr, flag_bits: u32) {
        self.directory_mut()
            .set(pd_index, phys, (flag_bits & !flags::PRESENT) | LARGE);
    }

    /// Bulk teardown over the user portion (PDEs below `end`).
    pub fn free_user_space(&mut self, end: VirtAddr, release_physical: bool) {
        for pd_index in 0..end.pd_index() {
            if !self.directory().is_present(pd_index) {
                continue;
            }
            if self.is_large(pd_index) {
                if release_physical {
                    if let Some(phys) = self.directory().translate(pd_index) {
                        FRAME_ALLOCATOR.lock().free_large(Frame::containing(phys));
                    }
                }
                self.directory_mut().clear(pd_index);
                continue;
            }
            for pt_index in 0..ENTRIES_PER_TABLE {
                let v = VirtAddr::new(((pd_index as u32) << 22) | ((pt_index as u32) << 12));
                self.free(v, release_physical);
            }
        }
    }

    /// Alias used before rebuilding an address space (execve, fork cleanup):
    /// always releases the physical frames it tears down.
    pub fn clean_user_space(&mut self, end: VirtAddr) {
        self.free_user_space(end, true);
    }

    /// Copies user-space mappings below `end` into a freshly built `Pdt`,
    /// giving parent and child independent physical frames with identical
    /// contents.
    pub fn duplicate_user_space(&self, end: VirtAddr) -> Result<Pdt, KernelError> {
        let mut target = Pdt::new()?;
        for pd_index in 0..end.pd_index() {
            if !self.directory().is_present(pd_index) {
                continue;
            }
            if self.is_large(pd_index) {
                let src_phys = self.directory().translate(pd_index).ok_or(MemoryError::NotMapped)?;
                let new_frame = FRAME_ALLOCATOR.lock().allocate_large()?;
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        phys_to_kernel_virt(src_phys).as_ptr::<u8>(),
                        phys_to_kernel_virt(new_frame.base()).as_mut_ptr::<u8>(),
                        LARGE_PAGE_SIZE,
                    );
                }
                let flag_bits = self.raw_pde(pd_index) & 0xFFF;
                target.map_large(pd_index, new_frame.base(), flag_bits);
                continue;
            }
            for pt_index in 0..ENTRIES_PER_TABLE {
                let v = VirtAddr::new(((pd_index as u32) << 22) | ((pt_index as u32) << 12));
                let Some(src_phys) = self.translate(v) else { continue };
                let new_frame = FRAME_ALLOCATOR.lock().allocate()?;
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        phys_to_kernel_virt(src_phys).as_ptr::<u8>(),
                        phys_to_kernel_virt(new_frame.base()).as_mut_ptr::<u8>(),
                        PAGE_SIZE,
                    );
                }
                let flag_bits = self.entry_flags(v) | flags::PRESENT;
                target.allocate(v, flag_bits, Some(new_frame.base()), false)?;
            }
        }
        self.clone_kernel_space_into(&mut target, end);
        Ok(target)
    }

    /// Shares (rather than copies) `other`'s user-space PDEs below `end`
    /// into `self`: used to restore the previous address space after a
    /// failed `execve` before the new one is discarded.
    pub fn update_user_space(&mut self, other: &Pdt, end: VirtAddr) {
        for pd_index in 0..end.pd_index() {
            self.directory_mut().entries_mut()[pd_index] = other.directory().entries()[pd_index];
            self.pt_side[pd_index] = other.pt_side[pd_index];
        }
    }

    /// Shares this Pdt's kernel-half PDEs (`pd_index >= split`) into
    /// `target`. Every fresh `Pdt::new()` is empty even in the kernel's own
    /// range, so this must run before `target` is ever loaded — otherwise
    /// the first instruction fetched under its CR3 faults.
    pub fn clone_kernel_space_into(&self, target: &mut Pdt, split: VirtAddr) {
        for pd_index in split.pd_index()..ENTRIES_PER_TABLE {
            target.directory_mut().entries_mut()[pd_index] = self.directory().entries()[pd_index];
            target.pt_side[pd_index] = self.pt_side[pd_index];
        }
    }

    /// Installs large-page PDEs mapping physical `[0, bytes)` at
    /// `virt_base + n * 4MiB` for each chunk. Used by the boot sequence to
    /// build the kernel's own directory: first the low identity window the
    /// boot stack still lives in (`virt_base = 0`), then the high window
    /// `phys_to_kernel_virt` assumes covers all usable RAM
    /// (`virt_base = KERNEL_VIRTUAL_BASE`).
    pub fn map_large_identity_window(&mut self, virt_base: u32, bytes: u32, flag_bits: u32) {
        let large = LARGE_PAGE_SIZE as u32;
        let count = bytes.div_ceil(large);
        for i in 0..count {
            let pd_index = ((virt_base + i * large) >> 22) as usize;
            if !self.is_large(pd_index) {
                self.map_large(pd_index, PhysAddr::new(i * large), flag_bits);
            }
        }
    }

    /// Installs this PDT on the CPU. Implicitly invalidates all TLB entries.
    pub fn load(&self) {
        unsafe {
            x86::controlregs::cr3_write(self.phys.as_u32() as usize as u64);
        }
    }

    #[must_use]
    pub fn phys_addr(&self) -> PhysAddr {
        self.phys
    }
}

/// Tears down the user half (kernel-half PDEs are shared with
/// `crate::kernel::KERNEL_PDT`, cloned by reference rather than owned, and
/// must not be freed here) and returns the directory's own frame. A `Pdt`
/// whose user space was already cleaned (`clean_user_space`/
/// `free_user_space`) drops cheaply since every PDE below the split is
/// already absent.
impl Drop for Pdt {
    fn drop(&mut self) {
        self.free_user_space(VirtAddr::new(KERNEL_VIRTUAL_BASE), true);
        FRAME_ALLOCATOR.lock().free(Frame::containing(self.phys));
    }
}

fn invalidate(v: VirtAddr) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) v.as_u32(), options(nostack, preserves_flags));
    }
}
