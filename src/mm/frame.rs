// src/mm/frame.rs
//! Physical frame allocator.
//!
//! Seeded from the Multiboot memory map at boot. All allocations are a
//! single frame, so there is no fragmentation to track: a bump cursor hands
//! out virgin frames from the usable regions, and a small free stack holds
//! frames returned by `free` for reuse ahead of the bump cursor. Large (4
//! MiB) frames are tracked the same way, in a parallel free stack, bumping
//! the cursor forward to the next 1024-frame-aligned boundary when one is
//! requested.

use lazy_static::lazy_static;
use spin::Mutex;

use crate::errors::MemoryError;
use crate::mm::types::{PhysAddr, LARGE_PAGE_SIZE, PAGE_SIZE};

const MAX_REGIONS: usize = 32;
const MAX_FREE_SMALL: usize = 1024;
const MAX_FREE_LARGE: usize = 64;

/// A physical frame, identified by its frame number (byte address / `PAGE_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame(u32);

impl Frame {
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysAddr {
        PhysAddr::new(self.0 * PAGE_SIZE as u32)
    }

    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysAddr) -> Self {
        Self(addr.as_u32() / PAGE_SIZE as u32)
    }
}

#[derive(Debug, Clone, Copy)]
struct UsableRegion {
    start_frame: u32,
    end_frame: u32,
}

/// One usable physical range reported by the bootloader's memory map, in
/// byte addresses (end exclusive). Built from the Multiboot memory map by
/// the boot sequence and handed to `FrameAllocator::init`.
#[derive(Debug, Clone, Copy)]
pub struct UsableRange {
    pub start: u32,
    pub end: u32,
}

pub struct FrameAllocator {
    regions: [UsableRegion; MAX_REGIONS],
    region_count: usize,
    cursor_region: usize,
    cursor_frame: u32,
    free_small: [Frame; MAX_FREE_SMALL],
    free_small_len: usize,
    free_large: [Frame; MAX_FREE_LARGE],
    free_large_len: usize,
}

impl FrameAllocator {
    const fn empty() -> Self {
        Self {
            regions: [UsableRegion { start_frame: 0, end_frame: 0 }; MAX_REGIONS],
            region_count: 0,
            cursor_region: 0,
            cursor_frame: 0,
            free_small: [Frame(0); MAX_FREE_SMALL],
            free_small_len: 0,
            free_large: [Frame(0); MAX_FREE_LARGE],
            free_large_len: 0,
        }
    }

    /// Seed the allocator from the bootloader-reported usable ranges.
    /// Ranges that straddle the kernel's own load image must already be
    /// excluded by the caller (the boot sequence trims them before calling
    /// this).
    pub fn init(&mut self, ranges: &[UsableRange]) {
        self.region_count = 0;
        for range in ranges.iter().take(MAX_REGIONS) {
            let start_frame = range.start.div_ceil(PAGE_SIZE as u32);
            let end_frame = range.end / PAGE_SIZE as u32;
            if end_frame > start_frame {
                self.regions[self.region_count] = UsableRegion { start_frame, end_frame };
                self.region_count += 1;
            }
        }
        self.cursor_region = 0;
        self.cursor_frame = self.regions.first().map_or(0, |r| r.start_frame);
        self.free_small_len = 0;
        self.free_large_len = 0;
    }

    /// Allocate a single 4 KiB frame.
    pub fn allocate(&mut self) -> Result<Frame, MemoryError> {
        if self.free_small_len > 0 {
            self.free_small_len -= 1;
            return Ok(self.free_small[self.free_small_len]);
        }
        self.bump(1).ok_or(MemoryError::OutOfMemory)
    }

    /// Allocate a 4 MiB frame, 1024-small-frame aligned.
    pub fn allocate_large(&mut self) -> Result<Frame, MemoryError> {
        if self.free_large_len > 0 {
            self.free_large_len -= 1;
            return Ok(self.free_large[self.free_large_len]);
        }
        let frames_per_large = (LARGE_PAGE_SIZE / PAGE_SIZE) as u32;
        self.align_cursor(frames_per_large);
        self.bump(frames_per_large).ok_or(MemoryError::OutOfMemory)
    }

    /// Return a frame to the pool. Silently drops the frame if the relevant
    /// free stack is already full — that frame is leaked rather than
    /// corrupting allocator state, an acceptable loss for a teaching
    /// kernel's non-fragmenting design.
    pub fn free(&mut self, frame: Frame) {
        if self.free_small_len < MAX_FREE_SMALL {
            self.free_small[self.free_small_len] = frame;
            self.free_small_len += 1;
        }
    }

    pub fn free_large(&mut self, frame: Frame) {
        if self.free_large_len < MAX_FREE_LARGE {
            self.free_large[self.free_large_len] = frame;
            self.free_large_len += 1;
        }
    }

    fn align_cursor(&mut self, align_frames: u32) {
        let rem = self.cursor_frame % align_frames;
        if rem != 0 {
            self.cursor_frame += align_frames - rem;
        }
    }

    /// Bump-allocate `count` contiguous frames starting at the cursor,
    /// advancing past region boundaries as needed.
    fn bump(&mut self, count: u32) -> Option<Frame> {
        while self.cursor_region < self.region_count {
            let region = self.regions[self.cursor_region];
            if self.cursor_frame < region.start_frame {
                self.cursor_frame = region.start_frame;
            }
            if self.cursor_frame + count <= region.end_frame {
                let frame = Frame(self.cursor_frame);
                self.cursor_frame += count;
                return Some(frame);
            }
            self.cursor_region += 1;
            self.cursor_frame = self
                .regions
                .get(self.cursor_region)
                .map_or(u32::MAX, |r| r.start_frame);
        }
        None
    }
}

lazy_static! {
    pub static ref FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::empty());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn bump_allocates_sequential_frames_within_a_region() {
        let mut alloc = FrameAllocator::empty();
        alloc.init(&[UsableRange { start: 0x1000, end: 0x1000 + 4 * PAGE_SIZE as u32 }]);

        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!(b.index(), a.index() + 1);
    }

    #[test_case]
    fn freed_frames_are_reused_before_the_cursor_advances() {
        let mut alloc = FrameAllocator::empty();
        alloc.init(&[UsableRange { start: 0, end: 4 * PAGE_SIZE as u32 }]);

        let first = alloc.allocate().unwrap();
        alloc.free(first);
        let reused = alloc.allocate().unwrap();
        assert_eq!(reused, first);
    }

    #[test_case]
    fn exhausted_region_reports_out_of_memory() {
        let mut alloc = FrameAllocator::empty();
        alloc.init(&[UsableRange { start: 0, end: PAGE_SIZE as u32 }]);

        assert!(alloc.allocate().is_ok());
        assert!(matches!(alloc.allocate(), Err(MemoryError::OutOfMemory)));
    }

    #[test_case]
    fn bump_skips_past_a_region_too_small_for_the_request() {
        let mut alloc = FrameAllocator::empty();
        alloc.init(&[
            UsableRange { start: 0, end: PAGE_SIZE as u32 },
            UsableRange { start: 0x10_0000, end: 0x10_0000 + 4 * PAGE_SIZE as u32 },
        ]);

        let first = alloc.allocate().unwrap();
        assert_eq!(first.index(), 0);
        let second = alloc.allocate().unwrap();
        assert_eq!(second.base().as_u32(), 0x10_0000);
    }
}
