use bitflags::bitflags;
use snafu::{Location, Snafu, ensure};

use crate::PAGE_SIZE;

bitflags! {
    /// Permissions requested for a freshly mapped heap page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapPageFlags: u64 {
        /// The CPU may read from the page.
        const R = 1 << 0;

        /// The CPU may write to the page.
        const W = 1 << 1;

        /// The CPU may execute instructions on the page.
        const X = 1 << 2;

        /// Userspace may access the page.
        const U = 1 << 3;

        const RW = Self::R.bits() | Self::W.bits();
        const RX = Self::R.bits() | Self::X.bits();
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

/// Errors that can occur while mapping a page for the heap.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MapPageError {
    #[snafu(display("physical frames exhausted while mapping page at {addr:#x}"))]
    FramesExhausted {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("page already mapped at {addr:#x}"))]
    AlreadyMapped {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Source of backing pages for the heap.
///
/// The heap grows one page at a time and only ever asks for the page
/// immediately past the region it already manages, so implementations may
/// assume monotonically increasing `addr` values between unmaps.
pub trait PageProvider {
    /// Maps one page of physical memory at virtual address `addr`.
    ///
    /// `addr` is always page aligned. On failure the heap stays on its
    /// current footprint, so the implementation must not leave a partially
    /// mapped page behind.
    fn map_page(&mut self, addr: usize, flags: MapPageFlags) -> Result<(), MapPageError>;

    /// Unmaps the page at virtual address `addr`.
    fn unmap_page(&mut self, addr: usize);
}

/// Page provider backed by a fixed window of pre-reserved memory.
///
/// Useful during early bring-up, before a real frame allocator exists, and
/// in tests: mapping just advances a watermark through the window and fails
/// once the window is exhausted.
#[derive(Debug)]
pub struct FixedPages {
    next: usize,
    end: usize,
}

impl FixedPages {
    /// Creates a provider handing out pages from `[start, start + size)`.
    #[must_use]
    pub const fn new(start: usize, size: usize) -> Self {
        Self {
            next: start,
            end: start + size,
        }
    }
}

impl PageProvider for FixedPages {
    fn map_page(&mut self, addr: usize, flags: MapPageFlags) -> Result<(), MapPageError> {
        let _ = flags;
        ensure!(addr >= self.next, AlreadyMappedSnafu { addr });
        ensure!(
            addr == self.next && addr + PAGE_SIZE <= self.end,
            FramesExhaustedSnafu { addr }
        );
        self.next = addr + PAGE_SIZE;
        Ok(())
    }

    fn unmap_page(&mut self, addr: usize) {
        if addr + PAGE_SIZE == self.next {
            self.next = addr;
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::format;

    use super::*;

    const BASE: usize = 0x4000_0000;

    #[test]
    fn maps_forward_one_page_at_a_time() {
        let mut pages = FixedPages::new(BASE, 2 * PAGE_SIZE);
        pages.map_page(BASE, MapPageFlags::RW).unwrap();
        pages.map_page(BASE + PAGE_SIZE, MapPageFlags::RW).unwrap();
    }

    #[test]
    fn rejects_remapping_a_mapped_page() {
        let mut pages = FixedPages::new(BASE, 2 * PAGE_SIZE);
        pages.map_page(BASE, MapPageFlags::RW).unwrap();
        let err = pages.map_page(BASE, MapPageFlags::RW).unwrap_err();
        assert!(matches!(err, MapPageError::AlreadyMapped { .. }));
    }

    #[test]
    fn exhausts_at_the_window_end() {
        let mut pages = FixedPages::new(BASE, PAGE_SIZE);
        pages.map_page(BASE, MapPageFlags::RW).unwrap();
        let err = pages.map_page(BASE + PAGE_SIZE, MapPageFlags::RW).unwrap_err();
        assert!(matches!(err, MapPageError::FramesExhausted { .. }));
    }

    #[test]
    fn unmapping_the_top_page_rewinds_the_watermark() {
        let mut pages = FixedPages::new(BASE, PAGE_SIZE);
        pages.map_page(BASE, MapPageFlags::RW).unwrap();
        pages.unmap_page(BASE);
        pages.map_page(BASE, MapPageFlags::RW).unwrap();
    }

    #[test]
    fn errors_name_the_failing_address() {
        let mut pages = FixedPages::new(BASE, 0);
        let err = pages.map_page(BASE, MapPageFlags::RW).unwrap_err();
        assert!(format!("{err}").contains("0x40000000"));
    }
}
