use core::{
    fmt,
    marker::PhantomData,
    ptr::{self, NonNull},
};

use snafu::{Location, ResultExt as _, Snafu, ensure};

use crate::{
    PAGE_SIZE,
    chunk::{CHUNK_HEADER_SIZE, ChunkHeader, MIN_CHUNK_SIZE},
    provider::{MapPageError, MapPageFlags, PageProvider},
};

/// Errors that can occur while bringing up a heap.
#[derive(Debug, Snafu)]
pub enum HeapInitError {
    #[snafu(display("heap base {addr:#x} is not page aligned"))]
    UnalignedBase {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to map the initial heap page"))]
    MapInitialPage {
        source: MapPageError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// First-fit heap over a page-granular region of virtual memory.
///
/// The managed region is carved into chunks, each led by a bookkeeping
/// header and linked into a single address-ordered chain that covers the
/// region without gaps. Allocation scans the chain from the front for the
/// first free chunk that fits, splitting off the excess when it is large
/// enough to stand alone. Freeing eagerly merges the chunk with free
/// neighbors on both sides, so the chain never holds two adjacent free
/// chunks.
///
/// When no free chunk satisfies a request, the heap asks its
/// [`PageProvider`] to map one more page directly after the region and
/// retries. Growth is one page at a time; a request spanning several pages
/// simply grows repeatedly, with each new page merging into the free tail.
pub struct Heap<P>
where
    P: PageProvider,
{
    base: NonNull<u8>,
    pages: usize,
    root: *mut ChunkHeader,
    tail: *mut ChunkHeader,
    flags: MapPageFlags,
    provider: P,
}

// The heap exclusively owns the region behind `base`; its raw pointers
// never alias another heap.
unsafe impl<P> Send for Heap<P> where P: PageProvider + Send {}

impl<P> Heap<P>
where
    P: PageProvider,
{
    /// Creates a heap managing the region that starts at `base`.
    ///
    /// Maps the first page through `provider` and formats it as a single
    /// free chunk spanning the page. On error nothing is left mapped.
    ///
    /// # Safety
    ///
    /// The virtual address range starting at `base` must be reserved for
    /// this heap's exclusive use, for as many pages as `provider` is ever
    /// willing to map.
    pub unsafe fn new(
        base: NonNull<u8>,
        flags: MapPageFlags,
        mut provider: P,
    ) -> Result<Self, HeapInitError> {
        let addr = base.addr().get();
        ensure!(addr.is_multiple_of(PAGE_SIZE), UnalignedBaseSnafu { addr });
        provider
            .map_page(addr, flags)
            .context(MapInitialPageSnafu)?;

        let root = unsafe { ChunkHeader::init(base.as_ptr(), PAGE_SIZE - CHUNK_HEADER_SIZE) };
        log::debug!("heap initialized at {addr:#x} with one page");
        Ok(Self {
            base,
            pages: 1,
            root,
            tail: root,
            flags,
            provider,
        })
    }

    /// Lowest address of the managed region.
    #[must_use]
    pub fn start_addr(&self) -> usize {
        self.base.addr().get()
    }

    /// One past the highest mapped address.
    #[must_use]
    pub fn end_addr(&self) -> usize {
        self.start_addr() + self.pages * PAGE_SIZE
    }

    /// Number of pages currently mapped.
    #[must_use]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Allocates `size` bytes, growing the heap if no free chunk fits.
    ///
    /// Requests are rounded up to a multiple of [`MIN_CHUNK_SIZE`], so the
    /// chunk handed out may be larger than asked for. Returns `None` for a
    /// zero-sized request, for one so large the rounding would overflow,
    /// and when the page provider cannot supply another page.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = size.checked_next_multiple_of(MIN_CHUNK_SIZE)?;

        loop {
            let mut chunk = self.root;
            while !chunk.is_null() {
                unsafe {
                    ChunkHeader::check(chunk);
                    if !(*chunk).allocated && (*chunk).size >= size {
                        self.split(chunk, size);
                        (*chunk).allocated = true;
                        return Some(NonNull::new_unchecked(ChunkHeader::payload(chunk)));
                    }
                    chunk = (*chunk).next;
                }
            }
            if let Err(err) = self.grow() {
                log::warn!("heap cannot grow past {:#x}: {err}", self.end_addr());
                return None;
            }
        }
    }

    /// Returns `ptr`'s chunk to the free state and coalesces around it.
    ///
    /// Passing a null pointer is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer previously returned by
    /// [`Self::allocate`] or [`Self::resize`] on this heap and not freed
    /// since.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        unsafe {
            let chunk = ChunkHeader::from_payload(ptr);
            ChunkHeader::check(chunk);
            debug_assert!((*chunk).allocated, "double free at {:#018x}", ptr.addr());
            (*chunk).allocated = false;
            self.combine(chunk);
        }
    }

    /// Resizes the allocation at `ptr` to `new_size` bytes, moving it.
    ///
    /// A fresh chunk is allocated first; the payload prefix that fits both
    /// the old and the new chunk is copied over, then the old chunk is
    /// freed. On failure `None` is returned and the old allocation is left
    /// untouched. A null `ptr` behaves like a plain allocation.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::free`] for `ptr`.
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(new_size);
        }

        let new = self.allocate(new_size)?;
        unsafe {
            let old_chunk = ChunkHeader::from_payload(ptr);
            ChunkHeader::check(old_chunk);
            let new_chunk = ChunkHeader::from_payload(new.as_ptr());
            let prefix = (*old_chunk).size.min((*new_chunk).size);
            ptr::copy_nonoverlapping(ptr, new.as_ptr(), prefix);
            self.free(ptr);
        }
        Some(new)
    }

    /// Returns an iterator over the chunk chain, in address order.
    #[must_use]
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            chunk: self.root,
            _heap: PhantomData,
        }
    }

    /// Maps one more page after the region and folds it into the chain.
    ///
    /// The page is mapped before any bookkeeping changes, so a provider
    /// failure leaves the chain exactly as it was.
    fn grow(&mut self) -> Result<(), MapPageError> {
        let addr = self.end_addr();
        self.provider.map_page(addr, self.flags)?;

        unsafe {
            let page = self.base.as_ptr().add(self.pages * PAGE_SIZE);
            let chunk = ChunkHeader::init(page, PAGE_SIZE - CHUNK_HEADER_SIZE);
            (*chunk).prev = self.tail;
            (*self.tail).next = chunk;
            self.tail = chunk;
            self.pages += 1;
            self.combine(chunk);
        }
        log::debug!("heap grew to {} pages", self.pages);
        Ok(())
    }

    /// Splits `chunk` so its payload is exactly `size` bytes, linking the
    /// remainder in as a new free chunk.
    ///
    /// Keeps the whole excess inside `chunk` when it is too small to stand
    /// alone as a header plus minimum payload.
    unsafe fn split(&mut self, chunk: *mut ChunkHeader, size: usize) {
        unsafe {
            let excess = (*chunk).size - size;
            if excess < CHUNK_HEADER_SIZE + MIN_CHUNK_SIZE {
                return;
            }

            let rest = ChunkHeader::init(
                ChunkHeader::payload(chunk).add(size),
                excess - CHUNK_HEADER_SIZE,
            );
            let next = (*chunk).next;
            (*rest).prev = chunk;
            (*rest).next = next;
            if next.is_null() {
                self.tail = rest;
            } else {
                (*next).prev = rest;
            }
            (*chunk).next = rest;
            (*chunk).size = size;
        }
    }

    /// Merges `chunk` with its free neighbors on both sides and returns
    /// the surviving chunk.
    unsafe fn combine(&mut self, chunk: *mut ChunkHeader) -> *mut ChunkHeader {
        unsafe {
            let mut chunk = chunk;

            loop {
                let prev = (*chunk).prev;
                if prev.is_null() {
                    break;
                }
                ChunkHeader::check(prev);
                if (*prev).allocated {
                    break;
                }
                self.absorb(prev, chunk);
                chunk = prev;
            }

            loop {
                let next = (*chunk).next;
                if next.is_null() {
                    break;
                }
                ChunkHeader::check(next);
                if (*next).allocated {
                    break;
                }
                self.absorb(chunk, next);
            }

            chunk
        }
    }

    /// Folds `right` into `left`, its immediate neighbor in the chain.
    ///
    /// The absorbed header is zeroed so a stale sentinel can never be
    /// mistaken for a live chunk.
    unsafe fn absorb(&mut self, left: *mut ChunkHeader, right: *mut ChunkHeader) {
        unsafe {
            debug_assert_eq!(
                ChunkHeader::payload(left).addr() + (*left).size,
                right.addr(),
            );

            let next = (*right).next;
            (*left).size += CHUNK_HEADER_SIZE + (*right).size;
            (*left).next = next;
            if next.is_null() {
                self.tail = left;
            } else {
                (*next).prev = left;
            }
            right.cast::<u8>().write_bytes(0, CHUNK_HEADER_SIZE);
        }
    }
}

impl<P> Drop for Heap<P>
where
    P: PageProvider,
{
    fn drop(&mut self) {
        for page in (0..self.pages).rev() {
            self.provider.unmap_page(self.start_addr() + page * PAGE_SIZE);
        }
    }
}

impl<P> fmt::Debug for Heap<P>
where
    P: PageProvider,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct DebugChunks<'a, P>(&'a Heap<P>)
        where
            P: PageProvider;

        impl<P> fmt::Debug for DebugChunks<'_, P>
        where
            P: PageProvider,
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list().entries(self.0.chunks()).finish()
            }
        }

        f.debug_struct("Heap")
            .field("start", &format_args!("{:#018x}", self.start_addr()))
            .field("end", &format_args!("{:#018x}", self.end_addr()))
            .field("pages", &self.pages)
            .field("chunks", &DebugChunks(self))
            .finish()
    }
}

/// Snapshot of one chunk taken while walking the chain.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub addr: usize,
    pub magic: u64,
    pub has_prev: bool,
    pub has_next: bool,
    pub allocated: bool,
    pub size: usize,
}

impl fmt::Debug for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkInfo")
            .field("addr", &format_args!("{:#018x}", self.addr))
            .field("magic", &format_args!("{:#018x}", self.magic))
            .field("has_prev", &self.has_prev)
            .field("has_next", &self.has_next)
            .field("allocated", &self.allocated)
            .field("size", &self.size)
            .finish()
    }
}

/// Iterator over the chunk chain, in address order.
///
/// Verifies each sentinel as it goes and panics on corruption, so a full
/// walk doubles as an integrity check of the whole chain.
pub struct Chunks<'a> {
    chunk: *mut ChunkHeader,
    _heap: PhantomData<&'a ChunkHeader>,
}

impl Iterator for Chunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunk.is_null() {
            return None;
        }
        unsafe {
            ChunkHeader::check(self.chunk);
            let chunk = &*self.chunk;
            let info = ChunkInfo {
                addr: self.chunk.addr(),
                magic: chunk.magic,
                has_prev: !chunk.prev.is_null(),
                has_next: !chunk.next.is_null(),
                allocated: chunk.allocated,
                size: chunk.size,
            };
            self.chunk = chunk.next;
            Some(info)
        }
    }
}
