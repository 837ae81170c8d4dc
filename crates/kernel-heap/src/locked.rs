use core::{
    alloc::{GlobalAlloc, Layout},
    fmt,
    ptr::{self, NonNull},
};

use kernel_sync::{SpinMutex, SpinMutexGuard};

use crate::{chunk::ChunkHeader, heap::Heap, provider::PageProvider};

/// Highest alignment the allocator can serve.
///
/// Payloads start right after a header whose size and alignment are both
/// multiples of sixteen, and chunk sizes keep every later payload on the
/// same grid, so sixteen bytes is what the chain naturally provides.
const MAX_SUPPORTED_ALIGN: usize = align_of::<ChunkHeader>();

/// A [`Heap`] behind a [`SpinMutex`], shareable across cores.
///
/// Every operation acquires the lock on entry and holds it for the whole
/// call, including the layout dump. Release is tied to the guard going out
/// of scope, so it happens on every path out of a critical section.
pub struct LockedHeap<P>
where
    P: PageProvider,
{
    inner: SpinMutex<Heap<P>>,
}

impl<P> LockedHeap<P>
where
    P: PageProvider,
{
    /// Wraps `heap` in a lock.
    pub const fn new(heap: Heap<P>) -> Self {
        Self {
            inner: SpinMutex::new(heap),
        }
    }

    /// Allocates `size` bytes. See [`Heap::allocate`].
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(size)
    }

    /// Frees the allocation at `ptr`. See [`Heap::free`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::free`].
    pub unsafe fn free(&self, ptr: *mut u8) {
        unsafe { self.inner.lock().free(ptr) }
    }

    /// Resizes the allocation at `ptr`. See [`Heap::resize`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::resize`].
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        unsafe { self.inner.lock().resize(ptr, new_size) }
    }

    /// Logs one line per chunk, verifying sentinels along the way.
    ///
    /// The lock is held across the whole walk, so the dump is a consistent
    /// snapshot even while other cores are allocating.
    pub fn dump_layout(&self) {
        let heap = self.inner.lock();
        log::info!(
            "heap layout: {} page(s), {:#x}..{:#x}",
            heap.pages(),
            heap.start_addr(),
            heap.end_addr()
        );
        for chunk in heap.chunks() {
            log::info!("  {chunk:?}");
        }
    }

    /// Locks the heap and returns the guard, for compound operations.
    #[must_use]
    pub fn lock(&self) -> SpinMutexGuard<'_, Heap<P>> {
        self.inner.lock()
    }
}

impl<P> fmt::Debug for LockedHeap<P>
where
    P: PageProvider,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedHeap")
            .field("inner", &self.inner)
            .finish()
    }
}

unsafe impl<P> GlobalAlloc for LockedHeap<P>
where
    P: PageProvider,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }
        self.allocate(layout.size())
            .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // Chunk headers are self-describing; the layout adds nothing.
        let _ = layout;
        unsafe { self.free(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }
        unsafe { self.resize(ptr, new_size) }.map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
    }
}
