use core::ptr;

/// Sentinel stored at the start of every chunk header.
///
/// Traversal verifies this value before trusting any other header field, so
/// a stray write into a header is caught at the next walk over the chain
/// instead of corrupting the allocator state silently.
pub const CHUNK_MAGIC: u64 = 0xB10C_4EAD_B10C_4EAD;

/// Smallest payload a chunk may carry, in bytes.
///
/// Allocation sizes are rounded up to a multiple of this, which keeps every
/// chunk boundary on the header alignment grid and bounds the bookkeeping
/// overhead for tiny requests.
pub const MIN_CHUNK_SIZE: usize = 32;

/// Size of the per-chunk bookkeeping header, in bytes.
pub const CHUNK_HEADER_SIZE: usize = size_of::<ChunkHeader>();

/// Bookkeeping prefix embedded in front of every chunk's payload.
///
/// Chunks form a doubly linked list ordered by address, covering the managed
/// region without gaps: each chunk ends exactly where the next one begins.
/// Free and allocated chunks live on the same list, which is what makes
/// coalescing with an adjacent neighbor a pointer-relink instead of a search.
#[repr(C, align(16))]
#[derive(Debug)]
pub(crate) struct ChunkHeader {
    pub(crate) magic: u64,
    pub(crate) prev: *mut Self,
    pub(crate) next: *mut Self,
    pub(crate) size: usize,
    pub(crate) allocated: bool,
}

const _: () = {
    assert!(CHUNK_HEADER_SIZE.is_multiple_of(align_of::<ChunkHeader>()));
    assert!(MIN_CHUNK_SIZE.is_multiple_of(align_of::<ChunkHeader>()));
};

impl ChunkHeader {
    /// Writes a fresh, unlinked, free chunk header at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be aligned to [`ChunkHeader`] and point to at least
    /// [`CHUNK_HEADER_SIZE`]` + size` writable bytes.
    pub(crate) unsafe fn init(ptr: *mut u8, size: usize) -> *mut Self {
        #[expect(clippy::cast_ptr_alignment)]
        let chunk = ptr.cast::<Self>();
        assert!(!chunk.is_null(), "chunk pointer must not be null");
        assert!(chunk.is_aligned(), "chunk pointer must be header aligned");
        assert!(
            size >= MIN_CHUNK_SIZE,
            "chunk payload must be at least the minimum chunk size"
        );

        unsafe {
            chunk.write(Self {
                magic: CHUNK_MAGIC,
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                size,
                allocated: false,
            });
        }
        chunk
    }

    /// Returns the payload that starts immediately after `chunk`'s header.
    pub(crate) unsafe fn payload(chunk: *mut Self) -> *mut u8 {
        unsafe { chunk.add(1).cast() }
    }

    /// Recovers the header from a payload pointer handed out by `payload`.
    pub(crate) unsafe fn from_payload(ptr: *mut u8) -> *mut Self {
        unsafe { ptr.cast::<Self>().sub(1) }
    }

    /// Panics if `chunk`'s sentinel has been overwritten.
    pub(crate) unsafe fn check(chunk: *const Self) {
        let magic = unsafe { (*chunk).magic };
        assert!(
            magic == CHUNK_MAGIC,
            "heap corruption at {:#018x}: sentinel {magic:#018x}, expected {CHUNK_MAGIC:#018x}",
            chunk.addr(),
        );
    }
}
