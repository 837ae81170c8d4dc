//! Kernel heap built on an address-ordered chain of chunks.
//!
//! This crate provides the kernel's dynamic memory allocator. A
//! [`Heap`](heap::Heap) manages a page-granular region of virtual memory
//! and grows one page at a time through a
//! [`PageProvider`](provider::PageProvider) when it runs out of space. The
//! crate is `no_std` and never touches memory outside the region it
//! manages.
//!
//! # Heap Layout
//!
//! The managed region is carved into chunks. Every chunk starts with a
//! header carrying a corruption sentinel, the chain links, the allocated
//! flag and the payload size; the payload follows immediately after the
//! header. Chunks cover the region without gaps, so the chain doubles as a
//! map of the whole heap:
//!
//! ```text
//! base                                                          end
//! |                                                               |
//! v                                                               v
//! +--------+-----------+--------+---------+--------+--------------+
//! | header |  payload  | header | payload | header |   payload    |
//! | (used) |           | (free) |         | (used) |              |
//! +--------+-----------+--------+---------+--------+--------------+
//!     ^      <- next ->    ^     <- next ->   ^
//!     +------- prev -------+------ prev ------+
//! ```
//!
//! Allocation is first fit with splitting: the scan takes the first free
//! chunk large enough and carves off the excess when it can stand alone as
//! a chunk of its own. Freeing eagerly merges with free neighbors on both
//! sides, so no two free chunks are ever adjacent.
//!
//! # Usage
//!
//! ```rust
//! use core::ptr::NonNull;
//!
//! use kernel_heap::{
//!     PAGE_SIZE,
//!     heap::Heap,
//!     provider::{FixedPages, MapPageFlags},
//! };
//!
//! #[repr(align(4096))]
//! struct Arena([u8; 2 * PAGE_SIZE]);
//!
//! let mut arena = Arena([0; 2 * PAGE_SIZE]);
//! let base = NonNull::new(arena.0.as_mut_ptr()).unwrap();
//! let provider = FixedPages::new(base.addr().get(), 2 * PAGE_SIZE);
//!
//! let mut heap = unsafe { Heap::new(base, MapPageFlags::RW, provider) }.unwrap();
//! if let Some(ptr) = heap.allocate(64) {
//!     // Use the memory...
//!     unsafe {
//!         heap.free(ptr.as_ptr());
//!     }
//! }
//! ```
//!
//! # Bring-up
//!
//! [`boot::bootstrap`] wires the pieces together for the kernel proper: it
//! maps the first page, registers the page fault reporter with the
//! interrupt layer and returns a [`LockedHeap`](locked::LockedHeap) that
//! can be shared across cores or installed as the global allocator:
//!
//! ```rust,ignore
//! let heap = unsafe { boot::bootstrap(base, frame_backed_pages, &mut interrupts) }?;
//! let ptr = heap.allocate(64);
//! heap.dump_layout();
//! ```
//!
//! # Design Considerations
//!
//! - Every [`LockedHeap`](locked::LockedHeap) operation, the layout dump
//!   included, holds the spin lock for the whole call and releases it when
//!   the guard leaves scope.
//! - Payloads are aligned to sixteen bytes. The `GlobalAlloc` impl refuses
//!   layouts asking for more and returns null instead.
//! - [`Heap`](heap::Heap) itself is `Send` but not `Sync`; concurrent use
//!   goes through [`LockedHeap`](locked::LockedHeap).

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod boot;
mod chunk;
pub mod fault;
pub mod heap;
pub mod locked;
pub mod provider;

pub use self::chunk::{CHUNK_HEADER_SIZE, CHUNK_MAGIC, MIN_CHUNK_SIZE};

/// Size of one heap page in bytes.
pub const PAGE_SIZE: usize = 4096;
const PAGE_SHIFT: usize = 12;
const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
