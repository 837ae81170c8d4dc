use core::ptr::NonNull;

use crate::{
    fault::{self, PageFaultHandler},
    heap::{Heap, HeapInitError},
    locked::LockedHeap,
    provider::{MapPageFlags, PageProvider},
};

/// Flags every heap page is mapped with: kernel read/write, no execute.
pub const DEFAULT_MAP_FLAGS: MapPageFlags = MapPageFlags::RW;

/// Receives the page fault handler during heap bring-up.
///
/// The interrupt layer implements this, so the heap can arm fault
/// reporting without knowing how vectors are installed.
pub trait FaultRegistrar {
    fn register_page_fault_handler(&mut self, handler: PageFaultHandler);
}

/// Brings up the kernel heap and arms page fault reporting.
///
/// Maps the first heap page through `provider`, registers
/// [`fault::report`] with `registrar` and hands back a [`LockedHeap`]
/// ready to be shared across cores or installed as the global allocator.
///
/// # Safety
///
/// Same contract as [`Heap::new`] for `base`.
pub unsafe fn bootstrap<P, R>(
    base: NonNull<u8>,
    provider: P,
    registrar: &mut R,
) -> Result<LockedHeap<P>, HeapInitError>
where
    P: PageProvider,
    R: FaultRegistrar,
{
    let heap = unsafe { Heap::new(base, DEFAULT_MAP_FLAGS, provider) }?;
    registrar.register_page_fault_handler(fault::report);
    log::info!(
        "kernel heap ready at {:#x}, page fault reporting armed",
        heap.start_addr()
    );
    Ok(LockedHeap::new(heap))
}
