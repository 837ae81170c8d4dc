#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::NonNull,
    thread,
};

use kernel_heap::{
    CHUNK_HEADER_SIZE, MIN_CHUNK_SIZE, PAGE_SIZE,
    heap::Heap,
    locked::LockedHeap,
    provider::{FixedPages, MapPageFlags},
};

fn with_locked_heap(page_count: usize, f: impl FnOnce(&LockedHeap<FixedPages>)) {
    let layout = Layout::from_size_align(page_count * PAGE_SIZE, PAGE_SIZE).unwrap();
    unsafe {
        let arena = std::alloc::alloc(layout);
        assert!(!arena.is_null());

        let provider = FixedPages::new(arena.addr(), layout.size());
        let base = NonNull::new(arena).unwrap();
        let heap = LockedHeap::new(Heap::new(base, MapPageFlags::RW, provider).unwrap());
        f(&heap);
        drop(heap);

        std::alloc::dealloc(arena, layout);
    }
}

fn assert_chain_covers_region(heap: &LockedHeap<FixedPages>) {
    let guard = heap.lock();
    let mut expected_addr = guard.start_addr();
    let mut prev_free = false;
    for chunk in guard.chunks() {
        assert_eq!(chunk.addr, expected_addr);
        assert!(chunk.size >= MIN_CHUNK_SIZE);
        if prev_free {
            assert!(chunk.allocated, "adjacent free chunks");
        }
        prev_free = !chunk.allocated;
        expected_addr += CHUNK_HEADER_SIZE + chunk.size;
    }
    assert_eq!(expected_addr, guard.end_addr());
}

#[test]
fn operations_round_trip_through_the_lock() {
    with_locked_heap(2, |heap| {
        let ptr = heap.allocate(100).unwrap();
        unsafe {
            ptr.as_ptr().write_bytes(0x42, 100);

            let bigger = heap.resize(ptr.as_ptr(), 200).unwrap();
            for i in 0..100 {
                assert_eq!(bigger.as_ptr().add(i).read(), 0x42);
            }
            heap.free(bigger.as_ptr());
        }
        assert_chain_covers_region(heap);
    });
}

#[test]
fn contended_allocate_free_keeps_the_chain_intact() {
    const THREADS: usize = 8;
    const ITERS: usize = 250;

    with_locked_heap(64, |heap| {
        thread::scope(|s| {
            for worker in 0..THREADS {
                s.spawn(move || {
                    for iter in 0..ITERS {
                        let size = 1 + (worker * 61 + iter * 13) % 200;
                        let Some(ptr) = heap.allocate(size) else {
                            continue;
                        };
                        let tag = u8::try_from(worker).unwrap();
                        unsafe {
                            ptr.as_ptr().write_bytes(tag, size);
                            for i in 0..size {
                                assert_eq!(ptr.as_ptr().add(i).read(), tag);
                            }
                            heap.free(ptr.as_ptr());
                        }
                    }
                });
            }
        });

        assert_chain_covers_region(heap);
        let guard = heap.lock();
        assert_eq!(guard.chunks().count(), 1);
        assert_eq!(guard.chunks().filter(|c| c.allocated).count(), 0);
    });
}

#[test]
fn dump_layout_walks_under_the_lock() {
    with_locked_heap(1, |heap| {
        let ptr = heap.allocate(64).unwrap();
        heap.dump_layout();
        unsafe { heap.free(ptr.as_ptr()) };
    });
}

#[test]
fn debug_renders_the_chain_or_locked_marker() {
    with_locked_heap(1, |heap| {
        let ptr = heap.allocate(32).unwrap();
        let rendered = format!("{heap:?}");
        assert!(rendered.contains("LockedHeap"));
        assert!(rendered.contains("allocated: true"));

        let guard = heap.lock();
        let rendered = format!("{heap:?}");
        assert!(rendered.contains("<locked>"));
        drop(guard);

        unsafe { heap.free(ptr.as_ptr()) };
    });
}

#[test]
fn global_alloc_serves_layouts_up_to_sixteen_byte_alignment() {
    with_locked_heap(1, |heap| {
        for align in [1, 2, 4, 8, 16] {
            let layout = Layout::from_size_align(40, align).unwrap();
            unsafe {
                let ptr = heap.alloc(layout);
                assert!(!ptr.is_null());
                assert!(ptr.addr().is_multiple_of(align));
                heap.dealloc(ptr, layout);
            }
        }

        let overaligned = Layout::from_size_align(40, 64).unwrap();
        unsafe {
            assert!(heap.alloc(overaligned).is_null());
        }
    });
}

#[test]
fn global_alloc_realloc_moves_the_contents() {
    with_locked_heap(1, |heap| {
        let layout = Layout::from_size_align(48, 8).unwrap();
        unsafe {
            let ptr = heap.alloc(layout);
            assert!(!ptr.is_null());
            ptr.write_bytes(0x77, 48);

            let bigger = heap.realloc(ptr, layout, 256);
            assert!(!bigger.is_null());
            for i in 0..48 {
                assert_eq!(bigger.add(i).read(), 0x77);
            }
            heap.dealloc(bigger, Layout::from_size_align(256, 8).unwrap());
        }
        assert_chain_covers_region(heap);
    });
}

#[test]
fn locked_heap_is_sync() {
    fn takes_sync<T: Sync>(_value: &T) {}
    with_locked_heap(1, |heap| {
        takes_sync(heap);
    });
}
