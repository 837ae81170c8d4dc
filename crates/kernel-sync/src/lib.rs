//! Synchronization primitives for kernel space.
//!
//! The only primitive provided today is [`SpinMutex`], a busy-wait lock over a
//! single atomic word. It never sleeps and never allocates, so it is usable
//! from any context, including interrupt handlers, as long as the embedder
//! masks interrupts around acquisition where re-entrancy is possible.
//!
//! Access to the protected value goes through [`SpinMutexGuard`], which
//! releases the lock when it goes out of scope. There is no way to reach the
//! data without holding the lock, so an early return or a panic inside a
//! critical section still leaves the mutex in a consistent state.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod spinlock;

pub use self::spinlock::{SpinMutex, SpinMutexGuard};
