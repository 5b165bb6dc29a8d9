//! Heap tracking allocator
//!
//! Wraps another [`GlobalAlloc`] and reports every allocation and release to
//! the process-wide session as `heap_alloc`/`heap_free` events. Install it in
//! a Rust host program with:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: vartrace::alloc::TracingAllocator = vartrace::alloc::TracingAllocator::new();
//! ```
//!
//! Reports only go to a session that already exists; the allocator never
//! creates one. Allocations made while the engine itself is running are
//! suppressed by the reentrancy ticket.

use crate::address::Address;
use crate::guard;
use crate::hooks;
use std::alloc::{GlobalAlloc, Layout, System};

/// Allocator name recorded on `heap_alloc` events
pub const ALLOC_SYMBOL: &str = "malloc";

/// Allocator name recorded on `heap_free` events
pub const FREE_SYMBOL: &str = "free";

/// A [`GlobalAlloc`] that reports to the trace
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAllocator<A = System> {
    inner: A,
}

impl TracingAllocator<System> {
    pub const fn new() -> Self {
        Self { inner: System }
    }
}

impl<A> TracingAllocator<A> {
    pub const fn wrap(inner: A) -> Self {
        Self { inner }
    }
}

fn report_alloc(ptr: *mut u8, size: usize) {
    if guard::is_inside_tracer() {
        return;
    }
    if let Some(session) = hooks::installed() {
        session.heap_alloc(Address::from_ptr(ptr), size as u64, ALLOC_SYMBOL);
    }
}

fn report_free(ptr: *mut u8) {
    if guard::is_inside_tracer() {
        return;
    }
    if let Some(session) = hooks::installed() {
        session.heap_free(Address::from_ptr(ptr), FREE_SYMBOL);
    }
}

// SAFETY: every call is forwarded unchanged to `inner`; reporting never
// touches the returned memory
unsafe impl<A: GlobalAlloc> GlobalAlloc for TracingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: same contract as the caller's
        let ptr = unsafe { self.inner.alloc(layout) };
        report_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: same contract as the caller's
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        report_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        report_free(ptr);
        // SAFETY: same contract as the caller's
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: same contract as the caller's
        let moved = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !moved.is_null() {
            report_free(ptr);
            report_alloc(moved, new_size);
        }
        moved
    }
}
