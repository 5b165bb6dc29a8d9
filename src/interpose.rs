//! Native heap interposition
//!
//! With the `interpose` feature the library exports `malloc`, `free` and the
//! Itanium C++ `operator new`/`operator delete` symbols. A C or C++ program
//! linked against the cdylib/staticlib then reports its heap traffic as
//! `heap_alloc`/`heap_free` events without any source changes.
//!
//! Every call is forwarded to the next definition in link order, resolved
//! once with `dlsym(RTLD_NEXT, ..)`. Reporting happens only when a session
//! is already installed and the calling thread is not inside the engine, so
//! the allocations made while writing a record pass straight through.
//!
//! Without the feature the same functions exist under their Rust paths and
//! still forward and report; nothing is exported.

use crate::address::Address;
use crate::guard;
use crate::hooks;
use libc::{c_void, size_t};
use std::cell::Cell;
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};

type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

static NEXT_MALLOC: AtomicUsize = AtomicUsize::new(0);
static NEXT_FREE: AtomicUsize = AtomicUsize::new(0);

const OPERATOR_NEW: &str = "operator new";
const OPERATOR_NEW_ARRAY: &str = "operator new[]";
const OPERATOR_DELETE: &str = "operator delete";
const OPERATOR_DELETE_ARRAY: &str = "operator delete[]";

thread_local! {
    static RESOLVING: Cell<bool> = const { Cell::new(false) };
}

/// Address of the next definition of `symbol`, cached in `slot`
///
/// A lookup that re-enters itself on the same thread (the loader
/// allocating during `dlsym`) yields 0.
fn next_symbol(symbol: &CStr, slot: &AtomicUsize) -> usize {
    let cached = slot.load(Ordering::Acquire);
    if cached != 0 {
        return cached;
    }
    let entered = RESOLVING
        .try_with(|resolving| !resolving.replace(true))
        .unwrap_or(false);
    if !entered {
        return 0;
    }
    // SAFETY: `symbol` is NUL-terminated
    let found = unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) } as usize;
    slot.store(found, Ordering::Release);
    let _ = RESOLVING.try_with(|resolving| resolving.set(false));
    found
}

fn next_malloc() -> Option<MallocFn> {
    let addr = next_symbol(c"malloc", &NEXT_MALLOC);
    // SAFETY: the next `malloc` in link order has the C signature
    (addr != 0).then(|| unsafe { std::mem::transmute::<usize, MallocFn>(addr) })
}

fn next_free() -> Option<FreeFn> {
    let addr = next_symbol(c"free", &NEXT_FREE);
    // SAFETY: the next `free` in link order has the C signature
    (addr != 0).then(|| unsafe { std::mem::transmute::<usize, FreeFn>(addr) })
}

fn forward_malloc(size: size_t) -> *mut c_void {
    match next_malloc() {
        // SAFETY: plain forward of the caller's request
        Some(real) => unsafe { real(size) },
        None => std::ptr::null_mut(),
    }
}

fn forward_free(ptr: *mut c_void) {
    if let Some(real) = next_free() {
        // SAFETY: `ptr` came from the matching allocator, per the caller
        unsafe { real(ptr) }
    }
}

fn report_alloc(ptr: *mut c_void, size: size_t, allocator: &str) {
    if ptr.is_null() || guard::is_inside_tracer() {
        return;
    }
    if let Some(session) = hooks::installed() {
        session.heap_alloc(Address::from_ptr(ptr), size as u64, allocator);
    }
}

fn report_free(ptr: *mut c_void, allocator: &str) {
    if ptr.is_null() || guard::is_inside_tracer() {
        return;
    }
    if let Some(session) = hooks::installed() {
        session.heap_free(Address::from_ptr(ptr), allocator);
    }
}

/// # Safety
///
/// Same contract as C `malloc`.
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    let ptr = forward_malloc(size);
    report_alloc(ptr, size, crate::alloc::ALLOC_SYMBOL);
    ptr
}

/// # Safety
///
/// Same contract as C `free`.
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    report_free(ptr, crate::alloc::FREE_SYMBOL);
    forward_free(ptr);
}

/// `operator new(size_t)`
///
/// # Safety
///
/// Same contract as C `malloc`. A zero-size request still gets a unique
/// pointer.
#[cfg_attr(
    all(feature = "interpose", target_pointer_width = "64"),
    export_name = "_Znwm"
)]
pub unsafe extern "C" fn operator_new(size: size_t) -> *mut c_void {
    let ptr = forward_malloc(size.max(1));
    report_alloc(ptr, size, OPERATOR_NEW);
    ptr
}

/// `operator new[](size_t)`
///
/// # Safety
///
/// Same contract as [`operator_new`].
#[cfg_attr(
    all(feature = "interpose", target_pointer_width = "64"),
    export_name = "_Znam"
)]
pub unsafe extern "C" fn operator_new_array(size: size_t) -> *mut c_void {
    let ptr = forward_malloc(size.max(1));
    report_alloc(ptr, size, OPERATOR_NEW_ARRAY);
    ptr
}

/// `operator delete(void*)`
///
/// # Safety
///
/// `ptr` must be null or come from [`operator_new`].
#[cfg_attr(feature = "interpose", export_name = "_ZdlPv")]
pub unsafe extern "C" fn operator_delete(ptr: *mut c_void) {
    report_free(ptr, OPERATOR_DELETE);
    forward_free(ptr);
}

/// `operator delete[](void*)`
///
/// # Safety
///
/// `ptr` must be null or come from [`operator_new_array`].
#[cfg_attr(feature = "interpose", export_name = "_ZdaPv")]
pub unsafe extern "C" fn operator_delete_array(ptr: *mut c_void) {
    report_free(ptr, OPERATOR_DELETE_ARRAY);
    forward_free(ptr);
}
