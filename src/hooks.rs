//! C ABI entry points
//!
//! Programs built with `-finstrument-functions` call
//! `__cyg_profile_func_enter`/`__cyg_profile_func_exit` on every function
//! boundary; source instrumentation calls the `__trace_*_loc` and
//! `trace_var_*` hooks. All of them forward to one process-wide
//! [`TraceSession`], created on the first notification from
//! `TRACE_OUTPUT` and finished by an `atexit` handler.
//!
//! A session that has been stopped is never re-created: later notifications
//! are dropped by the session's disabled flag.

use crate::address::Address;
use crate::alloc::{ALLOC_SYMBOL, FREE_SYMBOL};
use crate::config::TraceConfig;
use crate::event::{Location, VarSnapshot};
use crate::registry::Storage;
use crate::session::TraceSession;
use std::borrow::Cow;
use std::ffi::{c_char, c_double, c_int, c_longlong, c_void, CStr};
use std::sync::OnceLock;

static SESSION: OnceLock<TraceSession> = OnceLock::new();

/// Name substituted for null C strings
const MISSING: &str = "unknown";

/// The process-wide session, created on first use
pub fn session() -> &'static TraceSession {
    SESSION.get_or_init(|| {
        let session = TraceSession::start(TraceConfig::from_env());
        // SAFETY: finish_at_exit is a plain extern "C" fn with no captured state
        if unsafe { libc::atexit(finish_at_exit) } != 0 {
            tracing::warn!("Failed to register trace shutdown handler");
        }
        session
    })
}

/// The process-wide session if one was already created
///
/// Never initializes; safe to call from allocator paths.
pub fn installed() -> Option<&'static TraceSession> {
    SESSION.get()
}

extern "C" fn finish_at_exit() {
    if let Some(session) = installed() {
        session.stop();
    }
}

/// Borrow a C string, mapping null to `"unknown"`
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives the
/// returned value.
unsafe fn text<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed(MISSING)
    } else {
        // SAFETY: guaranteed by the caller
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
    }
}

/// Optional C string: null and empty both map to `None`
unsafe fn optional_text<'a>(ptr: *const c_char) -> Option<Cow<'a, str>> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller
    let value = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
    (!value.is_empty()).then_some(value)
}

fn line_number(line: c_int) -> u32 {
    u32::try_from(line).unwrap_or(0)
}

fn address(ptr: *const c_void) -> Address {
    Address::from_ptr(ptr)
}

// ----- function boundaries -----

/// # Safety
///
/// Called by compiler instrumentation; arguments are opaque addresses.
#[no_mangle]
pub unsafe extern "C" fn __cyg_profile_func_enter(func: *mut c_void, caller: *mut c_void) {
    session().func_enter(address(func), address(caller));
}

/// # Safety
///
/// Called by compiler instrumentation; arguments are opaque addresses.
#[no_mangle]
pub unsafe extern "C" fn __cyg_profile_func_exit(func: *mut c_void, caller: *mut c_void) {
    session().func_exit(address(func), address(caller));
}

// ----- lifecycle -----

/// Open the trace explicitly; returns 1 when recording
#[no_mangle]
pub extern "C" fn vartrace_start() -> c_int {
    c_int::from(session().is_enabled())
}

/// Finish the trace early; later notifications are ignored
#[no_mangle]
pub extern "C" fn vartrace_stop() {
    if let Some(session) = installed() {
        session.stop();
    }
}

/// # Safety
///
/// `file` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn __trace_output_flush_loc(_file: *const c_char, _line: c_int) {
    session().flush();
}

// ----- variables -----

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_declare_loc(
    name: *const c_char,
    type_name: *const c_char,
    addr: *mut c_void,
    file: *const c_char,
    line: c_int,
) {
    let (name, type_name, file) = unsafe { (text(name), text(type_name), text(file)) };
    session().declare(
        &name,
        &type_name,
        address(addr),
        Location::new(&file, line_number(line)),
    );
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_assign_loc(
    name: *const c_char,
    value: c_longlong,
    file: *const c_char,
    line: c_int,
) {
    let (name, file) = unsafe { (text(name), text(file)) };
    session().assign(&name, value, Location::new(&file, line_number(line)));
}

unsafe fn trace_var(
    name: *const c_char,
    snapshot: VarSnapshot,
    file: *const c_char,
    line: c_int,
) {
    let (name, file) = unsafe { (text(name), text(file)) };
    session().var(&name, snapshot, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn trace_var_int_loc(
    name: *const c_char,
    value: c_int,
    file: *const c_char,
    line: c_int,
) {
    unsafe { trace_var(name, VarSnapshot::Int(value.into()), file, line) }
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn trace_var_long_loc(
    name: *const c_char,
    value: c_longlong,
    file: *const c_char,
    line: c_int,
) {
    unsafe { trace_var(name, VarSnapshot::Long(value), file, line) }
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn trace_var_double_loc(
    name: *const c_char,
    value: c_double,
    file: *const c_char,
    line: c_int,
) {
    unsafe { trace_var(name, VarSnapshot::Double(value), file, line) }
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn trace_var_ptr_loc(
    name: *const c_char,
    value: *mut c_void,
    file: *const c_char,
    line: c_int,
) {
    unsafe { trace_var(name, VarSnapshot::Pointer(address(value)), file, line) }
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn trace_var_str_loc(
    name: *const c_char,
    value: *const c_char,
    file: *const c_char,
    line: c_int,
) {
    let value = if value.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(value) }.to_string_lossy().into_owned()
    };
    unsafe { trace_var(name, VarSnapshot::Str(value), file, line) }
}

/// # Safety
///
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn trace_var_int(name: *const c_char, value: c_int) {
    unsafe { trace_var_int_loc(name, value, std::ptr::null(), 0) }
}

/// # Safety
///
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn trace_var_long(name: *const c_char, value: c_longlong) {
    unsafe { trace_var_long_loc(name, value, std::ptr::null(), 0) }
}

/// # Safety
///
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn trace_var_double(name: *const c_char, value: c_double) {
    unsafe { trace_var_double_loc(name, value, std::ptr::null(), 0) }
}

/// # Safety
///
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn trace_var_ptr(name: *const c_char, value: *mut c_void) {
    unsafe { trace_var_ptr_loc(name, value, std::ptr::null(), 0) }
}

/// # Safety
///
/// `name` and `value` must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn trace_var_str(name: *const c_char, value: *const c_char) {
    unsafe { trace_var_str_loc(name, value, std::ptr::null(), 0) }
}

// ----- arrays -----

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_array_create_loc(
    name: *const c_char,
    base_type: *const c_char,
    addr: *mut c_void,
    dim1: c_int,
    dim2: c_int,
    dim3: c_int,
    is_stack: bool,
    file: *const c_char,
    line: c_int,
) {
    let (name, base_type, file) = unsafe { (text(name), text(base_type), text(file)) };
    let storage = if is_stack {
        Storage::Stack
    } else {
        Storage::Heap
    };
    session().array_create(
        &name,
        &base_type,
        address(addr),
        [dim1, dim2, dim3],
        storage,
        Location::new(&file, line_number(line)),
    );
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_array_index_assign_loc(
    name: *const c_char,
    idx1: c_int,
    idx2: c_int,
    idx3: c_int,
    value: c_longlong,
    file: *const c_char,
    line: c_int,
) {
    let (name, file) = unsafe { (text(name), text(file)) };
    session().array_index_assign(
        &name,
        [idx1, idx2, idx3],
        value,
        Location::new(&file, line_number(line)),
    );
}

/// # Safety
///
/// `values` must point to `count` readable `int`s (or be null with a
/// non-positive count). String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_array_init_loc(
    name: *const c_char,
    values: *const c_void,
    count: c_int,
    file: *const c_char,
    line: c_int,
) {
    let len = usize::try_from(count).unwrap_or(0);
    let values: Vec<i64> = if values.is_null() || len == 0 {
        Vec::new()
    } else {
        // SAFETY: the caller guarantees `count` ints behind `values`
        unsafe { std::slice::from_raw_parts(values.cast::<c_int>(), len) }
            .iter()
            .map(|v| i64::from(*v))
            .collect()
    };
    let (name, file) = unsafe { (text(name), text(file)) };
    session().array_init(&name, &values, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_array_init_string_loc(
    name: *const c_char,
    literal: *const c_char,
    file: *const c_char,
    line: c_int,
) {
    let bytes = if literal.is_null() {
        &[][..]
    } else {
        unsafe { CStr::from_ptr(literal) }.to_bytes()
    };
    let (name, file) = unsafe { (text(name), text(file)) };
    session().array_init_string(&name, bytes, Location::new(&file, line_number(line)));
}

// ----- pointers -----

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_pointer_alias_loc(
    name: *const c_char,
    aliased: *mut c_void,
    decayed_from_array: bool,
    file: *const c_char,
    line: c_int,
) {
    let (name, file) = unsafe { (text(name), text(file)) };
    session().pointer_alias(
        &name,
        address(aliased),
        decayed_from_array,
        Location::new(&file, line_number(line)),
    );
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_pointer_deref_write_loc(
    name: *const c_char,
    value: c_longlong,
    file: *const c_char,
    line: c_int,
) {
    let (name, file) = unsafe { (text(name), text(file)) };
    session().pointer_deref_write(&name, value, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_pointer_heap_init_loc(
    name: *const c_char,
    heap: *mut c_void,
    _file: *const c_char,
    _line: c_int,
) {
    let name = unsafe { text(name) };
    session().pointer_heap_init(&name, address(heap));
}

// ----- control flow -----

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_control_flow_loc(
    control_type: *const c_char,
    file: *const c_char,
    line: c_int,
) {
    let (control_type, file) = unsafe { (text(control_type), text(file)) };
    session().control_flow(&control_type, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_condition_eval_loc(
    condition_id: c_int,
    expression: *const c_char,
    result: c_int,
    file: *const c_char,
    line: c_int,
) {
    let (expression, file) = unsafe { (text(expression), text(file)) };
    session().condition_eval(
        condition_id,
        &expression,
        result,
        Location::new(&file, line_number(line)),
    );
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_branch_taken_loc(
    condition_id: c_int,
    branch_type: *const c_char,
    file: *const c_char,
    line: c_int,
) {
    let (branch_type, file) = unsafe { (text(branch_type), text(file)) };
    session().branch_taken(condition_id, &branch_type, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_return_loc(
    value: c_longlong,
    return_type: *const c_char,
    destination: *const c_char,
    file: *const c_char,
    line: c_int,
) {
    let (return_type, destination, file) = unsafe {
        (
            optional_text(return_type),
            optional_text(destination),
            text(file),
        )
    };
    session().return_value(
        value,
        return_type.as_deref(),
        destination.as_deref(),
        Location::new(&file, line_number(line)),
    );
}

/// # Safety
///
/// `file` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn __trace_block_enter_loc(block_depth: c_int, file: *const c_char, line: c_int) {
    let file = unsafe { text(file) };
    session().block_enter(block_depth, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// `file` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn __trace_block_exit_loc(block_depth: c_int, file: *const c_char, line: c_int) {
    let file = unsafe { text(file) };
    session().block_exit(block_depth, Location::new(&file, line_number(line)));
}

// ----- loops -----

/// # Safety
///
/// String arguments must be null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn __trace_loop_start_loc(
    loop_id: c_int,
    loop_type: *const c_char,
    file: *const c_char,
    line: c_int,
) {
    let (loop_type, file) = unsafe { (text(loop_type), text(file)) };
    session().loop_start(loop_id, &loop_type, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// `file` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn __trace_loop_body_start_loc(loop_id: c_int, file: *const c_char, line: c_int) {
    let file = unsafe { text(file) };
    session().loop_body_start(loop_id, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// `file` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn __trace_loop_iteration_end_loc(
    loop_id: c_int,
    file: *const c_char,
    line: c_int,
) {
    let file = unsafe { text(file) };
    session().loop_iteration_end(loop_id, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// `file` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn __trace_loop_end_loc(loop_id: c_int, file: *const c_char, line: c_int) {
    let file = unsafe { text(file) };
    session().loop_end(loop_id, Location::new(&file, line_number(line)));
}

/// # Safety
///
/// `file` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn __trace_loop_condition_loc(
    loop_id: c_int,
    result: c_int,
    file: *const c_char,
    line: c_int,
) {
    let file = unsafe { text(file) };
    session().loop_condition(loop_id, result, Location::new(&file, line_number(line)));
}

// ----- heap -----

/// Report an allocation made by a native allocator shim
///
/// Only reports into an existing session so a shim never triggers session
/// creation from inside `malloc`.
#[no_mangle]
pub extern "C" fn __trace_heap_alloc(ptr: *mut c_void, size: usize) {
    if let Some(session) = installed() {
        session.heap_alloc(address(ptr), size as u64, ALLOC_SYMBOL);
    }
}

/// Report a release made by a native allocator shim
#[no_mangle]
pub extern "C" fn __trace_heap_free(ptr: *mut c_void) {
    if let Some(session) = installed() {
        session.heap_free(address(ptr), FREE_SYMBOL);
    }
}
