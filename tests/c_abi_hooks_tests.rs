//! Integration tests for the C ABI entry points
//!
//! The hooks drive one process-wide session, so every test here is serial
//! and the session is configured once through `TRACE_OUTPUT`.

use serial_test::serial;
use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use vartrace::hooks::{self, *};
use vartrace::reader;

static TRACE_DIR: OnceLock<tempfile::TempDir> = OnceLock::new();

/// Point the global session at a temp file before its first use
fn trace_path() -> PathBuf {
    let dir = TRACE_DIR.get_or_init(|| tempfile::tempdir().unwrap());
    let path = dir.path().join("hooks.json");
    std::env::set_var("TRACE_OUTPUT", &path);
    path
}

fn traced_function() {}

fn cs(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn event_kinds(path: &Path) -> Vec<&'static str> {
    reader::read_file(path)
        .unwrap()
        .events
        .iter()
        .map(|e| e.payload.kind())
        .collect()
}

#[test]
#[serial]
fn test_hooks_record_into_global_session() {
    let path = trace_path();
    if hooks::installed().is_some_and(|s| !s.is_enabled()) {
        // Another test already finished the global trace
        return;
    }
    assert_eq!(vartrace_start(), 1);
    let session = hooks::installed().unwrap();
    let start = session.event_count() as usize;

    let func = traced_function as *mut c_void;
    let file = cs("main.c");
    let name = cs("arr");
    let int_type = cs("int");
    let values: [i32; 3] = [7, 8, 9];
    let mut slot = 0i32;
    let slot_ptr = (&mut slot as *mut i32).cast::<c_void>();

    unsafe {
        __cyg_profile_func_enter(func, std::ptr::null_mut());
        __trace_declare_loc(cs("slot").as_ptr(), int_type.as_ptr(), slot_ptr, file.as_ptr(), 3);
        __trace_array_create_loc(
            name.as_ptr(),
            int_type.as_ptr(),
            slot_ptr,
            3,
            0,
            0,
            true,
            file.as_ptr(),
            4,
        );
        __trace_array_init_loc(name.as_ptr(), values.as_ptr().cast(), 3, file.as_ptr(), 4);
        __trace_loop_start_loc(1, cs("for").as_ptr(), file.as_ptr(), 5);
        __trace_loop_body_start_loc(1, file.as_ptr(), 5);
        trace_var_int(cs("i").as_ptr(), 0);
        trace_var_str(cs("msg").as_ptr(), cs("hi").as_ptr());
        __trace_return_loc(0, std::ptr::null(), std::ptr::null(), file.as_ptr(), 6);
        __cyg_profile_func_exit(func, std::ptr::null_mut());
    }
    assert_eq!(session.depth(), 0);

    let kinds = event_kinds(&path);
    assert_eq!(
        &kinds[start..],
        &[
            "func_enter",
            "declare",
            "array_create",
            "array_index_assign",
            "array_index_assign",
            "array_index_assign",
            "loop_start",
            "loop_body_start",
            "var",
            "var",
            "return",
            "loop_end",
            "func_exit"
        ]
    );

    let value = session.inspect(|s| s.registries().variable("slot"));
    assert_eq!(value, None);
    let name_at = session.inspect(|s| {
        s.registries()
            .name_at(vartrace::Address::from_ptr(slot_ptr))
            .to_string()
    });
    assert_eq!(name_at, "arr");

    vartrace_stop();
    assert!(!session.is_enabled());
    let doc = reader::read_file(&path).unwrap();
    assert!(!doc.truncated);
    assert_eq!(doc.total_events, Some(doc.events.len() as u64));

    // Stopped for good: hooks are no-ops and the session is not re-created
    let after = session.event_count();
    unsafe {
        __trace_assign_loc(cs("x").as_ptr(), 1, file.as_ptr(), 9);
    }
    assert_eq!(session.event_count(), after);
    assert_eq!(vartrace_start(), 0);
}

#[test]
#[serial]
fn test_hooks_tolerate_null_strings() {
    trace_path();
    unsafe {
        __trace_assign_loc(std::ptr::null(), 1, std::ptr::null(), -1);
        __trace_array_init_string_loc(std::ptr::null(), std::ptr::null(), std::ptr::null(), 0);
        __trace_array_init_loc(std::ptr::null(), std::ptr::null(), 4, std::ptr::null(), 0);
        __trace_pointer_deref_write_loc(std::ptr::null(), 1, std::ptr::null(), 0);
        trace_var_str_loc(std::ptr::null(), std::ptr::null(), std::ptr::null(), 0);
        __trace_output_flush_loc(std::ptr::null(), 0);
    }
    __trace_heap_alloc(std::ptr::null_mut(), 16);
    __trace_heap_free(std::ptr::null_mut());
    assert!(hooks::installed().is_some());
}
