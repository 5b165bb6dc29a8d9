//! Integration tests for session start/stop behavior

mod utils;

use std::fs;
use utils::{session, symbols, MAIN};
use vartrace::event::{Location, VarSnapshot};
use vartrace::reader;
use vartrace::registry::Storage;
use vartrace::{Address, TraceConfig, TraceSession};

fn at(line: u32) -> Location<'static> {
    Location::new("life.c", line)
}

#[test]
fn test_file_session_writes_complete_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    let session = TraceSession::start(TraceConfig::new(&path)).with_resolver(symbols());
    assert!(session.is_enabled());
    assert_eq!(session.config().output_path(), path.as_path());

    session.func_enter(MAIN, Address::NULL);
    session.assign("x", 5, at(1));
    session.func_exit(MAIN, Address::NULL);
    assert_eq!(session.stop(), Some(3));

    let text = fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["version"], "1.0");
    assert_eq!(doc["functions"], serde_json::json!([]));
    assert_eq!(doc["events"].as_array().unwrap().len(), 3);
    assert_eq!(doc["tracked_functions"], serde_json::json!(["main"]));
    assert_eq!(doc["total_events"], 3);
}

#[test]
fn test_records_are_on_disk_before_stop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.json");
    let session = TraceSession::start(TraceConfig::new(&path)).with_resolver(symbols());

    session.func_enter(MAIN, Address::NULL);
    session.assign("x", 1, at(1));

    // Simulates a crash: no trailer yet, every record already flushed
    let doc = reader::read_file(&path).unwrap();
    assert!(doc.truncated);
    assert_eq!(doc.events.len(), 2);
    assert_eq!(doc.total_events, None);
}

#[test]
fn test_stop_makes_every_handler_a_noop() {
    let (session, buf) = session();
    session.func_enter(MAIN, Address::NULL);
    assert_eq!(session.stop(), Some(1));
    let before = buf.text();

    session.func_exit(MAIN, Address::NULL);
    session.declare("a", "int", Address(0x10), at(1));
    session.assign("a", 1, at(2));
    session.var("a", VarSnapshot::Int(1), at(2));
    session.array_create("v", "int", Address(0x20), [2, 0, 0], Storage::Stack, at(3));
    session.array_index_assign("v", [0, -1, -1], 1, at(4));
    session.array_init("v", &[1, 2], at(4));
    session.array_init_string("s", b"ab", at(5));
    session.pointer_alias("p", Address(0x10), false, at(6));
    session.pointer_heap_init("h", Address(0x30));
    session.pointer_deref_write("p", 3, at(7));
    session.loop_start(1, "for", at(8));
    session.loop_body_start(1, at(8));
    session.loop_iteration_end(1, at(8));
    session.loop_condition(1, 0, at(8));
    session.loop_end(1, at(8));
    session.control_flow("continue", at(9));
    session.condition_eval(1, "a", 1, at(9));
    session.branch_taken(1, "else", at(9));
    session.return_value(1, None, None, at(10));
    session.block_enter(1, at(11));
    session.block_exit(1, at(11));
    session.heap_alloc(Address(0x40), 8, "malloc");
    session.heap_free(Address(0x40), "free");
    session.flush();

    assert_eq!(session.event_count(), 1);
    assert_eq!(buf.text(), before);
    assert_eq!(session.stop(), None);
    assert!(!session.is_enabled());
}

#[test]
fn test_unopenable_destination_disables_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("trace.json");
    let session = TraceSession::start(TraceConfig::new(&path)).with_resolver(symbols());

    assert!(!session.is_enabled());
    session.func_enter(MAIN, Address::NULL);
    session.assign("x", 1, at(1));
    assert_eq!(session.event_count(), 0);
    assert_eq!(session.depth(), 0);
    assert!(!path.exists());
    assert_eq!(session.stop(), None);
}

#[test]
fn test_flush_records_nothing() {
    let (session, buf) = session();
    session.assign("x", 1, at(1));
    session.flush();
    assert_eq!(session.event_count(), 1);
    assert_eq!(buf.document().events.len(), 1);
}
