//! Integration tests for notification handlers
//!
//! Each test drives a session the way an instrumented program would and
//! checks both the recorded event stream and the live projections.

mod utils;

use utils::{kinds, session, session_with, HELPER, MAIN, WORKER};
use vartrace::analysis::{check_events, Projections};
use vartrace::event::{EventPayload, Location, VarSnapshot, VarValue};
use vartrace::registry::{ArrayElementKey, Storage};
use vartrace::{Address, TraceConfig};

fn at(line: u32) -> Location<'static> {
    Location::new("src/demo.c", line)
}

#[test]
fn test_array_scenario_in_main() {
    let (session, buf) = session();
    let arr = Address(0x7ffd_0000);

    session.func_enter(MAIN, Address::NULL);
    session.array_create("arr", "int", arr, [3, 0, 0], Storage::Stack, at(3));
    session.array_index_assign("arr", [0, -1, -1], 10, at(4));
    session.array_index_assign("arr", [1, -1, -1], 20, at(5));
    session.array_index_assign("arr", [2, -1, -1], 30, at(6));
    session.func_exit(MAIN, Address::NULL);
    assert_eq!(session.stop(), Some(6));

    let doc = buf.document();
    assert!(!doc.truncated);
    assert_eq!(
        kinds(&doc),
        vec![
            "func_enter",
            "array_create",
            "array_index_assign",
            "array_index_assign",
            "array_index_assign",
            "func_exit"
        ]
    );
    assert_eq!(doc.tracked_functions, Some(vec!["main".to_string()]));

    for (event, expected) in doc.events[2..5].iter().zip(0..) {
        match &event.payload {
            EventPayload::ArrayIndexAssign { indices, .. } => assert_eq!(indices, &vec![expected]),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    let elements = session.inspect(|s| s.registries().elements().clone());
    assert_eq!(elements.len(), 3);
    assert_eq!(elements[&ArrayElementKey::new("arr", [0, -1, -1])], 10);
    assert_eq!(elements[&ArrayElementKey::new("arr", [1, -1, -1])], 20);
    assert_eq!(elements[&ArrayElementKey::new("arr", [2, -1, -1])], 30);

    // The offline replay agrees with the live projection
    let replayed = Projections::replay(&doc.events);
    assert_eq!(replayed.array_elements, elements);
    assert!(check_events(&doc.events).is_empty());
}

#[test]
fn test_array_create_records_address_and_name() {
    let (session, buf) = session();
    let arr = Address(0x5550);
    session.func_enter(MAIN, Address::NULL);
    session.array_create("grid", "double", arr, [4, 4, 0], Storage::Heap, at(9));
    session.pointer_alias("p", arr, true, at(10));

    let doc = buf.document();
    assert_eq!(doc.events[1].addr, Some(arr));
    match &doc.events[2].payload {
        EventPayload::PointerAlias {
            alias_of,
            decayed_from_array,
            ..
        } => {
            assert_eq!(alias_of, "grid");
            assert!(*decayed_from_array);
        }
        other => panic!("unexpected payload {:?}", other),
    }
    let info = session.inspect(|s| s.registries().array_at(arr).cloned()).unwrap();
    assert_eq!(info.dims, vec![4, 4]);
    assert_eq!(info.storage, Storage::Heap);
}

#[test]
fn test_rewrite_is_idempotent_in_projection() {
    let (session, buf) = session();
    session.func_enter(MAIN, Address::NULL);
    session.array_index_assign("arr", [2, -1, -1], 5, at(1));
    session.array_index_assign("arr", [2, -1, -1], 5, at(1));

    let value = session.inspect(|s| {
        s.registries()
            .element(&ArrayElementKey::new("arr", [2, -1, -1]))
    });
    assert_eq!(value, Some(5));
    assert_eq!(session.inspect(|s| s.registries().elements().len()), 1);

    let doc = buf.document();
    let writes: Vec<_> = doc
        .events
        .iter()
        .filter(|e| e.payload.kind() == "array_index_assign")
        .collect();
    assert_eq!(writes.len(), 2);
    assert_ne!(writes[0].id, writes[1].id);
}

#[test]
fn test_pointer_lookup_prefers_innermost_frame() {
    let (session, buf) = session();
    let addr_a = Address(0xA000);
    let addr_b = Address(0xB000);
    session.declare("a", "int", addr_a, at(1));
    session.declare("b", "int", addr_b, at(2));

    // Top level: bound in the global registry
    session.pointer_alias("p", addr_a, false, at(3));

    session.func_enter(HELPER, Address::NULL);
    session.pointer_alias("p", addr_b, false, at(20));
    session.pointer_deref_write("p", 1, at(21));
    session.func_exit(HELPER, Address::NULL);

    session.pointer_deref_write("p", 2, at(4));

    let doc = buf.document();
    let targets: Vec<_> = doc
        .events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::PointerDerefWrite { target_name, .. } => Some((e.addr, target_name.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        targets,
        vec![
            (Some(addr_b), "b".to_string()),
            (Some(addr_a), "a".to_string())
        ]
    );
}

#[test]
fn test_loops_closed_before_function_exit() {
    let (session, buf) = session();
    session.func_enter(MAIN, Address::NULL);
    session.func_enter(WORKER, MAIN);
    session.loop_start(1, "for", at(30));
    session.loop_body_start(1, at(31));
    session.loop_start(2, "while", at(32));
    session.loop_body_start(2, at(33));
    // `return` from inside both loops: no loop_end notifications arrive
    session.return_value(0, Some("int"), None, at(34));
    session.func_exit(WORKER, MAIN);
    session.func_exit(MAIN, Address::NULL);

    let doc = buf.document();
    let tail: Vec<_> = doc.events[7..10]
        .iter()
        .map(|e| (e.payload.kind(), e.func.as_str(), e.depth))
        .collect();
    assert_eq!(
        tail,
        vec![
            ("loop_end", "worker", 2),
            ("loop_end", "worker", 2),
            ("func_exit", "worker", 2)
        ]
    );
    assert!(check_events(&doc.events).is_empty());
}

#[test]
fn test_depth_trace_forms_call_tree() {
    let (session, buf) = session();
    session.func_enter(MAIN, Address::NULL);
    session.assign("x", 1, at(1));
    session.func_enter(HELPER, MAIN);
    session.assign("y", 2, at(2));
    session.func_enter(WORKER, HELPER);
    session.func_exit(WORKER, HELPER);
    session.func_exit(HELPER, MAIN);
    session.assign("x", 3, at(3));
    session.func_exit(MAIN, Address::NULL);

    let doc = buf.document();
    let depths: Vec<_> = doc.events.iter().map(|e| e.depth).collect();
    assert_eq!(depths, vec![1, 1, 2, 2, 3, 3, 2, 1, 1]);
    assert!(check_events(&doc.events).is_empty());
    assert_eq!(session.depth(), 0);
}

#[test]
fn test_depth_ceiling_keeps_enter_exit_symmetric() {
    let (session, buf) = session_with(TraceConfig::default().with_max_depth(3));
    for _ in 0..10 {
        session.func_enter(WORKER, WORKER);
    }
    assert_eq!(session.depth(), 3);
    assert_eq!(session.inspect(|s| s.stack().overflow()), 7);
    session.assign("deep", 1, at(1));
    for _ in 0..10 {
        session.func_exit(WORKER, WORKER);
    }
    assert_eq!(session.depth(), 0);

    let doc = buf.document();
    // 3 enters, 1 assign, 3 exits
    assert_eq!(doc.events.len(), 7);
    assert_eq!(doc.events[3].depth, 3);
    assert!(check_events(&doc.events).is_empty());
}

#[test]
fn test_non_finite_doubles_read_back() {
    let (session, buf) = session();
    session.func_enter(MAIN, Address::NULL);
    session.var("ratio", VarSnapshot::Double(f64::NAN), at(1));
    session.var("hi", VarSnapshot::Double(f64::INFINITY), at(2));
    session.var("lo", VarSnapshot::Double(f64::NEG_INFINITY), at(3));
    session.var("ok", VarSnapshot::Double(2.5), at(4));
    session.assign("after", 1, at(5));
    session.func_exit(MAIN, Address::NULL);
    session.stop();

    let doc = buf.document();
    assert!(!doc.truncated);
    let values: Vec<VarValue> = doc
        .events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Var { value, .. } => Some(value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        values,
        vec![
            VarValue::Text("nan".to_string()),
            VarValue::Text("inf".to_string()),
            VarValue::Text("-inf".to_string()),
            VarValue::Float(2.5),
        ]
    );
    assert!(check_events(&doc.events).is_empty());
}

#[test]
fn test_events_outside_functions_attributed_to_main() {
    let (session, buf) = session();
    session.control_flow("break", at(1));
    session.condition_eval(4, "x > 0", 1, at(2));
    session.branch_taken(4, "then", at(2));
    session.block_enter(1, at(3));
    session.block_exit(1, at(4));

    let doc = buf.document();
    assert!(doc.events.iter().all(|e| e.func == "main" && e.depth == 0));
}

#[test]
fn test_assign_and_declare_projections() {
    let (session, buf) = session();
    session.func_enter(MAIN, Address::NULL);
    session.declare("count", "int", Address(0x44), at(1));
    session.assign("count", 1, at(2));
    session.assign("count", 2, at(3));

    assert_eq!(session.inspect(|s| s.registries().variable("count")), Some(2));
    assert_eq!(
        session.inspect(|s| s.registries().name_at(Address(0x44)).to_string()),
        "count"
    );

    let doc = buf.document();
    // Declarations and assignments are attributed to the variable
    assert_eq!(doc.events[1].func, "count");
    assert_eq!(doc.events[1].addr, Some(Address(0x44)));
    assert_eq!(doc.events[2].addr, None);
}

#[test]
fn test_windows_paths_are_normalized() {
    let (session, buf) = session();
    session.assign("x", 1, Location::new(r"C:\work\demo.c", 7));
    let doc = buf.document();
    match &doc.events[0].payload {
        EventPayload::Assign { file, .. } => assert_eq!(file, "C:/work/demo.c"),
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_concurrent_threads_keep_ids_contiguous() {
    let (session, buf) = session();
    std::thread::scope(|scope| {
        for t in 0..4 {
            let session = &session;
            scope.spawn(move || {
                for i in 0..100 {
                    session.assign(&format!("t{}", t), i, at(1));
                }
            });
        }
    });
    session.stop();

    let doc = buf.document();
    assert_eq!(doc.events.len(), 400);
    assert_eq!(doc.total_events, Some(400));
    for (i, event) in doc.events.iter().enumerate() {
        assert_eq!(event.id, i as u64);
    }
    for t in 0..4 {
        let name = format!("t{}", t);
        assert_eq!(session.inspect(|s| s.registries().variable(&name)), Some(99));
    }
}
