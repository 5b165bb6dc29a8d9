//! Event records written to the trace
//!
//! One JSON object per line inside the `"events"` array of the envelope:
//!
//! ```text
//! {"version":"1.0","functions":[],"events":[
//!   {"id":0,"addr":"0x401136","func":"main","depth":1,"ts":1820,"type":"func_enter","caller":"0x7f3a..."},
//!   {"id":1,"addr":null,"func":"x","depth":1,"ts":1834,"type":"assign","name":"x","value":5,"file":"demo.c","line":4}
//! ],"tracked_functions":["main"],"total_events":2}
//! ```
//!
//! The kind tag is `"type"`; kind-specific fields are camelCase and flattened
//! into the record.

use crate::address::Address;
use serde::{Deserialize, Serialize};

/// One immutable trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the trace, starting at 0
    pub id: u64,
    /// Subject address, `null` when the event has none
    pub addr: Option<Address>,
    /// Function or symbol the event is about
    pub func: String,
    /// Call depth when the event was emitted
    pub depth: u32,
    /// Advisory microsecond timestamp, wraps at 32 bits
    pub ts: u32,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Kind tag plus kind-specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    FuncEnter {
        caller: Address,
    },
    FuncExit,
    Declare {
        name: String,
        var_type: String,
        /// Always `null`: declaration carries no value
        value: Option<i64>,
        address: Address,
        file: String,
        line: u32,
    },
    Assign {
        name: String,
        value: i64,
        file: String,
        line: u32,
    },
    Var {
        name: String,
        value: VarValue,
        var_type: VarType,
        file: String,
        line: u32,
    },
    ArrayCreate {
        name: String,
        base_type: String,
        dimensions: Vec<i32>,
        is_stack: bool,
        file: String,
        line: u32,
    },
    ArrayIndexAssign {
        name: String,
        indices: Vec<i32>,
        value: i64,
        /// Character form, set for string-literal initialisation
        #[serde(default, skip_serializing_if = "Option::is_none")]
        char: Option<String>,
        file: String,
        line: u32,
    },
    PointerAlias {
        name: String,
        alias_of: String,
        aliased_address: Address,
        decayed_from_array: bool,
        file: String,
        line: u32,
    },
    PointerDerefWrite {
        pointer_name: String,
        value: i64,
        target_name: String,
        is_heap: bool,
        file: String,
        line: u32,
    },
    HeapWrite {
        address: Address,
        value: i64,
        file: String,
        line: u32,
    },
    HeapAlloc {
        size: u64,
        is_heap: bool,
    },
    HeapFree,
    ControlFlow {
        control_type: String,
        file: String,
        line: u32,
    },
    ConditionEval {
        condition_id: i32,
        expression: String,
        result: i32,
        file: String,
        line: u32,
    },
    BranchTaken {
        condition_id: i32,
        branch_type: String,
        file: String,
        line: u32,
    },
    LoopStart {
        loop_id: i32,
        loop_type: String,
        file: String,
        line: u32,
    },
    LoopBodyStart {
        loop_id: i32,
        iteration: u32,
        file: String,
        line: u32,
    },
    LoopIterationEnd {
        loop_id: i32,
        iteration: u32,
        file: String,
        line: u32,
    },
    LoopEnd {
        loop_id: i32,
        file: String,
        line: u32,
    },
    LoopCondition {
        loop_id: i32,
        result: i32,
        file: String,
        line: u32,
    },
    Return {
        value: i64,
        return_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination_symbol: Option<String>,
        file: String,
        line: u32,
    },
    BlockEnter {
        block_depth: i32,
        file: String,
        line: u32,
    },
    BlockExit {
        block_depth: i32,
        file: String,
        line: u32,
    },
}

impl EventPayload {
    /// Wire name of the kind tag
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::FuncEnter { .. } => "func_enter",
            EventPayload::FuncExit => "func_exit",
            EventPayload::Declare { .. } => "declare",
            EventPayload::Assign { .. } => "assign",
            EventPayload::Var { .. } => "var",
            EventPayload::ArrayCreate { .. } => "array_create",
            EventPayload::ArrayIndexAssign { .. } => "array_index_assign",
            EventPayload::PointerAlias { .. } => "pointer_alias",
            EventPayload::PointerDerefWrite { .. } => "pointer_deref_write",
            EventPayload::HeapWrite { .. } => "heap_write",
            EventPayload::HeapAlloc { .. } => "heap_alloc",
            EventPayload::HeapFree => "heap_free",
            EventPayload::ControlFlow { .. } => "control_flow",
            EventPayload::ConditionEval { .. } => "condition_eval",
            EventPayload::BranchTaken { .. } => "branch_taken",
            EventPayload::LoopStart { .. } => "loop_start",
            EventPayload::LoopBodyStart { .. } => "loop_body_start",
            EventPayload::LoopIterationEnd { .. } => "loop_iteration_end",
            EventPayload::LoopEnd { .. } => "loop_end",
            EventPayload::LoopCondition { .. } => "loop_condition",
            EventPayload::Return { .. } => "return",
            EventPayload::BlockEnter { .. } => "block_enter",
            EventPayload::BlockExit { .. } => "block_exit",
        }
    }
}

/// Value carried by a typed `var` snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Declared type of a `var` snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    Int,
    Long,
    Double,
    Pointer,
    String,
}

/// A typed value as reported by instrumentation
#[derive(Debug, Clone, PartialEq)]
pub enum VarSnapshot {
    Int(i64),
    Long(i64),
    Double(f64),
    Pointer(Address),
    Str(String),
}

impl VarSnapshot {
    pub fn var_type(&self) -> VarType {
        match self {
            VarSnapshot::Int(_) => VarType::Int,
            VarSnapshot::Long(_) => VarType::Long,
            VarSnapshot::Double(_) => VarType::Double,
            VarSnapshot::Pointer(_) => VarType::Pointer,
            VarSnapshot::Str(_) => VarType::String,
        }
    }

    /// Value as written to the trace
    ///
    /// JSON has no NaN or infinity, so non-finite doubles are written as the
    /// strings `nan`, `inf` and `-inf`.
    pub fn into_value(self) -> VarValue {
        match self {
            VarSnapshot::Int(v) | VarSnapshot::Long(v) => VarValue::Int(v),
            VarSnapshot::Double(v) if v.is_nan() => VarValue::Text("nan".to_string()),
            VarSnapshot::Double(v) if v.is_infinite() => {
                let text = if v > 0.0 { "inf" } else { "-inf" };
                VarValue::Text(text.to_string())
            }
            VarSnapshot::Double(v) => VarValue::Float(v),
            VarSnapshot::Pointer(addr) => VarValue::Text(addr.to_string()),
            VarSnapshot::Str(text) => VarValue::Text(text),
        }
    }
}

/// Source position attached to statement-level notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub file: &'a str,
    pub line: u32,
}

impl<'a> Location<'a> {
    pub fn new(file: &'a str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location used when instrumentation supplies none
    pub fn unknown() -> Location<'static> {
        Location {
            file: "unknown",
            line: 0,
        }
    }

    /// File path with a single `/` separator convention
    pub fn normalized_file(&self) -> String {
        normalize_path(self.file)
    }
}

/// Rewrite Windows separators to `/`
pub fn normalize_path(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// Strip line breaks that some demanglers leave in names
pub fn normalize_function_name(raw: &str) -> String {
    raw.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: EventPayload) -> TraceEvent {
        TraceEvent {
            id: 3,
            addr: None,
            func: "main".to_string(),
            depth: 1,
            ts: 42,
            payload,
        }
    }

    #[test]
    fn test_kind_tag_is_type_field() {
        let json = serde_json::to_value(event(EventPayload::FuncExit)).unwrap();
        assert_eq!(json["type"], "func_exit");
        assert_eq!(json["id"], 3);
        assert!(json["addr"].is_null());
        assert_eq!(json["func"], "main");
    }

    #[test]
    fn test_fields_are_camel_case_and_flattened() {
        let json = serde_json::to_value(event(EventPayload::PointerAlias {
            name: "p".to_string(),
            alias_of: "x".to_string(),
            aliased_address: Address(0x20),
            decayed_from_array: false,
            file: "a.c".to_string(),
            line: 9,
        }))
        .unwrap();
        assert_eq!(json["type"], "pointer_alias");
        assert_eq!(json["aliasOf"], "x");
        assert_eq!(json["aliasedAddress"], "0x20");
        assert_eq!(json["decayedFromArray"], false);
        assert_eq!(json["line"], 9);
    }

    #[test]
    fn test_declare_value_is_null() {
        let json = serde_json::to_value(event(EventPayload::Declare {
            name: "x".to_string(),
            var_type: "int".to_string(),
            value: None,
            address: Address(0x40),
            file: "a.c".to_string(),
            line: 1,
        }))
        .unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["varType"], "int");
    }

    #[test]
    fn test_optional_fields_omitted() {
        let json = serde_json::to_string(&event(EventPayload::Return {
            value: 0,
            return_type: "int".to_string(),
            destination_symbol: None,
            file: "a.c".to_string(),
            line: 3,
        }))
        .unwrap();
        assert!(!json.contains("destinationSymbol"));
    }

    #[test]
    fn test_string_fields_are_escaped() {
        let json = serde_json::to_string(&event(EventPayload::ConditionEval {
            condition_id: 1,
            expression: "s == \"a\\b\"".to_string(),
            result: 1,
            file: "a.c".to_string(),
            line: 3,
        }))
        .unwrap();
        assert!(json.contains(r#"s == \"a\\b\""#));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_event_reads_back() {
        let original = event(EventPayload::ArrayIndexAssign {
            name: "arr".to_string(),
            indices: vec![1, 2],
            value: -4,
            char: None,
            file: "m.c".to_string(),
            line: 12,
        });
        let line = serde_json::to_string(&original).unwrap();
        let parsed: TraceEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_var_value_forms() {
        let json = serde_json::to_value(event(EventPayload::Var {
            name: "ratio".to_string(),
            value: VarValue::Float(0.5),
            var_type: VarType::Double,
            file: "m.c".to_string(),
            line: 2,
        }))
        .unwrap();
        assert_eq!(json["value"], 0.5);
        assert_eq!(json["varType"], "double");
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        let payloads = [
            EventPayload::FuncEnter {
                caller: Address(1),
            },
            EventPayload::HeapAlloc {
                size: 16,
                is_heap: true,
            },
            EventPayload::HeapFree,
            EventPayload::LoopEnd {
                loop_id: 1,
                file: "unknown".to_string(),
                line: 0,
            },
        ];
        for payload in payloads {
            let kind = payload.kind();
            let json = serde_json::to_value(event(payload)).unwrap();
            assert_eq!(json["type"], kind);
        }
    }

    #[test]
    fn test_snapshot_values() {
        assert_eq!(VarSnapshot::Long(7).var_type(), VarType::Long);
        assert_eq!(VarSnapshot::Long(7).into_value(), VarValue::Int(7));
        assert_eq!(
            VarSnapshot::Pointer(Address(0x10)).into_value(),
            VarValue::Text("0x10".to_string())
        );
        assert_eq!(
            VarSnapshot::Double(-f64::INFINITY).into_value(),
            VarValue::Text("-inf".to_string())
        );

        // Non-finite doubles must survive a JSON round trip
        let value = VarSnapshot::Double(f64::NAN).into_value();
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"nan\"");
        let back: VarValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(r"C:\src\main.c"), "C:/src/main.c");
        assert_eq!(normalize_path("/src/main.c"), "/src/main.c");
    }

    #[test]
    fn test_normalize_function_name() {
        assert_eq!(normalize_function_name("foo\r\n(int)"), "foo(int)");
    }
}
