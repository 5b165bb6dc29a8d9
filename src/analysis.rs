//! Offline trace analysis
//!
//! Replays a recorded event sequence into the same projections the engine
//! maintains at run time, and checks the structural properties every trace
//! must satisfy:
//!
//! - ids are contiguous from 0
//! - depths follow the call tree (enter at d+1, exit at d, everything else
//!   at the current depth)
//! - no exit without a matching enter
//! - every loop opened inside a function is closed before that function's
//!   exit
//!
//! The checker assumes the single shared call stack the engine keeps.

use crate::address::Address;
use crate::event::{EventPayload, TraceEvent};
use crate::reader::TraceDocument;
use crate::registry::ArrayElementKey;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A declared array as seen in the trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayShape {
    pub base_type: String,
    pub dimensions: Vec<i32>,
    pub is_stack: bool,
    pub address: Option<Address>,
}

/// Latest target of a pointer alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointerTarget {
    pub address: Address,
    pub alias_of: String,
}

/// State reconstructed from events
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Projections {
    pub variables: BTreeMap<String, i64>,
    pub array_elements: BTreeMap<ArrayElementKey, i64>,
    pub arrays: BTreeMap<String, ArrayShape>,
    pub pointers: BTreeMap<String, PointerTarget>,
    pub kind_counts: BTreeMap<String, u64>,
    pub functions: BTreeSet<String>,
    pub max_depth: u32,
}

impl Projections {
    pub fn replay(events: &[TraceEvent]) -> Self {
        let mut projections = Self::default();
        for event in events {
            projections.apply(event);
        }
        projections
    }

    fn apply(&mut self, event: &TraceEvent) {
        *self
            .kind_counts
            .entry(event.payload.kind().to_string())
            .or_insert(0) += 1;
        self.max_depth = self.max_depth.max(event.depth);

        match &event.payload {
            EventPayload::FuncEnter { .. } => {
                self.functions.insert(event.func.clone());
            }
            EventPayload::Assign { name, value, .. } => {
                self.variables.insert(name.clone(), *value);
            }
            EventPayload::ArrayCreate {
                name,
                base_type,
                dimensions,
                is_stack,
                ..
            } => {
                self.arrays.insert(
                    name.clone(),
                    ArrayShape {
                        base_type: base_type.clone(),
                        dimensions: dimensions.clone(),
                        is_stack: *is_stack,
                        address: event.addr,
                    },
                );
            }
            EventPayload::ArrayIndexAssign {
                name,
                indices,
                value,
                ..
            } => {
                self.array_elements
                    .insert(ArrayElementKey::from_slice(name, indices), *value);
            }
            EventPayload::PointerAlias {
                name,
                alias_of,
                aliased_address,
                ..
            } => {
                self.pointers.insert(
                    name.clone(),
                    PointerTarget {
                        address: *aliased_address,
                        alias_of: alias_of.clone(),
                    },
                );
            }
            _ => {}
        }
    }

    /// Element value by array name and used indices
    pub fn element(&self, array: &str, indices: &[i32]) -> Option<i64> {
        self.array_elements
            .get(&ArrayElementKey::from_slice(array, indices))
            .copied()
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.kind_counts.get(kind).copied().unwrap_or(0)
    }
}

/// A structural defect found in a trace
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    #[error("Event at position {position} has id {found}, expected {expected}")]
    IdGap {
        position: usize,
        expected: u64,
        found: u64,
    },

    #[error("Event {id} ({kind}) recorded at depth {found}, expected {expected}")]
    DepthMismatch {
        id: u64,
        kind: String,
        expected: u32,
        found: u32,
    },

    #[error("Event {id} exits {function} with no open function")]
    UnbalancedExit { id: u64, function: String },

    #[error("Loop {loop_id} in {function} still open at exit event {id}")]
    UnclosedLoop {
        id: u64,
        loop_id: i32,
        function: String,
    },

    #[error("Trailer declares {declared} events, trace holds {actual}")]
    CountMismatch { declared: u64, actual: u64 },
}

/// Check a parsed document, including its trailer
pub fn check(doc: &TraceDocument) -> Vec<Violation> {
    let mut violations = check_events(&doc.events);
    if let Some(declared) = doc.total_events {
        let actual = doc.events.len() as u64;
        if declared != actual {
            violations.push(Violation::CountMismatch { declared, actual });
        }
    }
    violations
}

/// Check an event sequence
pub fn check_events(events: &[TraceEvent]) -> Vec<Violation> {
    let mut violations = Vec::new();
    // One entry per open function: its still-open loop ids
    let mut frames: Vec<Vec<i32>> = Vec::new();

    for (position, event) in events.iter().enumerate() {
        let expected_id = position as u64;
        if event.id != expected_id {
            violations.push(Violation::IdGap {
                position,
                expected: expected_id,
                found: event.id,
            });
        }

        let depth = frames.len() as u32;
        let expected_depth = match &event.payload {
            EventPayload::FuncEnter { .. } => {
                frames.push(Vec::new());
                depth + 1
            }
            EventPayload::FuncExit => match frames.pop() {
                Some(open_loops) => {
                    for loop_id in open_loops.into_iter().rev() {
                        violations.push(Violation::UnclosedLoop {
                            id: event.id,
                            loop_id,
                            function: event.func.clone(),
                        });
                    }
                    depth
                }
                None => {
                    violations.push(Violation::UnbalancedExit {
                        id: event.id,
                        function: event.func.clone(),
                    });
                    continue;
                }
            },
            EventPayload::LoopStart { loop_id, .. } => {
                if let Some(open_loops) = frames.last_mut() {
                    open_loops.push(*loop_id);
                }
                depth
            }
            EventPayload::LoopEnd { loop_id, .. } => {
                if let Some(open_loops) = frames.last_mut() {
                    if let Some(pos) = open_loops.iter().rposition(|id| id == loop_id) {
                        open_loops.remove(pos);
                    }
                }
                depth
            }
            _ => depth,
        };

        if event.depth != expected_depth {
            violations.push(Violation::DepthMismatch {
                id: event.id,
                kind: event.payload.kind().to_string(),
                expected: expected_depth,
                found: event.depth,
            });
        }
    }

    violations
}
