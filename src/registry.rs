//! Latest-value registries for the traced program
//!
//! These answer "what does this name currently refer to" for later
//! notifications. None of them validate input: a missing key resolves to
//! [`UNKNOWN_NAME`] or `None`, never an error, and array indices are stored
//! as reported without bounds checking.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Placeholder returned by reverse lookups that find nothing
pub const UNKNOWN_NAME: &str = "unknown";

/// Sentinel for an unused trailing array index
pub const UNUSED_INDEX: i32 = -1;

/// Where an array's storage lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    Stack,
    Heap,
}

impl Storage {
    pub fn is_stack(self) -> bool {
        matches!(self, Storage::Stack)
    }
}

/// An array declared by the traced program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayInfo {
    pub name: String,
    pub base_type: String,
    pub address: Address,
    /// One to three extents, outermost first
    pub dims: Vec<i32>,
    pub storage: Storage,
}

impl ArrayInfo {
    /// Build from raw `(dim1, dim2, dim3)` where unused extents are `<= 0`
    pub fn new(
        name: &str,
        base_type: &str,
        address: Address,
        raw_dims: [i32; 3],
        storage: Storage,
    ) -> Self {
        Self {
            name: name.to_string(),
            base_type: base_type.to_string(),
            address,
            dims: used_dimensions(raw_dims),
            storage,
        }
    }
}

/// Extents actually in use: a positive third extent implies three dimensions,
/// a positive second implies two, otherwise one
pub fn used_dimensions(raw: [i32; 3]) -> Vec<i32> {
    let [d1, d2, d3] = raw;
    if d3 > 0 {
        vec![d1, d2, d3]
    } else if d2 > 0 {
        vec![d1, d2]
    } else {
        vec![d1]
    }
}

/// Indices actually in use: trailing `-1` entries are dropped
pub fn used_indices(raw: [i32; 3]) -> Vec<i32> {
    let [i1, i2, i3] = raw;
    if i3 >= 0 {
        vec![i1, i2, i3]
    } else if i2 >= 0 {
        vec![i1, i2]
    } else {
        vec![i1]
    }
}

/// Key of one array slot; ordered by name then indices
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArrayElementKey {
    pub array: String,
    pub idx1: i32,
    pub idx2: i32,
    pub idx3: i32,
}

impl ArrayElementKey {
    pub fn new(array: &str, indices: [i32; 3]) -> Self {
        Self {
            array: array.to_string(),
            idx1: indices[0],
            idx2: indices[1],
            idx3: indices[2],
        }
    }

    /// Key from a 1-3 element index list, padding with `-1`
    pub fn from_slice(array: &str, indices: &[i32]) -> Self {
        let mut padded = [UNUSED_INDEX; 3];
        for (slot, idx) in padded.iter_mut().zip(indices) {
            *slot = *idx;
        }
        Self::new(array, padded)
    }

    /// Indices in use, without the `-1` padding
    pub fn indices(&self) -> Vec<i32> {
        used_indices([self.idx1, self.idx2, self.idx3])
    }
}

/// What a pointer variable currently refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerInfo {
    pub pointer_name: String,
    pub aliased_address: Address,
    pub is_heap: bool,
}

impl PointerInfo {
    /// Pointer aliasing an existing object
    pub fn alias(name: &str, target: Address) -> Self {
        Self {
            pointer_name: name.to_string(),
            aliased_address: target,
            is_heap: false,
        }
    }

    /// Pointer initialised from a heap allocation
    pub fn heap(name: &str, heap: Address) -> Self {
        Self {
            pointer_name: name.to_string(),
            aliased_address: heap,
            is_heap: true,
        }
    }
}

/// Process-wide registries
#[derive(Debug, Default)]
pub struct Registries {
    variables: HashMap<String, i64>,
    arrays: BTreeMap<Address, ArrayInfo>,
    address_names: HashMap<Address, String>,
    elements: BTreeMap<ArrayElementKey, i64>,
    tracked_functions: BTreeSet<String>,
    global_pointers: HashMap<String, PointerInfo>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_variable(&mut self, name: &str, value: i64) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variable(&self, name: &str) -> Option<i64> {
        self.variables.get(name).copied()
    }

    /// Record the most recent symbol declared at `address` (last writer wins)
    pub fn bind_name(&mut self, address: Address, name: &str) {
        self.address_names.insert(address, name.to_string());
    }

    /// Name most recently bound to `address`, or [`UNKNOWN_NAME`]
    pub fn name_at(&self, address: Address) -> &str {
        self.address_names
            .get(&address)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_NAME)
    }

    pub fn register_array(&mut self, info: ArrayInfo) {
        self.arrays.insert(info.address, info);
    }

    pub fn array_at(&self, address: Address) -> Option<&ArrayInfo> {
        self.arrays.get(&address)
    }

    pub fn set_element(&mut self, key: ArrayElementKey, value: i64) {
        self.elements.insert(key, value);
    }

    pub fn element(&self, key: &ArrayElementKey) -> Option<i64> {
        self.elements.get(key).copied()
    }

    /// All element values in key order
    pub fn elements(&self) -> &BTreeMap<ArrayElementKey, i64> {
        &self.elements
    }

    pub fn track_function(&mut self, name: &str) {
        if !self.tracked_functions.contains(name) {
            self.tracked_functions.insert(name.to_string());
        }
    }

    /// Every function name ever observed, sorted
    pub fn tracked_functions(&self) -> &BTreeSet<String> {
        &self.tracked_functions
    }

    pub fn set_global_pointer(&mut self, info: PointerInfo) {
        self.global_pointers.insert(info.pointer_name.clone(), info);
    }

    pub fn global_pointer(&self, name: &str) -> Option<&PointerInfo> {
        self.global_pointers.get(name)
    }
}
