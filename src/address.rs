//! Raw memory addresses reported by instrumentation
//!
//! Addresses are opaque identities: the engine never dereferences them. They
//! serialize as `0x`-prefixed hex strings so the visualizer can match them
//! against `declare`/`array_create` events.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An address inside the instrumented program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub usize);

impl Address {
    pub const NULL: Address = Address(0);

    /// Capture the address of a raw pointer
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for the null address, so it serializes as JSON `null`
    pub fn non_null(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }

    /// Parse the `0x...` form written by [`fmt::Display`]
    pub fn parse(text: &str) -> Option<Self> {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))?;
        usize::from_str_radix(digits, 16).ok().map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Address::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid address: {text}")))
    }
}
