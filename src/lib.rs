//! vartrace - in-process execution trace recorder for instrumented programs
//!
//! An instrumented native program notifies this library of function
//! entries/exits, variable declarations and assignments, array and pointer
//! operations, loop and branch activity and heap traffic. Each notification
//! updates a small runtime model (call stack, name and value registries) and
//! appends one JSON event to a trace file that a visualizer replays later.
//!
//! The library is linked into the traced program (`cdylib`/`staticlib`) and
//! driven through the C ABI in [`hooks`] (plus native heap interposition
//! with the `interpose` feature), or embedded from Rust through
//! [`session::TraceSession`]. The `vartrace` binary inspects recorded traces.

pub mod address;
pub mod alloc;
pub mod analysis;
pub mod call_stack;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod guard;
pub mod hooks;
#[cfg(unix)]
pub mod interpose;
pub mod reader;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod symbols;

pub use address::Address;
pub use config::TraceConfig;
pub use error::{ReadError, TraceError};
pub use event::{EventPayload, Location, TraceEvent};
pub use session::TraceSession;
