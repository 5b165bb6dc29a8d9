// Shared helpers for integration tests
//
// Sessions here write into an in-memory buffer and resolve function
// addresses through a fixed symbol table.
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};
use vartrace::reader::{self, TraceDocument};
use vartrace::symbols::SymbolTable;
use vartrace::{Address, TraceConfig, TraceSession};

pub const MAIN: Address = Address(0x1000);
pub const HELPER: Address = Address(0x2000);
pub const WORKER: Address = Address(0x3000);

/// In-memory sink shared between the session and the test
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn document(&self) -> TraceDocument {
        reader::parse(&self.text()).unwrap()
    }
}

pub fn symbols() -> SymbolTable {
    SymbolTable::new()
        .with_function(MAIN, "main")
        .with_function(HELPER, "helper")
        .with_function(WORKER, "worker")
}

/// Session recording into a fresh buffer
pub fn session() -> (TraceSession, SharedBuf) {
    session_with(TraceConfig::default())
}

pub fn session_with(config: TraceConfig) -> (TraceSession, SharedBuf) {
    let buf = SharedBuf::default();
    let session = TraceSession::with_sink(config, Box::new(buf.clone())).with_resolver(symbols());
    (session, buf)
}

pub fn kinds(doc: &TraceDocument) -> Vec<&'static str> {
    doc.events.iter().map(|e| e.payload.kind()).collect()
}
