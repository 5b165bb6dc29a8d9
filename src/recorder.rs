//! Serialized, append-only event writer
//!
//! The recorder owns the output sink and the event counter behind one
//! process-wide lock. Formatting and writing a record happen while the lock
//! is held, so concurrent writers always produce whole records; which
//! thread's record receives which id is unspecified.
//!
//! Each record is written on its own line and flushed immediately. A process
//! killed mid-run therefore leaves every completed record on disk, followed
//! by at most one torn line and no closing envelope. Consumers must tolerate
//! that (see [`crate::reader`]).
//!
//! A recorder without a sink (never opened, or closed) accepts every call and
//! records nothing.

use crate::address::Address;
use crate::error::{Result, TraceError};
use crate::event::{EventPayload, TraceEvent};
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Envelope header written when the sink opens
pub const ENVELOPE_HEADER: &str = "{\"version\":\"1.0\",\"functions\":[],\"events\":[\n";

/// Envelope version tag
pub const TRACE_FORMAT_VERSION: &str = "1.0";

/// Destination of the event log
pub type Sink = Box<dyn Write + Send>;

struct RecorderInner {
    sink: Option<Sink>,
    next_id: u64,
}

/// Writes events under a single lock
pub struct EventRecorder {
    inner: Mutex<RecorderInner>,
    epoch: Instant,
}

impl EventRecorder {
    /// A recorder that discards everything
    pub fn closed() -> Self {
        Self {
            inner: Mutex::new(RecorderInner {
                sink: None,
                next_id: 0,
            }),
            epoch: Instant::now(),
        }
    }

    /// Take ownership of `sink` and write the envelope header
    pub fn open(mut sink: Sink) -> Result<Self> {
        sink.write_all(ENVELOPE_HEADER.as_bytes())?;
        sink.flush()?;
        Ok(Self {
            inner: Mutex::new(RecorderInner {
                sink: Some(sink),
                next_id: 0,
            }),
            epoch: Instant::now(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Number of events written so far
    pub fn event_count(&self) -> u64 {
        self.lock().next_id
    }

    /// Microseconds since the recorder was created, truncated to 32 bits
    fn timestamp_us(&self) -> u32 {
        (self.epoch.elapsed().as_micros() & 0xFFFF_FFFF) as u32
    }

    /// Append one event and return its id
    ///
    /// Returns `None` when there is no sink. A write failure closes the sink:
    /// tracing degrades to disabled rather than surfacing the error.
    pub fn record(
        &self,
        subject: Option<Address>,
        func: &str,
        depth: usize,
        payload: EventPayload,
    ) -> Option<u64> {
        let mut inner = self.lock();
        let id = inner.next_id;
        let sink = inner.sink.as_mut()?;

        let event = TraceEvent {
            id,
            addr: subject,
            func: func.to_string(),
            depth: u32::try_from(depth).unwrap_or(u32::MAX),
            ts: self.timestamp_us(),
            payload,
        };

        let mut line = Vec::with_capacity(160);
        if id > 0 {
            line.extend_from_slice(b",\n");
        }
        line.extend_from_slice(b"  ");
        let written = serde_json::to_writer(&mut line, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| sink.write_all(&line))
            .and_then(|()| sink.flush());

        match written {
            Ok(()) => {
                inner.next_id += 1;
                Some(id)
            }
            Err(e) => {
                tracing::warn!("Trace sink write failed, disabling output: {}", e);
                inner.sink = None;
                None
            }
        }
    }

    /// Flush the sink without writing a record
    pub fn flush(&self) {
        if let Some(sink) = self.lock().sink.as_mut() {
            let _ = sink.flush();
        }
    }

    /// Write the trailer, flush and drop the sink
    ///
    /// The trailer closes the events array and lists every function observed
    /// plus the final event count. Later calls return
    /// [`TraceError::SinkClosed`].
    pub fn close(&self, tracked_functions: &BTreeSet<String>) -> Result<u64> {
        let mut inner = self.lock();
        let total = inner.next_id;
        let mut sink = inner.sink.take().ok_or(TraceError::SinkClosed)?;

        let functions = serde_json::to_string(tracked_functions).map_err(std::io::Error::from)?;
        write!(
            sink,
            "\n],\"tracked_functions\":{},\"total_events\":{}}}\n",
            functions, total
        )?;
        sink.flush()?;
        Ok(total)
    }
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventRecorder")
            .field("open", &inner.sink.is_some())
            .field("next_id", &inner.next_id)
            .finish()
    }
}
