//! Trace file reader
//!
//! Parses the envelope written by [`crate::recorder`]. The recorder puts
//! every record on its own line and flushes it, so the reader works line by
//! line instead of parsing one JSON document: that way a trace cut short by
//! a crash (no trailer, possibly a torn last record) still yields every
//! complete event, with [`TraceDocument::truncated`] set.

use crate::error::ReadError;
use crate::event::TraceEvent;
use crate::recorder::TRACE_FORMAT_VERSION;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A parsed trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceDocument {
    pub version: String,
    pub events: Vec<TraceEvent>,
    /// From the trailer; `None` when the trace was not finished
    pub tracked_functions: Option<Vec<String>>,
    /// From the trailer; `None` when the trace was not finished
    pub total_events: Option<u64>,
    /// The trailer is missing or the last record is torn
    pub truncated: bool,
}

#[derive(Deserialize)]
struct Header {
    version: String,
}

#[derive(Deserialize)]
struct Trailer {
    tracked_functions: Vec<String>,
    total_events: u64,
}

/// Read and parse a trace file
pub fn read_file(path: &Path) -> Result<TraceDocument, ReadError> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

/// Parse trace text
pub fn parse(text: &str) -> Result<TraceDocument, ReadError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines.next().ok_or(ReadError::Empty)?;
    let version = parse_header(header)?;
    if version != TRACE_FORMAT_VERSION {
        return Err(ReadError::UnsupportedVersion(version));
    }

    let mut doc = TraceDocument {
        version,
        events: Vec::new(),
        tracked_functions: None,
        total_events: None,
        truncated: true,
    };

    let body: Vec<(usize, &str)> = lines.collect();
    let last = body.len().saturating_sub(1);
    for (pos, (line_no, line)) in body.into_iter().enumerate() {
        if let Some(rest) = line.strip_prefix(']') {
            match parse_trailer(rest) {
                Ok(trailer) => {
                    doc.tracked_functions = Some(trailer.tracked_functions);
                    doc.total_events = Some(trailer.total_events);
                    doc.truncated = false;
                }
                Err(_) if pos == last => {}
                Err(e) => return Err(ReadError::InvalidTrailer(e)),
            }
            return Ok(doc);
        }

        let record = line.trim_start_matches(',').trim_end_matches(',');
        match serde_json::from_str::<TraceEvent>(record) {
            Ok(event) => doc.events.push(event),
            // Torn final record of an interrupted run
            Err(_) if pos == last => return Ok(doc),
            Err(source) => {
                return Err(ReadError::InvalidEvent {
                    line: line_no,
                    source,
                })
            }
        }
    }

    Ok(doc)
}

fn parse_header(line: &str) -> Result<String, ReadError> {
    let open = line
        .strip_suffix('[')
        .filter(|head| head.ends_with("\"events\":"))
        .ok_or_else(|| ReadError::InvalidHeader(line.to_string()))?;
    let header: Header = serde_json::from_str(&format!("{}null}}", open))
        .map_err(|e| ReadError::InvalidHeader(e.to_string()))?;
    Ok(header.version)
}

fn parse_trailer(rest: &str) -> Result<Trailer, serde_json::Error> {
    let fields = rest.strip_prefix(',').unwrap_or(rest);
    serde_json::from_str(&format!("{{{}", fields))
}
