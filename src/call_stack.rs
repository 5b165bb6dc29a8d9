//! Call frames tracked by the engine
//!
//! A frame is the engine's record of one active function invocation; it owns
//! the pointer aliases and loop state local to that invocation. The stack
//! size is the call depth reported in events.
//!
//! Frames beyond the depth ceiling are not pushed. Such enters are counted in
//! `overflow` and the matching exits drain that counter before any frame is
//! popped, so enter/exit pairs stay symmetric.

use crate::registry::PointerInfo;
use std::collections::HashMap;

/// One active function invocation
#[derive(Debug, Clone, Default)]
pub struct CallFrame {
    pub function_name: String,
    pub pointer_aliases: HashMap<String, PointerInfo>,
    /// Open loop ids, innermost last
    pub active_loops: Vec<i32>,
    pub loop_iterations: HashMap<i32, u32>,
}

impl CallFrame {
    pub fn new(function_name: &str) -> Self {
        Self {
            function_name: function_name.to_string(),
            ..Self::default()
        }
    }
}

/// Result of a push attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Frame pushed; carries the new depth
    Pushed(usize),
    /// Depth ceiling reached; the enter was counted only
    Overflowed,
}

/// A frame removed by [`CallStack::pop_frame`]
#[derive(Debug, Clone)]
pub struct PoppedFrame {
    pub frame: CallFrame,
    /// Loops still open at exit, innermost first
    pub unclosed_loops: Vec<i32>,
    /// Depth the frame occupied
    pub depth: usize,
}

/// Ordered stack of active frames
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<CallFrame>,
    overflow: u64,
    max_depth: usize,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            overflow: 0,
            max_depth,
        }
    }

    /// Current depth (number of tracked frames)
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Enters dropped because of the depth ceiling and not yet exited
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn push_frame(&mut self, function_name: &str) -> Push {
        if self.overflow > 0 || self.frames.len() >= self.max_depth {
            self.overflow += 1;
            return Push::Overflowed;
        }
        self.frames.push(CallFrame::new(function_name));
        Push::Pushed(self.frames.len())
    }

    /// Pop the innermost frame
    ///
    /// Returns `None` when the exit matches an overflowed enter or when the
    /// stack is empty; neither case changes the depth.
    pub fn pop_frame(&mut self) -> Option<PoppedFrame> {
        if self.overflow > 0 {
            self.overflow -= 1;
            return None;
        }
        let depth = self.frames.len();
        let mut frame = self.frames.pop()?;
        let unclosed_loops = frame.active_loops.drain(..).rev().collect();
        Some(PoppedFrame {
            frame,
            unclosed_loops,
            depth,
        })
    }

    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Innermost frames first
    pub fn frames(&self) -> impl Iterator<Item = &CallFrame> {
        self.frames.iter().rev()
    }

    /// Open `loop_id` in the current frame and reset its counter
    pub fn record_loop_start(&mut self, loop_id: i32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.active_loops.push(loop_id);
            frame.loop_iterations.insert(loop_id, 0);
        }
    }

    /// Advance the 1-based iteration counter of `loop_id`
    ///
    /// Returns 0 outside any tracked frame.
    pub fn record_loop_iteration(&mut self, loop_id: i32) -> u32 {
        match self.frames.last_mut() {
            Some(frame) => {
                let count = frame.loop_iterations.entry(loop_id).or_insert(0);
                *count += 1;
                *count
            }
            None => 0,
        }
    }

    /// Iteration currently running for `loop_id` without advancing it
    pub fn loop_iteration(&self, loop_id: i32) -> u32 {
        self.frames
            .last()
            .and_then(|frame| frame.loop_iterations.get(&loop_id).copied())
            .unwrap_or(0)
    }

    /// Close the innermost open occurrence of `loop_id`
    pub fn record_loop_end(&mut self, loop_id: i32) {
        if let Some(frame) = self.frames.last_mut() {
            if let Some(pos) = frame.active_loops.iter().rposition(|id| *id == loop_id) {
                frame.active_loops.remove(pos);
            }
            frame.loop_iterations.remove(&loop_id);
        }
    }

    /// Bind a pointer alias in the current frame
    ///
    /// Returns the info back when there is no frame to hold it.
    pub fn bind_pointer(&mut self, info: PointerInfo) -> Option<PointerInfo> {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.pointer_aliases.insert(info.pointer_name.clone(), info);
                None
            }
            None => Some(info),
        }
    }

    /// Innermost frame alias for `name`
    pub fn find_pointer(&self, name: &str) -> Option<&PointerInfo> {
        self.frames().find_map(|frame| frame.pointer_aliases.get(name))
    }
}
