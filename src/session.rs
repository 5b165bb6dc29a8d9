//! Trace session: notification handlers and lifecycle
//!
//! A [`TraceSession`] owns everything the engine mutates: the disabled flag,
//! the event recorder, the registries and the call stack. Handlers receive
//! it by shared reference (the C ABI layer keeps one in a process-wide
//! `OnceLock`, embedders and tests create their own).
//!
//! Every public handler follows the same discipline:
//!
//! 1. acquire a [`ReentrancyTicket`]; on denial return without side effects
//! 2. return if the sink is absent
//! 3. lock the state, update registries/call stack, record the event(s)
//! 4. the ticket drops on every exit path
//!
//! Registries and the call stack sit behind one `Mutex`. Notifications from
//! different threads are therefore serialized, and the state lock is always
//! taken before the recorder lock, so depth values in the log match the
//! order in which records land.

use crate::address::Address;
use crate::call_stack::{CallStack, Push};
use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::event::{EventPayload, Location, VarSnapshot};
use crate::guard::ReentrancyTicket;
use crate::recorder::{EventRecorder, Sink};
use crate::registry::{
    used_dimensions, used_indices, ArrayElementKey, ArrayInfo, PointerInfo, Registries, Storage,
};
use crate::symbols::{DlSymbolResolver, SymbolResolver};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Function name reported for events outside any tracked frame
pub const TOP_LEVEL_FUNCTION: &str = "main";

/// Longest string value kept by a `var` snapshot, in bytes
pub const MAX_VAR_STRING_LEN: usize = 250;

/// Return type reported when instrumentation supplies none
const DEFAULT_RETURN_TYPE: &str = "auto";

/// Registries plus call stack, mutated only under the session lock
#[derive(Debug)]
pub struct TraceState {
    registries: Registries,
    stack: CallStack,
}

impl TraceState {
    fn new(max_depth: usize) -> Self {
        Self {
            registries: Registries::new(),
            stack: CallStack::new(max_depth),
        }
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Innermost tracked function, or [`TOP_LEVEL_FUNCTION`]
    pub fn current_function(&self) -> &str {
        self.stack
            .current_frame()
            .map(|frame| frame.function_name.as_str())
            .unwrap_or(TOP_LEVEL_FUNCTION)
    }

    /// Resolve a pointer name: innermost frame first, then the global registry
    pub fn find_pointer(&self, name: &str) -> Option<&PointerInfo> {
        self.stack
            .find_pointer(name)
            .or_else(|| self.registries.global_pointer(name))
    }

    /// Record an event attributed to the current function at the current depth
    fn emit(&self, recorder: &EventRecorder, subject: Option<Address>, payload: EventPayload) {
        recorder.record(subject, self.current_function(), self.depth(), payload);
    }

    /// Record an event attributed to `name` at the current depth
    fn emit_named(
        &self,
        recorder: &EventRecorder,
        subject: Option<Address>,
        name: &str,
        payload: EventPayload,
    ) {
        recorder.record(subject, name, self.depth(), payload);
    }
}

/// One tracing session: from sink open to trailer written
pub struct TraceSession {
    config: TraceConfig,
    disabled: AtomicBool,
    recorder: EventRecorder,
    state: Mutex<TraceState>,
    resolver: Box<dyn SymbolResolver>,
}

impl TraceSession {
    /// Open the configured output file and start recording
    ///
    /// If the file cannot be opened the session stays permanently disabled:
    /// every handler becomes a no-op and the failure is only logged.
    pub fn start(config: TraceConfig) -> Self {
        let recorder = match Self::open_file(&config) {
            Ok(recorder) => {
                tracing::debug!("Trace output opened at {}", config.output_path().display());
                recorder
            }
            Err(e) => {
                tracing::warn!("Tracing disabled: {}", e);
                EventRecorder::closed()
            }
        };
        Self::from_parts(config, recorder)
    }

    /// Start recording into an arbitrary writer
    pub fn with_sink(config: TraceConfig, sink: Sink) -> Self {
        let recorder = EventRecorder::open(sink).unwrap_or_else(|e| {
            tracing::warn!("Tracing disabled: {}", e);
            EventRecorder::closed()
        });
        Self::from_parts(config, recorder)
    }

    /// Replace the symbol resolver (default: `dladdr`)
    pub fn with_resolver(mut self, resolver: impl SymbolResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    fn open_file(config: &TraceConfig) -> Result<EventRecorder, TraceError> {
        let path = config.output_path();
        let file = File::create(path).map_err(|source| TraceError::SinkUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        EventRecorder::open(Box::new(BufWriter::new(file)))
    }

    fn from_parts(config: TraceConfig, recorder: EventRecorder) -> Self {
        let session = Self {
            state: Mutex::new(TraceState::new(config.max_depth)),
            config,
            disabled: AtomicBool::new(true),
            recorder,
            resolver: Box::new(DlSymbolResolver),
        };
        // Enabled only once the header is on disk
        if session.recorder.is_open() {
            session.disabled.store(false, Ordering::Release);
        }
        session
    }

    /// Finish the trace: write the trailer and close the sink
    ///
    /// Runs at most once. The disabled flag is raised before anything else so
    /// notifications racing with shutdown see it and return. Returns the
    /// final event count when this call closed the sink.
    pub fn stop(&self) -> Option<u64> {
        let _ticket = ReentrancyTicket::acquire(&self.disabled)?;
        self.disabled.store(true, Ordering::Release);

        let (tracked, overflow) = {
            let state = self.lock_state();
            let tracked = state.registries.tracked_functions().clone();
            (tracked, state.stack.overflow())
        };
        if overflow > 0 {
            tracing::debug!("{} calls past the depth ceiling never returned", overflow);
        }
        match self.recorder.close(&tracked) {
            Ok(total) => {
                tracing::debug!(
                    "Trace closed at {} with {} events",
                    self.config.output_path().display(),
                    total
                );
                Some(total)
            }
            Err(e) => {
                tracing::warn!("Failed to finish trace: {}", e);
                None
            }
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Whether notifications are currently accepted
    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    /// Events recorded so far
    pub fn event_count(&self) -> u64 {
        self.recorder.event_count()
    }

    /// Read the current state projections
    ///
    /// Notifications raised by `f` on this thread (allocations included) are
    /// dropped while the state is locked.
    pub fn inspect<R>(&self, f: impl FnOnce(&TraceState) -> R) -> R {
        let _held = ReentrancyTicket::hold();
        let state = self.lock_state();
        f(&state)
    }

    pub fn depth(&self) -> usize {
        let _held = ReentrancyTicket::hold();
        let state = self.lock_state();
        state.depth()
    }

    fn lock_state(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ticket for one handler run, or `None` if the handler must not run
    fn enter(&self) -> Option<ReentrancyTicket> {
        let ticket = ReentrancyTicket::acquire(&self.disabled)?;
        self.recorder.is_open().then_some(ticket)
    }

    // ----- function boundaries -----

    /// A function was entered
    pub fn func_enter(&self, function: Address, caller: Address) {
        let Some(_ticket) = self.enter() else { return };
        let symbol = self.resolver.resolve(function);
        let Some(name) = symbol.frame_name() else {
            return;
        };

        let mut state = self.lock_state();
        if let Push::Pushed(_) = state.stack.push_frame(&name) {
            state.registries.track_function(&name);
            state.emit_named(
                &self.recorder,
                function.non_null(),
                &name,
                EventPayload::FuncEnter { caller },
            );
        }
    }

    /// A function is about to return
    ///
    /// Loops the frame left open are closed first, innermost first, each with
    /// a synthetic `loop_end` at the frame's depth.
    pub fn func_exit(&self, function: Address, _caller: Address) {
        let Some(_ticket) = self.enter() else { return };
        let symbol = self.resolver.resolve(function);
        let Some(name) = symbol.frame_name() else {
            return;
        };

        let mut state = self.lock_state();
        let Some(popped) = state.stack.pop_frame() else {
            return;
        };
        for loop_id in popped.unclosed_loops {
            self.recorder.record(
                None,
                &popped.frame.function_name,
                popped.depth,
                EventPayload::LoopEnd {
                    loop_id,
                    file: Location::unknown().file.to_string(),
                    line: 0,
                },
            );
        }
        self.recorder.record(
            function.non_null(),
            &name,
            popped.depth,
            EventPayload::FuncExit,
        );
    }

    // ----- variables -----

    /// A variable was declared at `address`
    pub fn declare(&self, name: &str, type_name: &str, address: Address, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        state.registries.bind_name(address, name);
        state.emit_named(
            &self.recorder,
            address.non_null(),
            name,
            EventPayload::Declare {
                name: name.to_string(),
                var_type: type_name.to_string(),
                value: None,
                address,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    /// An integer variable was assigned
    pub fn assign(&self, name: &str, value: i64, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        state.registries.set_variable(name, value);
        state.emit_named(
            &self.recorder,
            None,
            name,
            EventPayload::Assign {
                name: name.to_string(),
                value,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    /// A typed value snapshot; string values are cut at 250 bytes
    pub fn var(&self, name: &str, snapshot: VarSnapshot, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let snapshot = match snapshot {
            VarSnapshot::Str(text) => VarSnapshot::Str(truncate_utf8(text, MAX_VAR_STRING_LEN)),
            other => other,
        };
        let var_type = snapshot.var_type();
        let state = self.lock_state();
        state.emit_named(
            &self.recorder,
            None,
            name,
            EventPayload::Var {
                name: name.to_string(),
                value: snapshot.into_value(),
                var_type,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    // ----- arrays -----

    /// An array was created; `dims` uses `<= 0` for unused extents
    pub fn array_create(
        &self,
        name: &str,
        base_type: &str,
        address: Address,
        dims: [i32; 3],
        storage: Storage,
        at: Location<'_>,
    ) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        state.registries.bind_name(address, name);
        state.emit(
            &self.recorder,
            address.non_null(),
            EventPayload::ArrayCreate {
                name: name.to_string(),
                base_type: base_type.to_string(),
                dimensions: used_dimensions(dims),
                is_stack: storage.is_stack(),
                file: at.normalized_file(),
                line: at.line,
            },
        );
        state
            .registries
            .register_array(ArrayInfo::new(name, base_type, address, dims, storage));
    }

    /// One array slot was written; unused indices are `-1`
    pub fn array_index_assign(&self, name: &str, indices: [i32; 3], value: i64, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        state
            .registries
            .set_element(ArrayElementKey::new(name, indices), value);
        state.emit(
            &self.recorder,
            None,
            EventPayload::ArrayIndexAssign {
                name: name.to_string(),
                indices: used_indices(indices),
                value,
                char: None,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    /// A one-dimensional array was initialised from a list of values
    pub fn array_init(&self, name: &str, values: &[i64], at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        let file = at.normalized_file();
        for (i, value) in values.iter().enumerate() {
            let idx = i32::try_from(i).unwrap_or(i32::MAX);
            state.emit(
                &self.recorder,
                None,
                EventPayload::ArrayIndexAssign {
                    name: name.to_string(),
                    indices: vec![idx],
                    value: *value,
                    char: None,
                    file: file.clone(),
                    line: at.line,
                },
            );
            state
                .registries
                .set_element(ArrayElementKey::new(name, [idx, -1, -1]), *value);
        }
    }

    /// A char array was initialised from a string literal
    ///
    /// One slot per byte plus the terminating NUL. Values follow signed
    /// `char` semantics.
    pub fn array_init_string(&self, name: &str, literal: &[u8], at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        let file = at.normalized_file();
        let bytes = literal.iter().copied().chain(std::iter::once(0u8));
        for (i, byte) in bytes.enumerate() {
            let idx = i32::try_from(i).unwrap_or(i32::MAX);
            let value = i64::from(byte as i8);
            state.emit(
                &self.recorder,
                None,
                EventPayload::ArrayIndexAssign {
                    name: name.to_string(),
                    indices: vec![idx],
                    value,
                    char: Some(char::from(byte).to_string()),
                    file: file.clone(),
                    line: at.line,
                },
            );
            state
                .registries
                .set_element(ArrayElementKey::new(name, [idx, -1, -1]), value);
        }
    }

    // ----- pointers -----

    /// Pointer `name` now aliases `target`
    ///
    /// Bound in the current frame, or in the global registry at top level.
    pub fn pointer_alias(
        &self,
        name: &str,
        target: Address,
        decayed_from_array: bool,
        at: Location<'_>,
    ) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        let alias_of = state.registries.name_at(target).to_string();
        state.emit(
            &self.recorder,
            target.non_null(),
            EventPayload::PointerAlias {
                name: name.to_string(),
                alias_of,
                aliased_address: target,
                decayed_from_array,
                file: at.normalized_file(),
                line: at.line,
            },
        );
        if let Some(info) = state.stack.bind_pointer(PointerInfo::alias(name, target)) {
            state.registries.set_global_pointer(info);
        }
    }

    /// Pointer `name` was initialised from a heap allocation; emits nothing
    pub fn pointer_heap_init(&self, name: &str, heap: Address) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        let info = PointerInfo::heap(name, heap);
        state.stack.bind_pointer(info.clone());
        state.registries.set_global_pointer(info);
    }

    /// `*name = value`
    ///
    /// Heap targets additionally produce a `heap_write` event.
    pub fn pointer_deref_write(&self, name: &str, value: i64, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        let (target, is_heap) = state
            .find_pointer(name)
            .map(|info| (info.aliased_address, info.is_heap))
            .unwrap_or((Address::NULL, false));
        let target_name = state.registries.name_at(target).to_string();
        let file = at.normalized_file();

        state.emit(
            &self.recorder,
            target.non_null(),
            EventPayload::PointerDerefWrite {
                pointer_name: name.to_string(),
                value,
                target_name,
                is_heap,
                file: file.clone(),
                line: at.line,
            },
        );
        if is_heap {
            state.emit(
                &self.recorder,
                target.non_null(),
                EventPayload::HeapWrite {
                    address: target,
                    value,
                    file,
                    line: at.line,
                },
            );
        }
    }

    // ----- loops -----

    pub fn loop_start(&self, loop_id: i32, loop_type: &str, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        state.stack.record_loop_start(loop_id);
        state.emit(
            &self.recorder,
            None,
            EventPayload::LoopStart {
                loop_id,
                loop_type: loop_type.to_string(),
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    /// A new iteration begins; reports its 1-based number
    pub fn loop_body_start(&self, loop_id: i32, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        let iteration = state.stack.record_loop_iteration(loop_id);
        state.emit(
            &self.recorder,
            None,
            EventPayload::LoopBodyStart {
                loop_id,
                iteration,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    pub fn loop_iteration_end(&self, loop_id: i32, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        let iteration = state.stack.loop_iteration(loop_id);
        state.emit(
            &self.recorder,
            None,
            EventPayload::LoopIterationEnd {
                loop_id,
                iteration,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    pub fn loop_end(&self, loop_id: i32, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let mut state = self.lock_state();
        state.stack.record_loop_end(loop_id);
        state.emit(
            &self.recorder,
            None,
            EventPayload::LoopEnd {
                loop_id,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    pub fn loop_condition(&self, loop_id: i32, result: i32, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit(
            &self.recorder,
            None,
            EventPayload::LoopCondition {
                loop_id,
                result,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    // ----- control flow -----

    /// `break`, `continue`, `goto` and similar jumps
    pub fn control_flow(&self, control_type: &str, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit(
            &self.recorder,
            None,
            EventPayload::ControlFlow {
                control_type: control_type.to_string(),
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    pub fn condition_eval(&self, condition_id: i32, expression: &str, result: i32, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit(
            &self.recorder,
            None,
            EventPayload::ConditionEval {
                condition_id,
                expression: expression.to_string(),
                result,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    pub fn branch_taken(&self, condition_id: i32, branch_type: &str, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit(
            &self.recorder,
            None,
            EventPayload::BranchTaken {
                condition_id,
                branch_type: branch_type.to_string(),
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    /// A `return` statement; empty destination symbols are omitted
    pub fn return_value(
        &self,
        value: i64,
        return_type: Option<&str>,
        destination: Option<&str>,
        at: Location<'_>,
    ) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit(
            &self.recorder,
            None,
            EventPayload::Return {
                value,
                return_type: return_type.unwrap_or(DEFAULT_RETURN_TYPE).to_string(),
                destination_symbol: destination
                    .filter(|symbol| !symbol.is_empty())
                    .map(str::to_string),
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    pub fn block_enter(&self, block_depth: i32, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit(
            &self.recorder,
            None,
            EventPayload::BlockEnter {
                block_depth,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    pub fn block_exit(&self, block_depth: i32, at: Location<'_>) {
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit(
            &self.recorder,
            None,
            EventPayload::BlockExit {
                block_depth,
                file: at.normalized_file(),
                line: at.line,
            },
        );
    }

    // ----- heap -----

    /// `allocator` returned `size` bytes at `address`
    pub fn heap_alloc(&self, address: Address, size: u64, allocator: &str) {
        if address.is_null() {
            return;
        }
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit_named(
            &self.recorder,
            Some(address),
            allocator,
            EventPayload::HeapAlloc {
                size,
                is_heap: true,
            },
        );
    }

    /// `address` is about to be released by `allocator`
    pub fn heap_free(&self, address: Address, allocator: &str) {
        if address.is_null() {
            return;
        }
        let Some(_ticket) = self.enter() else { return };
        let state = self.lock_state();
        state.emit_named(&self.recorder, Some(address), allocator, EventPayload::HeapFree);
    }

    /// Flush program output and the trace sink; records nothing
    pub fn flush(&self) {
        let Some(_ticket) = self.enter() else { return };
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        self.recorder.flush();
    }
}

/// Cut `text` to at most `max` bytes on a character boundary
fn truncate_utf8(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
