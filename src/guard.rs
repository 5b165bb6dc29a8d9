//! Reentrancy protection for notification handlers
//!
//! Every handler runs inside the same instrumentation funnel it observes:
//! formatting a record allocates, locking a mutex may call instrumented code,
//! and symbol lookup walks into libc. Each of those can fire another
//! notification on the same thread before the first one has returned.
//!
//! Two layers keep this safe:
//!
//! 1. A process-wide *disabled* flag owned by the session. Nothing is recorded
//!    before the sink is open or after shutdown has begun.
//! 2. A thread-local *inside* flag. A thread that already holds a
//!    [`ReentrancyTicket`] is denied a second one, so nested notifications are
//!    dropped instead of recursing.
//!
//! The ticket is an RAII value: dropping it clears the thread-local flag, so
//! every exit path of a handler (early return, absent sink, normal return)
//! releases it.
//!
//! ```text
//! notification ──► ReentrancyTicket::acquire ──► None  → return (dropped)
//!                                           └──► Some  → mutate state, record
//!                                                         ticket dropped → flag cleared
//! ```
//!
//! The flag is per thread and does not serialize distinct threads against
//! each other; that is the job of the session's state lock.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

thread_local! {
    static INSIDE_TRACER: Cell<bool> = const { Cell::new(false) };
}

/// Permission for the current thread to run one notification handler
#[derive(Debug)]
pub struct ReentrancyTicket {
    // Tickets are tied to the thread that set the flag.
    _not_send: PhantomData<*const ()>,
}

impl ReentrancyTicket {
    /// Try to enter the engine on this thread
    ///
    /// Returns `None` when `disabled` is set or when the thread is already
    /// inside a handler. During thread teardown (thread-local storage already
    /// destroyed) entry is denied as well.
    pub fn acquire(disabled: &AtomicBool) -> Option<Self> {
        if disabled.load(Ordering::Acquire) {
            return None;
        }
        let granted = INSIDE_TRACER
            .try_with(|inside| {
                if inside.get() {
                    false
                } else {
                    inside.set(true);
                    true
                }
            })
            .unwrap_or(false);

        granted.then_some(Self {
            _not_send: PhantomData,
        })
    }

    /// Mark this thread as inside the engine regardless of the disabled flag
    ///
    /// Used around read-only queries that hold the state lock while running
    /// caller code, so allocations made there are not reported back into the
    /// same lock. `None` when the thread is already inside.
    pub fn hold() -> Option<Self> {
        Self::acquire(&AtomicBool::new(false))
    }
}

impl Drop for ReentrancyTicket {
    fn drop(&mut self) {
        let _ = INSIDE_TRACER.try_with(|inside| inside.set(false));
    }
}

/// Whether the current thread is currently inside a handler
pub fn is_inside_tracer() -> bool {
    INSIDE_TRACER.try_with(Cell::get).unwrap_or(true)
}
