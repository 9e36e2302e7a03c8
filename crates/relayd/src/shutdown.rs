//! Shutdown coordination for the relay daemon.
//!
//! Shutdown is modeled as an explicit state machine rather than ad hoc
//! boolean flags: `Running → Draining → Stopped`, where invalid
//! transitions are structural no-ops. Entering `Draining` cancels the
//! shared drain token, which stops the sweep task, the broadcaster, the
//! accept loop, and every connection handler; the server then waits for
//! the captured connection tasks under the close deadline.
//!
//! The coordinator never exits the process itself. It exposes the forced
//! token so the binary can perform the actual `exit(0)`, and so tests can
//! observe every transition without dying.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Mutex poisoning is absorbed via `into_inner`

use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Deadline for the graceful drain: if the captured sessions have not all
/// closed by then, termination is forced.
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Lifecycle of the shutdown process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Normal operation
    Running,

    /// Drain started: no new work accepted, sessions closing
    Draining,

    /// All captured sessions closed, transport stopped
    Stopped,
}

/// Coordinates the one-shot drain of the whole daemon.
///
/// Cheap to share behind an `Arc`; every transition method is idempotent
/// in the sense that repeat calls report `false` and change nothing.
pub struct ShutdownCoordinator {
    /// Current lifecycle state
    state: Mutex<DrainState>,

    /// Cancelled when draining begins; observed by every component
    drain_token: CancellationToken,

    /// Cancelled when termination is forced (deadline expiry or a fault
    /// during an ongoing drain)
    force_token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Creates a coordinator in the `Running` state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DrainState::Running),
            drain_token: CancellationToken::new(),
            force_token: CancellationToken::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> DrainState {
        *self.lock()
    }

    /// Begins draining. Returns whether this call performed the
    /// transition; repeat calls are no-ops.
    pub fn begin_drain(&self) -> bool {
        {
            let mut state = self.lock();
            if *state != DrainState::Running {
                return false;
            }
            *state = DrainState::Draining;
        }

        info!("Shutdown requested, draining sessions");
        self.drain_token.cancel();
        true
    }

    /// Marks the drain complete. Valid only from `Draining`.
    pub fn mark_stopped(&self) -> bool {
        let mut state = self.lock();
        if *state != DrainState::Draining {
            return false;
        }
        *state = DrainState::Stopped;
        info!("All sessions closed, transport stopped");
        true
    }

    /// Forces termination, superseding any graceful path in flight.
    ///
    /// Also cancels the drain token so components that never saw the
    /// graceful request still stop.
    pub fn force(&self) {
        warn!("Forcing termination");
        self.drain_token.cancel();
        self.force_token.cancel();
    }

    /// Reports an unhandled runtime fault.
    ///
    /// If the daemon is still running this begins a graceful drain; if a
    /// drain is already in flight the fault escalates to forced
    /// termination rather than waiting a second time.
    pub fn on_fault(&self) {
        if !self.begin_drain() {
            self.force();
        }
    }

    /// Whether draining has begun (including forced/stopped).
    pub fn is_draining(&self) -> bool {
        self.drain_token.is_cancelled()
    }

    /// Whether termination was forced.
    pub fn is_forced(&self) -> bool {
        self.force_token.is_cancelled()
    }

    /// Token cancelled when draining begins.
    pub fn drain_token(&self) -> CancellationToken {
        self.drain_token.clone()
    }

    /// Token cancelled when termination is forced.
    pub fn force_token(&self) -> CancellationToken {
        self.force_token.clone()
    }

    /// Locks the state, absorbing poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, DrainState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
