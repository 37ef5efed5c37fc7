//! Phase Barrier
//!
//! Reusable rendezvous for a fixed or shrinking set of participants.
//! - a post-phase action runs exactly once per phase, on the last arriver
//! - participants may deregister, which can itself complete a phase
//! - a faulted participant breaks the barrier so nobody waits forever

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};

use crate::error::{TaskError, TaskResult, catch_task};
use crate::lock;

type PhaseAction<'a> = Box<dyn FnMut(u64) + Send + 'a>;

struct BarrierState<'a> {
    participants: usize,
    arrived: usize,
    phase: u64,
    broken: bool,
    action: Option<PhaseAction<'a>>,
}

impl BarrierState<'_> {
    /// Run the action and open the next phase; caller holds the lock
    fn finish_phase(&mut self) -> TaskResult<u64> {
        let finished = self.phase;
        if let Some(action) = self.action.as_mut() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action(finished))) {
                self.broken = true;
                return Err(TaskError::from_panic(payload));
            }
        }
        self.arrived = 0;
        self.phase += 1;
        tracing::trace!("Barrier phase {} complete", finished);
        Ok(finished)
    }
}

/// A reusable barrier with a post-phase action
pub struct PhaseBarrier<'a> {
    state: Mutex<BarrierState<'a>>,
    condvar: Condvar,
}

impl std::fmt::Debug for PhaseBarrier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PhaseBarrier")
            .field("participants", &state.participants)
            .field("arrived", &state.arrived)
            .field("phase", &state.phase)
            .field("broken", &state.broken)
            .finish()
    }
}

impl<'a> PhaseBarrier<'a> {
    /// Create a new barrier for n participants
    pub fn new(participants: usize) -> Self {
        Self::build(participants, None)
    }

    /// Barrier running `action(phase)` once each time a phase completes
    pub fn with_action<F>(participants: usize, action: F) -> Self
    where
        F: FnMut(u64) + Send + 'a,
    {
        Self::build(participants, Some(Box::new(action)))
    }

    fn build(participants: usize, action: Option<PhaseAction<'a>>) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                participants,
                arrived: 0,
                phase: 0,
                broken: false,
                action,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Arrive and block until every participant arrived.
    ///
    /// Returns the phase number that completed. The last arriver runs the
    /// post-phase action before anyone is released; if it panics the
    /// barrier breaks, the last arriver gets the panic and the rest get
    /// `BarrierBroken`.
    pub fn signal_and_wait(&self) -> TaskResult<u64> {
        let mut state = lock(&self.state);
        if state.broken {
            return Err(TaskError::BarrierBroken);
        }

        state.arrived += 1;
        if state.arrived >= state.participants {
            let outcome = state.finish_phase();
            self.condvar.notify_all();
            return outcome;
        }

        let phase = state.phase;
        while state.phase == phase && !state.broken {
            state = match self.condvar.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }

        if state.phase != phase {
            Ok(phase)
        } else {
            Err(TaskError::BarrierBroken)
        }
    }

    /// Deregister the caller. If everyone left is already waiting, the
    /// current phase completes here.
    pub fn remove_participant(&self) -> TaskResult<()> {
        let mut state = lock(&self.state);
        state.participants = state.participants.saturating_sub(1);

        if !state.broken && state.participants > 0 && state.arrived >= state.participants {
            let outcome = state.finish_phase();
            self.condvar.notify_all();
            return outcome.map(|_| ());
        }
        Ok(())
    }

    /// Break the barrier, releasing every waiter with `BarrierBroken`
    pub fn abort(&self) {
        let mut state = lock(&self.state);
        if !state.broken {
            tracing::debug!("Barrier broken during phase {}", state.phase);
        }
        state.broken = true;
        self.condvar.notify_all();
    }

    /// Run a participant body; any fault or panic breaks the barrier
    pub fn guard<R, F>(&self, f: F) -> TaskResult<R>
    where
        F: FnOnce() -> TaskResult<R>,
    {
        let outcome = catch_task(f);
        if outcome.is_err() {
            self.abort();
        }
        outcome
    }

    /// Current participant count
    pub fn participants(&self) -> usize {
        lock(&self.state).participants
    }

    /// Index of the phase currently in progress
    pub fn phase(&self) -> u64 {
        lock(&self.state).phase
    }

    /// Whether a participant broke the barrier
    pub fn is_broken(&self) -> bool {
        lock(&self.state).broken
    }
}
