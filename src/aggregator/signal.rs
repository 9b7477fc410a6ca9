// Single-set completion latch.

use std::time::Duration;
use tokio::sync::watch;

/// Latch state. Transitions only ever go forward:
/// `Pending -> Satisfied`, `Pending -> Released`, `Released -> Satisfied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Pending,
    /// The phase's result set reached its expected cardinality.
    Satisfied,
    /// Waiters were let go by the orchestrator without completion.
    Released,
}

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    Released,
    TimedOut,
}

/// Completion signal for one phase: set once, many waiters, never reset.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<SignalState>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SignalState::Pending);
        Self { tx }
    }

    pub fn state(&self) -> SignalState {
        *self.tx.borrow()
    }

    pub fn is_satisfied(&self) -> bool {
        self.state() == SignalState::Satisfied
    }

    /// Mark the phase complete. Returns true only for the call that flipped it.
    pub fn satisfy(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == SignalState::Satisfied {
                false
            } else {
                *state = SignalState::Satisfied;
                true
            }
        })
    }

    /// Let waiters go without completing. No effect once satisfied or released.
    pub fn release(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == SignalState::Pending {
                *state = SignalState::Released;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the signal leaves `Pending`.
    pub async fn wait(&self) -> SignalState {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we borrow it.
        let state = match rx.wait_for(|state| *state != SignalState::Pending).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Wait with an upper bound.
    pub async fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(SignalState::Satisfied) => WaitOutcome::Satisfied,
            Ok(_) => WaitOutcome::Released,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}
