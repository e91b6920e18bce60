//! One-shot timers for the state machine
//!
//! Fired timers come back to the main loop as `TimerToken`s. Scheduling a
//! kind invalidates any earlier timer of that kind: its task is aborted and,
//! should it fire anyway, its token no longer matches what the machine holds.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Timer purposes; at most one live timer per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Ends a release countdown by muting
    ReleaseFinalize,
    /// Decrements the countdown display
    CountdownTick,
}

/// Identifies one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub kind: TimerKind,
    generation: u64,
}

pub trait Scheduler {
    fn now(&self) -> Instant;

    /// Schedule `kind` to fire after `after`, replacing any pending one
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerToken;

    fn cancel(&mut self, kind: TimerKind);
}

/// Wall-clock scheduler backed by tokio sleeps
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub struct TokioScheduler {
    fired_tx: mpsc::UnboundedSender<TimerToken>,
    pending: HashMap<TimerKind, JoinHandle<()>>,
    generation: u64,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl TokioScheduler {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerToken>) -> Self {
        Self {
            fired_tx,
            pending: HashMap::new(),
            generation: 0,
        }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerToken {
        self.cancel(kind);
        self.generation += 1;
        let token = TimerToken {
            kind,
            generation: self.generation,
        };

        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = fired_tx.send(token);
        });
        debug!(?kind, ?after, "timer scheduled");
        self.pending.insert(kind, handle);
        token
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.pending.remove(&kind) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
pub use manual::ManualScheduler;
