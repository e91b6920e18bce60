//! Signal handling for graceful shutdown

use std::fmt;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Which signal asked us to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Terminate,
    Interrupt,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Terminate => write!(f, "SIGTERM"),
            StopReason::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handles shutdown signals (SIGTERM, SIGINT).
///
/// Handlers are installed on construction so a signal that arrives while
/// the daemon is still starting up is not lost.
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignal {
    /// Install the signal handlers; must be called inside the runtime
    pub fn install() -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?,
        })
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) -> StopReason {
        tokio::select! {
            _ = self.sigterm.recv() => StopReason::Terminate,
            _ = self.sigint.recv() => StopReason::Interrupt,
        }
    }
}
