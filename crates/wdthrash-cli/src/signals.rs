//! Termination signal listeners.
//!
//! Installed before the harness starts so that an early Ctrl-C is not lost.
//! Listeners only report arrival; the caller decides what a signal means.

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct ShutdownSignals {
    sigint: Signal,
    sigterm: Signal,
}

impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next SIGINT or SIGTERM and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        }
    }
}
