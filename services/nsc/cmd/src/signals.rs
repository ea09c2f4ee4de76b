//! OS termination signals.

use async_trait::async_trait;
use nsc_client::TerminationSignal;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::info;

/// SIGHUP, SIGINT, SIGTERM and SIGQUIT, all treated as "terminate"
pub struct OsSignals {
    hangup: Signal,
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
}

impl OsSignals {
    /// Install the handlers; must run inside a tokio runtime
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }
}

#[async_trait]
impl TerminationSignal for OsSignals {
    async fn recv(&mut self) {
        let name = tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
        };
        info!("Received {}", name);
    }
}
