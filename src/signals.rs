/// Host signal handling.
///
/// SIGINT (Ctrl-C) and SIGTERM are an operator or service-manager stop.
/// SIGHUP means the host session itself is going away and maps to shutdown.
use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Stop,
    Shutdown,
}

impl HostSignal {
    pub fn from_kind(kind: SignalKind) -> Option<Self> {
        if kind == SignalKind::interrupt() || kind == SignalKind::terminate() {
            Some(HostSignal::Stop)
        } else if kind == SignalKind::hangup() {
            Some(HostSignal::Shutdown)
        } else {
            None
        }
    }
}

/// Signal streams registered up front, so nothing delivered during startup is lost.
pub struct HostSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl HostSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next lifecycle signal.
    pub async fn recv(&mut self) -> HostSignal {
        let kind = tokio::select! {
            _ = self.interrupt.recv() => SignalKind::interrupt(),
            _ = self.terminate.recv() => SignalKind::terminate(),
            _ = self.hangup.recv() => SignalKind::hangup(),
        };
        tracing::info!(signal = ?kind, "host signal received");
        HostSignal::from_kind(kind).unwrap_or(HostSignal::Stop)
    }
}
