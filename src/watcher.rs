/// Stop-file watcher.
///
/// Runs on its own thread, polling for the sentinel marker. When the marker
/// appears it fires the stop callback once and exits. The wait between polls
/// is a cancellable `recv_timeout`, so the owner can end the thread at any time.
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// How a watcher thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The marker was found and the stop callback ran.
    Detected,
    Cancelled,
}

/// Handle to a running watcher thread.
pub struct StopSignalWatcher {
    handle: JoinHandle<WatchOutcome>,
    cancel: mpsc::Sender<()>,
}

impl StopSignalWatcher {
    /// Start polling `stop_file` every `interval`; `on_detect` runs on the watcher thread.
    pub fn spawn<F>(stop_file: PathBuf, interval: Duration, on_detect: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel, cancel_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("stop-file-watcher".to_string())
            .spawn(move || watch(&stop_file, interval, &cancel_rx, on_detect))?;
        Ok(Self { handle, cancel })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the thread to stop and wait for it. Returns `None` if the thread panicked.
    pub fn cancel(self) -> Option<WatchOutcome> {
        let _ = self.cancel.send(());
        match self.handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::warn!("stop-file watcher thread panicked");
                None
            }
        }
    }
}

fn watch<F>(
    stop_file: &Path,
    interval: Duration,
    cancel: &mpsc::Receiver<()>,
    on_detect: F,
) -> WatchOutcome
where
    F: FnOnce(),
{
    tracing::debug!(path = %stop_file.display(), interval_ms = interval.as_millis() as u64, "stop-file watcher started");
    loop {
        if stop_file.exists() {
            // A cancellation that raced with detection wins.
            if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
                return WatchOutcome::Cancelled;
            }
            tracing::info!(path = %stop_file.display(), "stop file detected");
            on_detect();
            return WatchOutcome::Detected;
        }
        match cancel.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!("stop-file watcher cancelled");
                return WatchOutcome::Cancelled;
            }
        }
    }
}

/// Create the sentinel marker so a running service stops itself.
pub fn request_stop(stop_file: &Path) -> io::Result<()> {
    if let Some(parent) = stop_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(stop_file, b"")
}

/// Remove the sentinel marker. Returns whether a marker was removed.
pub fn clear_stop_request(stop_file: &Path) -> io::Result<bool> {
    match std::fs::remove_file(stop_file) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
