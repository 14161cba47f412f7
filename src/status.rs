/// Status file: writes the service state as JSON on every transition.
///
/// Uses atomic write pattern: write to temp file then rename.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::controller::ServiceState;

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: ServiceState,
    /// Sessions that reached `running` since the process started.
    pub sessions: u64,
    pub running_since: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".svc.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Remove the status file (on clean exit).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Folds state transitions into [`StatusData`] and writes it out.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    sessions: u64,
    running_since: Option<DateTime<Utc>>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            sessions: 0,
            running_since: None,
        }
    }

    /// Record a transition and write the status file. Failures are logged, not returned.
    pub fn update(&mut self, state: ServiceState) {
        match state {
            ServiceState::Running => {
                self.sessions += 1;
                self.running_since = Some(Utc::now());
            }
            ServiceState::Idle => self.running_since = None,
            ServiceState::Starting | ServiceState::Stopping => {}
        }

        let data = StatusData {
            pid: self.pid,
            state,
            sessions: self.sessions,
            running_since: self.running_since,
            last_update: Utc::now(),
        };
        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
