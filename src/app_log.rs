/// Operator-facing action log: timestamped text records in the log directory.
///
/// Every record is also mirrored to `tracing` so console runs show the same events.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const BREAK_LINE_LEN: usize = 80;

/// Category of an action record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActType {
    Information,
    Action,
    Error,
    Exception,
}

impl ActType {
    fn tag(self) -> &'static str {
        match self {
            ActType::Information => "<INF>",
            ActType::Action => "<ACT>",
            ActType::Error => "<ERR>",
            ActType::Exception => "<EXC>",
        }
    }
}

/// Sink for session-boundary markers and action records.
pub trait ActionLog: Send + Sync {
    /// Write a session-boundary marker.
    fn write_break(&self);

    fn write_action(&self, text: &str, act: ActType);
}

/// Append-only log file with a single `.bak` rollover.
pub struct FileLog {
    path: PathBuf,
    max_bytes: u64,
    write_lock: Mutex<()>,
}

impl FileLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    fn append_line(&self, line: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Ok(meta) = std::fs::metadata(&self.path) {
            if meta.len() >= self.max_bytes {
                if let Err(e) = std::fs::rename(&self.path, self.backup_path()) {
                    tracing::warn!(error = %e, path = %self.path.display(), "failed to roll over log file");
                }
            }
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to write log file");
        }
    }
}

impl ActionLog for FileLog {
    fn write_break(&self) {
        self.append_line(&"-".repeat(BREAK_LINE_LEN));
    }

    fn write_action(&self, text: &str, act: ActType) {
        match act {
            ActType::Information | ActType::Action => tracing::info!("{text}"),
            ActType::Error => tracing::error!("{text}"),
            ActType::Exception => tracing::error!(exception = true, "{text}"),
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.append_line(&format!("{timestamp} {} {text}", act.tag()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_action_format() {
        let tmp = tempfile::tempdir().unwrap();
        let log = FileLog::new(tmp.path().join("svc.log"), 1024 * 1024);

        log.write_action("ScadaServerService is started", ActType::Action);
        log.write_action("disk is full", ActType::Error);

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("<ACT> ScadaServerService is started"));
        assert!(lines[1].ends_with("<ERR> disk is full"));
        // "YYYY-MM-DD HH:MM:SS " prefix
        assert_eq!(lines[0].as_bytes()[4], b'-');
        assert_eq!(lines[0].as_bytes()[19], b' ');
    }

    #[test]
    fn test_write_break_is_dash_line() {
        let tmp = tempfile::tempdir().unwrap();
        let log = FileLog::new(tmp.path().join("svc.log"), 1024 * 1024);

        log.write_break();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, format!("{}\n", "-".repeat(80)));
    }

    #[test]
    fn test_rollover_when_max_bytes_reached() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("svc.log");
        let log = FileLog::new(&path, 100);

        std::fs::write(&path, "x".repeat(150)).unwrap();
        log.write_action("after rollover", ActType::Information);

        let backup = tmp.path().join("svc.log.bak");
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "x".repeat(150));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("<INF> after rollover"));
        assert!(!contents.contains("xxx"));
    }

    #[test]
    fn test_missing_log_dir_does_not_panic() {
        let log = FileLog::new("/nonexistent-dir/impossible/svc.log", 1024);
        log.write_break();
        log.write_action("dropped", ActType::Exception);
    }

    #[test]
    fn test_act_type_tags() {
        assert_eq!(ActType::Information.tag(), "<INF>");
        assert_eq!(ActType::Action.tag(), "<ACT>");
        assert_eq!(ActType::Error.tag(), "<ERR>");
        assert_eq!(ActType::Exception.tag(), "<EXC>");
    }
}
