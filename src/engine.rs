/// The supervised core engine.
///
/// The controller only needs to start and stop it, ask where its directories
/// are, and share its log. [`ProcessEngine`] runs the engine as a child
/// process in its own process group so that a stop reaches every helper it spawned.
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::app_dirs::AppDirs;
use crate::app_log::{ActType, ActionLog};
use crate::config::EngineConfig;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait Engine: Send + Sync {
    /// Bring the engine to a running state. `false` is a non-fatal failure the
    /// engine has already reported through its own log.
    fn start(&self) -> bool;

    /// Stop the engine. Calling it when the engine is not running does nothing.
    fn stop(&self);

    fn dirs(&self) -> &AppDirs;

    fn app_log(&self) -> Arc<dyn ActionLog>;
}

pub struct ProcessEngine {
    config: EngineConfig,
    dirs: AppDirs,
    log: Arc<dyn ActionLog>,
    child: Mutex<Option<Child>>,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig, dirs: AppDirs, log: Arc<dyn ActionLog>) -> Self {
        Self {
            config,
            dirs,
            log,
            child: Mutex::new(None),
        }
    }

    /// Build the command arguments, replacing directory placeholders.
    fn build_args(&self) -> Vec<String> {
        let replacements = [
            ("{config_dir}", self.dirs.config_dir()),
            ("{lang_dir}", self.dirs.lang_dir()),
            ("{log_dir}", self.dirs.log_dir()),
            ("{mod_dir}", self.dirs.mod_dir()),
        ];
        self.config
            .args
            .iter()
            .map(|arg| {
                replacements
                    .iter()
                    .fold(arg.clone(), |acc, (placeholder, dir)| {
                        acc.replace(placeholder, &dir.to_string_lossy())
                    })
            })
            .collect()
    }

    /// Poll `child` until it exits or `timeout` passes.
    fn wait_for_exit(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn signal_group(pid: u32, signal: Signal) {
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = killpg(Pid::from_raw(raw), signal) {
            // ESRCH: the group is already gone
            tracing::debug!(pid, ?signal, error = %e, "failed to signal engine process group");
        }
    }

    /// Whether an engine process is currently held.
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(child.as_mut().map(|c| c.try_wait()), Some(Ok(None)))
    }
}

impl Engine for ProcessEngine {
    fn start(&self) -> bool {
        let mut slot = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(child) = slot.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return true;
            }
            *slot = None;
        }

        let args = self.build_args();
        tracing::info!(command = %self.config.command, args = ?args, "spawning core engine");

        let mut child = match Command::new(&self.config.command)
            .args(&args)
            .current_dir(self.dirs.base())
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.log.write_action(
                    &format!("Failed to start engine {}: {e}", self.config.command),
                    ActType::Error,
                );
                return false;
            }
        };

        let pid = child.id();
        let grace = Duration::from_millis(self.config.startup_grace_ms);
        match Self::wait_for_exit(&mut child, grace) {
            Ok(None) => {
                self.log
                    .write_action(&format!("Engine started, pid {pid}"), ActType::Information);
                *slot = Some(child);
                true
            }
            Ok(Some(status)) => {
                self.log.write_action(
                    &format!("Engine exited during startup ({status})"),
                    ActType::Error,
                );
                false
            }
            Err(e) => {
                self.log.write_action(
                    &format!("Failed to query engine process {pid}: {e}"),
                    ActType::Error,
                );
                Self::signal_group(pid, Signal::SIGKILL);
                let _ = child.wait();
                false
            }
        }
    }

    fn stop(&self) {
        let Some(mut child) = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let pid = child.id();
        Self::signal_group(pid, Signal::SIGTERM);

        let timeout = Duration::from_secs(self.config.stop_timeout_secs);
        let status = match Self::wait_for_exit(&mut child, timeout) {
            Ok(Some(status)) => Some(status),
            Ok(None) | Err(_) => {
                self.log.write_action(
                    &format!(
                        "Engine did not stop within {} s, killing it",
                        self.config.stop_timeout_secs
                    ),
                    ActType::Error,
                );
                Self::signal_group(pid, Signal::SIGKILL);
                child.wait().ok()
            }
        };
        match status {
            Some(status) => self
                .log
                .write_action(&format!("Engine stopped ({status})"), ActType::Information),
            None => tracing::warn!(pid, "engine exit status unavailable"),
        }
    }

    fn dirs(&self) -> &AppDirs {
        &self.dirs
    }

    fn app_log(&self) -> Arc<dyn ActionLog> {
        self.log.clone()
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingLog {
        lines: Mutex<Vec<(ActType, String)>>,
    }

    impl ActionLog for RecordingLog {
        fn write_break(&self) {}

        fn write_action(&self, text: &str, act: ActType) {
            self.lines.lock().unwrap().push((act, text.to_string()));
        }
    }

    fn engine(
        command: &str,
        args: &[&str],
        log: Arc<RecordingLog>,
    ) -> (ProcessEngine, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            startup_grace_ms: 200,
            stop_timeout_secs: 5,
        };
        let engine = ProcessEngine::new(config, AppDirs::new(tmp.path()), log);
        (engine, tmp)
    }

    #[test]
    fn test_build_args_replaces_dir_placeholders() {
        let log = Arc::new(RecordingLog::default());
        let (engine, tmp) = engine(
            "engine",
            &["--config", "{config_dir}", "{log_dir}/x", "plain"],
            log,
        );
        let args = engine.build_args();
        assert_eq!(args[0], "--config");
        assert_eq!(args[1], tmp.path().join("Config").to_string_lossy());
        assert_eq!(args[2], format!("{}/x", tmp.path().join("Log").display()));
        assert_eq!(args[3], "plain");
    }

    #[test]
    fn test_start_and_stop_long_running_engine() {
        let log = Arc::new(RecordingLog::default());
        let (engine, _tmp) = engine("sleep", &["30"], log.clone());

        assert!(engine.start());
        assert!(engine.is_running());
        // Starting again while running is a no-op success
        assert!(engine.start());

        let begin = Instant::now();
        engine.stop();
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert!(!engine.is_running());
        let lines = log.lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|(act, _)| *act == ActType::Information));
        assert!(lines[0].1.starts_with("Engine started, pid"));
        assert!(lines[1].1.starts_with("Engine stopped"));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let log = Arc::new(RecordingLog::default());
        let (engine, _tmp) = engine("sleep", &["30"], log);

        engine.stop();
        assert!(engine.start());
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_start_fails_when_engine_exits_immediately() {
        let log = Arc::new(RecordingLog::default());
        let (engine, _tmp) = engine("sh", &["-c", "exit 3"], log.clone());

        assert!(!engine.start());
        assert!(!engine.is_running());
        let lines = log.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, ActType::Error);
        assert!(lines[0].1.contains("exited during startup"));
    }

    #[test]
    fn test_start_fails_for_missing_binary() {
        let log = Arc::new(RecordingLog::default());
        let (engine, _tmp) = engine("nonexistent-binary-xyz", &[], log.clone());

        assert!(!engine.start());
        let lines = log.lines.lock().unwrap();
        assert!(lines[0].1.contains("Failed to start engine nonexistent-binary-xyz"));
    }

    #[test]
    fn test_stop_kills_engine_ignoring_sigterm() {
        let log = Arc::new(RecordingLog::default());
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "trap '' TERM; while true; do sleep 0.05; done".to_string(),
            ],
            startup_grace_ms: 200,
            stop_timeout_secs: 1,
        };
        let engine = ProcessEngine::new(config, AppDirs::new(tmp.path()), log.clone());

        assert!(engine.start());
        engine.stop();
        assert!(!engine.is_running());
        let lines = log.lines.lock().unwrap();
        assert!(lines.iter().any(|(_, text)| text.contains("killing it")));
    }
}
