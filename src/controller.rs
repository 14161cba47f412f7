//! Service lifecycle controller.
//!
//! # State machine
//! ```text
//! Idle ──on_start──▶ Starting ──engine up──▶ Running ──stop──▶ Stopping ──▶ Idle
//!                        │
//!                        └── dirs missing / engine failed ──▶ Idle (inert)
//! ```
//!
//! Two callers can stop a running session: the host thread (`on_stop`,
//! `on_shutdown`) and the stop-file watcher thread. Whoever takes the
//! `Running -> Stopping` edge under the session lock runs the engine-stop
//! sequence; everyone else either waits for `Idle` (host callers) or returns
//! immediately (the watcher, which the stopping host may be joining).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::thread::ThreadId;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::app_dirs::DirCheck;
use crate::app_log::{ActType, ActionLog};
use crate::engine::Engine;
use crate::event_log::SystemEventLog;
use crate::fault;
use crate::localization::{Localization, Phrases, ENGINE_DICTIONARY_BUNDLE};
use crate::watcher::{self, StopSignalWatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Collaborators and settings the controller is built from.
pub struct ControllerParts {
    pub engine: Arc<dyn Engine>,
    pub localization: Arc<dyn Localization>,
    pub event_log: Arc<dyn SystemEventLog>,
    pub phrases: Phrases,
    pub stop_file: PathBuf,
    pub poll_interval: Duration,
}

struct Session {
    state: ServiceState,
    engine_started: bool,
    watcher: Option<StopSignalWatcher>,
    /// Kept until the session is back to `Idle`, after the handle itself is taken.
    watcher_thread: Option<ThreadId>,
}

pub struct ServiceController {
    engine: Arc<dyn Engine>,
    log: Arc<dyn ActionLog>,
    localization: Arc<dyn Localization>,
    event_log: Arc<dyn SystemEventLog>,
    phrases: Phrases,
    stop_file: PathBuf,
    poll_interval: Duration,
    session: Mutex<Session>,
    idle: Condvar,
    sessions_started: AtomicU64,
    state_tx: watch::Sender<ServiceState>,
    /// Count of stops whose records are fully written.
    ended_tx: watch::Sender<u64>,
}

impl ServiceController {
    pub fn new(parts: ControllerParts) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ServiceState::Idle);
        let (ended_tx, _) = watch::channel(0);
        Arc::new(Self {
            log: parts.engine.app_log(),
            engine: parts.engine,
            localization: parts.localization,
            event_log: parts.event_log,
            phrases: parts.phrases,
            stop_file: parts.stop_file,
            poll_interval: parts.poll_interval,
            session: Mutex::new(Session {
                state: ServiceState::Idle,
                engine_started: false,
                watcher: None,
                watcher_thread: None,
            }),
            idle: Condvar::new(),
            sessions_started: AtomicU64::new(0),
            state_tx,
            ended_tx,
        })
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    /// Ticks once per stopped session, after its stop record and break are logged.
    pub fn subscribe_session_end(&self) -> watch::Receiver<u64> {
        self.ended_tx.subscribe()
    }

    pub fn state(&self) -> ServiceState {
        self.lock_session().state
    }

    #[cfg(test)]
    pub fn engine_started(&self) -> bool {
        self.lock_session().engine_started
    }

    /// Whether a stop-file watcher thread is still polling.
    pub fn watcher_active(&self) -> bool {
        self.lock_session()
            .watcher
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Sessions that reached `Running` over the controller's lifetime.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::SeqCst)
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, session: &mut Session, state: ServiceState) {
        session.state = state;
        self.state_tx.send_replace(state);
        tracing::debug!(?state, "service state changed");
    }

    /// Start a session: check directories, start the engine, then the watcher.
    pub fn on_start(self: &Arc<Self>, args: &[String]) {
        {
            let mut session = self.lock_session();
            if session.state != ServiceState::Idle {
                tracing::warn!(state = ?session.state, "start requested while not idle, ignoring");
                return;
            }
            self.set_state(&mut session, ServiceState::Starting);
        }
        tracing::debug!(?args, "service starting");

        let check = match fault::contain(|| self.engine.dirs().check()) {
            Ok(check) => check,
            Err(desc) => {
                self.log.write_action(
                    &self.phrases.contained_fault("directory check", &desc),
                    ActType::Exception,
                );
                self.return_to_idle();
                return;
            }
        };

        if check.log_dir_exists {
            self.log.write_break();
            self.log.write_action(self.phrases.started(), ActType::Action);
        }

        if !check.all_exist() {
            self.report_missing_dirs(&check);
            self.return_to_idle();
            return;
        }

        if self.stop_file.exists() {
            tracing::warn!(
                path = %self.stop_file.display(),
                "stop file already present, the session will stop on the first poll"
            );
        }

        self.load_dictionaries();

        let started = match fault::contain(|| self.engine.start()) {
            Ok(started) => started,
            Err(desc) => {
                self.log.write_action(
                    &self.phrases.contained_fault("engine start", &desc),
                    ActType::Exception,
                );
                false
            }
        };

        if started {
            self.enter_running();
        } else {
            self.log.write_action(self.phrases.execution_impossible(), ActType::Error);
            self.return_to_idle();
        }
    }

    /// Stop the session and log that the service was stopped.
    pub fn on_stop(&self) {
        let stopped = self.stop_work();
        self.log.write_action(self.phrases.stopped(), ActType::Action);
        self.log.write_break();
        self.end_session(stopped);
    }

    /// Stop the session because the host itself is going down.
    pub fn on_shutdown(&self) {
        let stopped = self.stop_work();
        self.log.write_action(self.phrases.shutdown(), ActType::Action);
        self.log.write_break();
        self.end_session(stopped);
    }

    fn end_session(&self, stopped: bool) {
        if stopped {
            self.ended_tx.send_modify(|ended| *ended += 1);
        }
    }

    fn report_missing_dirs(&self, check: &DirCheck) {
        let msg = self.phrases.missing_dirs(&check.missing);

        if let Err(e) = self.event_log.write_warning(&msg) {
            tracing::debug!(error = %e, "system event log unavailable");
        }

        if check.log_dir_exists {
            self.log.write_action(&msg, ActType::Error);
        } else {
            tracing::error!("{msg}");
        }
    }

    fn load_dictionaries(&self) {
        if self.localization.language().is_builtin() {
            return;
        }
        let lang_dir = self.engine.dirs().lang_dir().to_path_buf();
        let result = fault::contain(|| {
            self.localization
                .load_dictionaries(&lang_dir, ENGINE_DICTIONARY_BUNDLE)
        });
        match result {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => self.log.write_action(&msg, ActType::Error),
            Err(desc) => self.log.write_action(
                &self.phrases.contained_fault("dictionary loading", &desc),
                ActType::Exception,
            ),
        }
    }

    fn enter_running(self: &Arc<Self>) {
        // Spawned under the lock so the watcher can never see `Starting`.
        let mut session = self.lock_session();
        session.engine_started = true;
        self.sessions_started.fetch_add(1, Ordering::SeqCst);

        let controller = Arc::downgrade(self);
        let spawned = StopSignalWatcher::spawn(self.stop_file.clone(), self.poll_interval, move || {
            if let Some(controller) = controller.upgrade() {
                controller.on_stop();
            }
        });
        match spawned {
            Ok(watcher) => {
                session.watcher_thread = Some(watcher.thread_id());
                session.watcher = Some(watcher);
            }
            Err(e) => self.log.write_action(
                &format!("Failed to start the stop file watcher: {e}"),
                ActType::Error,
            ),
        }
        self.set_state(&mut session, ServiceState::Running);
    }

    fn return_to_idle(&self) {
        let mut session = self.lock_session();
        session.engine_started = false;
        self.set_state(&mut session, ServiceState::Idle);
        self.idle.notify_all();
    }

    /// Shared stop routine. Returns whether this call stopped the engine.
    fn stop_work(&self) -> bool {
        let current = thread::current().id();
        let mut session = self.lock_session();
        loop {
            match session.state {
                ServiceState::Running => break,
                ServiceState::Stopping if session.watcher_thread == Some(current) => return false,
                ServiceState::Stopping => {
                    session = self
                        .idle
                        .wait(session)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                ServiceState::Idle | ServiceState::Starting => return false,
            }
        }
        self.set_state(&mut session, ServiceState::Stopping);
        let watcher = session.watcher.take();
        drop(session);

        // When the watcher itself is stopping, dropping its handle detaches it.
        if let Some(watcher) = watcher {
            if watcher.thread_id() != current {
                watcher.cancel();
            }
        }

        if let Err(desc) = fault::contain(|| self.engine.stop()) {
            self.log.write_action(
                &self.phrases.contained_fault("engine stop", &desc),
                ActType::Exception,
            );
        }

        match watcher::clear_stop_request(&self.stop_file) {
            Ok(true) => tracing::info!(path = %self.stop_file.display(), "stop file removed"),
            Ok(false) => {}
            Err(e) => self.log.write_action(
                &format!(
                    "Failed to delete stop file {}: {e}",
                    self.stop_file.display()
                ),
                ActType::Error,
            ),
        }

        let mut session = self.lock_session();
        session.engine_started = false;
        session.watcher_thread = None;
        self.set_state(&mut session, ServiceState::Idle);
        self.idle.notify_all();
        true
    }
}
