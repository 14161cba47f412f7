/// Process-wide last-resort fault handling.
///
/// A panic hook writes one exception record for every panic that escapes all
/// other handling. Call sites that must survive engine faults run through
/// [`contain`], which suppresses the hook and hands the description back to
/// the caller instead.
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::app_log::{ActType, ActionLog};
use crate::localization::Phrases;

/// Exit code used when a fault terminates the process from a background thread.
pub const FAULT_EXIT_CODE: u8 = 101;

thread_local! {
    static CONTAINED_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Writes fault records through the service log.
#[derive(Clone)]
pub struct FaultHandler {
    log: Arc<dyn ActionLog>,
    phrases: Phrases,
    /// Exit the process when a thread other than `main` faults.
    exit_on_thread_fault: bool,
}

impl FaultHandler {
    pub fn new(log: Arc<dyn ActionLog>, phrases: Phrases) -> Self {
        Self {
            log,
            phrases,
            exit_on_thread_fault: true,
        }
    }

    /// Keep the process alive after a thread fault so the hook can run in-process.
    #[cfg(test)]
    fn without_exit(mut self) -> Self {
        self.exit_on_thread_fault = false;
        self
    }

    /// Write the fault record and a session-boundary marker.
    pub fn report(&self, description: Option<&str>) {
        self.log.write_action(
            &self.phrases.unhandled_fault(description),
            ActType::Exception,
        );
        self.log.write_break();
    }

    /// Install as the process panic hook. The previous hook still runs afterwards.
    pub fn install(self) {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if is_contained() {
                return;
            }

            let description = panic_message(info.payload()).map(|msg| match info.location() {
                Some(loc) => format!("{msg} at {}:{}", loc.file(), loc.line()),
                None => msg,
            });
            self.report(description.as_deref());
            previous(info);

            let on_main = std::thread::current().name() == Some("main");
            if self.exit_on_thread_fault && !on_main {
                std::process::exit(i32::from(FAULT_EXIT_CODE));
            }
        }));
    }
}

/// Extract the message carried by a panic payload, if any.
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

fn is_contained() -> bool {
    CONTAINED_DEPTH.with(|depth| depth.get() > 0)
}

struct ContainGuard;

impl ContainGuard {
    fn enter() -> Self {
        CONTAINED_DEPTH.with(|depth| depth.set(depth.get() + 1));
        ContainGuard
    }
}

impl Drop for ContainGuard {
    fn drop(&mut self) {
        CONTAINED_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f`, turning a panic into `Err(description)` without triggering the fault hook.
pub fn contain<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    let _guard = ContainGuard::enter();
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        panic_message(payload.as_ref()).unwrap_or_else(|| "unknown panic".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::Language;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLog {
        lines: Mutex<Vec<String>>,
    }

    impl ActionLog for RecordingLog {
        fn write_break(&self) {
            self.lines.lock().unwrap().push("BREAK".to_string());
        }

        fn write_action(&self, text: &str, act: ActType) {
            self.lines.lock().unwrap().push(format!("{act:?}: {text}"));
        }
    }

    #[test]
    fn test_report_writes_one_exception_and_break() {
        let log = Arc::new(RecordingLog::default());
        let handler = FaultHandler::new(log.clone(), Phrases::new(Language::English));

        handler.report(Some("index out of bounds"));

        let lines = log.lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                "Exception: Unhandled exception: index out of bounds".to_string(),
                "BREAK".to_string()
            ]
        );
    }

    #[test]
    fn test_report_without_description() {
        let log = Arc::new(RecordingLog::default());
        let handler = FaultHandler::new(log.clone(), Phrases::new(Language::English));

        handler.report(None);

        assert_eq!(
            log.lines.lock().unwrap()[0],
            "Exception: Unhandled exception"
        );
    }

    #[test]
    fn test_installed_hook_logs_escaped_panic_once() {
        let log = Arc::new(RecordingLog::default());
        FaultHandler::new(log.clone(), Phrases::new(Language::English))
            .without_exit()
            .install();

        let contained = contain::<()>(|| panic!("handled"));
        let escaped = std::thread::spawn(|| panic!("escaped")).join();
        // Restore the default hook for the rest of the test binary
        let _ = panic::take_hook();

        assert_eq!(contained.unwrap_err(), "handled");
        assert!(escaped.is_err());
        let lines = log.lines.lock().unwrap();
        assert_eq!(lines.len(), 2, "{lines:?}");
        assert!(lines[0].starts_with("Exception: Unhandled exception: escaped at "));
        assert!(lines[0].contains("fault.rs:"));
        assert_eq!(lines[1], "BREAK");
    }

    #[test]
    fn test_contain_returns_value() {
        assert_eq!(contain(|| 7), Ok(7));
    }

    #[test]
    fn test_contain_captures_str_and_string_panics() {
        let err = contain::<()>(|| panic!("static message")).unwrap_err();
        assert_eq!(err, "static message");

        let code = 42;
        let err = contain::<()>(|| panic!("formatted {code}")).unwrap_err();
        assert_eq!(err, "formatted 42");
    }

    #[test]
    fn test_contain_resets_depth_after_panic() {
        let _ = contain::<()>(|| panic!("boom"));
        assert!(!is_contained());
    }

    #[test]
    fn test_contain_nests() {
        let outer = contain(|| {
            let inner = contain::<u8>(|| panic!("inner"));
            assert!(is_contained());
            inner.is_err()
        });
        assert_eq!(outer, Ok(true));
        assert!(!is_contained());
    }

    #[test]
    fn test_panic_message_non_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(17u32);
        assert_eq!(panic_message(payload.as_ref()), None);
    }
}
