use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Exclusive lock that keeps a second service process from running against
/// the same directories. Released when dropped.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock, writing our pid into the file.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        file.try_lock_exclusive().map_err(|e| LockError::from_lock_attempt(path, e))?;

        let pid_written = file
            .set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()));
        if let Err(e) = pid_written {
            tracing::warn!(error = %e, path = %path.display(), "failed to record pid in lock file");
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Debug)]
pub enum LockError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Another process holds the lock.
    Held { path: PathBuf },
}

impl LockError {
    /// Only contention means another holder; anything else is an I/O failure.
    fn from_lock_attempt(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::WouldBlock {
            LockError::Held {
                path: path.to_path_buf(),
            }
        } else {
            LockError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Io { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
            LockError::Held { path } => write!(
                f,
                "another service instance holds {}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Io { source, .. } => Some(source),
            LockError::Held { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("svc.lock");

        let lock = InstanceLock::acquire(&path).unwrap();

        assert_eq!(lock.path(), path);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("svc.lock");

        let _first = InstanceLock::acquire(&path).unwrap();
        let err = InstanceLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));
        assert!(err.to_string().contains("another service instance"));
    }

    #[test]
    fn test_lock_failure_other_than_contention_is_io() {
        let path = Path::new("/tmp/svc.lock");
        let contended = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert!(matches!(
            LockError::from_lock_attempt(path, contended),
            LockError::Held { .. }
        ));

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = LockError::from_lock_attempt(path, denied);
        assert!(matches!(err, LockError::Io { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("svc.lock");

        drop(InstanceLock::acquire(&path).unwrap());
        assert!(InstanceLock::acquire(&path).is_ok());
    }
}
