/// Best-effort writes to the host's system log.
///
/// Only used to report missing prerequisite directories at boot, when the
/// service's own log directory may not exist.
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

const SYSLOG_SOCKET: &str = "/dev/log";
/// LOG_USER (1) << 3 | LOG_WARNING (4)
const USER_WARNING_PRIORITY: u8 = 12;

pub trait SystemEventLog: Send + Sync {
    fn write_warning(&self, message: &str) -> std::io::Result<()>;
}

/// Sends RFC 3164 style datagrams to the local syslog socket.
pub struct SyslogEventLog {
    source: String,
    socket_path: PathBuf,
}

impl SyslogEventLog {
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_socket(source, SYSLOG_SOCKET)
    }

    pub fn with_socket(source: impl Into<String>, socket_path: impl AsRef<Path>) -> Self {
        Self {
            source: source.into(),
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    fn format_datagram(&self, message: &str) -> String {
        let message = message.replace(['\r', '\n'], " ");
        format!(
            "<{USER_WARNING_PRIORITY}>{}[{}]: {}",
            self.source,
            std::process::id(),
            message
        )
    }
}

impl SystemEventLog for SyslogEventLog {
    fn write_warning(&self, message: &str) -> std::io::Result<()> {
        let socket = UnixDatagram::unbound()?;
        socket.send_to(self.format_datagram(message).as_bytes(), &self.socket_path)?;
        Ok(())
    }
}
