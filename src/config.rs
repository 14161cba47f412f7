use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::localization::Language;

/// Top-level configuration loaded from ScadaServerSvc.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub dirs: DirsConfig,
    pub watcher: WatcherConfig,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Source name used for the system event log.
    pub name: String,
    pub language: Language,
    /// Single-instance lock, relative to `dirs.base`.
    pub lock_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirsConfig {
    pub base: PathBuf,
    pub config: PathBuf,
    pub lang: PathBuf,
    pub log: PathBuf,
    pub modules: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Sentinel marker path, relative to `dirs.base`.
    pub stop_file: PathBuf,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command: String,
    pub args: Vec<String>,
    pub startup_grace_ms: u64,
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub file_name: String,
    pub max_bytes: u64,
    pub status_file: String,
}

// --- Default implementations ---

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "ScadaServerService".to_string(),
            language: Language::English,
            lock_file: PathBuf::from("ScadaServerSvc.lock"),
        }
    }
}

impl Default for DirsConfig {
    fn default() -> Self {
        Self {
            base: PathBuf::from("."),
            config: PathBuf::from("Config"),
            lang: PathBuf::from("Lang"),
            log: PathBuf::from("Log"),
            modules: PathBuf::from("Mod"),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stop_file: PathBuf::from("../SysFiles/SRV.STOP"),
            poll_interval_ms: 300,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "ScadaServerEngine".to_string(),
            args: vec![
                "--config-dir".to_string(),
                "{config_dir}".to_string(),
                "--log-dir".to_string(),
                "{log_dir}".to_string(),
            ],
            startup_grace_ms: 1000,
            stop_timeout_secs: 10,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_name: "ScadaServerSvc.log".to_string(),
            max_bytes: 1024 * 1024,
            status_file: "ScadaServerSvc.status".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::parse(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.watcher.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "watcher.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.engine.command.trim().is_empty() {
            return Err(ConfigError::Invalid("engine.command is empty".to_string()));
        }
        if self.log.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid("log.file_name is empty".to_string()));
        }
        Ok(())
    }

    /// Absolute-or-base-relative path of the sentinel marker.
    pub fn stop_file(&self) -> PathBuf {
        self.dirs.base.join(&self.watcher.stop_file)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dirs.base.join(&self.service.lock_file)
    }
}

/// Errors that can occur while loading the service configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
