use std::path::{Path, PathBuf};

use crate::config::DirsConfig;

/// The directory layout the core engine needs before it can run.
///
/// All paths are resolved against a single base directory. This struct provides
/// accessors for each well-known directory and checks which of them exist.
#[derive(Debug, Clone)]
pub struct AppDirs {
    base: PathBuf,
    config: PathBuf,
    lang: PathBuf,
    log: PathBuf,
    modules: PathBuf,
}

/// Result of checking the prerequisite directories at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirCheck {
    /// Prerequisite directories that do not exist, in declaration order.
    pub missing: Vec<PathBuf>,
    pub log_dir_exists: bool,
}

impl DirCheck {
    pub fn all_exist(&self) -> bool {
        self.missing.is_empty()
    }
}

impl AppDirs {
    /// Standard layout under `base`: Config/, Lang/, Log/, Mod/.
    #[cfg(test)]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::from_config(&DirsConfig {
            base: base.into(),
            ..DirsConfig::default()
        })
    }

    pub fn from_config(config: &DirsConfig) -> Self {
        let base = config.base.clone();
        Self {
            config: base.join(&config.config),
            lang: base.join(&config.lang),
            log: base.join(&config.log),
            modules: base.join(&config.modules),
            base,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Engine configuration directory.
    pub fn config_dir(&self) -> &Path {
        &self.config
    }

    /// Localization dictionaries.
    pub fn lang_dir(&self) -> &Path {
        &self.lang
    }

    /// Log files, including the service's own action log.
    pub fn log_dir(&self) -> &Path {
        &self.log
    }

    /// Engine extension modules.
    pub fn mod_dir(&self) -> &Path {
        &self.modules
    }

    /// All prerequisite directories in a fixed order.
    pub fn prerequisites(&self) -> [&Path; 4] {
        [&self.config, &self.lang, &self.log, &self.modules]
    }

    /// Check which prerequisite directories exist.
    pub fn check(&self) -> DirCheck {
        let missing = self
            .prerequisites()
            .iter()
            .filter(|dir| !dir.is_dir())
            .map(|dir| dir.to_path_buf())
            .collect();
        DirCheck {
            missing,
            log_dir_exists: self.log.is_dir(),
        }
    }

    /// Create every prerequisite directory. Used by tests and first-time setup.
    #[cfg(test)]
    pub fn create_all(&self) -> std::io::Result<()> {
        for dir in self.prerequisites() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
