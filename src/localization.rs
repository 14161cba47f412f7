use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Dictionary bundle used by the core engine's data library.
pub const ENGINE_DICTIONARY_BUNDLE: &str = "ScadaData";

/// Operator-facing language.
///
/// Russian phrases are compiled into the engine; any other language needs its
/// dictionaries loaded from the localization directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ru")]
    Russian,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en-GB",
            Language::Russian => "ru-RU",
        }
    }

    pub fn is_builtin(self) -> bool {
        self == Language::Russian
    }
}

/// Dictionary loading, consumed by the controller before the engine starts.
pub trait Localization: Send + Sync {
    fn language(&self) -> Language;

    /// Load the dictionaries of `bundle` from `dir`. The error is a ready-to-log message.
    fn load_dictionaries(&self, dir: &Path, bundle: &str) -> Result<(), String>;
}

/// Dictionaries stored as `<dir>/<bundle>.<lang-code>.toml`, one table per dictionary.
pub struct TomlDictionaries {
    language: Language,
    dictionaries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl TomlDictionaries {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            dictionaries: RwLock::new(HashMap::new()),
        }
    }

    pub fn file_path(&self, dir: &Path, bundle: &str) -> PathBuf {
        dir.join(format!("{bundle}.{}.toml", self.language.code()))
    }

    /// Look up a loaded phrase.
    #[cfg(test)]
    pub fn phrase(&self, dictionary: &str, key: &str) -> Option<String> {
        let dictionaries = self
            .dictionaries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        dictionaries.get(dictionary)?.get(key).cloned()
    }
}

impl Localization for TomlDictionaries {
    fn language(&self) -> Language {
        self.language
    }

    fn load_dictionaries(&self, dir: &Path, bundle: &str) -> Result<(), String> {
        let path = self.file_path(dir, bundle);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Error loading dictionaries from file {}: {e}",
                path.display()
            )
        })?;
        let loaded: HashMap<String, HashMap<String, String>> = toml::from_str(&contents)
            .map_err(|e| {
                format!(
                    "Error loading dictionaries from file {}: {e}",
                    path.display()
                )
            })?;

        tracing::debug!(path = %path.display(), count = loaded.len(), "dictionaries loaded");
        self.dictionaries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(loaded);
        Ok(())
    }
}

/// Messages the service writes to its own log.
#[derive(Debug, Clone)]
pub struct Phrases {
    language: Language,
}

impl Phrases {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    fn pick(&self, en: &'static str, ru: &'static str) -> &'static str {
        match self.language {
            Language::English => en,
            Language::Russian => ru,
        }
    }

    pub fn started(&self) -> &'static str {
        self.pick(
            "ScadaServerService is started",
            "Служба ScadaServerService запущена",
        )
    }

    pub fn stopped(&self) -> &'static str {
        self.pick(
            "ScadaServerService is stopped",
            "Служба ScadaServerService остановлена",
        )
    }

    pub fn shutdown(&self) -> &'static str {
        self.pick(
            "ScadaServerService is shutdown",
            "Служба ScadaServerService отключена",
        )
    }

    pub fn execution_impossible(&self) -> &'static str {
        self.pick(
            "Normal program execution is impossible.",
            "Нормальная работа программы невозможна.",
        )
    }

    pub fn missing_dirs(&self, missing: &[PathBuf]) -> String {
        let mut msg = self
            .pick(
                "Required directories do not exist:",
                "Не существуют необходимые директории:",
            )
            .to_string();
        for dir in missing {
            msg.push('\n');
            msg.push_str(&dir.display().to_string());
        }
        msg.push('\n');
        msg.push_str(self.execution_impossible());
        msg
    }

    pub fn unhandled_fault(&self, description: Option<&str>) -> String {
        let prefix = self.pick("Unhandled exception", "Необработанное исключение");
        match description {
            Some(desc) => format!("{prefix}: {desc}"),
            None => prefix.to_string(),
        }
    }

    pub fn contained_fault(&self, operation: &str, description: &str) -> String {
        match self.language {
            Language::English => format!("Error during {operation}: {description}"),
            Language::Russian => format!("Ошибка при выполнении {operation}: {description}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_language() {
        assert!(Language::Russian.is_builtin());
        assert!(!Language::English.is_builtin());
    }

    #[test]
    fn test_load_dictionaries_from_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let dicts = TomlDictionaries::new(Language::English);
        std::fs::write(
            tmp.path().join("ScadaData.en-GB.toml"),
            "[CommonPhrases]\nError = \"Error\"\nYes = \"Yes\"\n",
        )
        .unwrap();

        dicts
            .load_dictionaries(tmp.path(), ENGINE_DICTIONARY_BUNDLE)
            .unwrap();
        assert_eq!(
            dicts.phrase("CommonPhrases", "Yes"),
            Some("Yes".to_string())
        );
        assert_eq!(dicts.phrase("CommonPhrases", "No"), None);
        assert_eq!(dicts.phrase("Other", "Yes"), None);
    }

    #[test]
    fn test_load_dictionaries_missing_file_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dicts = TomlDictionaries::new(Language::English);
        let err = dicts
            .load_dictionaries(tmp.path(), ENGINE_DICTIONARY_BUNDLE)
            .unwrap_err();
        assert!(err.starts_with("Error loading dictionaries from file"));
        assert!(err.contains("ScadaData.en-GB.toml"));
    }

    #[test]
    fn test_load_dictionaries_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dicts = TomlDictionaries::new(Language::English);
        std::fs::write(tmp.path().join("ScadaData.en-GB.toml"), "not = [valid").unwrap();
        assert!(dicts
            .load_dictionaries(tmp.path(), ENGINE_DICTIONARY_BUNDLE)
            .is_err());
    }

    #[test]
    fn test_missing_dirs_message_lists_each_dir() {
        let phrases = Phrases::new(Language::English);
        let msg = phrases.missing_dirs(&[PathBuf::from("/a/Config"), PathBuf::from("/a/Mod")]);
        assert_eq!(
            msg,
            "Required directories do not exist:\n/a/Config\n/a/Mod\nNormal program execution is impossible."
        );
    }

    #[test]
    fn test_unhandled_fault_message() {
        let phrases = Phrases::new(Language::English);
        assert_eq!(phrases.unhandled_fault(None), "Unhandled exception");
        assert_eq!(
            phrases.unhandled_fault(Some("boom")),
            "Unhandled exception: boom"
        );
    }

    #[test]
    fn test_russian_phrases() {
        let phrases = Phrases::new(Language::Russian);
        assert_eq!(phrases.stopped(), "Служба ScadaServerService остановлена");
        assert!(phrases.unhandled_fault(None).starts_with("Необработанное"));
    }
}
