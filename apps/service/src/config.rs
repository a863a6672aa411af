use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {}: {source}", .path.display())]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config {}: {source}", .path.display())]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("no config path available (neither XDG_CONFIG_HOME nor HOME is set)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: Scheduler,
    pub workers: Workers,
    pub diagnosis: Diagnosis,
    pub storage: Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    pub tick_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workers {
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub probe_timeout_seconds: u64,
    pub diagnosis_timeout_seconds: u64,
    /// Allowance for a whole job: probe plus diagnosis
    pub job_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisProviderKind {
    Ollama,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnosis {
    pub provider: DiagnosisProviderKind,
    pub url: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Libsql,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub backend: StorageBackend,
    pub path: path::PathBuf,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { tick_interval_seconds: 1 }
    }
}

impl Default for Workers {
    fn default() -> Self {
        Self {
            pool_size: 10,
            queue_capacity: 1000,
            probe_timeout_seconds: 10,
            diagnosis_timeout_seconds: 8,
            job_timeout_seconds: 20,
        }
    }
}

impl Default for Diagnosis {
    fn default() -> Self {
        Self {
            provider: DiagnosisProviderKind::Ollama,
            url: "http://localhost:11434/api/generate".into(),
            model: "llama3".into(),
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self { backend: StorageBackend::Memory, path: "sentinel.db".into() }
    }
}

impl fmt::Display for DiagnosisProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::None => write!(f, "none"),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Libsql => write!(f, "libsql"),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/sentinel/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("sentinel/config.toml"))
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, Error> {
    value.trim().parse().map_err(|_| Error::InvalidEnv { name, value })
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick Interval (s)", &self.scheduler.tick_interval_seconds)?;
        write_title_1(f, "Workers")?;
        write_1(f, "Pool Size", &self.workers.pool_size)?;
        write_1(f, "Queue Capacity", &self.workers.queue_capacity)?;
        write_1(f, "Probe Timeout (s)", &self.workers.probe_timeout_seconds)?;
        write_1(f, "Diagnosis Timeout (s)", &self.workers.diagnosis_timeout_seconds)?;
        write_1(f, "Job Timeout (s)", &self.workers.job_timeout_seconds)?;
        write_title_1(f, "Diagnosis")?;
        write_1(f, "Provider", &self.diagnosis.provider)?;
        write_1(f, "URL", &self.diagnosis.url)?;
        write_1(f, "Model", &self.diagnosis.model)?;
        write_title_1(f, "Storage")?;
        write_1(f, "Backend", &self.storage.backend)?;
        write_1(f, "Path", &self.storage.path.display())?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/sentinel/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// Environment overrides are applied and the result is validated.
    ///
    /// ```no_run
    /// use sentinel_service::config::Config;
    ///
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), sentinel_service::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.apply_env_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply `SCHEDULER_INTERVAL`, `OLLAMA_URL` and `LLM_MODEL` from `lookup`
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(value) = lookup("SCHEDULER_INTERVAL") {
            self.scheduler.tick_interval_seconds = parse_env("SCHEDULER_INTERVAL", value)?;
        }
        if let Some(value) = lookup("OLLAMA_URL").filter(|v| !v.is_empty()) {
            self.diagnosis.url = value;
        }
        if let Some(value) = lookup("LLM_MODEL").filter(|v| !v.is_empty()) {
            self.diagnosis.model = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        let w = &self.workers;
        let positive = [
            ("scheduler.tick_interval_seconds", self.scheduler.tick_interval_seconds),
            ("workers.pool_size", w.pool_size as u64),
            ("workers.queue_capacity", w.queue_capacity as u64),
            ("workers.probe_timeout_seconds", w.probe_timeout_seconds),
            ("workers.diagnosis_timeout_seconds", w.diagnosis_timeout_seconds),
            ("workers.job_timeout_seconds", w.job_timeout_seconds),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Invalid(format!("{name} must be greater than zero")));
        }

        if w.probe_timeout_seconds >= w.job_timeout_seconds {
            return Err(Error::Invalid(
                "workers.probe_timeout_seconds must be less than workers.job_timeout_seconds".into(),
            ));
        }
        if w.diagnosis_timeout_seconds >= w.job_timeout_seconds {
            return Err(Error::Invalid(
                "workers.diagnosis_timeout_seconds must be less than workers.job_timeout_seconds".into(),
            ));
        }

        if self.diagnosis.provider == DiagnosisProviderKind::Ollama && self.diagnosis.url.trim().is_empty() {
            return Err(Error::Invalid("diagnosis.url is required for the ollama provider".into()));
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.probe_timeout_seconds)
    }

    pub fn diagnosis_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.diagnosis_timeout_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.job_timeout_seconds)
    }
}
