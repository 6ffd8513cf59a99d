use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Values shared between the tracking engine and the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled: bool,
    pub count: usize,
    pub active: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 0,
            active: false,
        }
    }
}

/// Partial write; `None` fields are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub count: Option<usize>,
    pub active: Option<bool>,
}

impl SettingsUpdate {
    pub fn status(count: usize, active: bool) -> Self {
        Self {
            count: Some(count),
            active: Some(active),
            ..Self::default()
        }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    fn apply(self, settings: &mut Settings) {
        if let Some(enabled) = self.enabled {
            settings.enabled = enabled;
        }
        if let Some(count) = self.count {
            settings.count = count;
        }
        if let Some(active) = self.active {
            settings.active = active;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("settings store unavailable")]
    Unavailable,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed settings: {0}")]
    Parse(String),
    #[error("could not serialize settings: {0}")]
    Serialize(String),
}

pub trait SettingsStore: Send + Sync {
    fn get(&self) -> Result<Settings, StoreError>;
    fn set(&self, update: SettingsUpdate) -> Result<(), StoreError>;
}

/// In-process store. Can be switched unavailable to simulate a dead backend.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
    unavailable: AtomicBool,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self) -> Result<Settings, StoreError> {
        self.check()?;
        let settings = self.settings.lock().map_err(|_| StoreError::Unavailable)?;
        Ok(*settings)
    }

    fn set(&self, update: SettingsUpdate) -> Result<(), StoreError> {
        self.check()?;
        let mut settings = self.settings.lock().map_err(|_| StoreError::Unavailable)?;
        update.apply(&mut settings);
        Ok(())
    }
}

/// Store persisted as a RON file, rewritten atomically on every change.
#[derive(Debug)]
pub struct RonSettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Settings, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => ron::from_str(&text).map_err(|err| StoreError::Parse(err.to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, settings: &Settings) -> Result<(), StoreError> {
        let content = ron::ser::to_string_pretty(settings, ron::ser::PrettyConfig::new())
            .map_err(|err| StoreError::Serialize(err.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}

impl SettingsStore for RonSettingsStore {
    fn get(&self) -> Result<Settings, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Unavailable)?;
        self.read()
    }

    fn set(&self, update: SettingsUpdate) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Unavailable)?;
        let mut settings = self.read()?;
        update.apply(&mut settings);
        self.write(&settings)
    }
}
