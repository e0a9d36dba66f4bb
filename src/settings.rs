//! Flat key-value persistence for last-used paths, option flags and resume
//! bookkeeping.
//!
//! Keys are plain strings grouped by prefix (`paths/`, `options/`,
//! `resume/`). Values are strings; lists are stored as JSON arrays.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::rsync::types::RunOptions;

pub const KEY_SOURCES: &str = "paths/sources";
pub const KEY_DESTINATION: &str = "paths/destination";
pub const OPTION_PREFIX: &str = "options/";
pub const KEY_RESUME_INDEX: &str = "resume/index";
pub const KEY_RESUME_FINGERPRINT: &str = "resume/fingerprint";

pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;

    /// Set several keys as one write, where the store supports it.
    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

impl<T: SettingsStore + ?Sized> SettingsStore for Box<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<()> {
        (**self).set_many(entries)
    }
}

/// In-memory store, used by tests and when persistence is disabled.
#[derive(Debug, Default, Clone)]
pub struct MemorySettingsStore {
    values: BTreeMap<String, String>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// A YAML file holding a single flat map. Every write replaces the whole file
/// atomically; the last writer wins.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileSettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&text)
                    .with_context(|| format!("invalid settings file {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let text = serde_yaml::to_string(&self.values)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to write settings {}", self.path.display()))?;
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if self.values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<()> {
        let mut changed = false;
        for (key, value) in entries {
            if self.values.get(*key).map(String::as_str) != Some(*value) {
                self.values.insert(key.to_string(), value.to_string());
                changed = true;
            }
        }
        if changed {
            self.flush()?;
        }
        Ok(())
    }
}

/// Persisted resume position for one request fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub fingerprint: String,
    pub index: usize,
}

pub fn load_resume<S: SettingsStore + ?Sized>(store: &S) -> Option<ResumePoint> {
    let fingerprint = store.get(KEY_RESUME_FINGERPRINT)?;
    let index = store.get(KEY_RESUME_INDEX)?.parse().ok()?;
    Some(ResumePoint { fingerprint, index })
}

pub fn save_resume<S: SettingsStore + ?Sized>(store: &mut S, point: &ResumePoint) -> Result<()> {
    let index = point.index.to_string();
    store.set_many(&[
        (KEY_RESUME_FINGERPRINT, point.fingerprint.as_str()),
        (KEY_RESUME_INDEX, index.as_str()),
    ])
}

pub fn clear_resume<S: SettingsStore + ?Sized>(store: &mut S) -> Result<()> {
    store.remove(KEY_RESUME_INDEX)?;
    store.remove(KEY_RESUME_FINGERPRINT)
}

pub fn load_sources<S: SettingsStore + ?Sized>(store: &S) -> Vec<PathBuf> {
    store
        .get(KEY_SOURCES)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

pub fn save_sources<S: SettingsStore + ?Sized>(store: &mut S, sources: &[PathBuf]) -> Result<()> {
    store.set(KEY_SOURCES, &serde_json::to_string(sources)?)
}

pub fn load_destination<S: SettingsStore + ?Sized>(store: &S) -> Option<PathBuf> {
    store
        .get(KEY_DESTINATION)
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
}

pub fn save_destination<S: SettingsStore + ?Sized>(store: &mut S, destination: Option<&Path>) -> Result<()> {
    match destination {
        Some(path) => store.set(KEY_DESTINATION, &path.to_string_lossy()),
        None => store.remove(KEY_DESTINATION),
    }
}

/// Options start from the defaults; stored flags override them.
pub fn load_options<S: SettingsStore + ?Sized>(store: &S) -> RunOptions {
    let mut options = RunOptions::default();
    for name in RunOptions::NAMES {
        let key = format!("{OPTION_PREFIX}{name}");
        if let Some(value) = store.get(&key).and_then(|v| v.parse::<bool>().ok()) {
            options.set(name, value);
        }
    }
    options
}

pub fn save_options<S: SettingsStore + ?Sized>(store: &mut S, options: &RunOptions) -> Result<()> {
    for (name, value) in options.to_map() {
        store.set(&format!("{OPTION_PREFIX}{name}"), &value.to_string())?;
    }
    Ok(())
}
