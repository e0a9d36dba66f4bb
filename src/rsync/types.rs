use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Exit code reported when the process was terminated by a signal.
pub const EXIT_KILLED: i32 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// Checkbox-style rsync toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunOptions {
    pub archive: bool,
    pub compress: bool,
    pub delete: bool,
    pub verbose: bool,
    pub progress: bool,
    pub dry_run: bool,
    pub preserve_permissions: bool,
    pub human_readable: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            archive: true,
            compress: true,
            delete: false,
            verbose: false,
            progress: true,
            dry_run: false,
            preserve_permissions: true,
            human_readable: true,
        }
    }
}

impl RunOptions {
    pub const NAMES: [&'static str; 8] = [
        "archive",
        "compress",
        "delete",
        "verbose",
        "progress",
        "dry_run",
        "preserve_permissions",
        "human_readable",
    ];

    /// All toggles off.
    pub fn none() -> Self {
        Self {
            archive: false,
            compress: false,
            delete: false,
            verbose: false,
            progress: false,
            dry_run: false,
            preserve_permissions: false,
            human_readable: false,
        }
    }

    /// Build from a name -> bool map. Unknown names are ignored and missing
    /// names are off.
    pub fn from_map(map: &BTreeMap<String, bool>) -> Self {
        let mut options = Self::none();
        for (name, value) in map {
            options.set(name, *value);
        }
        options
    }

    pub fn to_map(&self) -> BTreeMap<String, bool> {
        Self::NAMES
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.to_string(), v)))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        let value = match name {
            "archive" => self.archive,
            "compress" => self.compress,
            "delete" => self.delete,
            "verbose" => self.verbose,
            "progress" => self.progress,
            "dry_run" => self.dry_run,
            "preserve_permissions" => self.preserve_permissions,
            "human_readable" | "human" => self.human_readable,
            _ => return None,
        };
        Some(value)
    }

    /// Returns false when `name` is not a known toggle.
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        let slot = match name {
            "archive" => &mut self.archive,
            "compress" => &mut self.compress,
            "delete" => &mut self.delete,
            "verbose" => &mut self.verbose,
            "progress" => &mut self.progress,
            "dry_run" => &mut self.dry_run,
            "preserve_permissions" => &mut self.preserve_permissions,
            "human_readable" | "human" => &mut self.human_readable,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// One user-initiated copy: every source into one destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRequest {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub options: RunOptions,
}

impl RunRequest {
    pub fn new(sources: Vec<PathBuf>, destination: PathBuf, options: RunOptions) -> Self {
        Self {
            sources,
            destination,
            options,
        }
    }

    /// Identity used to match persisted resume progress to a request.
    pub fn fingerprint(&self) -> String {
        use std::hash::Hasher;
        use twox_hash::XxHash64;

        let mut hasher = XxHash64::with_seed(0);
        for source in &self.sources {
            hasher.write(source.to_string_lossy().as_bytes());
            hasher.write(&[0]);
        }
        hasher.write(&[0xff]);
        hasher.write(self.destination.to_string_lossy().as_bytes());

        format!("{:016x}", hasher.finish())
    }
}

/// Events produced by the runner for the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Log { text: String, severity: Severity },
    Progress { percent: u8, filename: Option<String> },
    ItemFinished { index: usize, exit_code: i32 },
    RunFinished { exit_code: i32 },
    RunError { message: String },
}

impl OutputEvent {
    pub fn log(severity: Severity, text: impl Into<String>) -> Self {
        OutputEvent::Log {
            text: text.into(),
            severity,
        }
    }

    /// True for the one event that closes a process's stream of events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutputEvent::ItemFinished { .. } | OutputEvent::RunFinished { .. }
        )
    }
}
