//! Application state shared with front ends.
//!
//! There is one writer: the [`ProcessManager`](crate::rsync::ProcessManager)
//! that owns the record. Observers read snapshots or listen for
//! notifications.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::rsync::types::RunOptions;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Interrupting,
    Succeeded,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Interrupting)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Interrupted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunProgress {
    /// Source being transferred (0-based).
    pub current_index: usize,
    pub total: usize,
    pub percent: u8,
    pub filename: Option<String>,
}

impl RunProgress {
    pub fn starting(index: usize, total: usize) -> Self {
        Self {
            current_index: index,
            total,
            percent: 0,
            filename: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppState {
    pub status: RunStatus,
    pub sources: Vec<PathBuf>,
    pub destination: Option<PathBuf>,
    pub options: RunOptions,
    pub progress: RunProgress,
    pub last_error: Option<String>,
}

impl AppState {
    /// Replace the source list, keeping it sorted and unique. Returns true
    /// when the list changed.
    pub fn set_sources(&mut self, sources: Vec<PathBuf>) -> bool {
        let mut normalized = sources;
        normalized.sort();
        normalized.dedup();
        if normalized == self.sources {
            return false;
        }
        self.sources = normalized;
        true
    }

    pub fn set_destination(&mut self, destination: Option<PathBuf>) -> bool {
        if self.destination == destination {
            return false;
        }
        self.destination = destination;
        true
    }

    pub fn set_options(&mut self, options: RunOptions) -> bool {
        if self.options == options {
            return false;
        }
        self.options = options;
        true
    }

    pub fn set_status(&mut self, status: RunStatus) -> bool {
        if self.status == status {
            return false;
        }
        if !matches!(status, RunStatus::Failed) {
            self.last_error = None;
        }
        self.status = status;
        true
    }
}
