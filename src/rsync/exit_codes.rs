use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::rsync::types::EXIT_KILLED;

/// Exit codes documented in the rsync manual.
const RSYNC_EXIT_CODES: &[(i32, &str)] = &[
    (1, "syntax or usage error"),
    (2, "protocol incompatibility"),
    (3, "errors selecting input/output files or directories"),
    (4, "requested action not supported"),
    (5, "error starting client-server protocol"),
    (6, "daemon unable to append to log-file"),
    (10, "error in socket I/O (connection lost)"),
    (11, "error in file I/O (disk full or permission denied)"),
    (12, "error in rsync protocol data stream (connection lost)"),
    (13, "errors with program diagnostics"),
    (14, "error in IPC code"),
    (20, "received SIGUSR1 or SIGINT"),
    (21, "some error returned by waitpid()"),
    (22, "error allocating core memory buffers"),
    (23, "partial transfer due to error (permission denied or unreadable files)"),
    (24, "partial transfer due to vanished source files"),
    (25, "the --max-delete limit stopped deletions"),
    (30, "timeout in data send/receive (connection lost)"),
    (35, "timeout waiting for daemon connection"),
];

/// Maps exit codes to human-readable causes.
///
/// The defaults come from the rsync manual; configuration can replace or add
/// entries, so the table is never assumed complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitCodeTable {
    entries: BTreeMap<i32, String>,
}

impl Default for ExitCodeTable {
    fn default() -> Self {
        Self {
            entries: RSYNC_EXIT_CODES
                .iter()
                .map(|(code, text)| (*code, text.to_string()))
                .collect(),
        }
    }
}

impl ExitCodeTable {
    pub fn with_overrides(overrides: &BTreeMap<i32, String>) -> Self {
        let mut table = Self::default();
        for (code, text) in overrides {
            table.entries.insert(*code, text.clone());
        }
        table
    }

    pub fn lookup(&self, code: i32) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    /// Human-readable explanation; unknown codes are reported verbatim.
    pub fn describe(&self, code: i32) -> String {
        if code == EXIT_KILLED {
            return "terminated by signal".to_string();
        }
        match self.lookup(code) {
            Some(text) => format!("{text} (exit code {code})"),
            None => format!("exit code {code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_23_is_partial_transfer() {
        let table = ExitCodeTable::default();
        let text = table.describe(23);
        assert!(text.contains("partial transfer"));
        assert!(text.contains("23"));
    }

    #[test]
    fn test_unknown_code_is_verbatim() {
        assert_eq!(ExitCodeTable::default().describe(99), "exit code 99");
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let mut overrides = BTreeMap::new();
        overrides.insert(23, "some files were skipped".to_string());
        overrides.insert(127, "rsync wrapper missing".to_string());

        let table = ExitCodeTable::with_overrides(&overrides);
        assert_eq!(table.lookup(23), Some("some files were skipped"));
        assert_eq!(table.lookup(127), Some("rsync wrapper missing"));
        assert!(table.lookup(24).is_some());
    }
}
