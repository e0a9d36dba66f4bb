use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::rsync::types::Severity;

/// Default maximum number of log lines to keep in memory
pub const DEFAULT_MAX_LOG_LINES: usize = 10000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: String,
    pub level: Severity,
    pub message: String,
    /// Source index the line belongs to, if any.
    pub item: Option<usize>,
}

#[derive(Debug, Default)]
struct Ring {
    next_id: u64,
    entries: VecDeque<LogEntry>,
}

/// Bounded run log. The oldest lines are dropped once `max_lines` is reached.
#[derive(Debug, Clone)]
pub struct LogManager {
    logs: Arc<Mutex<Ring>>,
    max_lines: usize,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl LogManager {
    pub fn new(max_lines: usize) -> Self {
        Self {
            logs: Arc::new(Mutex::new(Ring {
                next_id: 0,
                entries: VecDeque::with_capacity(max_lines.min(1024)),
            })),
            max_lines: max_lines.max(1),
        }
    }

    pub fn log(&self, level: Severity, message: &str, item: Option<usize>) -> LogEntry {
        let mut ring = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let entry = LogEntry {
            id: ring.next_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
            item,
        };
        ring.next_id += 1;
        ring.entries.push_back(entry.clone());

        while ring.entries.len() > self.max_lines {
            ring.entries.pop_front();
        }
        entry
    }

    pub fn get_logs(&self, item: Option<usize>) -> Vec<LogEntry> {
        let ring = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        match item {
            Some(index) => ring
                .entries
                .iter()
                .filter(|l| l.item == Some(index))
                .cloned()
                .collect(),
            None => ring.entries.iter().cloned().collect(),
        }
    }

    /// Get logs with pagination
    pub fn get_logs_paginated(&self, item: Option<usize>, offset: usize, limit: usize) -> Vec<LogEntry> {
        let ring = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let filtered: Vec<_> = match item {
            Some(index) => ring.entries.iter().filter(|l| l.item == Some(index)).collect(),
            None => ring.entries.iter().collect(),
        };

        let start = offset.min(filtered.len());
        let end = offset.saturating_add(limit).min(filtered.len());

        filtered[start..end].iter().map(|&entry| entry.clone()).collect()
    }

    pub fn last_error(&self) -> Option<LogEntry> {
        let ring = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        ring.entries
            .iter()
            .rev()
            .find(|l| l.level == Severity::Error)
            .cloned()
    }

    pub fn clear(&self) {
        let mut ring = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        ring.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("copier=debug,copier_lib=debug")
        } else {
            EnvFilter::new("copier=info,copier_lib=info")
        }
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact(),
    );

    // Ignore the error if a subscriber is already installed
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_manager_log() {
        let manager = LogManager::new(10);

        manager.log(Severity::Info, "test message", None);
        assert_eq!(manager.len(), 1);

        manager.log(Severity::Warning, "another message", Some(1));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_log_manager_rotation() {
        let manager = LogManager::new(3);

        for i in 0..5 {
            manager.log(Severity::Info, &format!("message {}", i), None);
        }

        let logs = manager.get_logs(None);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "message 2");
        assert_eq!(logs[0].id, 2);
    }

    #[test]
    fn test_log_manager_get_logs_by_item() {
        let manager = LogManager::new(10);

        manager.log(Severity::Info, "message1", None);
        manager.log(Severity::Info, "message2", Some(0));
        manager.log(Severity::Error, "message3", Some(0));

        assert_eq!(manager.get_logs(None).len(), 3);
        assert_eq!(manager.get_logs(Some(0)).len(), 2);
        assert!(manager.get_logs(Some(7)).is_empty());
        assert_eq!(manager.last_error().map(|e| e.message), Some("message3".to_string()));
    }

    #[test]
    fn test_log_manager_pagination() {
        let manager = LogManager::new(100);

        for i in 0..20 {
            manager.log(Severity::Info, &format!("message {}", i), None);
        }

        assert_eq!(manager.get_logs_paginated(None, 0, 10).len(), 10);
        assert_eq!(manager.get_logs_paginated(None, 10, 10).len(), 10);
        assert_eq!(manager.get_logs_paginated(None, 20, 10).len(), 0);
        assert_eq!(manager.get_logs_paginated(None, 15, usize::MAX).len(), 5);
    }

    #[test]
    fn test_default_max_log_lines() {
        assert_eq!(DEFAULT_MAX_LOG_LINES, 10000);
    }
}
