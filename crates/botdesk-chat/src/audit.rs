//! Session-scoped ledger of every exchange with the inference service.

use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use botdesk_core::types::{LogEntry, LogKind};

/// Append-only, in-memory audit log. Lives as long as the process.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: LogEntry) {
        debug!(kind = %entry.kind, "Audit entry recorded");
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    /// Append a new entry stamped with the current time.
    pub fn record(&self, kind: LogKind, payload: Value) {
        self.append(LogEntry::new(kind, payload));
    }

    /// All entries, oldest first.
    pub fn list(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
