//! Session journal.
//!
//! A bounded log of what happened in a session, kept for the experiment
//! operators. Every record is mirrored to `tracing`; the journal itself only
//! keeps the most recent `max_entries` and writes them out on `flush`.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: JournalLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub trait Journal: Send + Sync {
    fn record(&self, level: JournalLevel, message: &str, data: Option<Value>);

    fn flush(&self) -> Result<()>;
}

pub type JournalRef = Arc<dyn Journal>;

fn mirror(level: JournalLevel, message: &str, data: Option<&Value>) {
    let data = data.map(Value::to_string).unwrap_or_default();
    match level {
        JournalLevel::Debug => tracing::debug!(target: "apollolytics::journal", %data, "{message}"),
        JournalLevel::Info => tracing::info!(target: "apollolytics::journal", %data, "{message}"),
        JournalLevel::Warn => tracing::warn!(target: "apollolytics::journal", %data, "{message}"),
        JournalLevel::Error => tracing::error!(target: "apollolytics::journal", %data, "{message}"),
    }
}

/// JSON-array journal file capped at `max_entries`.
pub struct FileJournal {
    path: PathBuf,
    max_entries: usize,
    entries: Mutex<VecDeque<JournalEntry>>,
}

impl FileJournal {
    /// Open `path`, keeping whatever a previous session left there.
    /// An unreadable file is set aside rather than failing the session.
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut entries: VecDeque<JournalEntry> = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Vec<JournalEntry>>(&text)
                .map(VecDeque::from)
                .unwrap_or_else(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "discarding unreadable journal");
                    VecDeque::new()
                }),
            Err(_) => VecDeque::new(),
        };
        while entries.len() > max_entries {
            entries.pop_front();
        }
        Self {
            path,
            max_entries,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Journal for FileJournal {
    fn record(&self, level: JournalLevel, message: &str, data: Option<Value>) {
        mirror(level, message, data.as_ref());
        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(JournalEntry {
                timestamp: Utc::now(),
                level,
                message: message.to_string(),
                data,
            });
            while entries.len() > self.max_entries {
                entries.pop_front();
            }
        }
    }

    fn flush(&self) -> Result<()> {
        let snapshot: Vec<JournalEntry> = match self.entries.lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(e) => e.into_inner().iter().cloned().collect(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.path, json)?;
        tracing::debug!(path = %self.path.display(), entries = snapshot.len(), "journal flushed");
        Ok(())
    }
}

/// Journal kept in memory, for tests and runs without a data directory.
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
    flushes: Mutex<usize>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().map(|f| *f).unwrap_or(0)
    }
}

impl Journal for MemoryJournal {
    fn record(&self, level: JournalLevel, message: &str, data: Option<Value>) {
        mirror(level, message, data.as_ref());
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(JournalEntry {
                timestamp: Utc::now(),
                level,
                message: message.to_string(),
                data,
            });
        }
    }

    fn flush(&self) -> Result<()> {
        if let Ok(mut flushes) = self.flushes.lock() {
            *flushes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_journal_caps_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("journal.json");

        let journal = FileJournal::open(&path, 3);
        for i in 0..5 {
            journal.record(JournalLevel::Info, &format!("event {i}"), Some(json!({"i": i})));
        }
        assert_eq!(journal.len(), 3);
        journal.flush().unwrap();

        let reopened = FileJournal::open(&path, 1000);
        assert_eq!(reopened.len(), 3);
        let stored: Vec<JournalEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored[0].message, "event 2");
        assert_eq!(stored[2].data, Some(json!({"i": 4})));
    }

    #[test]
    fn test_reopen_with_smaller_cap_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");
        let journal = FileJournal::open(&path, 10);
        for i in 0..4 {
            journal.record(JournalLevel::Debug, &format!("event {i}"), None);
        }
        journal.flush().unwrap();

        let reopened = FileJournal::open(&path, 2);
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");
        std::fs::write(&path, "not json").unwrap();
        let journal = FileJournal::open(&path, 10);
        assert!(journal.is_empty());
    }

    #[test]
    fn test_memory_journal() {
        let journal = MemoryJournal::new();
        journal.record(JournalLevel::Warn, "mic denied", None);
        journal.flush().unwrap();
        assert_eq!(journal.messages(), vec!["mic denied".to_string()]);
        assert_eq!(journal.flush_count(), 1);
    }
}
