use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::history::types::{HistoryEntry, HistoryRole};
use crate::llm::ChatMessage;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history document is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("history document must be a JSON array")]
    NotAnArray,
    #[error("history document has an invalid entry: {0}")]
    InvalidEntry(#[source] serde_json::Error),
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

// Summaries belong to assistant turns only.
fn sanitize(mut entry: HistoryEntry) -> HistoryEntry {
    if entry.role == HistoryRole::User && entry.summary.is_some() {
        debug!("Dropping summary attached to a user history entry");
        entry.summary = None;
    }
    entry
}

fn parse_document(raw: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
    let value: Value = serde_json::from_str(raw).map_err(HistoryError::InvalidJson)?;
    if !value.is_array() {
        return Err(HistoryError::NotAnArray);
    }
    let entries: Vec<HistoryEntry> =
        serde_json::from_value(value).map_err(HistoryError::InvalidEntry)?;
    Ok(entries.into_iter().map(sanitize).collect())
}

/// Ordered conversation log persisted as one JSON array, rewritten on every change.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl HistoryStore {
    /// Loads `path` if it exists. A missing or unreadable file starts an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load(&path);
        info!(
            "History store at {} holds {} entr(ies)",
            path.display(),
            entries.len()
        );
        HistoryStore {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn load(path: &Path) -> Vec<HistoryEntry> {
        if !path.exists() {
            return Vec::new();
        }
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("History load failed for {}: {}", path.display(), err);
                return Vec::new();
            }
        };
        match parse_document(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("History load failed for {}: {}", path.display(), err);
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[HistoryEntry]) {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = fs::create_dir_all(parent) {
                    warn!("History save failed creating {}: {}", parent.display(), err);
                    return;
                }
            }
        }
        let document = match serde_json::to_string_pretty(entries) {
            Ok(document) => document,
            Err(err) => {
                warn!("History save failed serializing entries: {}", err);
                return;
            }
        };
        if let Err(err) = fs::write(&self.path, document) {
            warn!("History save failed for {}: {}", self.path.display(), err);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, role: HistoryRole, content: &str, summary: Option<String>) {
        let entry = sanitize(HistoryEntry {
            timestamp: now_seconds(),
            role,
            content: content.to_string(),
            summary: summary.filter(|value| !value.trim().is_empty()),
        });
        let mut entries = self.entries.lock();
        entries.push(entry);
        debug!(
            "Appended {} entry; history holds {}",
            role.as_str(),
            entries.len()
        );
        self.save(&entries);
    }

    /// The last `limit` entries as chat messages, oldest first. `limit == 0` returns everything.
    pub fn recent_messages(&self, limit: usize) -> Vec<ChatMessage> {
        let entries = self.entries.lock();
        let start = if limit == 0 {
            0
        } else {
            entries.len().saturating_sub(limit)
        };
        entries[start..].iter().map(HistoryEntry::to_message).collect()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.save(&entries);
    }

    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.entries()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Replaces the whole log. The store is left untouched when the document is rejected.
    pub fn import_json(&self, raw: &str) -> Result<usize, HistoryError> {
        let imported = parse_document(raw)?;
        let count = imported.len();
        let mut entries = self.entries.lock();
        *entries = imported;
        self.save(&entries);
        info!("Imported {} history entr(ies)", count);
        Ok(count)
    }
}
