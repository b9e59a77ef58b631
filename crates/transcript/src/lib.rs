//! Append-only conversation transcript.
//!
//! Entries are kept in conversational order. Each role has at most one
//! non-final entry, a reserved placeholder for a turn whose text is not
//! known yet. Reserving the slot when the turn happens, rather than when its
//! text arrives, keeps the order right even if transcription lands after the
//! assistant reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub is_final: bool,
    pub is_placeholder: bool,
    /// Status or error line rather than something a participant said.
    #[serde(default)]
    pub is_notice: bool,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(role: Role, id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role,
            content: content.into(),
            is_final: true,
            is_placeholder: false,
            is_notice: false,
            created_at: Utc::now(),
        }
    }
}

/// What [`Transcript::fill_placeholder`] did with the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The reserved slot now holds the text.
    Filled,
    /// An existing entry with the same id was updated.
    Updated,
    /// Identical to the latest final entry for the role; nothing changed.
    Duplicate,
    /// No slot was reserved; the text was appended.
    Appended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: Uuid,
    entries: Vec<TranscriptEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entries: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// The non-final entry for `role`, if any.
    pub fn pending(&self, role: Role) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.role == role && !e.is_final)
    }

    fn pending_index(&self, role: Role) -> Option<usize> {
        self.entries.iter().position(|e| e.role == role && !e.is_final)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn append_final(
        &mut self,
        role: Role,
        id: Option<String>,
        content: impl Into<String>,
    ) -> &TranscriptEntry {
        self.push(TranscriptEntry::new(role, id, content))
    }

    /// A user-visible status line, shown on the assistant side.
    pub fn append_notice(&mut self, message: impl Into<String>) -> &TranscriptEntry {
        let mut entry = TranscriptEntry::new(Role::Assistant, None, message);
        entry.is_notice = true;
        self.push(entry)
    }

    fn push(&mut self, entry: TranscriptEntry) -> &TranscriptEntry {
        self.touch();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Reserve the slot for a turn whose text arrives later.
    ///
    /// The slot always goes at the end. A non-final entry the role still
    /// holds from an earlier turn is dropped, so there is never more than
    /// one. Returns the slot id.
    pub fn reserve_placeholder(&mut self, role: Role, text: impl Into<String>) -> String {
        let text = text.into();
        self.touch();
        if let Some(idx) = self.pending_index(role) {
            let stale = self.entries.remove(idx);
            tracing::debug!(id = %stale.id, ?role, "dropping unfilled placeholder");
        }
        let mut entry = TranscriptEntry::new(role, None, text);
        entry.is_final = false;
        entry.is_placeholder = true;
        let id = entry.id.clone();
        self.entries.push(entry);
        id
    }

    /// Put transcribed user text into its reserved slot.
    ///
    /// Without a slot: update the entry carrying the same backend id, skip
    /// an exact repeat of the last user entry, or append.
    pub fn fill_placeholder(&mut self, content: &str, item_id: Option<&str>) -> FillOutcome {
        self.touch();
        if let Some(idx) = self.pending_index(Role::User) {
            let entry = &mut self.entries[idx];
            entry.content = content.to_string();
            entry.is_final = true;
            entry.is_placeholder = false;
            if let Some(id) = item_id {
                entry.id = id.to_string();
            }
            return FillOutcome::Filled;
        }

        if let Some(id) = item_id {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|e| e.role == Role::User && e.id == id)
            {
                entry.content = content.to_string();
                return FillOutcome::Updated;
            }
        }

        let repeat = self
            .entries
            .iter()
            .rev()
            .find(|e| e.role == Role::User && !e.is_notice)
            .is_some_and(|e| e.is_final && e.content == content);
        if repeat {
            tracing::debug!("ignoring repeated user transcript");
            return FillOutcome::Duplicate;
        }

        self.append_final(Role::User, item_id.map(str::to_string), content);
        FillOutcome::Appended
    }

    /// Seal the role's non-final entry, or append a final one if none exists.
    pub fn finalize_pending(
        &mut self,
        role: Role,
        id: Option<String>,
        content: impl Into<String>,
    ) -> &TranscriptEntry {
        let content = content.into();
        match self.pending_index(role) {
            Some(idx) => {
                self.touch();
                let entry = &mut self.entries[idx];
                entry.content = content;
                entry.is_final = true;
                entry.is_placeholder = false;
                if let Some(id) = id {
                    entry.id = id;
                }
                &self.entries[idx]
            }
            None => self.append_final(role, id, content),
        }
    }

    /// Remove the role's non-final entry. Returns whether one existed.
    pub fn discard_pending(&mut self, role: Role) -> bool {
        match self.pending_index(role) {
            Some(idx) => {
                self.entries.remove(idx);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn full_text(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.is_final && !e.is_notice)
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}
