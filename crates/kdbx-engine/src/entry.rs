//! Entry types and operations

use crate::meta::{CustomData, FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME};
use crate::protected::ProtectedString;
use crate::times::Times;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTypeAssociation {
    pub window: String,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoType {
    pub enabled: bool,
    pub obfuscation: u32,
    pub default_sequence: String,
    pub associations: Vec<AutoTypeAssociation>,
}

impl Default for AutoType {
    fn default() -> Self {
        Self {
            enabled: true,
            obfuscation: 0,
            default_sequence: String::new(),
            associations: Vec::new(),
        }
    }
}

/// A password entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique identifier for this entry
    pub uuid: Uuid,
    /// UUID of the parent group (None for history snapshots)
    pub parent_group: Option<Uuid>,
    pub icon_id: u32,
    pub custom_icon: Option<Uuid>,
    pub foreground_color: String,
    pub background_color: String,
    pub override_url: String,
    /// KDBX 4.1
    pub quality_check: bool,
    /// Tags for organization
    #[serde(default)]
    pub tags: Vec<String>,
    /// KDBX 4.1
    pub previous_parent_group: Option<Uuid>,
    pub times: Times,
    /// Named string fields, standard and custom
    #[serde(default)]
    pub fields: BTreeMap<String, ProtectedString>,
    /// Attachment name -> binary pool index
    #[serde(default)]
    pub binaries: BTreeMap<String, usize>,
    #[serde(default)]
    pub auto_type: AutoType,
    #[serde(default)]
    pub custom_data: CustomData,
    /// Older versions of this entry, oldest first
    #[serde(default)]
    pub history: Vec<Entry>,
}

impl Entry {
    /// Create a new entry with the given title
    pub fn new(title: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(FIELD_TITLE.to_string(), ProtectedString::plain(title));
        Self {
            uuid: Uuid::new_v4(),
            parent_group: None,
            icon_id: 0,
            custom_icon: None,
            foreground_color: String::new(),
            background_color: String::new(),
            override_url: String::new(),
            quality_check: true,
            tags: Vec::new(),
            previous_parent_group: None,
            times: Times::now(),
            fields,
            binaries: BTreeMap::new(),
            auto_type: AutoType::default(),
            custom_data: CustomData::new(),
            history: Vec::new(),
        }
    }

    /// Entry with no fields at all (used when loading)
    pub(crate) fn empty(uuid: Uuid) -> Self {
        let mut entry = Self::new("");
        entry.uuid = uuid;
        entry.fields.clear();
        entry
    }

    pub fn field(&self, name: &str) -> Option<&ProtectedString> {
        self.fields.get(name)
    }

    /// Value of a field, if set
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.as_str())
    }

    /// Set a string field.
    ///
    /// A field the database's memory-protection policy covers is written
    /// protected whatever `protected` says, so after a save and reload it
    /// reads back with the flag set.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>, protected: bool) {
        self.fields
            .insert(name.into(), ProtectedString::new(value, protected));
        self.times.touch(true);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<ProtectedString> {
        self.fields.remove(name)
    }

    pub fn title(&self) -> &str {
        self.get(FIELD_TITLE).unwrap_or_default()
    }

    pub fn username(&self) -> &str {
        self.get(FIELD_USERNAME).unwrap_or_default()
    }

    pub fn url(&self) -> &str {
        self.get(FIELD_URL).unwrap_or_default()
    }

    pub fn notes(&self) -> &str {
        self.get(FIELD_NOTES).unwrap_or_default()
    }

    /// Get the password (if set)
    pub fn password(&self) -> Option<&str> {
        self.get(FIELD_PASSWORD)
    }

    /// Set the password; always stored protected
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.set_field(FIELD_PASSWORD, password, true);
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        self.times.is_expired()
    }

    /// Update the accessed timestamp
    pub fn touch(&mut self) {
        self.times.touch(false);
    }

    /// Snapshot the current state into the history list, dropping the oldest
    /// snapshots beyond `max_items` (negative keeps everything).
    ///
    /// Only the item count is bounded. `Meta::history_max_size` is carried
    /// through load and save but never enforced.
    pub fn push_history(&mut self, max_items: i32) {
        let mut snapshot = self.clone();
        snapshot.history.clear();
        snapshot.parent_group = None;
        self.history.push(snapshot);

        if let Ok(max) = usize::try_from(max_items) {
            let excess = self.history.len().saturating_sub(max);
            self.history.drain(..excess);
        }
    }
}

/// Split a tag string; KeePass uses semicolons but some files use commas
pub(crate) fn split_tags(tags: &str) -> Vec<String> {
    let separator = if tags.contains(';') { ';' } else { ',' };
    tags.split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn join_tags(tags: &[String]) -> String {
    tags.join(";")
}

/// Builder for creating entries
pub struct EntryBuilder {
    entry: Entry,
}

impl EntryBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            entry: Entry::new(title),
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.entry.set_field(FIELD_USERNAME, username, false);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.entry.set_password(password);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.entry.set_field(FIELD_URL, url, false);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.entry.set_field(FIELD_NOTES, notes, false);
        self
    }

    pub fn custom_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entry.set_field(key, value, false);
        self
    }

    pub fn protected_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entry.set_field(key, value, true);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.entry.tags.push(tag.into());
        self
    }

    pub fn parent_group(mut self, group_uuid: Uuid) -> Self {
        self.entry.parent_group = Some(group_uuid);
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.entry.times.expiry = expires;
        self.entry.times.expires = true;
        self
    }

    pub fn build(self) -> Entry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = Entry::new("Test Entry");
        assert_eq!(entry.title(), "Test Entry");
        assert!(entry.password().is_none());
        assert!(entry.quality_check);
    }

    #[test]
    fn test_entry_builder() {
        let entry = EntryBuilder::new("GitHub")
            .username("user@example.com")
            .password("secret123")
            .url("https://github.com")
            .notes("My GitHub account")
            .tag("work")
            .tag("dev")
            .custom_field("2FA", "enabled")
            .protected_field("PIN", "1234")
            .build();

        assert_eq!(entry.title(), "GitHub");
        assert_eq!(entry.username(), "user@example.com");
        assert_eq!(entry.password(), Some("secret123"));
        assert!(entry.field(FIELD_PASSWORD).unwrap().is_protected());
        assert_eq!(entry.url(), "https://github.com");
        assert_eq!(entry.tags, vec!["work", "dev"]);
        assert_eq!(entry.get("2FA"), Some("enabled"));
        assert!(entry.field("PIN").unwrap().is_protected());
    }

    #[test]
    fn test_entry_expiry() {
        let mut entry = Entry::new("Test");
        assert!(!entry.is_expired());

        entry.times.expiry = Utc::now() - chrono::Duration::hours(1);
        entry.times.expires = true;
        assert!(entry.is_expired());

        entry.times.expiry = Utc::now() + chrono::Duration::hours(1);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_history_is_bounded_and_flat() {
        let mut entry = Entry::new("v1");
        entry.push_history(2);
        entry.set_field(FIELD_TITLE, "v2", false);
        entry.push_history(2);
        entry.set_field(FIELD_TITLE, "v3", false);
        entry.push_history(2);

        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[0].title(), "v2");
        assert_eq!(entry.history[1].title(), "v3");
        assert!(entry.history.iter().all(|h| h.history.is_empty()));
    }

    #[test]
    fn test_history_size_is_not_capped() {
        let mut entry = Entry::new("big");
        entry.set_field(FIELD_NOTES, "x".repeat(64 * 1024), false);
        for _ in 0..4 {
            entry.push_history(-1);
        }
        assert_eq!(entry.history.len(), 4);
        assert!(entry.history.iter().all(|h| h.notes().len() == 64 * 1024));
    }

    #[test]
    fn test_tag_splitting() {
        assert_eq!(split_tags("a;b ; c"), vec!["a", "b", "c"]);
        assert_eq!(split_tags("x, y"), vec!["x", "y"]);
        assert!(split_tags("").is_empty());
        assert_eq!(join_tags(&split_tags("a;b")), "a;b");
    }
}
