//! Group types and operations

use crate::meta::CustomData;
use crate::times::Times;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A group (folder) that contains entries and subgroups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier for this group
    pub uuid: Uuid,
    /// Group name
    pub name: String,
    /// Notes for this group
    pub notes: String,
    /// Standard icon index
    pub icon_id: u32,
    /// Custom icon from the database's icon list
    pub custom_icon: Option<Uuid>,
    pub times: Times,
    /// UUID of the parent group (None for root)
    pub parent: Option<Uuid>,
    /// UUIDs of child groups, in document order
    #[serde(default)]
    pub children: Vec<Uuid>,
    /// UUIDs of entries in this group, in document order
    #[serde(default)]
    pub entries: Vec<Uuid>,
    /// Whether this group is expanded in the UI
    pub expanded: bool,
    pub default_auto_type_sequence: String,
    /// `None` inherits from the parent group
    pub enable_auto_type: Option<bool>,
    /// `None` inherits from the parent group
    pub enable_searching: Option<bool>,
    pub last_top_visible_entry: Uuid,
    /// KDBX 4.1
    #[serde(default)]
    pub tags: Vec<String>,
    /// KDBX 4.1
    pub previous_parent_group: Option<Uuid>,
    #[serde(default)]
    pub custom_data: CustomData,
}

impl Group {
    /// Create a new group with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            notes: String::new(),
            icon_id: 48,
            custom_icon: None,
            times: Times::now(),
            parent: None,
            children: Vec::new(),
            entries: Vec::new(),
            expanded: true,
            default_auto_type_sequence: String::new(),
            enable_auto_type: None,
            enable_searching: None,
            last_top_visible_entry: Uuid::nil(),
            tags: Vec::new(),
            previous_parent_group: None,
            custom_data: CustomData::new(),
        }
    }

    /// Create a new group with a specific UUID (used when loading from a file)
    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        let mut group = Self::new(name);
        group.uuid = uuid;
        group
    }

    /// Add a child group UUID
    pub fn add_child(&mut self, child_uuid: Uuid) {
        if !self.children.contains(&child_uuid) {
            self.children.push(child_uuid);
            self.times.touch(true);
        }
    }

    /// Remove a child group UUID
    pub fn remove_child(&mut self, child_uuid: &Uuid) -> bool {
        match self.children.iter().position(|u| u == child_uuid) {
            Some(pos) => {
                self.children.remove(pos);
                self.times.touch(true);
                true
            }
            None => false,
        }
    }

    /// Add an entry UUID to this group
    pub fn add_entry(&mut self, entry_uuid: Uuid) {
        if !self.entries.contains(&entry_uuid) {
            self.entries.push(entry_uuid);
            self.times.touch(true);
        }
    }

    /// Remove an entry UUID from this group
    pub fn remove_entry(&mut self, entry_uuid: &Uuid) -> bool {
        match self.entries.iter().position(|u| u == entry_uuid) {
            Some(pos) => {
                self.entries.remove(pos);
                self.times.touch(true);
                true
            }
            None => false,
        }
    }

    /// Check if this is a root group (no parent)
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Builder for creating groups
pub struct GroupBuilder {
    group: Group,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            group: Group::new(name),
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.group.notes = notes.into();
        self
    }

    pub fn icon_id(mut self, icon_id: u32) -> Self {
        self.group.icon_id = icon_id;
        self
    }

    pub fn parent(mut self, parent_uuid: Uuid) -> Self {
        self.group.parent = Some(parent_uuid);
        self
    }

    pub fn expanded(mut self, expanded: bool) -> Self {
        self.group.expanded = expanded;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.group.tags.push(tag.into());
        self
    }

    pub fn enable_searching(mut self, enabled: bool) -> Self {
        self.group.enable_searching = Some(enabled);
        self
    }

    pub fn build(self) -> Group {
        self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_creation() {
        let group = Group::new("My Passwords");
        assert_eq!(group.name, "My Passwords");
        assert!(group.is_root());
        assert!(group.children.is_empty());
        assert!(group.entries.is_empty());
        assert_eq!(group.enable_auto_type, None);
    }

    #[test]
    fn test_group_builder() {
        let parent_uuid = Uuid::new_v4();
        let group = GroupBuilder::new("Work")
            .notes("Work-related passwords")
            .icon_id(1)
            .parent(parent_uuid)
            .expanded(false)
            .tag("office")
            .enable_searching(false)
            .build();

        assert_eq!(group.name, "Work");
        assert_eq!(group.notes, "Work-related passwords");
        assert_eq!(group.icon_id, 1);
        assert_eq!(group.parent, Some(parent_uuid));
        assert!(!group.expanded);
        assert_eq!(group.tags, vec!["office"]);
        assert_eq!(group.enable_searching, Some(false));
    }

    #[test]
    fn test_group_children() {
        let mut group = Group::new("Parent");
        let child_uuid = Uuid::new_v4();

        group.add_child(child_uuid);
        assert_eq!(group.children.len(), 1);

        // Adding the same child again does not duplicate it
        group.add_child(child_uuid);
        assert_eq!(group.children.len(), 1);

        assert!(group.remove_child(&child_uuid));
        assert!(group.children.is_empty());
        assert!(!group.remove_child(&child_uuid));
    }

    #[test]
    fn test_group_entries() {
        let mut group = Group::new("Parent");
        let entry_uuid = Uuid::new_v4();

        group.add_entry(entry_uuid);
        assert!(group.entries.contains(&entry_uuid));

        assert!(group.remove_entry(&entry_uuid));
        assert!(group.entries.is_empty());
    }
}
