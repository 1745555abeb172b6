//! The in-memory document: settings, metadata, the group/entry tree, tombstones
//! and the binary pool

use crate::binary::{BinaryPool, ProtectedBinary};
use crate::crypto::cipher::CipherAlgorithm;
use crate::crypto::kdf::{KdfAlgorithm, KdfParameters};
use crate::crypto::key::{CompositeKey, Credentials};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::header::{Compression, FormatVersion};
use crate::meta::{CustomData, Meta};
use crate::times;
use crate::variant::VariantDictionary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const RECYCLE_BIN_NAME: &str = "RecycleBin";
const RECYCLE_BIN_ICON: u32 = 43;

/// Container-level choices applied when the database is saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub cipher: CipherAlgorithm,
    pub compression: Compression,
    pub kdf: KdfParameters,
    /// Lowest version to write; features in use may raise it
    pub version: FormatVersion,
    pub public_custom_data: Option<VariantDictionary>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            cipher: CipherAlgorithm::Aes256,
            compression: Compression::Gzip,
            kdf: KdfParameters::default(),
            version: FormatVersion::KDBX_4_0,
            public_custom_data: None,
        }
    }
}

/// Record of a permanently deleted entry or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedObject {
    pub uuid: Uuid,
    pub deletion_time: DateTime<Utc>,
}

/// A KeePass database with entries and groups
#[derive(Debug)]
pub struct Database {
    pub settings: DatabaseSettings,
    pub meta: Meta,
    /// All entries indexed by UUID
    pub(crate) entries: HashMap<Uuid, Entry>,
    /// All groups indexed by UUID
    pub(crate) groups: HashMap<Uuid, Group>,
    /// Root group UUID
    pub(crate) root_group: Uuid,
    pub deleted_objects: Vec<DeletedObject>,
    pub binaries: BinaryPool,
    pub(crate) key: CompositeKey,
}

impl Database {
    /// Create a new empty database protected by the given credentials
    pub fn new(name: impl Into<String>, credentials: &Credentials) -> Result<Self> {
        let key = credentials.composite_key()?;
        let name = name.into();

        let root = Group::new(name.clone());
        let root_uuid = root.uuid;
        let mut groups = HashMap::new();
        groups.insert(root_uuid, root);

        let mut meta = Meta::default();
        meta.database_name = name;

        Ok(Self {
            settings: DatabaseSettings::default(),
            meta,
            entries: HashMap::new(),
            groups,
            root_group: root_uuid,
            deleted_objects: Vec::new(),
            binaries: BinaryPool::new(),
            key,
        })
    }

    /// Assemble a database from a decoded document
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        settings: DatabaseSettings,
        meta: Meta,
        root_group: Uuid,
        groups: HashMap<Uuid, Group>,
        entries: HashMap<Uuid, Entry>,
        deleted_objects: Vec<DeletedObject>,
        binaries: BinaryPool,
        key: CompositeKey,
    ) -> Self {
        Self {
            settings,
            meta,
            entries,
            groups,
            root_group,
            deleted_objects,
            binaries,
            key,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.database_name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.meta.database_name = name.into();
        self.meta.database_name_changed = times::now();
    }

    /// Replace the master key used for the next save
    pub fn set_credentials(&mut self, credentials: &Credentials) -> Result<()> {
        self.key = credentials.composite_key()?;
        self.meta.master_key_changed = times::now();
        Ok(())
    }

    /// Get the root group
    pub fn root_group(&self) -> &Group {
        &self.groups[&self.root_group]
    }

    /// Get all entries
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Get an entry by UUID
    pub fn get_entry(&self, uuid: &Uuid) -> Option<&Entry> {
        self.entries.get(uuid)
    }

    /// Get a mutable entry by UUID
    pub fn get_entry_mut(&mut self, uuid: &Uuid) -> Option<&mut Entry> {
        self.entries.get_mut(uuid)
    }

    /// Add an entry to its parent group, or the root group if it has none
    pub fn add_entry(&mut self, mut entry: Entry) -> Result<Uuid> {
        let entry_uuid = entry.uuid;
        if self.entries.contains_key(&entry_uuid) {
            return Err(Error::InvalidGroup(format!("Entry {} already exists", entry_uuid)));
        }

        let parent_uuid = *entry.parent_group.get_or_insert(self.root_group);
        let group = self
            .groups
            .get_mut(&parent_uuid)
            .ok_or(Error::GroupNotFound(parent_uuid))?;
        group.add_entry(entry_uuid);

        self.entries.insert(entry_uuid, entry);
        Ok(entry_uuid)
    }

    /// Replace an entry, keeping the previous state in its history
    pub fn update_entry(&mut self, uuid: &Uuid, mut entry: Entry) -> Result<()> {
        let old = self
            .entries
            .get_mut(uuid)
            .ok_or(Error::EntryNotFound(*uuid))?;

        old.push_history(self.meta.history_max_items);
        entry.uuid = *uuid;
        entry.parent_group = old.parent_group;
        entry.history = std::mem::take(&mut old.history);
        entry.times.touch(true);
        *old = entry;
        Ok(())
    }

    /// Permanently delete an entry, leaving a tombstone
    pub fn delete_entry(&mut self, uuid: &Uuid) -> Result<Entry> {
        let entry = self
            .entries
            .remove(uuid)
            .ok_or(Error::EntryNotFound(*uuid))?;

        // Remove from parent group
        if let Some(parent_uuid) = entry.parent_group {
            if let Some(group) = self.groups.get_mut(&parent_uuid) {
                group.remove_entry(uuid);
            }
        }

        self.add_tombstone(*uuid);
        Ok(entry)
    }

    /// Move an entry to another group
    pub fn move_entry(&mut self, uuid: &Uuid, to_group: &Uuid) -> Result<()> {
        if !self.groups.contains_key(to_group) {
            return Err(Error::GroupNotFound(*to_group));
        }
        let entry = self
            .entries
            .get_mut(uuid)
            .ok_or(Error::EntryNotFound(*uuid))?;
        let from = entry.parent_group.replace(*to_group);
        if from == Some(*to_group) {
            return Ok(());
        }
        entry.previous_parent_group = from;
        entry.times.location_changed = times::now();

        if let Some(from) = from.and_then(|f| self.groups.get_mut(&f)) {
            from.remove_entry(uuid);
        }
        if let Some(to) = self.groups.get_mut(to_group) {
            to.add_entry(*uuid);
        }
        Ok(())
    }

    /// Get all groups
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Get a group by UUID
    pub fn get_group(&self, uuid: &Uuid) -> Option<&Group> {
        self.groups.get(uuid)
    }

    pub fn get_group_mut(&mut self, uuid: &Uuid) -> Option<&mut Group> {
        self.groups.get_mut(uuid)
    }

    /// Add a group under its parent, or the root group if it has none
    pub fn add_group(&mut self, mut group: Group) -> Result<Uuid> {
        let group_uuid = group.uuid;
        if self.groups.contains_key(&group_uuid) {
            return Err(Error::InvalidGroup(format!("Group {} already exists", group_uuid)));
        }

        let parent_uuid = *group.parent.get_or_insert(self.root_group);
        let parent = self
            .groups
            .get_mut(&parent_uuid)
            .ok_or(Error::GroupNotFound(parent_uuid))?;
        parent.add_child(group_uuid);

        self.groups.insert(group_uuid, group);
        Ok(group_uuid)
    }

    /// Move a group under another group
    pub fn move_group(&mut self, uuid: &Uuid, to_group: &Uuid) -> Result<()> {
        if uuid == &self.root_group {
            return Err(Error::InvalidGroup("Cannot move root group".to_string()));
        }
        if !self.groups.contains_key(uuid) {
            return Err(Error::GroupNotFound(*uuid));
        }
        if !self.groups.contains_key(to_group) {
            return Err(Error::GroupNotFound(*to_group));
        }
        if self.is_contained_in(to_group, uuid) {
            return Err(Error::InvalidGroup(
                "Cannot move a group into itself or its subgroups".to_string(),
            ));
        }

        let from = match self.groups.get_mut(uuid) {
            Some(group) => {
                let from = group.parent.replace(*to_group);
                group.previous_parent_group = from;
                group.times.location_changed = times::now();
                from
            }
            None => return Err(Error::GroupNotFound(*uuid)),
        };
        if let Some(from) = from.and_then(|f| self.groups.get_mut(&f)) {
            from.remove_child(uuid);
        }
        if let Some(to) = self.groups.get_mut(to_group) {
            to.add_child(*uuid);
        }
        Ok(())
    }

    /// Delete a group with everything below it.
    ///
    /// Without `permanent`, a group outside the recycle bin is moved into it
    /// instead (when the bin is enabled).
    pub fn delete_group(&mut self, uuid: &Uuid, permanent: bool) -> Result<()> {
        if uuid == &self.root_group {
            return Err(Error::InvalidGroup("Cannot delete root group".to_string()));
        }
        if !self.groups.contains_key(uuid) {
            return Err(Error::GroupNotFound(*uuid));
        }

        if !permanent && self.can_recycle(uuid) {
            let bin = self.ensure_recycle_bin()?;
            return self.move_group(uuid, &bin);
        }

        let group = self
            .groups
            .remove(uuid)
            .ok_or(Error::GroupNotFound(*uuid))?;

        // Remove from parent
        if let Some(parent_uuid) = group.parent {
            if let Some(parent) = self.groups.get_mut(&parent_uuid) {
                parent.remove_child(uuid);
            }
        }

        for entry_uuid in &group.entries {
            self.entries.remove(entry_uuid);
            self.add_tombstone(*entry_uuid);
        }

        // Recursively delete child groups
        for child_uuid in &group.children {
            self.delete_group(child_uuid, true)?;
        }

        if self.meta.recycle_bin_uuid == *uuid {
            self.meta.recycle_bin_uuid = Uuid::nil();
            self.meta.recycle_bin_changed = times::now();
        }
        self.add_tombstone(*uuid);
        Ok(())
    }

    fn add_tombstone(&mut self, uuid: Uuid) {
        self.deleted_objects.push(DeletedObject {
            uuid,
            deletion_time: times::now(),
        });
    }

    /// Whether `node` (an entry or group UUID) is `ancestor` or lies below it
    pub fn is_contained_in(&self, node: &Uuid, ancestor: &Uuid) -> bool {
        let mut current = match self.entries.get(node) {
            Some(entry) => entry.parent_group,
            None => Some(*node),
        };

        while let Some(uuid) = current {
            if uuid == *ancestor {
                return true;
            }
            current = self.groups.get(&uuid).and_then(|g| g.parent);
        }
        false
    }

    pub fn recycle_bin(&self) -> Option<&Group> {
        if !self.meta.recycle_bin_enabled {
            return None;
        }
        self.groups.get(&self.meta.recycle_bin_uuid)
    }

    /// Whether an entry or group may be moved to the recycle bin
    pub fn can_recycle(&self, node: &Uuid) -> bool {
        if !self.meta.recycle_bin_enabled {
            return false;
        }
        match self.recycle_bin() {
            Some(bin) => !self.is_contained_in(node, &bin.uuid),
            None => true,
        }
    }

    /// Move an entry into the recycle bin, creating it if necessary
    pub fn recycle_entry(&mut self, uuid: &Uuid) -> Result<()> {
        if !self.can_recycle(uuid) {
            return Err(Error::InvalidGroup("Entry cannot be recycled".to_string()));
        }
        let bin = self.ensure_recycle_bin()?;
        self.move_entry(uuid, &bin)
    }

    fn ensure_recycle_bin(&mut self) -> Result<Uuid> {
        if let Some(bin) = self.recycle_bin() {
            return Ok(bin.uuid);
        }

        let mut bin = Group::new(RECYCLE_BIN_NAME);
        bin.icon_id = RECYCLE_BIN_ICON;
        bin.enable_auto_type = Some(false);
        bin.enable_searching = Some(false);
        bin.expanded = false;
        let uuid = self.add_group(bin)?;

        self.meta.recycle_bin_uuid = uuid;
        self.meta.recycle_bin_changed = times::now();
        tracing::debug!(%uuid, "Created recycle bin");
        Ok(uuid)
    }

    /// Attach a payload to an entry, pooling it with equal content
    pub fn add_attachment(
        &mut self,
        entry: &Uuid,
        name: impl Into<String>,
        binary: ProtectedBinary,
    ) -> Result<usize> {
        let target = self
            .entries
            .get_mut(entry)
            .ok_or(Error::EntryNotFound(*entry))?;
        let index = self.binaries.insert(binary);
        target.binaries.insert(name.into(), index);
        target.times.touch(true);
        Ok(index)
    }

    /// Look up an entry attachment by name
    pub fn attachment(&self, entry: &Uuid, name: &str) -> Option<&ProtectedBinary> {
        let index = self.entries.get(entry)?.binaries.get(name)?;
        self.binaries.get(*index)
    }

    /// Detach an attachment; the payload leaves the pool on the next save
    pub fn remove_attachment(&mut self, entry: &Uuid, name: &str) -> Result<bool> {
        let target = self
            .entries
            .get_mut(entry)
            .ok_or(Error::EntryNotFound(*entry))?;
        Ok(target.binaries.remove(name).is_some())
    }

    /// Groups in serialization order: pre-order, children in document order
    pub(crate) fn groups_in_order(&self) -> Vec<&Group> {
        let mut out = Vec::with_capacity(self.groups.len());
        let mut stack = vec![self.root_group];
        while let Some(uuid) = stack.pop() {
            if let Some(group) = self.groups.get(&uuid) {
                out.push(group);
                stack.extend(group.children.iter().rev());
            }
        }
        out
    }

    /// Rebuild the binary pool from the live tree so indices are contiguous,
    /// in the order attachments are written, and unreferenced payloads dropped
    pub fn compact_binaries(&mut self) {
        let mut order = Vec::new();
        for group in self.groups_in_order() {
            for entry in group.entries.iter().filter_map(|u| self.entries.get(u)) {
                order.extend(entry.binaries.values());
                for old in &entry.history {
                    order.extend(old.binaries.values());
                }
            }
        }

        let remap = self.binaries.compact(&order);
        let renumber = |binaries: &mut std::collections::BTreeMap<String, usize>| {
            binaries.retain(|_, index| match remap.get(index) {
                Some(new) => {
                    *index = *new;
                    true
                }
                None => false,
            });
        };
        for entry in self.entries.values_mut() {
            renumber(&mut entry.binaries);
            for old in &mut entry.history {
                renumber(&mut old.binaries);
            }
        }
    }

    /// The lowest format version able to hold everything in this document,
    /// never below `settings.version`
    pub fn min_format_version(&self) -> FormatVersion {
        let has_dated = |data: &CustomData| data.values().any(|item| item.last_modified.is_some());

        let needs_4_1 = self.groups.values().any(|g| {
            !g.tags.is_empty() || g.previous_parent_group.is_some() || has_dated(&g.custom_data)
        }) || self.entries.values().any(|e| {
            std::iter::once(e).chain(e.history.iter()).any(|e| {
                !e.quality_check || e.previous_parent_group.is_some() || has_dated(&e.custom_data)
            })
        }) || self
            .meta
            .custom_icons
            .iter()
            .any(|icon| icon.name.is_some() || icon.last_modified.is_some())
            || has_dated(&self.meta.custom_data);

        let needs_4_0 = self.settings.cipher == CipherAlgorithm::ChaCha20
            || !matches!(self.settings.kdf.algorithm(), Ok(KdfAlgorithm::AesKdf))
            || self
                .settings
                .public_custom_data
                .as_ref()
                .is_some_and(|d| !d.is_empty())
            || self.groups.values().any(|g| !g.custom_data.is_empty())
            || self.entries.values().any(|e| !e.custom_data.is_empty());

        let required = if needs_4_1 {
            FormatVersion::KDBX_4_1
        } else if needs_4_0 {
            FormatVersion::KDBX_4_0
        } else {
            FormatVersion::KDBX_3_1
        };
        required.max(self.settings.version)
    }

    /// Case-insensitive substring search over every string field (names and
    /// values) and tags.
    ///
    /// Entries in groups with searching disabled, directly or inherited from
    /// an ancestor, are skipped, as is everything in the recycle bin. Results
    /// follow document order.
    pub fn search(&self, query: &str) -> Vec<&Entry> {
        let query = query.to_lowercase();
        let matches = |text: &str| text.to_lowercase().contains(&query);
        let bin = self.recycle_bin().map(|g| g.uuid);

        self.groups_in_order()
            .into_iter()
            .filter(|group| self.is_searchable(group))
            .filter(|group| !bin.is_some_and(|bin| self.is_contained_in(&group.uuid, &bin)))
            .flat_map(|group| group.entries.iter().filter_map(move |u| self.entries.get(u)))
            .filter(|entry| {
                entry
                    .fields
                    .iter()
                    .any(|(key, value)| matches(key) || matches(value.as_str()))
                    || entry.tags.iter().any(|t| matches(t))
            })
            .collect()
    }

    /// Resolve `enable_searching` through the parent chain; unset all the way
    /// up means searchable
    fn is_searchable(&self, group: &Group) -> bool {
        let mut current = Some(group);
        while let Some(g) = current {
            if let Some(enabled) = g.enable_searching {
                return enabled;
            }
            current = g.parent.and_then(|p| self.groups.get(&p));
        }
        true
    }

    /// Get entries in a specific group
    pub fn entries_in_group(&self, group_uuid: &Uuid) -> Vec<&Entry> {
        self.groups
            .get(group_uuid)
            .map(|group| {
                group
                    .entries
                    .iter()
                    .filter_map(|uuid| self.entries.get(uuid))
                    .collect()
            })
            .unwrap_or_default()
    }
}
