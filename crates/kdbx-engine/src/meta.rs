//! Database-wide metadata stored in the `Meta` element

use crate::times;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Standard string field names
pub const FIELD_TITLE: &str = "Title";
pub const FIELD_USERNAME: &str = "UserName";
pub const FIELD_PASSWORD: &str = "Password";
pub const FIELD_URL: &str = "URL";
pub const FIELD_NOTES: &str = "Notes";

/// Which standard fields are always written protected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryProtection {
    pub protect_title: bool,
    pub protect_username: bool,
    pub protect_password: bool,
    pub protect_url: bool,
    pub protect_notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self {
            protect_title: false,
            protect_username: false,
            protect_password: true,
            protect_url: false,
            protect_notes: false,
        }
    }
}

impl MemoryProtection {
    pub fn protects(&self, field: &str) -> bool {
        match field {
            FIELD_TITLE => self.protect_title,
            FIELD_USERNAME => self.protect_username,
            FIELD_PASSWORD => self.protect_password,
            FIELD_URL => self.protect_url,
            FIELD_NOTES => self.protect_notes,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomIcon {
    pub uuid: Uuid,
    pub data: Vec<u8>,
    /// KDBX 4.1
    pub name: Option<String>,
    /// KDBX 4.1
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDataItem {
    pub value: String,
    /// KDBX 4.1
    pub last_modified: Option<DateTime<Utc>>,
}

impl CustomDataItem {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            last_modified: None,
        }
    }
}

/// Plugin/application key-value data on the database, groups and entries
pub type CustomData = BTreeMap<String, CustomDataItem>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub generator: String,
    pub database_name: String,
    pub database_name_changed: DateTime<Utc>,
    pub database_description: String,
    pub database_description_changed: DateTime<Utc>,
    pub default_username: String,
    pub default_username_changed: DateTime<Utc>,
    pub maintenance_history_days: u32,
    pub color: String,
    pub master_key_changed: DateTime<Utc>,
    pub master_key_change_rec: i64,
    pub master_key_change_force: i64,
    pub memory_protection: MemoryProtection,
    pub custom_icons: Vec<CustomIcon>,
    pub recycle_bin_enabled: bool,
    pub recycle_bin_uuid: Uuid,
    pub recycle_bin_changed: DateTime<Utc>,
    pub entry_templates_group: Uuid,
    pub entry_templates_group_changed: DateTime<Utc>,
    /// Negative means unlimited
    pub history_max_items: i32,
    /// Bytes; negative means unlimited
    pub history_max_size: i64,
    pub last_selected_group: Uuid,
    pub last_top_visible_group: Uuid,
    pub custom_data: CustomData,
}

impl Default for Meta {
    fn default() -> Self {
        let now = times::now();
        Self {
            generator: "kdbx-engine".to_string(),
            database_name: String::new(),
            database_name_changed: now,
            database_description: String::new(),
            database_description_changed: now,
            default_username: String::new(),
            default_username_changed: now,
            maintenance_history_days: 365,
            color: String::new(),
            master_key_changed: now,
            master_key_change_rec: -1,
            master_key_change_force: -1,
            memory_protection: MemoryProtection::default(),
            custom_icons: Vec::new(),
            recycle_bin_enabled: true,
            recycle_bin_uuid: Uuid::nil(),
            recycle_bin_changed: now,
            entry_templates_group: Uuid::nil(),
            entry_templates_group_changed: now,
            history_max_items: 10,
            history_max_size: 6 * 1024 * 1024,
            last_selected_group: Uuid::nil(),
            last_top_visible_group: Uuid::nil(),
            custom_data: CustomData::new(),
        }
    }
}

impl Meta {
    pub fn custom_icon(&self, uuid: &Uuid) -> Option<&CustomIcon> {
        self.custom_icons.iter().find(|icon| icon.uuid == *uuid)
    }
}
