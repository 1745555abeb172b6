//! Decode the XML body into the document model
//!
//! Elements are visited strictly in document order: protected values are
//! XOR'd with the inner keystream as they are met, so skipping or reordering
//! a protected value would corrupt every one after it.

use super::dom::{self, Element};
use super::tags;
use crate::binary::{BinaryPool, ProtectedBinary};
use crate::config::EngineConfig;
use crate::crypto::keystream::InnerStream;
use crate::database::DeletedObject;
use crate::entry::{split_tags, AutoType, AutoTypeAssociation, Entry};
use crate::error::{Error, Result};
use crate::group::Group;
use crate::meta::{CustomData, CustomDataItem, CustomIcon, MemoryProtection, Meta};
use crate::protected::ProtectedString;
use crate::times::{self, Times};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use uuid::Uuid;

/// Everything the body carries besides the header-level settings
#[derive(Debug)]
pub(crate) struct Document {
    pub meta: Meta,
    pub root_group: Uuid,
    pub groups: HashMap<Uuid, Group>,
    pub entries: HashMap<Uuid, Entry>,
    pub deleted_objects: Vec<DeletedObject>,
    /// Legacy files record the header SHA-256 in `Meta`
    pub header_hash: Option<Vec<u8>>,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedDocument(msg.into())
}

fn parse_bool(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(tags::TRUE)
}

fn parse_nullable_bool(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case(tags::NULL) {
        None
    } else {
        Some(parse_bool(text))
    }
}

fn parse_number<T: std::str::FromStr + Default>(el: &Element) -> Result<T> {
    let text = el.text.trim();
    if text.is_empty() {
        return Ok(T::default());
    }
    text.parse()
        .map_err(|_| malformed(format!("Invalid number in <{}>: '{}'", el.name, text)))
}

fn parse_uuid(el: &Element) -> Result<Uuid> {
    let text = el.text.trim();
    if text.is_empty() {
        return Ok(Uuid::nil());
    }
    let bytes = BASE64
        .decode(text)
        .map_err(|_| malformed(format!("Invalid UUID in <{}>", el.name)))?;
    Uuid::from_slice(&bytes).map_err(|_| malformed(format!("Invalid UUID in <{}>", el.name)))
}

fn parse_optional_uuid(el: &Element) -> Result<Option<Uuid>> {
    Ok(Some(parse_uuid(el)?).filter(|u| !u.is_nil()))
}

fn parse_date(el: &Element) -> Result<DateTime<Utc>> {
    times::decode(&el.text)
}

fn parse_base64(el: &Element) -> Result<Vec<u8>> {
    BASE64
        .decode(el.text.trim())
        .map_err(|_| malformed(format!("Invalid base64 in <{}>", el.name)))
}

fn has_true_attr(el: &Element, name: &str) -> bool {
    el.attr(name).is_some_and(parse_bool)
}

struct BodyReader<'a> {
    stream: &'a mut InnerStream,
    binaries: &'a mut BinaryPool,
    /// Reference id as written in the file -> pool index
    binary_refs: HashMap<usize, usize>,
    config: &'a EngineConfig,
    groups: HashMap<Uuid, Group>,
    entries: HashMap<Uuid, Entry>,
}

/// Decode a complete body. `binary_refs` maps inner-header binary positions
/// to pool indices; legacy files fill it from `Meta/Binaries` instead.
pub(crate) fn read_document(
    xml: &[u8],
    stream: &mut InnerStream,
    binaries: &mut BinaryPool,
    binary_refs: HashMap<usize, usize>,
    config: &EngineConfig,
) -> Result<Document> {
    let root = dom::parse(xml)?;
    if root.name != tags::KEEPASS_FILE {
        return Err(malformed(format!("Unexpected root element <{}>", root.name)));
    }

    let mut reader = BodyReader {
        stream,
        binaries,
        binary_refs,
        config,
        groups: HashMap::new(),
        entries: HashMap::new(),
    };

    let mut meta = None;
    let mut header_hash = None;
    let mut root_group = None;
    let mut deleted_objects = Vec::new();

    for child in &root.children {
        match child.name.as_str() {
            tags::META => {
                let (m, hash) = reader.read_meta(child)?;
                meta = Some(m);
                header_hash = hash;
            }
            tags::ROOT => {
                for item in &child.children {
                    match item.name.as_str() {
                        tags::GROUP if root_group.is_none() => {
                            root_group = Some(reader.read_group(item, None)?);
                        }
                        tags::GROUP => return Err(malformed("More than one root group")),
                        tags::DELETED_OBJECTS => {
                            deleted_objects = read_deleted_objects(item)?;
                        }
                        other => tracing::debug!(element = other, "Skipping unknown element in Root"),
                    }
                }
            }
            other => tracing::debug!(element = other, "Skipping unknown top-level element"),
        }
    }

    let root_group = root_group.ok_or_else(|| malformed("Document has no root group"))?;
    tracing::debug!(
        groups = reader.groups.len(),
        entries = reader.entries.len(),
        binaries = reader.binaries.len(),
        "Document decoded"
    );

    Ok(Document {
        meta: meta.unwrap_or_default(),
        root_group,
        groups: reader.groups,
        entries: reader.entries,
        deleted_objects,
        header_hash,
    })
}

fn read_deleted_objects(el: &Element) -> Result<Vec<DeletedObject>> {
    let mut out = Vec::new();
    for item in el.children_named(tags::DELETED_OBJECT) {
        let mut uuid = Uuid::nil();
        let mut deletion_time = times::now();
        for field in &item.children {
            match field.name.as_str() {
                tags::UUID => uuid = parse_uuid(field)?,
                tags::DELETION_TIME => deletion_time = parse_date(field)?,
                _ => {}
            }
        }
        out.push(DeletedObject {
            uuid,
            deletion_time,
        });
    }
    Ok(out)
}

fn read_times(el: &Element) -> Result<Times> {
    let mut t = Times::now();
    for field in &el.children {
        match field.name.as_str() {
            tags::CREATION_TIME => t.creation = parse_date(field)?,
            tags::LAST_MODIFICATION_TIME => t.last_modification = parse_date(field)?,
            tags::LAST_ACCESS_TIME => t.last_access = parse_date(field)?,
            tags::EXPIRY_TIME => t.expiry = parse_date(field)?,
            tags::EXPIRES => t.expires = parse_bool(&field.text),
            tags::USAGE_COUNT => t.usage_count = parse_number(field)?,
            tags::LOCATION_CHANGED => t.location_changed = parse_date(field)?,
            _ => {}
        }
    }
    Ok(t)
}

fn read_custom_data(el: &Element) -> Result<CustomData> {
    let mut data = CustomData::new();
    for item in el.children_named(tags::ITEM) {
        let mut key = None;
        let mut value = CustomDataItem::new("");
        for field in &item.children {
            match field.name.as_str() {
                tags::KEY => key = Some(field.text.clone()),
                tags::VALUE => value.value = field.text.clone(),
                tags::LAST_MODIFICATION_TIME => value.last_modified = Some(parse_date(field)?),
                _ => {}
            }
        }
        if let Some(key) = key {
            data.insert(key, value);
        }
    }
    Ok(data)
}

fn read_memory_protection(el: &Element) -> MemoryProtection {
    let mut policy = MemoryProtection::default();
    for field in &el.children {
        let on = parse_bool(&field.text);
        match field.name.as_str() {
            tags::PROTECT_TITLE => policy.protect_title = on,
            tags::PROTECT_USERNAME => policy.protect_username = on,
            tags::PROTECT_PASSWORD => policy.protect_password = on,
            tags::PROTECT_URL => policy.protect_url = on,
            tags::PROTECT_NOTES => policy.protect_notes = on,
            _ => {}
        }
    }
    policy
}

fn read_custom_icons(el: &Element) -> Result<Vec<CustomIcon>> {
    let mut icons = Vec::new();
    for item in el.children_named(tags::ICON) {
        let mut icon = CustomIcon {
            uuid: Uuid::nil(),
            data: Vec::new(),
            name: None,
            last_modified: None,
        };
        for field in &item.children {
            match field.name.as_str() {
                tags::UUID => icon.uuid = parse_uuid(field)?,
                tags::DATA => icon.data = parse_base64(field)?,
                tags::NAME => icon.name = Some(field.text.clone()),
                tags::LAST_MODIFICATION_TIME => icon.last_modified = Some(parse_date(field)?),
                _ => {}
            }
        }
        icons.push(icon);
    }
    Ok(icons)
}

fn read_auto_type(el: &Element) -> Result<AutoType> {
    let mut auto_type = AutoType::default();
    for field in &el.children {
        match field.name.as_str() {
            tags::ENABLED => auto_type.enabled = parse_bool(&field.text),
            tags::OBFUSCATION => auto_type.obfuscation = parse_number(field)?,
            tags::DEFAULT_SEQUENCE => auto_type.default_sequence = field.text.clone(),
            tags::ASSOCIATION => {
                let mut assoc = AutoTypeAssociation {
                    window: String::new(),
                    sequence: String::new(),
                };
                for part in &field.children {
                    match part.name.as_str() {
                        tags::WINDOW => assoc.window = part.text.clone(),
                        tags::KEYSTROKE_SEQUENCE => assoc.sequence = part.text.clone(),
                        _ => {}
                    }
                }
                auto_type.associations.push(assoc);
            }
            _ => {}
        }
    }
    Ok(auto_type)
}

impl BodyReader<'_> {
    /// Decode a `Protected="True"` payload, advancing the keystream
    fn unprotect(&mut self, el: &Element) -> Result<Vec<u8>> {
        let mut data = parse_base64(el)?;
        self.stream.process(&mut data);
        Ok(data)
    }

    fn read_meta(&mut self, el: &Element) -> Result<(Meta, Option<Vec<u8>>)> {
        let mut meta = Meta::default();
        let mut header_hash = None;

        for field in &el.children {
            match field.name.as_str() {
                tags::GENERATOR => meta.generator = field.text.clone(),
                tags::HEADER_HASH => header_hash = Some(parse_base64(field)?),
                tags::DATABASE_NAME => meta.database_name = field.text.clone(),
                tags::DATABASE_NAME_CHANGED => meta.database_name_changed = parse_date(field)?,
                tags::DATABASE_DESCRIPTION => meta.database_description = field.text.clone(),
                tags::DATABASE_DESCRIPTION_CHANGED => {
                    meta.database_description_changed = parse_date(field)?
                }
                tags::DEFAULT_USERNAME => meta.default_username = field.text.clone(),
                tags::DEFAULT_USERNAME_CHANGED => meta.default_username_changed = parse_date(field)?,
                tags::MAINTENANCE_HISTORY_DAYS => meta.maintenance_history_days = parse_number(field)?,
                tags::COLOR => meta.color = field.text.clone(),
                tags::MASTER_KEY_CHANGED => meta.master_key_changed = parse_date(field)?,
                tags::MASTER_KEY_CHANGE_REC => meta.master_key_change_rec = parse_number(field)?,
                tags::MASTER_KEY_CHANGE_FORCE => meta.master_key_change_force = parse_number(field)?,
                tags::MEMORY_PROTECTION => meta.memory_protection = read_memory_protection(field),
                tags::CUSTOM_ICONS => meta.custom_icons = read_custom_icons(field)?,
                tags::RECYCLE_BIN_ENABLED => meta.recycle_bin_enabled = parse_bool(&field.text),
                tags::RECYCLE_BIN_UUID => meta.recycle_bin_uuid = parse_uuid(field)?,
                tags::RECYCLE_BIN_CHANGED => meta.recycle_bin_changed = parse_date(field)?,
                tags::ENTRY_TEMPLATES_GROUP => meta.entry_templates_group = parse_uuid(field)?,
                tags::ENTRY_TEMPLATES_GROUP_CHANGED => {
                    meta.entry_templates_group_changed = parse_date(field)?
                }
                tags::HISTORY_MAX_ITEMS => meta.history_max_items = parse_number(field)?,
                tags::HISTORY_MAX_SIZE => meta.history_max_size = parse_number(field)?,
                tags::LAST_SELECTED_GROUP => meta.last_selected_group = parse_uuid(field)?,
                tags::LAST_TOP_VISIBLE_GROUP => meta.last_top_visible_group = parse_uuid(field)?,
                tags::BINARIES => self.read_meta_binaries(field)?,
                tags::CUSTOM_DATA => meta.custom_data = read_custom_data(field)?,
                other => tracing::debug!(element = other, "Skipping unknown Meta element"),
            }
        }
        Ok((meta, header_hash))
    }

    /// Legacy attachment table: `<Binary ID=".." [Compressed] [Protected]>`
    fn read_meta_binaries(&mut self, el: &Element) -> Result<()> {
        for item in el.children_named(tags::BINARY) {
            let id: usize = item
                .attr(tags::ATTR_ID)
                .and_then(|id| id.trim().parse().ok())
                .ok_or_else(|| malformed("Binary without a valid ID"))?;
            let binary = self.read_binary_value(item)?;
            let index = self.binaries.insert(binary);
            self.binary_refs.insert(id, index);
        }
        Ok(())
    }

    /// An inline binary payload, optionally gzip'd and/or protected
    fn read_binary_value(&mut self, el: &Element) -> Result<ProtectedBinary> {
        let protected = has_true_attr(el, tags::ATTR_PROTECTED);
        let mut data = if protected {
            self.unprotect(el)?
        } else {
            parse_base64(el)?
        };
        if has_true_attr(el, tags::ATTR_COMPRESSED) {
            let mut inflated = Vec::new();
            GzDecoder::new(data.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|_| malformed("Invalid compressed binary"))?;
            data = inflated;
        }
        ProtectedBinary::from_bytes(protected, data, self.config)
    }

    fn read_group(&mut self, el: &Element, parent: Option<Uuid>) -> Result<Uuid> {
        let mut group = Group::with_uuid(Uuid::new_v4(), "");
        group.parent = parent;

        // The UUID has to be known before children can point at it
        if let Some(uuid) = el.child(tags::UUID) {
            group.uuid = parse_uuid(uuid)?;
        }
        let uuid = group.uuid;

        for field in &el.children {
            match field.name.as_str() {
                tags::UUID => {}
                tags::NAME => group.name = field.text.clone(),
                tags::NOTES => group.notes = field.text.clone(),
                tags::ICON_ID => group.icon_id = parse_number(field)?,
                tags::CUSTOM_ICON_UUID => group.custom_icon = parse_optional_uuid(field)?,
                tags::TIMES => group.times = read_times(field)?,
                tags::IS_EXPANDED => group.expanded = parse_bool(&field.text),
                tags::DEFAULT_AUTO_TYPE_SEQUENCE => {
                    group.default_auto_type_sequence = field.text.clone()
                }
                tags::ENABLE_AUTO_TYPE => group.enable_auto_type = parse_nullable_bool(&field.text),
                tags::ENABLE_SEARCHING => group.enable_searching = parse_nullable_bool(&field.text),
                tags::LAST_TOP_VISIBLE_ENTRY => group.last_top_visible_entry = parse_uuid(field)?,
                tags::TAGS => group.tags = split_tags(&field.text),
                tags::PREVIOUS_PARENT_GROUP => {
                    group.previous_parent_group = parse_optional_uuid(field)?
                }
                tags::CUSTOM_DATA => group.custom_data = read_custom_data(field)?,
                tags::ENTRY => {
                    let entry = self.read_entry(field, Some(uuid), false)?;
                    group.entries.push(entry.uuid);
                    if self.entries.insert(entry.uuid, entry).is_some() {
                        return Err(malformed("Duplicate entry UUID"));
                    }
                }
                tags::GROUP => {
                    let child = self.read_group(field, Some(uuid))?;
                    group.children.push(child);
                }
                other => tracing::debug!(element = other, "Skipping unknown Group element"),
            }
        }

        if self.groups.insert(uuid, group).is_some() {
            return Err(malformed("Duplicate group UUID"));
        }
        Ok(uuid)
    }

    fn read_entry(&mut self, el: &Element, parent: Option<Uuid>, in_history: bool) -> Result<Entry> {
        let mut entry = Entry::empty(Uuid::new_v4());
        entry.parent_group = parent;

        for field in &el.children {
            match field.name.as_str() {
                tags::UUID => entry.uuid = parse_uuid(field)?,
                tags::ICON_ID => entry.icon_id = parse_number(field)?,
                tags::CUSTOM_ICON_UUID => entry.custom_icon = parse_optional_uuid(field)?,
                tags::FOREGROUND_COLOR => entry.foreground_color = field.text.clone(),
                tags::BACKGROUND_COLOR => entry.background_color = field.text.clone(),
                tags::OVERRIDE_URL => entry.override_url = field.text.clone(),
                tags::QUALITY_CHECK => entry.quality_check = parse_bool(&field.text),
                tags::TAGS => entry.tags = split_tags(&field.text),
                tags::PREVIOUS_PARENT_GROUP => {
                    entry.previous_parent_group = parse_optional_uuid(field)?
                }
                tags::TIMES => entry.times = read_times(field)?,
                tags::STRING => self.read_string(field, &mut entry.fields)?,
                tags::BINARY => self.read_entry_binary(field, &mut entry.binaries)?,
                tags::AUTO_TYPE => entry.auto_type = read_auto_type(field)?,
                tags::CUSTOM_DATA => entry.custom_data = read_custom_data(field)?,
                tags::HISTORY => {
                    for old in field.children_named(tags::ENTRY) {
                        // Still decoded so the keystream stays aligned
                        let snapshot = self.read_entry(old, None, true)?;
                        if in_history {
                            tracing::warn!("Discarding nested entry history");
                        } else {
                            entry.history.push(snapshot);
                        }
                    }
                }
                other => tracing::debug!(element = other, "Skipping unknown Entry element"),
            }
        }
        Ok(entry)
    }

    fn read_string(&mut self, el: &Element, fields: &mut BTreeMap<String, ProtectedString>) -> Result<()> {
        let mut key = None;
        let mut value = ProtectedString::default();
        for part in &el.children {
            match part.name.as_str() {
                tags::KEY => key = Some(part.text.clone()),
                tags::VALUE if has_true_attr(part, tags::ATTR_PROTECTED) => {
                    let plain = self.unprotect(part)?;
                    let text = String::from_utf8(plain)
                        .map_err(|_| malformed("Protected value is not valid UTF-8"))?;
                    value = ProtectedString::protected(text);
                }
                tags::VALUE => value = ProtectedString::plain(part.text.clone()),
                _ => {}
            }
        }
        let key = key.ok_or_else(|| malformed("String without a Key"))?;
        fields.insert(key, value);
        Ok(())
    }

    fn read_entry_binary(&mut self, el: &Element, binaries: &mut BTreeMap<String, usize>) -> Result<()> {
        let mut key = None;
        let mut index = None;
        for part in &el.children {
            match part.name.as_str() {
                tags::KEY => key = Some(part.text.clone()),
                tags::VALUE => match part.attr(tags::ATTR_REF) {
                    Some(reference) => {
                        let id: usize = reference
                            .trim()
                            .parse()
                            .map_err(|_| malformed("Invalid binary reference"))?;
                        let pooled = self
                            .binary_refs
                            .get(&id)
                            .ok_or_else(|| malformed(format!("Unknown binary reference {}", id)))?;
                        index = Some(*pooled);
                    }
                    None => {
                        let binary = self.read_binary_value(part)?;
                        index = Some(self.binaries.insert(binary));
                    }
                },
                _ => {}
            }
        }
        match (key, index) {
            (Some(key), Some(index)) => {
                binaries.insert(key, index);
                Ok(())
            }
            _ => Err(malformed("Incomplete entry binary")),
        }
    }
}
