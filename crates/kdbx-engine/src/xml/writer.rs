//! Encode the document model as the XML body
//!
//! Protected values are XOR'd with the inner keystream in the order they are
//! emitted; the reader replays the same order.

use super::tags;
use crate::binary::ProtectedBinary;
use crate::crypto::keystream::InnerStream;
use crate::database::{Database, DeletedObject};
use crate::entry::{join_tags, AutoType, Entry};
use crate::error::{Error, Result};
use crate::group::Group;
use crate::header::FormatVersion;
use crate::meta::{CustomData, Meta};
use crate::protected::ProtectedString;
use crate::times::{self, Times};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::borrow::Cow;
use std::io::Write;
use uuid::Uuid;

/// Drop characters XML 1.0 cannot carry
fn xml_safe(text: &str) -> Cow<'_, str> {
    let valid = |c: char| {
        matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
    };
    if text.chars().all(valid) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| valid(*c)).collect())
    }
}

fn bool_text(value: bool) -> &'static str {
    if value {
        tags::TRUE
    } else {
        tags::FALSE
    }
}

fn uuid_text(uuid: &Uuid) -> String {
    BASE64.encode(uuid.as_bytes())
}

pub(crate) struct BodyWriter<'a, W: Write> {
    xml: Writer<W>,
    stream: &'a mut InnerStream,
    version: FormatVersion,
    /// gzip unprotected attachments (legacy `Meta/Binaries`)
    compress_binaries: bool,
}

/// Write the complete body for `db` at `version`. `header_hash` is embedded
/// in legacy files.
pub(crate) fn write_document<W: Write>(
    out: W,
    db: &Database,
    version: FormatVersion,
    stream: &mut InnerStream,
    header_hash: Option<&[u8; 32]>,
    compress_binaries: bool,
) -> Result<W> {
    let mut writer = BodyWriter {
        xml: Writer::new(out),
        stream,
        version,
        compress_binaries,
    };

    writer
        .xml
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    writer.start(tags::KEEPASS_FILE)?;
    writer.write_meta(db, header_hash)?;

    writer.start(tags::ROOT)?;
    writer.write_group(db, db.root_group())?;
    writer.write_deleted_objects(&db.deleted_objects)?;
    writer.end(tags::ROOT)?;

    writer.end(tags::KEEPASS_FILE)?;
    Ok(writer.xml.into_inner())
}

impl<W: Write> BodyWriter<'_, W> {
    fn legacy(&self) -> bool {
        self.version.is_legacy()
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.xml.write_event(Event::Start(BytesStart::new(name)))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.xml.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn element_with(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        if text.is_empty() {
            self.xml.write_event(Event::Empty(start))?;
        } else {
            self.xml.write_event(Event::Start(start))?;
            self.xml
                .write_event(Event::Text(BytesText::new(&xml_safe(text))))?;
            self.xml.write_event(Event::End(BytesEnd::new(name)))?;
        }
        Ok(())
    }

    fn text(&mut self, name: &str, text: &str) -> Result<()> {
        self.element_with(name, &[], text)
    }

    fn boolean(&mut self, name: &str, value: bool) -> Result<()> {
        self.text(name, bool_text(value))
    }

    fn nullable(&mut self, name: &str, value: Option<bool>) -> Result<()> {
        self.text(name, value.map_or(tags::NULL, bool_text))
    }

    fn number(&mut self, name: &str, value: impl ToString) -> Result<()> {
        self.text(name, &value.to_string())
    }

    fn uuid(&mut self, name: &str, uuid: &Uuid) -> Result<()> {
        self.text(name, &uuid_text(uuid))
    }

    fn date(&mut self, name: &str, time: &DateTime<Utc>) -> Result<()> {
        let legacy = self.legacy();
        self.text(name, &times::encode(time, legacy))
    }

    /// `<name Protected="True">base64(keystream ^ data)</name>`
    fn protected(&mut self, name: &str, attrs: &[(&str, &str)], data: &[u8]) -> Result<()> {
        let mut masked = data.to_vec();
        self.stream.process(&mut masked);
        let encoded = BASE64.encode(&masked);
        let mut all = vec![(tags::ATTR_PROTECTED, tags::TRUE)];
        all.extend_from_slice(attrs);
        self.element_with(name, &all, &encoded)
    }

    fn write_meta(&mut self, db: &Database, header_hash: Option<&[u8; 32]>) -> Result<()> {
        let meta: &Meta = &db.meta;
        self.start(tags::META)?;
        self.text(tags::GENERATOR, &meta.generator)?;
        if let (true, Some(hash)) = (self.legacy(), header_hash) {
            self.text(tags::HEADER_HASH, &BASE64.encode(hash))?;
        }
        self.text(tags::DATABASE_NAME, &meta.database_name)?;
        self.date(tags::DATABASE_NAME_CHANGED, &meta.database_name_changed)?;
        self.text(tags::DATABASE_DESCRIPTION, &meta.database_description)?;
        self.date(tags::DATABASE_DESCRIPTION_CHANGED, &meta.database_description_changed)?;
        self.text(tags::DEFAULT_USERNAME, &meta.default_username)?;
        self.date(tags::DEFAULT_USERNAME_CHANGED, &meta.default_username_changed)?;
        self.number(tags::MAINTENANCE_HISTORY_DAYS, meta.maintenance_history_days)?;
        self.text(tags::COLOR, &meta.color)?;
        self.date(tags::MASTER_KEY_CHANGED, &meta.master_key_changed)?;
        self.number(tags::MASTER_KEY_CHANGE_REC, meta.master_key_change_rec)?;
        self.number(tags::MASTER_KEY_CHANGE_FORCE, meta.master_key_change_force)?;

        let policy = &meta.memory_protection;
        self.start(tags::MEMORY_PROTECTION)?;
        self.boolean(tags::PROTECT_TITLE, policy.protect_title)?;
        self.boolean(tags::PROTECT_USERNAME, policy.protect_username)?;
        self.boolean(tags::PROTECT_PASSWORD, policy.protect_password)?;
        self.boolean(tags::PROTECT_URL, policy.protect_url)?;
        self.boolean(tags::PROTECT_NOTES, policy.protect_notes)?;
        self.end(tags::MEMORY_PROTECTION)?;

        if !meta.custom_icons.is_empty() {
            let v4_1 = self.version >= FormatVersion::KDBX_4_1;
            self.start(tags::CUSTOM_ICONS)?;
            for icon in &meta.custom_icons {
                self.start(tags::ICON)?;
                self.uuid(tags::UUID, &icon.uuid)?;
                self.text(tags::DATA, &BASE64.encode(&icon.data))?;
                if v4_1 {
                    if let Some(name) = &icon.name {
                        self.text(tags::NAME, name)?;
                    }
                    if let Some(time) = &icon.last_modified {
                        self.date(tags::LAST_MODIFICATION_TIME, time)?;
                    }
                }
                self.end(tags::ICON)?;
            }
            self.end(tags::CUSTOM_ICONS)?;
        }

        self.boolean(tags::RECYCLE_BIN_ENABLED, meta.recycle_bin_enabled)?;
        self.uuid(tags::RECYCLE_BIN_UUID, &meta.recycle_bin_uuid)?;
        self.date(tags::RECYCLE_BIN_CHANGED, &meta.recycle_bin_changed)?;
        self.uuid(tags::ENTRY_TEMPLATES_GROUP, &meta.entry_templates_group)?;
        self.date(tags::ENTRY_TEMPLATES_GROUP_CHANGED, &meta.entry_templates_group_changed)?;
        self.number(tags::HISTORY_MAX_ITEMS, meta.history_max_items)?;
        self.number(tags::HISTORY_MAX_SIZE, meta.history_max_size)?;
        self.uuid(tags::LAST_SELECTED_GROUP, &meta.last_selected_group)?;
        self.uuid(tags::LAST_TOP_VISIBLE_GROUP, &meta.last_top_visible_group)?;

        if self.legacy() && !db.binaries.is_empty() {
            self.start(tags::BINARIES)?;
            for (id, binary) in db.binaries.iter().enumerate() {
                self.write_meta_binary(&id.to_string(), binary)?;
            }
            self.end(tags::BINARIES)?;
        }

        self.write_custom_data(&meta.custom_data)?;
        self.end(tags::META)
    }

    fn write_meta_binary(&mut self, id: &str, binary: &ProtectedBinary) -> Result<()> {
        let data = binary.to_vec()?;
        if binary.is_protected() {
            return self.protected(tags::BINARY, &[(tags::ATTR_ID, id)], &data);
        }
        if self.compress_binaries {
            let mut gz = GzEncoder::new(Vec::new(), flate2::Compression::default());
            gz.write_all(&data)?;
            let packed = gz.finish()?;
            let attrs = [(tags::ATTR_ID, id), (tags::ATTR_COMPRESSED, tags::TRUE)];
            self.element_with(tags::BINARY, &attrs, &BASE64.encode(packed))
        } else {
            self.element_with(tags::BINARY, &[(tags::ATTR_ID, id)], &BASE64.encode(&*data))
        }
    }

    fn write_custom_data(&mut self, data: &CustomData) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let v4_1 = self.version >= FormatVersion::KDBX_4_1;
        self.start(tags::CUSTOM_DATA)?;
        for (key, item) in data {
            self.start(tags::ITEM)?;
            self.text(tags::KEY, key)?;
            self.text(tags::VALUE, &item.value)?;
            if let (true, Some(time)) = (v4_1, &item.last_modified) {
                self.date(tags::LAST_MODIFICATION_TIME, time)?;
            }
            self.end(tags::ITEM)?;
        }
        self.end(tags::CUSTOM_DATA)
    }

    fn write_times(&mut self, t: &Times) -> Result<()> {
        self.start(tags::TIMES)?;
        self.date(tags::CREATION_TIME, &t.creation)?;
        self.date(tags::LAST_MODIFICATION_TIME, &t.last_modification)?;
        self.date(tags::LAST_ACCESS_TIME, &t.last_access)?;
        self.date(tags::EXPIRY_TIME, &t.expiry)?;
        self.boolean(tags::EXPIRES, t.expires)?;
        self.number(tags::USAGE_COUNT, t.usage_count)?;
        self.date(tags::LOCATION_CHANGED, &t.location_changed)?;
        self.end(tags::TIMES)
    }

    fn write_group(&mut self, db: &Database, group: &Group) -> Result<()> {
        let v4_1 = self.version >= FormatVersion::KDBX_4_1;
        self.start(tags::GROUP)?;
        self.uuid(tags::UUID, &group.uuid)?;
        self.text(tags::NAME, &group.name)?;
        self.text(tags::NOTES, &group.notes)?;
        self.number(tags::ICON_ID, group.icon_id)?;
        if let Some(icon) = &group.custom_icon {
            self.uuid(tags::CUSTOM_ICON_UUID, icon)?;
        }
        self.write_times(&group.times)?;
        self.boolean(tags::IS_EXPANDED, group.expanded)?;
        self.text(tags::DEFAULT_AUTO_TYPE_SEQUENCE, &group.default_auto_type_sequence)?;
        self.nullable(tags::ENABLE_AUTO_TYPE, group.enable_auto_type)?;
        self.nullable(tags::ENABLE_SEARCHING, group.enable_searching)?;
        self.uuid(tags::LAST_TOP_VISIBLE_ENTRY, &group.last_top_visible_entry)?;
        if v4_1 {
            if !group.tags.is_empty() {
                self.text(tags::TAGS, &join_tags(&group.tags))?;
            }
            if let Some(previous) = &group.previous_parent_group {
                self.uuid(tags::PREVIOUS_PARENT_GROUP, previous)?;
            }
        }
        if !self.legacy() {
            self.write_custom_data(&group.custom_data)?;
        }

        for uuid in &group.entries {
            let entry = db.get_entry(uuid).ok_or(Error::EntryNotFound(*uuid))?;
            self.write_entry(db, entry, false)?;
        }
        for uuid in &group.children {
            let child = db.get_group(uuid).ok_or(Error::GroupNotFound(*uuid))?;
            self.write_group(db, child)?;
        }
        self.end(tags::GROUP)
    }

    fn write_entry(&mut self, db: &Database, entry: &Entry, in_history: bool) -> Result<()> {
        let v4_1 = self.version >= FormatVersion::KDBX_4_1;
        self.start(tags::ENTRY)?;
        self.uuid(tags::UUID, &entry.uuid)?;
        self.number(tags::ICON_ID, entry.icon_id)?;
        if let Some(icon) = &entry.custom_icon {
            self.uuid(tags::CUSTOM_ICON_UUID, icon)?;
        }
        self.text(tags::FOREGROUND_COLOR, &entry.foreground_color)?;
        self.text(tags::BACKGROUND_COLOR, &entry.background_color)?;
        self.text(tags::OVERRIDE_URL, &entry.override_url)?;
        if v4_1 && !entry.quality_check {
            self.boolean(tags::QUALITY_CHECK, false)?;
        }
        self.text(tags::TAGS, &join_tags(&entry.tags))?;
        if let (true, Some(previous)) = (v4_1, &entry.previous_parent_group) {
            self.uuid(tags::PREVIOUS_PARENT_GROUP, previous)?;
        }
        self.write_times(&entry.times)?;

        for (key, value) in &entry.fields {
            self.write_string(db, key, value)?;
        }
        for (key, index) in &entry.binaries {
            self.start(tags::BINARY)?;
            self.text(tags::KEY, key)?;
            let reference = index.to_string();
            self.element_with(tags::VALUE, &[(tags::ATTR_REF, reference.as_str())], "")?;
            self.end(tags::BINARY)?;
        }
        self.write_auto_type(&entry.auto_type)?;
        if !self.legacy() {
            self.write_custom_data(&entry.custom_data)?;
        }

        if !in_history {
            self.start(tags::HISTORY)?;
            for old in &entry.history {
                self.write_entry(db, old, true)?;
            }
            self.end(tags::HISTORY)?;
        }
        self.end(tags::ENTRY)
    }

    fn write_string(&mut self, db: &Database, key: &str, value: &ProtectedString) -> Result<()> {
        self.start(tags::STRING)?;
        self.text(tags::KEY, key)?;
        if value.is_protected() || db.meta.memory_protection.protects(key) {
            self.protected(tags::VALUE, &[], value.as_str().as_bytes())?;
        } else {
            self.text(tags::VALUE, value.as_str())?;
        }
        self.end(tags::STRING)
    }

    fn write_auto_type(&mut self, auto_type: &AutoType) -> Result<()> {
        self.start(tags::AUTO_TYPE)?;
        self.boolean(tags::ENABLED, auto_type.enabled)?;
        self.number(tags::OBFUSCATION, auto_type.obfuscation)?;
        if !auto_type.default_sequence.is_empty() {
            self.text(tags::DEFAULT_SEQUENCE, &auto_type.default_sequence)?;
        }
        for assoc in &auto_type.associations {
            self.start(tags::ASSOCIATION)?;
            self.text(tags::WINDOW, &assoc.window)?;
            self.text(tags::KEYSTROKE_SEQUENCE, &assoc.sequence)?;
            self.end(tags::ASSOCIATION)?;
        }
        self.end(tags::AUTO_TYPE)
    }

    fn write_deleted_objects(&mut self, deleted: &[DeletedObject]) -> Result<()> {
        self.start(tags::DELETED_OBJECTS)?;
        for object in deleted {
            self.start(tags::DELETED_OBJECT)?;
            self.uuid(tags::UUID, &object.uuid)?;
            self.date(tags::DELETION_TIME, &object.deletion_time)?;
            self.end(tags::DELETED_OBJECT)?;
        }
        self.end(tags::DELETED_OBJECTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::BinaryPool;
    use crate::config::EngineConfig;
    use crate::crypto::key::Credentials;
    use crate::crypto::keystream::InnerStreamAlgorithm;
    use crate::entry::EntryBuilder;
    use crate::xml::dom;
    use crate::xml::reader::read_document;
    use std::collections::HashMap;

    fn sample_db() -> Database {
        let mut db = Database::new("Writer", &Credentials::new().with_password("pw")).unwrap();
        let entry = EntryBuilder::new("Amazon")
            .username("frank")
            .password("12345")
            .url("http://www.amazon.com/")
            .notes("Comment")
            .build();
        db.add_entry(entry).unwrap();
        db
    }

    fn encode(db: &Database, version: FormatVersion, key: &[u8]) -> Vec<u8> {
        let mut stream = InnerStream::new(InnerStreamAlgorithm::ChaCha20, key);
        write_document(Vec::new(), db, version, &mut stream, Some(&[7u8; 32]), true).unwrap()
    }

    #[test]
    fn test_password_is_masked() {
        let xml = encode(&sample_db(), FormatVersion::KDBX_4_0, &[1u8; 64]);
        let text = String::from_utf8(xml).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("frank"));
        assert!(!text.contains("12345"));
        assert!(text.contains(r#"<Value Protected="True">"#));
        assert!(!text.contains(tags::HEADER_HASH));
    }

    #[test]
    fn test_legacy_embeds_header_hash() {
        let xml = encode(&sample_db(), FormatVersion::KDBX_3_1, &[1u8; 64]);
        let root = dom::parse(&xml).unwrap();
        let meta = root.child(tags::META).unwrap();
        assert_eq!(
            meta.child(tags::HEADER_HASH).unwrap().text,
            BASE64.encode([7u8; 32])
        );
    }

    #[test]
    fn test_reader_recovers_protected_values() {
        let db = sample_db();
        let key = [9u8; 64];
        let xml = encode(&db, FormatVersion::KDBX_4_0, &key);

        let mut stream = InnerStream::new(InnerStreamAlgorithm::ChaCha20, &key);
        let mut pool = BinaryPool::new();
        let doc = read_document(&xml, &mut stream, &mut pool, HashMap::new(), &EngineConfig::default())
            .unwrap();
        let entry = doc.entries.values().next().unwrap();
        assert_eq!(entry.password(), Some("12345"));
        assert!(entry.field("Password").unwrap().is_protected());
        assert_eq!(entry.username(), "frank");
    }

    #[test]
    fn test_policy_protected_fields_read_back_protected() {
        let mut db = sample_db();
        db.meta.memory_protection.protect_url = true;
        let uuid = *db.entries.keys().next().unwrap();
        let entry = db.get_entry_mut(&uuid).unwrap();
        entry.set_field("Password", "12345", false);
        assert!(!entry.field("Password").unwrap().is_protected());

        let key = [5u8; 64];
        let xml = encode(&db, FormatVersion::KDBX_4_0, &key);
        let mut stream = InnerStream::new(InnerStreamAlgorithm::ChaCha20, &key);
        let mut pool = BinaryPool::new();
        let doc = read_document(&xml, &mut stream, &mut pool, HashMap::new(), &EngineConfig::default())
            .unwrap();
        let entry = doc.entries.values().next().unwrap();
        assert!(entry.field("Password").unwrap().is_protected());
        assert!(entry.field("URL").unwrap().is_protected());
        assert!(!entry.field("UserName").unwrap().is_protected());
        assert_eq!(entry.url(), "http://www.amazon.com/");
    }

    #[test]
    fn test_invalid_characters_are_dropped() {
        assert_eq!(xml_safe("a\u{1}b\tc"), "ab\tc");
        assert_eq!(xml_safe("emoji \u{1F600}"), "emoji \u{1F600}");
        assert!(matches!(xml_safe("plain"), Cow::Borrowed(_)));
    }
}
