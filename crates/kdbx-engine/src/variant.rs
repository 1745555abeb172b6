//! VariantDictionary: the typed key/value blob used for KDF parameters and
//! public custom data in KDBX 4 headers.
//!
//! Layout:
//! - u16 version (0x0100)
//! - entries until a terminator byte 0x00
//! - entry: u8 type, u32 key_len, [key], u32 value_len, [value]

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

const VERSION: u16 = 0x0100;
const VERSION_CRITICAL_MASK: u16 = 0xFF00;

const TYPE_END: u8 = 0x00;
const TYPE_UINT32: u8 = 0x04;
const TYPE_UINT64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT32: u8 = 0x0C;
const TYPE_INT64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTES: u8 = 0x42;

/// A single typed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl Variant {
    fn type_tag(&self) -> u8 {
        match self {
            Variant::UInt32(_) => TYPE_UINT32,
            Variant::UInt64(_) => TYPE_UINT64,
            Variant::Bool(_) => TYPE_BOOL,
            Variant::Int32(_) => TYPE_INT32,
            Variant::Int64(_) => TYPE_INT64,
            Variant::String(_) => TYPE_STRING,
            Variant::Bytes(_) => TYPE_BYTES,
        }
    }

    fn encode_value(&self) -> Vec<u8> {
        match self {
            Variant::UInt32(v) => v.to_le_bytes().to_vec(),
            Variant::UInt64(v) => v.to_le_bytes().to_vec(),
            Variant::Bool(v) => vec![u8::from(*v)],
            Variant::Int32(v) => v.to_le_bytes().to_vec(),
            Variant::Int64(v) => v.to_le_bytes().to_vec(),
            Variant::String(v) => v.as_bytes().to_vec(),
            Variant::Bytes(v) => v.clone(),
        }
    }

    fn decode_value(tag: u8, key: &str, value: &[u8]) -> Result<Self> {
        let expect_len = |len: usize| {
            if value.len() == len {
                Ok(())
            } else {
                Err(Error::MalformedHeader(format!(
                    "Dictionary item '{}' has length {}, expected {}",
                    key,
                    value.len(),
                    len
                )))
            }
        };

        let variant = match tag {
            TYPE_UINT32 => {
                expect_len(4)?;
                Variant::UInt32(LittleEndian::read_u32(value))
            }
            TYPE_UINT64 => {
                expect_len(8)?;
                Variant::UInt64(LittleEndian::read_u64(value))
            }
            TYPE_BOOL => {
                expect_len(1)?;
                Variant::Bool(value[0] != 0)
            }
            TYPE_INT32 => {
                expect_len(4)?;
                Variant::Int32(LittleEndian::read_i32(value))
            }
            TYPE_INT64 => {
                expect_len(8)?;
                Variant::Int64(LittleEndian::read_i64(value))
            }
            TYPE_STRING => Variant::String(String::from_utf8(value.to_vec()).map_err(|_| {
                Error::MalformedHeader(format!("Dictionary item '{}' is not UTF-8", key))
            })?),
            TYPE_BYTES => Variant::Bytes(value.to_vec()),
            other => {
                return Err(Error::MalformedHeader(format!(
                    "Unknown dictionary value type 0x{:02x}",
                    other
                )))
            }
        };
        Ok(variant)
    }
}

/// Ordered name -> typed value mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantDictionary {
    items: Vec<(String, Variant)>,
}

impl VariantDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace a value, keeping the original position of an existing key
    pub fn set(&mut self, key: impl Into<String>, value: Variant) {
        let key = key.into();
        match self.items.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.items.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Variant> {
        let pos = self.items.iter().position(|(k, _)| k == key)?;
        Some(self.items.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key) {
            Some(Variant::UInt32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(Variant::UInt64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key) {
            Some(Variant::Bytes(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Parse a serialized dictionary
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::MalformedHeader("Dictionary too short".to_string()));
        }

        let version = LittleEndian::read_u16(&data[0..2]);
        if version & VERSION_CRITICAL_MASK > VERSION & VERSION_CRITICAL_MASK {
            return Err(Error::UnsupportedVersion(format!(
                "Dictionary version 0x{:04x}",
                version
            )));
        }

        let mut pos = 2;
        let mut dict = VariantDictionary::new();

        loop {
            let tag = *data
                .get(pos)
                .ok_or_else(|| Error::MalformedHeader("Dictionary missing terminator".to_string()))?;
            pos += 1;

            if tag == TYPE_END {
                break;
            }

            let key = take_sized(data, &mut pos)?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| Error::MalformedHeader("Dictionary key is not UTF-8".to_string()))?;
            let value = take_sized(data, &mut pos)?;

            let variant = Variant::decode_value(tag, &key, value)?;
            dict.set(key, variant);
        }

        Ok(dict)
    }

    /// Serialize the dictionary
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&VERSION.to_le_bytes());

        for (key, value) in &self.items {
            let encoded = value.encode_value();
            out.push(value.type_tag());
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            out.extend_from_slice(&encoded);
        }

        out.push(TYPE_END);
        out
    }
}

fn take_sized<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let truncated = || Error::MalformedHeader("Truncated dictionary item".to_string());

    let len_bytes = data.get(*pos..*pos + 4).ok_or_else(truncated)?;
    let len = LittleEndian::read_u32(len_bytes) as usize;
    *pos += 4;

    let end = pos.checked_add(len).ok_or_else(truncated)?;
    let slice = data.get(*pos..end).ok_or_else(truncated)?;
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_dictionary() {
        let dict = VariantDictionary::new();
        let encoded = dict.encode();
        assert_eq!(encoded, vec![0x00, 0x01, 0x00]);
        assert_eq!(VariantDictionary::decode(&encoded).unwrap(), dict);
    }

    #[test]
    fn test_encoded_layout() {
        let mut dict = VariantDictionary::new();
        dict.set("P", Variant::UInt32(2));

        let mut expected = vec![0x00, 0x01, TYPE_UINT32];
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b'P');
        expected.extend_from_slice(&4u32.to_le_bytes());
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.push(TYPE_END);
        assert_eq!(dict.encode(), expected);
    }

    #[test]
    fn test_all_types_roundtrip() {
        let mut dict = VariantDictionary::new();
        dict.set("$UUID", Variant::Bytes(vec![1, 2, 3]));
        dict.set("R", Variant::UInt64(6000));
        dict.set("P", Variant::UInt32(2));
        dict.set("flag", Variant::Bool(true));
        dict.set("neg", Variant::Int32(-5));
        dict.set("big", Variant::Int64(i64::MIN));
        dict.set("name", Variant::String("kdbx".to_string()));

        let decoded = VariantDictionary::decode(&dict.encode()).unwrap();
        assert_eq!(decoded, dict);
        assert_eq!(decoded.get_u64("R"), Some(6000));
        assert_eq!(decoded.get_u32("P"), Some(2));
        assert_eq!(decoded.get_bytes("$UUID"), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_set_keeps_position() {
        let mut dict = VariantDictionary::new();
        dict.set("a", Variant::UInt32(1));
        dict.set("b", Variant::UInt32(2));
        dict.set("a", Variant::UInt32(3));

        let keys: Vec<&str> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(dict.get_u32("a"), Some(3));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let mut encoded = vec![0x00, 0x01];
        encoded.push(0x77);
        encoded.extend_from_slice(&1u32.to_le_bytes());
        encoded.push(b'x');
        encoded.extend_from_slice(&0u32.to_le_bytes());
        encoded.push(TYPE_END);

        assert!(matches!(
            VariantDictionary::decode(&encoded),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_newer_major_version_rejected() {
        let encoded = vec![0x00, 0x02, 0x00];
        assert!(matches!(
            VariantDictionary::decode(&encoded),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_truncated_and_wrong_length() {
        let mut dict = VariantDictionary::new();
        dict.set("I", Variant::UInt64(2));
        let mut encoded = dict.encode();
        encoded.truncate(encoded.len() - 3);
        assert!(VariantDictionary::decode(&encoded).is_err());

        // u32 item carrying 3 bytes
        let mut bad = vec![0x00, 0x01, TYPE_UINT32];
        bad.extend_from_slice(&1u32.to_le_bytes());
        bad.push(b'P');
        bad.extend_from_slice(&3u32.to_le_bytes());
        bad.extend_from_slice(&[1, 2, 3]);
        bad.push(TYPE_END);
        assert!(matches!(
            VariantDictionary::decode(&bad),
            Err(Error::MalformedHeader(_))
        ));
    }

    fn variant_strategy() -> impl Strategy<Value = Variant> {
        prop_oneof![
            any::<u32>().prop_map(Variant::UInt32),
            any::<u64>().prop_map(Variant::UInt64),
            any::<bool>().prop_map(Variant::Bool),
            any::<i32>().prop_map(Variant::Int32),
            any::<i64>().prop_map(Variant::Int64),
            ".{0,16}".prop_map(Variant::String),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Variant::Bytes),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_encode_identity(
            items in proptest::collection::vec(("[a-zA-Z$]{1,8}", variant_strategy()), 0..8)
        ) {
            let mut dict = VariantDictionary::new();
            for (k, v) in items {
                dict.set(k, v);
            }
            let encoded = dict.encode();
            let decoded = VariantDictionary::decode(&encoded).unwrap();
            prop_assert_eq!(&decoded, &dict);
            prop_assert_eq!(decoded.encode(), encoded);
        }
    }
}
