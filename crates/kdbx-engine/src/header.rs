//! Outer and inner KDBX headers
//!
//! Outer header layout:
//! - u32 signature 1 (0x9AA2D903)
//! - u32 signature 2 (0xB54BFB67)
//! - u32 version (major in the high 16 bits)
//! - records `[u8 id][u16 or u32 length][value]` until id 0
//!
//! Legacy (3.x) headers use u16 record lengths, current (4.x) ones u32.

use crate::binary::ProtectedBinary;
use crate::config::EngineConfig;
use crate::crypto::cipher::CipherAlgorithm;
use crate::crypto::kdf::KdfParameters;
use crate::crypto::keystream::InnerStreamAlgorithm;
use crate::error::{Error, Result};
use crate::stream::hmac::header_hmac;
use crate::variant::VariantDictionary;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const SIGNATURE_1: u32 = 0x9AA2_D903;
pub const SIGNATURE_2: u32 = 0xB54B_FB67;
/// KeePass 1.x (KDB) files carry this second signature
pub const SIGNATURE_2_KDB: u32 = 0xB54B_FB65;
/// KeePass 2.x pre-release files
pub const SIGNATURE_2_PRERELEASE: u32 = 0xB54B_FB66;

const END_OF_HEADER: &[u8] = b"\r\n\r\n";

mod field {
    pub const END: u8 = 0;
    pub const COMMENT: u8 = 1;
    pub const CIPHER_ID: u8 = 2;
    pub const COMPRESSION: u8 = 3;
    pub const MASTER_SEED: u8 = 4;
    pub const TRANSFORM_SEED: u8 = 5;
    pub const TRANSFORM_ROUNDS: u8 = 6;
    pub const ENCRYPTION_IV: u8 = 7;
    pub const PROTECTED_STREAM_KEY: u8 = 8;
    pub const STREAM_START_BYTES: u8 = 9;
    pub const INNER_RANDOM_STREAM_ID: u8 = 10;
    pub const KDF_PARAMETERS: u8 = 11;
    pub const PUBLIC_CUSTOM_DATA: u8 = 12;
}

mod inner_field {
    pub const END: u8 = 0;
    pub const STREAM_ID: u8 = 1;
    pub const STREAM_KEY: u8 = 2;
    pub const BINARY: u8 = 3;
}

/// File format version, major in the high 16 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FormatVersion(u32);

impl FormatVersion {
    pub const KDBX_3_1: FormatVersion = FormatVersion(0x0003_0001);
    pub const KDBX_4_0: FormatVersion = FormatVersion(0x0004_0000);
    pub const KDBX_4_1: FormatVersion = FormatVersion(0x0004_0001);

    pub fn from_raw(raw: u32) -> Self {
        FormatVersion(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn minor(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// KDBX 2.x/3.x
    pub fn is_legacy(self) -> bool {
        self.major() < 4
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::KDBX_4_0
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Compression {
    None,
    #[default]
    Gzip,
}

impl Compression {
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            other => Err(Error::UnsupportedAlgorithm(format!("compression {}", other))),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
        }
    }
}

/// Parsed outer header
#[derive(Debug, Clone)]
pub struct Header {
    pub version: FormatVersion,
    pub cipher: CipherAlgorithm,
    pub compression: Compression,
    pub master_seed: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    pub kdf: KdfParameters,
    pub public_custom_data: Option<VariantDictionary>,
    /// Legacy only
    pub inner_stream: Option<InnerStreamAlgorithm>,
    /// Legacy only
    pub protected_stream_key: Option<Zeroizing<Vec<u8>>>,
    /// Legacy only
    pub stream_start_bytes: Option<Vec<u8>>,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedHeader(msg.into())
}

/// Reads from the underlying stream while keeping a copy of every byte
struct Recorder<'a, R> {
    inner: &'a mut R,
    raw: Vec<u8>,
}

impl<R: Read> Recorder<'_, R> {
    fn take(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut *self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(malformed("Truncated header"));
        }
        self.raw.extend_from_slice(&buf);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(&self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(&self.take(4)?))
    }
}

fn check_len(name: &str, value: &[u8], len: usize) -> Result<()> {
    if value.len() != len {
        return Err(malformed(format!(
            "{} has length {}, expected {}",
            name,
            value.len(),
            len
        )));
    }
    Ok(())
}

fn u32_value(name: &str, value: &[u8]) -> Result<u32> {
    check_len(name, value, 4)?;
    Ok(LittleEndian::read_u32(value))
}

impl Header {
    /// Parse the outer header. Returns the header and the exact bytes it was
    /// read from, which are what the header hash and HMAC cover.
    pub fn read<R: Read>(reader: &mut R) -> Result<(Header, Vec<u8>)> {
        let mut rec = Recorder {
            inner: reader,
            raw: Vec::with_capacity(256),
        };

        let sig1 = rec.u32()?;
        let sig2 = rec.u32()?;
        if sig1 != SIGNATURE_1 {
            return Err(malformed("Not a KDBX file"));
        }
        match sig2 {
            SIGNATURE_2 => {}
            SIGNATURE_2_KDB => {
                return Err(Error::UnsupportedVersion(
                    "KeePass 1.x databases are not supported".to_string(),
                ))
            }
            SIGNATURE_2_PRERELEASE => {
                return Err(Error::UnsupportedVersion(
                    "KeePass 2.x pre-release databases are not supported".to_string(),
                ))
            }
            _ => return Err(malformed("Not a KDBX file")),
        }

        let version = FormatVersion(rec.u32()?);
        if version.major() > 4 || version.major() < 2 {
            return Err(Error::UnsupportedVersion(format!("KDBX {}", version)));
        }
        let legacy = version.is_legacy();
        tracing::debug!(%version, "Reading KDBX header");

        let mut cipher = None;
        let mut compression = Compression::None;
        let mut master_seed = None;
        let mut encryption_iv = None;
        let mut kdf = None;
        let mut public_custom_data = None;
        let mut transform_seed = None;
        let mut transform_rounds = None;
        let mut inner_stream = None;
        let mut protected_stream_key = None;
        let mut stream_start_bytes = None;

        loop {
            let id = rec.u8()?;
            let len = if legacy {
                rec.u16()? as usize
            } else {
                rec.u32()? as usize
            };
            let value = rec.take(len)?;

            match id {
                field::END => break,
                field::COMMENT => {}
                field::CIPHER_ID => {
                    check_len("Cipher id", &value, 16)?;
                    let uuid = Uuid::from_slice(&value).map_err(|_| malformed("Cipher id"))?;
                    cipher = Some(CipherAlgorithm::from_uuid(&uuid)?);
                }
                field::COMPRESSION => {
                    compression = Compression::from_id(u32_value("Compression flag", &value)?)?;
                }
                field::MASTER_SEED => {
                    check_len("Master seed", &value, 32)?;
                    master_seed = Some(value);
                }
                field::ENCRYPTION_IV => encryption_iv = Some(value),
                field::TRANSFORM_SEED if legacy => {
                    check_len("Transform seed", &value, 32)?;
                    transform_seed = Some(value);
                }
                field::TRANSFORM_ROUNDS if legacy => {
                    check_len("Transform rounds", &value, 8)?;
                    transform_rounds = Some(LittleEndian::read_u64(&value));
                }
                field::PROTECTED_STREAM_KEY if legacy => {
                    protected_stream_key = Some(Zeroizing::new(value));
                }
                field::STREAM_START_BYTES if legacy => {
                    check_len("Stream start bytes", &value, 32)?;
                    stream_start_bytes = Some(value);
                }
                field::INNER_RANDOM_STREAM_ID if legacy => {
                    inner_stream = Some(InnerStreamAlgorithm::from_id(u32_value(
                        "Inner stream id",
                        &value,
                    )?)?);
                }
                field::KDF_PARAMETERS if !legacy => {
                    kdf = Some(KdfParameters::from_dictionary(VariantDictionary::decode(&value)?)?);
                }
                field::PUBLIC_CUSTOM_DATA if !legacy => {
                    public_custom_data = Some(VariantDictionary::decode(&value)?);
                }
                other => tracing::warn!(field = other, "Skipping unknown header field"),
            }
        }

        let cipher = cipher.ok_or_else(|| malformed("Missing cipher id"))?;
        let master_seed = master_seed.ok_or_else(|| malformed("Missing master seed"))?;
        let encryption_iv = encryption_iv.ok_or_else(|| malformed("Missing encryption IV"))?;
        check_len("Encryption IV", &encryption_iv, cipher.iv_len())?;

        let kdf = if legacy {
            let seed = transform_seed.ok_or_else(|| malformed("Missing transform seed"))?;
            let rounds = transform_rounds.ok_or_else(|| malformed("Missing transform rounds"))?;
            KdfParameters::aes_with_seed(rounds, seed)
        } else {
            kdf.ok_or_else(|| malformed("Missing KDF parameters"))?
        };

        if legacy {
            if protected_stream_key.is_none() {
                return Err(malformed("Missing protected stream key"));
            }
            if stream_start_bytes.is_none() {
                return Err(malformed("Missing stream start bytes"));
            }
            if inner_stream.is_none() {
                return Err(malformed("Missing inner stream id"));
            }
        }

        tracing::debug!(?cipher, ?compression, kdf = %kdf.uuid(), "Header parsed");

        let header = Header {
            version,
            cipher,
            compression,
            master_seed,
            encryption_iv,
            kdf,
            public_custom_data,
            inner_stream,
            protected_stream_key,
            stream_start_bytes,
        };
        Ok((header, rec.raw))
    }

    /// Serialize the header. Returns its SHA-256 and, when an HMAC key is
    /// given, the header HMAC.
    pub fn write<W: Write>(
        &self,
        writer: &mut W,
        hmac_key: Option<&[u8; 64]>,
    ) -> Result<([u8; 32], Option<[u8; 32]>)> {
        let raw = self.to_bytes()?;
        writer.write_all(&raw)?;

        let hash: [u8; 32] = Sha256::digest(&raw).into();
        let hmac = hmac_key.map(|key| header_hmac(&raw, key));
        Ok((hash, hmac))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let legacy = self.version.is_legacy();
        let mut raw = Vec::with_capacity(256);
        raw.write_u32::<LittleEndian>(SIGNATURE_1)?;
        raw.write_u32::<LittleEndian>(SIGNATURE_2)?;
        raw.write_u32::<LittleEndian>(self.version.raw())?;

        let mut put = |id: u8, value: &[u8]| -> Result<()> {
            raw.write_u8(id)?;
            if legacy {
                let len = u16::try_from(value.len())
                    .map_err(|_| malformed("Header field too large"))?;
                raw.write_u16::<LittleEndian>(len)?;
            } else {
                raw.write_u32::<LittleEndian>(value.len() as u32)?;
            }
            raw.extend_from_slice(value);
            Ok(())
        };

        put(field::CIPHER_ID, self.cipher.uuid().as_bytes())?;
        put(field::COMPRESSION, &self.compression.id().to_le_bytes())?;
        put(field::MASTER_SEED, &self.master_seed)?;

        if legacy {
            let seed = self
                .kdf
                .seed()
                .ok_or_else(|| malformed("AES-KDF seed missing"))?;
            let rounds = self
                .kdf
                .aes_rounds()
                .ok_or_else(|| malformed("KDBX 3 requires AES-KDF"))?;
            put(field::TRANSFORM_SEED, seed)?;
            put(field::TRANSFORM_ROUNDS, &rounds.to_le_bytes())?;
        } else {
            put(field::KDF_PARAMETERS, &self.kdf.dictionary().encode())?;
        }

        put(field::ENCRYPTION_IV, &self.encryption_iv)?;

        if legacy {
            let key = self
                .protected_stream_key
                .as_ref()
                .ok_or_else(|| malformed("Missing protected stream key"))?;
            let start = self
                .stream_start_bytes
                .as_ref()
                .ok_or_else(|| malformed("Missing stream start bytes"))?;
            let stream = self
                .inner_stream
                .ok_or_else(|| malformed("Missing inner stream id"))?;
            put(field::PROTECTED_STREAM_KEY, key)?;
            put(field::STREAM_START_BYTES, start)?;
            put(field::INNER_RANDOM_STREAM_ID, &stream.id().to_le_bytes())?;
        } else if let Some(custom) = &self.public_custom_data {
            if !custom.is_empty() {
                put(field::PUBLIC_CUSTOM_DATA, &custom.encode())?;
            }
        }

        put(field::END, END_OF_HEADER)?;
        Ok(raw)
    }
}

/// Inner header of a KDBX 4 body
pub struct InnerHeader {
    pub stream: InnerStreamAlgorithm,
    pub stream_key: Zeroizing<Vec<u8>>,
    pub binaries: Vec<ProtectedBinary>,
}

impl std::fmt::Debug for InnerHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerHeader")
            .field("stream", &self.stream)
            .field("binaries", &self.binaries.len())
            .finish()
    }
}

impl InnerHeader {
    /// Parse the inner header. Large attachments stream straight into
    /// file-backed storage when the config asks for it.
    pub fn read<R: Read>(reader: &mut R, config: &EngineConfig) -> Result<Self> {
        let truncated = |e: io::Error| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                malformed("Truncated inner header")
            } else {
                Error::from(e)
            }
        };

        let mut stream = None;
        let mut stream_key = None;
        let mut binaries = Vec::new();

        loop {
            let id = reader.read_u8().map_err(truncated)?;
            let len = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;

            match id {
                inner_field::END => {
                    let mut rest = Vec::new();
                    reader.by_ref().take(len as u64).read_to_end(&mut rest)?;
                    break;
                }
                inner_field::STREAM_ID => {
                    let mut value = [0u8; 4];
                    if len != 4 {
                        return Err(malformed("Inner stream id must be 4 bytes"));
                    }
                    reader.read_exact(&mut value).map_err(truncated)?;
                    stream = Some(InnerStreamAlgorithm::from_id(LittleEndian::read_u32(&value))?);
                }
                inner_field::STREAM_KEY => {
                    let mut value = Zeroizing::new(Vec::new());
                    reader.by_ref().take(len as u64).read_to_end(&mut value)?;
                    if value.len() != len {
                        return Err(malformed("Truncated inner header"));
                    }
                    stream_key = Some(value);
                }
                inner_field::BINARY => {
                    if len == 0 {
                        return Err(malformed("Binary field without flags"));
                    }
                    let flags = reader.read_u8().map_err(truncated)?;
                    let mut data = reader.by_ref().take((len - 1) as u64);
                    let binary = ProtectedBinary::from_reader(&mut data, flags & 0x01 != 0, len - 1, config)?;
                    if binary.len() != len - 1 {
                        return Err(malformed("Truncated inner header"));
                    }
                    binaries.push(binary);
                }
                other => {
                    tracing::warn!(field = other, "Skipping unknown inner header field");
                    let mut skipped = Vec::new();
                    reader.by_ref().take(len as u64).read_to_end(&mut skipped)?;
                }
            }
        }

        tracing::debug!(binaries = binaries.len(), "Inner header parsed");
        Ok(InnerHeader {
            stream: stream.ok_or_else(|| malformed("Missing inner stream id"))?,
            stream_key: stream_key.ok_or_else(|| malformed("Missing inner stream key"))?,
            binaries,
        })
    }

    /// Write an inner header whose binaries come from the pool, in order
    pub fn write<'a, W: Write>(
        writer: &mut W,
        stream: InnerStreamAlgorithm,
        stream_key: &[u8],
        binaries: impl IntoIterator<Item = &'a ProtectedBinary>,
    ) -> Result<()> {
        writer.write_u8(inner_field::STREAM_ID)?;
        writer.write_u32::<LittleEndian>(4)?;
        writer.write_u32::<LittleEndian>(stream.id())?;

        writer.write_u8(inner_field::STREAM_KEY)?;
        writer.write_u32::<LittleEndian>(stream_key.len() as u32)?;
        writer.write_all(stream_key)?;

        for binary in binaries {
            let len = u32::try_from(binary.len() + 1)
                .map_err(|_| malformed("Attachment too large"))?;
            writer.write_u8(inner_field::BINARY)?;
            writer.write_u32::<LittleEndian>(len)?;
            writer.write_u8(u8::from(binary.is_protected()))?;
            let copied = io::copy(&mut binary.reader()?, writer)?;
            if copied as usize != binary.len() {
                return Err(Error::Io("Attachment changed while saving".to_string()));
            }
        }

        writer.write_u8(inner_field::END)?;
        writer.write_u32::<LittleEndian>(0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::KdfAlgorithm;
    use std::io::Cursor;

    fn sample(version: FormatVersion) -> Header {
        let legacy = version.is_legacy();
        Header {
            version,
            cipher: CipherAlgorithm::Aes256,
            compression: Compression::Gzip,
            master_seed: vec![1u8; 32],
            encryption_iv: vec![2u8; 16],
            kdf: if legacy {
                KdfParameters::aes(6000)
            } else {
                KdfParameters::default_for(KdfAlgorithm::Argon2id)
            },
            public_custom_data: None,
            inner_stream: legacy.then_some(InnerStreamAlgorithm::Salsa20),
            protected_stream_key: legacy.then(|| Zeroizing::new(vec![3u8; 32])),
            stream_start_bytes: legacy.then(|| vec![4u8; 32]),
        }
    }

    #[test]
    fn test_current_header_roundtrip() {
        let header = sample(FormatVersion::KDBX_4_0);
        let mut out = Vec::new();
        let (hash, hmac) = header.write(&mut out, Some(&[9u8; 64])).unwrap();
        assert!(hmac.is_some());

        out.extend_from_slice(b"body");
        let mut cursor = Cursor::new(out);
        let (parsed, raw) = Header::read(&mut cursor).unwrap();
        assert_eq!(Sha256::digest(&raw).as_slice(), &hash[..]);
        assert_eq!(parsed.version, FormatVersion::KDBX_4_0);
        assert_eq!(parsed.kdf, header.kdf);
        assert_eq!(parsed.compression, Compression::Gzip);

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"body");
    }

    #[test]
    fn test_legacy_header_roundtrip() {
        let header = sample(FormatVersion::KDBX_3_1);
        let mut out = Vec::new();
        let (_, hmac) = header.write(&mut out, None).unwrap();
        assert!(hmac.is_none());

        let (parsed, raw) = Header::read(&mut Cursor::new(&out)).unwrap();
        assert_eq!(raw, out);
        assert_eq!(parsed.inner_stream, Some(InnerStreamAlgorithm::Salsa20));
        assert_eq!(parsed.kdf.aes_rounds(), Some(6000));
        assert_eq!(parsed.kdf.seed(), header.kdf.seed());
        assert_eq!(parsed.stream_start_bytes, Some(vec![4u8; 32]));
    }

    #[test]
    fn test_kdb1_signature_is_unsupported() {
        let mut data = Vec::new();
        data.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        data.extend_from_slice(&SIGNATURE_2_KDB.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Header::read(&mut Cursor::new(data)),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_bad_signature() {
        let data = vec![0u8; 12];
        assert!(matches!(
            Header::read(&mut Cursor::new(data)),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_future_major_version() {
        let mut data = Vec::new();
        data.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        data.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        data.extend_from_slice(&0x0005_0000u32.to_le_bytes());
        assert!(matches!(
            Header::read(&mut Cursor::new(data)),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_unknown_cipher() {
        let mut header = sample(FormatVersion::KDBX_4_0);
        header.cipher = CipherAlgorithm::Aes256;
        let mut out = header.to_bytes().unwrap();
        // Cipher id is the first record: id(1) + len(4), value follows
        out[12 + 5] ^= 0xFF;
        assert!(matches!(
            Header::read(&mut Cursor::new(out)),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let out = sample(FormatVersion::KDBX_4_0).to_bytes().unwrap();
        let short = &out[..out.len() - 2];
        assert!(matches!(
            Header::read(&mut Cursor::new(short)),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_missing_master_seed() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        raw.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        raw.extend_from_slice(&FormatVersion::KDBX_4_0.raw().to_le_bytes());
        raw.push(field::CIPHER_ID);
        raw.extend_from_slice(&16u32.to_le_bytes());
        raw.extend_from_slice(CipherAlgorithm::ChaCha20.uuid().as_bytes());
        raw.push(field::END);
        raw.extend_from_slice(&4u32.to_le_bytes());
        raw.extend_from_slice(END_OF_HEADER);
        assert!(matches!(
            Header::read(&mut Cursor::new(raw)),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_legacy_rejects_non_aes_kdf() {
        let mut header = sample(FormatVersion::KDBX_3_1);
        header.kdf = KdfParameters::default_for(KdfAlgorithm::Argon2d);
        assert!(header.to_bytes().is_err());
    }

    #[test]
    fn test_inner_header_roundtrip() {
        let binaries = vec![
            ProtectedBinary::new(true, b"secret".to_vec()),
            ProtectedBinary::new(false, Vec::new()),
        ];
        let mut out = Vec::new();
        InnerHeader::write(&mut out, InnerStreamAlgorithm::ChaCha20, &[7u8; 64], &binaries).unwrap();
        out.extend_from_slice(b"<xml/>");

        let mut cursor = Cursor::new(out);
        let inner = InnerHeader::read(&mut cursor, &EngineConfig::default()).unwrap();
        assert_eq!(inner.stream, InnerStreamAlgorithm::ChaCha20);
        assert_eq!(inner.stream_key.as_slice(), &[7u8; 64][..]);
        assert_eq!(inner.binaries.len(), 2);
        assert!(inner.binaries[0].is_protected());
        assert_eq!(inner.binaries[0].to_vec().unwrap().as_slice(), b"secret");
        assert!(inner.binaries[1].is_empty());

        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"<xml/>");
    }

    #[test]
    fn test_inner_header_arcfour_rejected() {
        let mut out = Vec::new();
        out.push(inner_field::STREAM_ID);
        out.extend_from_slice(&4u32.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            InnerHeader::read(&mut Cursor::new(out), &EngineConfig::default()),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
