//! Attachment payloads and the per-document binary pool
//!
//! Small payloads live in a zeroizing buffer. Large ones can be spilled into a
//! temp file that is encrypted with a one-time AES-256-CBC key, so plaintext
//! attachments never touch the disk.

use crate::config::EngineConfig;
use crate::crypto::cipher::CipherAlgorithm;
use crate::error::Result;
use crate::stream::{DecryptReader, EncryptWriter};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

const FILE_CHUNK: usize = 4096;

struct FileBacking {
    file: NamedTempFile,
    key: Zeroizing<[u8; 32]>,
    iv: [u8; 16],
}

enum Backing {
    Memory(Zeroizing<Vec<u8>>),
    File(FileBacking),
    Cleared,
}

/// An attachment payload with its protection flag
pub struct ProtectedBinary {
    protected: bool,
    len: usize,
    digest: [u8; 32],
    backing: Backing,
}

impl std::fmt::Debug for ProtectedBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backing {
            Backing::Memory(_) => "memory",
            Backing::File(_) => "file",
            Backing::Cleared => "cleared",
        };
        f.debug_struct("ProtectedBinary")
            .field("protected", &self.protected)
            .field("len", &self.len)
            .field("backing", &kind)
            .finish()
    }
}

impl PartialEq for ProtectedBinary {
    fn eq(&self, other: &Self) -> bool {
        self.content_eq(other)
    }
}

impl ProtectedBinary {
    /// In-memory binary
    pub fn new(protected: bool, data: Vec<u8>) -> Self {
        let digest = Sha256::digest(&data).into();
        Self {
            protected,
            len: data.len(),
            digest,
            backing: Backing::Memory(Zeroizing::new(data)),
        }
    }

    /// Build from owned bytes, spilling to a temp file when the config says so
    pub fn from_bytes(protected: bool, data: Vec<u8>, config: &EngineConfig) -> Result<Self> {
        match &config.temp_dir {
            Some(dir) if config.wants_file_backing(data.len()) => {
                let data = Zeroizing::new(data);
                let mut writer = ProtectedBinaryWriter::create(dir, protected)?;
                writer.write_all(&data)?;
                writer.finish()
            }
            _ => Ok(Self::new(protected, data)),
        }
    }

    /// Drain `reader` into a new binary; `len_hint` picks the storage
    pub fn from_reader<R: Read>(
        reader: &mut R,
        protected: bool,
        len_hint: usize,
        config: &EngineConfig,
    ) -> Result<Self> {
        match &config.temp_dir {
            Some(dir) if config.wants_file_backing(len_hint) => {
                let mut writer = ProtectedBinaryWriter::create(dir, protected)?;
                io::copy(reader, &mut writer)?;
                writer.finish()
            }
            _ => {
                let mut data = Zeroizing::new(Vec::with_capacity(len_hint.min(FILE_CHUNK * 256)));
                reader.read_to_end(&mut data)?;
                Ok(Self::new(protected, std::mem::take(&mut *data)))
            }
        }
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Location of the encrypted temp file, if file-backed
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(f) => Some(f.file.path()),
            _ => None,
        }
    }

    /// Stream the plaintext
    pub fn reader(&self) -> Result<Box<dyn Read + '_>> {
        match &self.backing {
            Backing::Memory(data) => Ok(Box::new(Cursor::new(data.as_slice()))),
            Backing::File(f) => {
                let file = File::open(f.file.path())?;
                let transform = CipherAlgorithm::Aes256.decryptor(&f.key[..], &f.iv)?;
                Ok(Box::new(DecryptReader::new(file, transform, FILE_CHUNK)))
            }
            Backing::Cleared => Ok(Box::new(io::empty())),
        }
    }

    /// Copy the plaintext into a zeroizing buffer
    pub fn to_vec(&self) -> Result<Zeroizing<Vec<u8>>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.len));
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Same protection flag and same bytes
    pub fn content_eq(&self, other: &ProtectedBinary) -> bool {
        self.protected == other.protected && self.len == other.len && self.digest == other.digest
    }

    /// Wipe the payload: zero the buffer or delete the temp file
    pub fn clear(&mut self) -> Result<()> {
        let backing = std::mem::replace(&mut self.backing, Backing::Cleared);
        self.len = 0;
        self.digest = Sha256::digest(b"").into();
        match backing {
            Backing::File(f) => f.file.close()?,
            Backing::Memory(_) | Backing::Cleared => {}
        }
        Ok(())
    }
}

/// Incrementally writes a file-backed binary
pub struct ProtectedBinaryWriter {
    protected: bool,
    temp: NamedTempFile,
    writer: EncryptWriter<File>,
    key: Zeroizing<[u8; 32]>,
    iv: [u8; 16],
    hasher: Sha256,
    len: usize,
}

impl ProtectedBinaryWriter {
    /// Create a fresh encrypted temp file under `dir`
    pub fn create(dir: &Path, protected: bool) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; 32]);
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key[..]);
        rand::thread_rng().fill_bytes(&mut iv);

        let temp = tempfile::Builder::new()
            .prefix("kdbx-bin-")
            .tempfile_in(dir)?;
        let handle = temp.as_file().try_clone()?;
        let transform = CipherAlgorithm::Aes256.encryptor(&key[..], &iv)?;
        tracing::debug!(path = %temp.path().display(), "Spilling attachment to temp file");

        Ok(Self {
            protected,
            temp,
            writer: EncryptWriter::new(handle, transform),
            key,
            iv,
            hasher: Sha256::new(),
            len: 0,
        })
    }

    pub fn finish(self) -> Result<ProtectedBinary> {
        self.writer.finish()?;
        Ok(ProtectedBinary {
            protected: self.protected,
            len: self.len,
            digest: self.hasher.finalize().into(),
            backing: Backing::File(FileBacking {
                file: self.temp,
                key: self.key,
                iv: self.iv,
            }),
        })
    }
}

impl Write for ProtectedBinaryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write_all(buf)?;
        self.hasher.update(buf);
        self.len += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Index -> binary, deduplicated by content
#[derive(Debug, Default)]
pub struct BinaryPool {
    items: Vec<ProtectedBinary>,
}

impl BinaryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProtectedBinary> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtectedBinary> {
        self.items.iter()
    }

    /// Index of a binary with equal content, if any
    pub fn find(&self, binary: &ProtectedBinary) -> Option<usize> {
        self.items.iter().position(|b| b.content_eq(binary))
    }

    /// Add a binary unless an equal one is already pooled; returns its index
    pub fn insert(&mut self, binary: ProtectedBinary) -> usize {
        match self.find(&binary) {
            Some(index) => index,
            None => {
                self.items.push(binary);
                self.items.len() - 1
            }
        }
    }

    /// Keep only the listed slots, renumbered in the given order.
    /// Returns old index -> new index. Dropped slots are wiped.
    pub(crate) fn compact(&mut self, order: &[usize]) -> HashMap<usize, usize> {
        let mut slots: Vec<Option<ProtectedBinary>> =
            std::mem::take(&mut self.items).into_iter().map(Some).collect();
        let mut remap = HashMap::new();

        for &old in order {
            if remap.contains_key(&old) {
                continue;
            }
            if let Some(binary) = slots.get_mut(old).and_then(Option::take) {
                remap.insert(old, self.items.len());
                self.items.push(binary);
            }
        }

        for mut binary in slots.into_iter().flatten() {
            if let Err(err) = binary.clear() {
                tracing::warn!(%err, "Failed to wipe unreferenced attachment");
            }
        }
        remap
    }
}
