//! Load and save pipelines
//!
//! Load: header -> key derivation -> block framing -> body cipher -> gzip ->
//! (KDBX 4) inner header -> XML. Save runs the same layers in reverse, with
//! fresh seeds, IV and inner stream key every time.

use crate::binary::BinaryPool;
use crate::config::EngineConfig;
use crate::crypto::key::{derive_keys, Credentials, DerivedKeys};
use crate::crypto::keystream::{InnerStream, InnerStreamAlgorithm};
use crate::database::{Database, DatabaseSettings};
use crate::error::{Error, Result};
use crate::header::{Compression, Header, InnerHeader};
use crate::stream::hmac::verify_header_hmac;
use crate::stream::{
    read_framed, DecryptReader, EncryptWriter, HashedBlockReader, HashedBlockWriter,
    HmacBlockReader, HmacBlockWriter,
};
use crate::xml::reader::{read_document, Document};
use crate::xml::writer::write_document;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

const STREAM_START_LEN: usize = 32;
const MASTER_SEED_LEN: usize = 32;

/// Pipeline stages reported to a [`Progress`] observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadHeader,
    DeriveKey,
    DecryptBody,
    DecodeDocument,
    WriteHeader,
    EncodeBody,
}

/// Observer for long-running loads and saves.
///
/// `is_cancelled` is polled between phases; a cancelled call fails with
/// [`Error::Cancelled`] and leaves nothing half-built behind.
pub trait Progress {
    fn on_phase(&mut self, _phase: Phase) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Progress for () {}

fn checkpoint(progress: &mut dyn Progress, phase: Phase) -> Result<()> {
    if progress.is_cancelled() {
        tracing::debug!(?phase, "Cancelled");
        return Err(Error::Cancelled);
    }
    tracing::debug!(?phase, "Entering phase");
    progress.on_phase(phase);
    Ok(())
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

enum Decompress<R: Read> {
    Plain(R),
    Gzip(GzDecoder<R>),
}

impl<R: Read> Decompress<R> {
    fn new(inner: R, compression: Compression) -> Self {
        match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => Self::Gzip(GzDecoder::new(inner)),
        }
    }
}

impl<R: Read> Read for Decompress<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}

enum Compress<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Compress<W> {
    fn new(inner: W, compression: Compression) -> Self {
        match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => Self::Gzip(GzEncoder::new(inner, flate2::Compression::default())),
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Gzip(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for Compress<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

fn derive(header: &Header, credentials_key: &[u8; 32]) -> Result<DerivedKeys> {
    let transformed = header.kdf.engine()?.transform(credentials_key)?;
    derive_keys(&header.master_seed, &transformed[..], header.cipher.key_len())
}

impl Database {
    /// Open a database from any reader
    pub fn open<R: Read>(reader: R, credentials: &Credentials) -> Result<Self> {
        Self::open_with(reader, credentials, &EngineConfig::default(), &mut ())
    }

    /// Open a database with explicit resource settings and a progress observer
    pub fn open_with<R: Read>(
        mut reader: R,
        credentials: &Credentials,
        config: &EngineConfig,
        progress: &mut dyn Progress,
    ) -> Result<Self> {
        let key = credentials.composite_key()?;

        checkpoint(progress, Phase::ReadHeader)?;
        let (header, raw_header) = Header::read(&mut reader)?;

        checkpoint(progress, Phase::DeriveKey)?;
        let keys = derive(&header, key.as_bytes())?;

        checkpoint(progress, Phase::DecryptBody)?;
        let mut binaries = BinaryPool::new();
        let document = if header.version.is_legacy() {
            open_legacy(reader, &header, &raw_header, &keys, &mut binaries, config, progress)?
        } else {
            open_current(reader, &header, &raw_header, &keys, &mut binaries, config, progress)?
        };

        let settings = DatabaseSettings {
            cipher: header.cipher,
            compression: header.compression,
            kdf: header.kdf,
            version: header.version,
            public_custom_data: header.public_custom_data,
        };

        Ok(Database::from_parts(
            settings,
            document.meta,
            document.root_group,
            document.groups,
            document.entries,
            document.deleted_objects,
            binaries,
            key,
        ))
    }

    /// Save the database to any writer
    pub fn save<W: Write>(&mut self, writer: W) -> Result<()> {
        self.save_with(writer, &EngineConfig::default(), &mut ())
    }

    /// Save with explicit resource settings and a progress observer.
    ///
    /// The format version written is the lowest one able to hold the
    /// document, never below `settings.version`.
    pub fn save_with<W: Write>(
        &mut self,
        mut writer: W,
        config: &EngineConfig,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        self.compact_binaries();
        let version = self.min_format_version();
        let legacy = version.is_legacy();
        let cipher = self.settings.cipher;
        self.settings.kdf.randomize();

        let (inner_stream, stream_key) = if legacy {
            (InnerStreamAlgorithm::Salsa20, Zeroizing::new(random_bytes(32)))
        } else {
            (InnerStreamAlgorithm::ChaCha20, Zeroizing::new(random_bytes(64)))
        };
        let start_bytes = random_bytes(STREAM_START_LEN);

        let header = Header {
            version,
            cipher,
            compression: self.settings.compression,
            master_seed: random_bytes(MASTER_SEED_LEN),
            encryption_iv: random_bytes(cipher.iv_len()),
            kdf: self.settings.kdf.clone(),
            public_custom_data: if legacy {
                None
            } else {
                self.settings.public_custom_data.clone()
            },
            inner_stream: legacy.then_some(inner_stream),
            protected_stream_key: legacy.then(|| stream_key.clone()),
            stream_start_bytes: legacy.then(|| start_bytes.clone()),
        };
        tracing::debug!(%version, ?cipher, kdf = %header.kdf.uuid(), "Saving database");

        checkpoint(progress, Phase::DeriveKey)?;
        let keys = derive(&header, self.key.as_bytes())?;

        checkpoint(progress, Phase::WriteHeader)?;
        let hmac_key = (!legacy).then_some(&*keys.hmac_key);
        let (header_hash, header_hmac) = header.write(&mut writer, hmac_key)?;
        if let Some(header_hmac) = header_hmac {
            writer.write_all(&header_hash)?;
            writer.write_all(&header_hmac)?;
        }

        checkpoint(progress, Phase::EncodeBody)?;
        let transform = cipher.encryptor(&keys.data_key, &header.encryption_iv)?;
        let mut stream = InnerStream::new(inner_stream, &stream_key);
        let gzip = header.compression == Compression::Gzip;

        let mut out = if legacy {
            let mut encrypted = EncryptWriter::new(writer, transform);
            encrypted.write_all(&start_bytes)?;
            let blocks = HashedBlockWriter::new(encrypted, config.block_size);
            let body = Compress::new(blocks, header.compression);
            let body = write_document(body, self, version, &mut stream, Some(&header_hash), gzip)?;
            body.finish()?.finish()?.finish()?
        } else {
            let blocks = HmacBlockWriter::new(writer, &keys.hmac_key, config.block_size);
            let encrypted = EncryptWriter::new(blocks, transform);
            let mut body = Compress::new(encrypted, header.compression);
            InnerHeader::write(&mut body, inner_stream, &stream_key, self.binaries.iter())?;
            let body = write_document(body, self, version, &mut stream, None, gzip)?;
            body.finish()?.finish()?.finish()?
        };
        out.flush()?;
        Ok(())
    }
}

fn open_current<R: Read>(
    mut reader: R,
    header: &Header,
    raw_header: &[u8],
    keys: &DerivedKeys,
    binaries: &mut BinaryPool,
    config: &EngineConfig,
    progress: &mut dyn Progress,
) -> Result<Document> {
    let mut stored_hash = [0u8; 32];
    read_framed(&mut reader, &mut stored_hash)?;
    let actual_hash: [u8; 32] = Sha256::digest(raw_header).into();
    if stored_hash != actual_hash {
        return Err(Error::IntegrityFailure);
    }

    let mut stored_hmac = [0u8; 32];
    read_framed(&mut reader, &mut stored_hmac)?;
    verify_header_hmac(raw_header, &keys.hmac_key, &stored_hmac)?;

    let blocks = HmacBlockReader::new(reader, &keys.hmac_key);
    let transform = header
        .cipher
        .decryptor(&keys.data_key, &header.encryption_iv)?;
    let plain = DecryptReader::new(blocks, transform, config.read_chunk_size);
    let mut body = Decompress::new(plain, header.compression);

    let inner = InnerHeader::read(&mut body, config)?;
    let mut refs = HashMap::with_capacity(inner.binaries.len());
    for (position, binary) in inner.binaries.into_iter().enumerate() {
        refs.insert(position, binaries.insert(binary));
    }

    checkpoint(progress, Phase::DecodeDocument)?;
    let mut xml = Vec::new();
    body.read_to_end(&mut xml)?;
    let mut stream = InnerStream::new(inner.stream, &inner.stream_key);
    read_document(&xml, &mut stream, binaries, refs, config)
}

fn open_legacy<R: Read>(
    reader: R,
    header: &Header,
    raw_header: &[u8],
    keys: &DerivedKeys,
    binaries: &mut BinaryPool,
    config: &EngineConfig,
    progress: &mut dyn Progress,
) -> Result<Document> {
    let transform = header
        .cipher
        .decryptor(&keys.data_key, &header.encryption_iv)?;
    let mut plain = DecryptReader::new(reader, transform, config.read_chunk_size);

    let mut start = [0u8; STREAM_START_LEN];
    read_framed(&mut plain, &mut start)?;
    if header.stream_start_bytes.as_deref() != Some(&start[..]) {
        return Err(Error::IntegrityFailure);
    }

    let blocks = HashedBlockReader::new(plain);
    let mut body = Decompress::new(blocks, header.compression);

    checkpoint(progress, Phase::DecodeDocument)?;
    let mut xml = Vec::new();
    body.read_to_end(&mut xml)?;

    let (algorithm, key) = match (header.inner_stream, &header.protected_stream_key) {
        (Some(algorithm), Some(key)) => (algorithm, key),
        _ => return Err(Error::MalformedHeader("Missing inner stream".to_string())),
    };
    let mut stream = InnerStream::new(algorithm, key);
    let document = read_document(&xml, &mut stream, binaries, HashMap::new(), config)?;

    if let Some(stored) = &document.header_hash {
        if stored.as_slice() != Sha256::digest(raw_header).as_slice() {
            return Err(Error::IntegrityFailure);
        }
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::KdfParameters;
    use crate::header::FormatVersion;

    #[derive(Default)]
    struct Recorder {
        phases: Vec<Phase>,
        cancel_at: Option<Phase>,
    }

    impl Progress for Recorder {
        fn on_phase(&mut self, phase: Phase) {
            self.phases.push(phase);
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_at.is_some() && self.phases.last() == self.cancel_at.as_ref()
        }
    }

    fn quick_db() -> Database {
        let mut db = Database::new("Phases", &Credentials::new().with_password("pw")).unwrap();
        db.settings.kdf = KdfParameters::aes(10);
        db.settings.version = FormatVersion::KDBX_3_1;
        db
    }

    #[test]
    fn test_phases_are_reported_in_order() {
        let mut db = quick_db();
        let mut buf = Vec::new();
        let mut progress = Recorder::default();
        db.save_with(&mut buf, &EngineConfig::default(), &mut progress)
            .unwrap();
        assert_eq!(
            progress.phases,
            vec![Phase::DeriveKey, Phase::WriteHeader, Phase::EncodeBody]
        );

        let mut progress = Recorder::default();
        Database::open_with(
            buf.as_slice(),
            &Credentials::new().with_password("pw"),
            &EngineConfig::default(),
            &mut progress,
        )
        .unwrap();
        assert_eq!(
            progress.phases,
            vec![
                Phase::ReadHeader,
                Phase::DeriveKey,
                Phase::DecryptBody,
                Phase::DecodeDocument
            ]
        );
    }

    #[test]
    fn test_cancel_between_phases() {
        let mut db = quick_db();
        let mut buf = Vec::new();
        db.save(&mut buf).unwrap();

        let mut progress = Recorder {
            cancel_at: Some(Phase::DeriveKey),
            ..Default::default()
        };
        let result = Database::open_with(
            buf.as_slice(),
            &Credentials::new().with_password("pw"),
            &EngineConfig::default(),
            &mut progress,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(progress.phases, vec![Phase::ReadHeader, Phase::DeriveKey]);
    }

    #[test]
    fn test_legacy_file_layout() {
        let mut db = quick_db();
        let mut buf = Vec::new();
        db.save(&mut buf).unwrap();

        let (header, _) = Header::read(&mut buf.as_slice()).unwrap();
        assert!(header.version.is_legacy());
        assert_eq!(header.inner_stream, Some(InnerStreamAlgorithm::Salsa20));
        assert_eq!(header.stream_start_bytes.map(|s| s.len()), Some(32));
    }

    #[test]
    fn test_empty_credentials_fail_before_reading() {
        let result = Database::open(&[][..], &Credentials::new());
        assert!(matches!(result, Err(Error::EmptyCredentials)));
    }
}
