//! kdbx-engine - read and write KeePass KDBX password databases
//!
//! This crate implements the KDBX container end to end: the outer and inner
//! headers, AES-KDF and Argon2 key derivation, hashed and HMAC block framing,
//! the AES-256 / Twofish / ChaCha20 body ciphers, the Salsa20 / ChaCha20 inner
//! keystream, and the XML document model. KDBX 3.1 and 4.x are supported for
//! both reading and writing.
//!
//! ```no_run
//! use kdbx_engine::{Credentials, Database, EntryBuilder};
//!
//! # fn main() -> kdbx_engine::Result<()> {
//! let credentials = Credentials::new().with_password("correct horse");
//! let mut db = Database::new("Personal", &credentials)?;
//! db.add_entry(EntryBuilder::new("Amazon").username("frank").password("12345").build())?;
//!
//! let mut file = Vec::new();
//! db.save(&mut file)?;
//! let reopened = Database::open(file.as_slice(), &credentials)?;
//! assert_eq!(reopened.entries().count(), 1);
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod config;
pub mod crypto;
mod database;
mod entry;
mod error;
mod format;
mod group;
pub mod header;
pub mod meta;
mod protected;
mod reference;
pub mod stream;
pub mod times;
pub mod variant;
mod xml;

pub use binary::{BinaryPool, ProtectedBinary, ProtectedBinaryWriter};
pub use config::EngineConfig;
pub use crypto::{CipherAlgorithm, CompositeKey, Credentials, InnerStreamAlgorithm, KdfAlgorithm, KdfParameters};
pub use database::{Database, DatabaseSettings, DeletedObject};
pub use entry::{AutoType, AutoTypeAssociation, Entry, EntryBuilder};
pub use error::{Error, Result};
pub use format::{Phase, Progress};
pub use group::{Group, GroupBuilder};
pub use header::{Compression, FormatVersion};
pub use meta::{CustomDataItem, CustomIcon, MemoryProtection, Meta};
pub use protected::ProtectedString;
pub use variant::{Variant, VariantDictionary};

// Re-export types that users might need
pub use uuid::Uuid;
