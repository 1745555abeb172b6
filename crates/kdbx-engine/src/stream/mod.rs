//! Streaming layers of the body pipeline: block framing and cipher adapters

pub mod cipher;
pub mod hashed;
pub mod hmac;

pub use self::cipher::{DecryptReader, EncryptWriter};
pub use self::hashed::{HashedBlockReader, HashedBlockWriter};
pub use self::hmac::{HmacBlockReader, HmacBlockWriter};

use crate::error::{Error, Result};
use std::io::{self, Read};

/// `read_exact` where running out of input means the framing is broken
pub(crate) fn read_framed<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::IntegrityFailure
        } else {
            Error::from(e)
        }
    })
}

/// Read a block payload of `len` bytes. The buffer only grows as data
/// actually arrives, so a corrupted length cannot force a huge allocation.
pub(crate) fn read_payload<R: Read>(reader: &mut R, len: usize, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    reader.by_ref().take(len as u64).read_to_end(buf)?;
    if buf.len() != len {
        return Err(Error::IntegrityFailure);
    }
    Ok(())
}
