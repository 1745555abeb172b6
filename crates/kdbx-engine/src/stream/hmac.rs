//! HMAC-block stream used by KDBX 4.x bodies
//!
//! Each block is `[HMAC-SHA256 32][u32 length][payload]`, where the MAC covers
//! `u64 index || u32 length || payload` and is keyed per block with
//! `SHA-512(u64 index || hmac_key)`. A zero-length block terminates the stream
//! and is authenticated like any other.

use super::{read_framed, read_payload};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use hmac::digest::generic_array::GenericArray;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Block index used to authenticate the outer header
pub const HEADER_BLOCK_INDEX: u64 = u64::MAX;

/// Per-block HMAC key
pub fn block_key(index: u64, hmac_key: &[u8; 64]) -> Zeroizing<[u8; 64]> {
    let mut hasher = Sha512::new();
    hasher.update(index.to_le_bytes());
    hasher.update(hmac_key);
    let mut key = Zeroizing::new([0u8; 64]);
    key.copy_from_slice(&hasher.finalize());
    key
}

fn keyed_mac(index: u64, hmac_key: &[u8; 64]) -> HmacSha256 {
    let key = block_key(index, hmac_key);
    <HmacSha256 as Mac>::new(GenericArray::from_slice(&key[..]))
}

fn block_mac(index: u64, hmac_key: &[u8; 64], payload: &[u8]) -> HmacSha256 {
    let mut mac = keyed_mac(index, hmac_key);
    mac.update(&index.to_le_bytes());
    mac.update(&(payload.len() as u32).to_le_bytes());
    mac.update(payload);
    mac
}

/// HMAC over the serialized outer header
pub fn header_hmac(header: &[u8], hmac_key: &[u8; 64]) -> [u8; 32] {
    let mut mac = keyed_mac(HEADER_BLOCK_INDEX, hmac_key);
    mac.update(header);
    mac.finalize().into_bytes().into()
}

/// Constant-time check of the stored header HMAC
pub fn verify_header_hmac(header: &[u8], hmac_key: &[u8; 64], stored: &[u8]) -> Result<()> {
    let mut mac = keyed_mac(HEADER_BLOCK_INDEX, hmac_key);
    mac.update(header);
    mac.verify_slice(stored).map_err(|_| Error::IntegrityFailure)
}

pub struct HmacBlockReader<R> {
    inner: R,
    key: Zeroizing<[u8; 64]>,
    index: u64,
    buffer: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> HmacBlockReader<R> {
    pub fn new(inner: R, hmac_key: &[u8; 64]) -> Self {
        Self {
            inner,
            key: Zeroizing::new(*hmac_key),
            index: 0,
            buffer: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    fn next_block(&mut self) -> Result<bool> {
        let mut head = [0u8; 36];
        read_framed(&mut self.inner, &mut head)?;
        let len = LittleEndian::read_u32(&head[32..36]) as usize;

        read_payload(&mut self.inner, len, &mut self.buffer)?;
        block_mac(self.index, &self.key, &self.buffer)
            .verify_slice(&head[..32])
            .map_err(|_| Error::IntegrityFailure)?;

        self.index += 1;
        self.pos = 0;
        if len == 0 {
            tracing::debug!(blocks = self.index - 1, "HMAC block stream complete");
            self.done = true;
            return Ok(false);
        }
        Ok(true)
    }
}

impl<R: Read> Read for HmacBlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.buffer.len() {
            if self.done || !self.next_block().map_err(Error::into_io)? {
                return Ok(0);
            }
        }

        let n = buf.len().min(self.buffer.len() - self.pos);
        buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub struct HmacBlockWriter<W: Write> {
    inner: W,
    key: Zeroizing<[u8; 64]>,
    index: u64,
    buffer: Vec<u8>,
    block_size: usize,
}

impl<W: Write> HmacBlockWriter<W> {
    pub fn new(inner: W, hmac_key: &[u8; 64], block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            inner,
            key: Zeroizing::new(*hmac_key),
            index: 0,
            buffer: Vec::with_capacity(block_size.min(1024 * 1024)),
            block_size,
        }
    }

    fn write_block(&mut self) -> io::Result<()> {
        let mac = block_mac(self.index, &self.key, &self.buffer).finalize().into_bytes();
        self.inner.write_all(&mac)?;
        self.inner.write_u32::<LittleEndian>(self.buffer.len() as u32)?;
        self.inner.write_all(&self.buffer)?;
        self.index += 1;
        self.buffer.clear();
        Ok(())
    }

    /// Flush the pending block, write the terminator and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        if !self.buffer.is_empty() {
            self.write_block()?;
        }
        self.write_block()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for HmacBlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.block_size - self.buffer.len();
        let n = buf.len().min(room);
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.block_size {
            self.write_block()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    const KEY: [u8; 64] = [0x5A; 64];

    fn encode(data: &[u8], block_size: usize) -> Vec<u8> {
        let mut writer = HmacBlockWriter::new(Vec::new(), &KEY, block_size);
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn decode(data: &[u8], key: &[u8; 64]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        HmacBlockReader::new(Cursor::new(data), key).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_multi_block() {
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let encoded = encode(&data, 1000);
        // 5 data blocks + terminator
        assert_eq!(encoded.len(), 6 * 36 + 5000);
        assert_eq!(decode(&encoded, &KEY).unwrap(), data);
    }

    #[test]
    fn test_wrong_key() {
        let encoded = encode(b"payload", 1024);
        assert_eq!(
            decode(&encoded, &[0u8; 64]).unwrap_err(),
            Error::IntegrityFailure
        );
    }

    #[test]
    fn test_unverified_bytes_never_yielded() {
        let mut encoded = encode(b"first block!", 1024);
        let last = 36 + 11;
        encoded[last] ^= 1;

        let mut reader = HmacBlockReader::new(Cursor::new(encoded), &KEY);
        let mut buf = [0u8; 64];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(Error::from(err), Error::IntegrityFailure);
    }

    #[test]
    fn test_missing_terminator() {
        let mut encoded = encode(b"payload", 1024);
        encoded.truncate(encoded.len() - 36);
        assert_eq!(decode(&encoded, &KEY).unwrap_err(), Error::IntegrityFailure);
    }

    #[test]
    fn test_header_hmac_verification() {
        let header = b"header bytes";
        let mac = header_hmac(header, &KEY);
        assert!(verify_header_hmac(header, &KEY, &mac).is_ok());
        assert_eq!(
            verify_header_hmac(b"header bytez", &KEY, &mac).unwrap_err(),
            Error::IntegrityFailure
        );
    }

    #[test]
    fn test_block_key_depends_on_index() {
        assert_ne!(*block_key(0, &KEY), *block_key(1, &KEY));
    }

    proptest! {
        #[test]
        fn prop_any_single_byte_corruption_fails(
            data in proptest::collection::vec(any::<u8>(), 1..300),
            pos in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut encoded = encode(&data, 64);
            let i = pos.index(encoded.len());
            encoded[i] ^= flip;
            prop_assert_eq!(decode(&encoded, &KEY).unwrap_err(), Error::IntegrityFailure);
        }
    }
}
