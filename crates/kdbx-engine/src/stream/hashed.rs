//! Hashed-block stream used by KDBX 3.x bodies
//!
//! Block layout:
//! - u32 index (starting at 0)
//! - SHA-256 of the payload (32 bytes)
//! - u32 payload length
//! - payload
//!
//! The stream ends with a zero-length block whose hash is all zeroes.

use super::{read_framed, read_payload};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

pub struct HashedBlockReader<R> {
    inner: R,
    index: u32,
    buffer: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> HashedBlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            index: 0,
            buffer: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Load and verify the next block; `false` once the terminator is reached
    fn next_block(&mut self) -> Result<bool> {
        let mut head = [0u8; 40];
        read_framed(&mut self.inner, &mut head)?;

        let index = LittleEndian::read_u32(&head[0..4]);
        let hash = &head[4..36];
        let len = LittleEndian::read_u32(&head[36..40]) as usize;

        if index != self.index {
            return Err(Error::IntegrityFailure);
        }

        if len == 0 {
            if hash.iter().any(|&b| b != 0) {
                return Err(Error::IntegrityFailure);
            }
            tracing::debug!(blocks = self.index, "Hashed block stream complete");
            self.done = true;
            self.buffer.clear();
            self.pos = 0;
            return Ok(false);
        }

        read_payload(&mut self.inner, len, &mut self.buffer)?;
        if Sha256::digest(&self.buffer).as_slice() != hash {
            return Err(Error::IntegrityFailure);
        }

        self.index = self.index.wrapping_add(1);
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for HashedBlockReader<R> {
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

pub struct HashedBlockWriter<W: Write> {
    inner: W,
    index: u32,
    buffer: Vec<u8>,
    block_size: usize,
}

impl<W: Write> HashedBlockWriter<W> {
    pub fn new(inner: W, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            inner,
            index: 0,
            buffer: Vec::with_capacity(block_size.min(1024 * 1024)),
            block_size,
        }
    }

    fn write_block(&mut self) -> io::Result<()> {
        let hash: [u8; 32] = if self.buffer.is_empty() {
            [0u8; 32]
        } else {
            Sha256::digest(&self.buffer).into()
        };

        self.inner.write_u32::<LittleEndian>(self.index)?;
        self.inner.write_all(&hash)?;
        self.inner.write_u32::<LittleEndian>(self.buffer.len() as u32)?;
        self.inner.write_all(&self.buffer)?;

        self.index = self.index.wrapping_add(1);
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

impl<W: Write> Write for HashedBlockWriter<W> {
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

    fn encode(data: &[u8], block_size: usize) -> Vec<u8> {
        let mut writer = HashedBlockWriter::new(Vec::new(), block_size);
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn decode(data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        HashedBlockReader::new(Cursor::new(data)).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_empty_stream_is_only_terminator() {
        let encoded = encode(b"", 16);
        assert_eq!(encoded.len(), 40);
        assert!(decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_multi_block() {
        let data: Vec<u8> = (0..100u8).collect();
        let encoded = encode(&data, 16);
        // 7 data blocks (6 full + 1 partial) plus terminator
        assert_eq!(encoded.len(), 8 * 40 + 100);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_missing_terminator() {
        let mut encoded = encode(b"hello", 1024);
        encoded.truncate(encoded.len() - 40);
        assert_eq!(decode(&encoded).unwrap_err(), Error::IntegrityFailure);
    }

    #[test]
    fn test_wrong_index() {
        let mut encoded = encode(b"hello", 1024);
        encoded[0] = 1;
        assert_eq!(decode(&encoded).unwrap_err(), Error::IntegrityFailure);
    }

    #[test]
    fn test_terminator_with_nonzero_hash() {
        let mut encoded = encode(b"hello", 1024);
        let term = encoded.len() - 40;
        encoded[term + 4] = 0xFF;
        assert_eq!(decode(&encoded).unwrap_err(), Error::IntegrityFailure);
    }

    #[test]
    fn test_huge_length_is_rejected_without_allocation() {
        let mut encoded = encode(b"hello", 1024);
        encoded[36..40].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(decode(&encoded).unwrap_err(), Error::IntegrityFailure);
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
            prop_assert_eq!(decode(&encoded).unwrap_err(), Error::IntegrityFailure);
        }

        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..2000), bs in 1usize..500) {
            prop_assert_eq!(decode(&encode(&data, bs)).unwrap(), data);
        }
    }
}
