//! `Read`/`Write` adapters over [`CipherTransform`]

use crate::crypto::cipher::CipherTransform;
use crate::error::Error;
use std::io::{self, Read, Write};

/// Decrypts everything read from the inner reader
pub struct DecryptReader<R> {
    inner: R,
    transform: Option<CipherTransform>,
    chunk: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, transform: CipherTransform, chunk_size: usize) -> Self {
        Self {
            inner,
            transform: Some(transform),
            chunk: vec![0u8; chunk_size.max(16)],
            out: Vec::new(),
            pos: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.out.len() {
            let Some(transform) = self.transform.as_mut() else {
                return Ok(0);
            };
            let n = self.inner.read(&mut self.chunk)?;
            self.out = if n == 0 {
                match self.transform.take() {
                    Some(t) => t.finish().map_err(Error::into_io)?,
                    None => Vec::new(),
                }
            } else {
                transform.update(&self.chunk[..n])
            };
            self.pos = 0;
        }

        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Encrypts everything written before passing it on
pub struct EncryptWriter<W: Write> {
    inner: W,
    transform: Option<CipherTransform>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(inner: W, transform: CipherTransform) -> Self {
        Self {
            inner,
            transform: Some(transform),
        }
    }

    /// Write the final (padded) block and hand back the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(transform) = self.transform.take() {
            let tail = transform.finish().map_err(Error::into_io)?;
            self.inner.write_all(&tail)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let transform = self.transform.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "cipher stream already finished")
        })?;
        let out = transform.update(buf);
        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::CipherAlgorithm;
    use std::io::Cursor;

    fn encrypt(alg: CipherAlgorithm, data: &[u8]) -> Vec<u8> {
        let iv = vec![1u8; alg.iv_len()];
        let mut writer = EncryptWriter::new(Vec::new(), alg.encryptor(&[2u8; 32], &iv).unwrap());
        for chunk in data.chunks(100) {
            writer.write_all(chunk).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_stream_roundtrip() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        for alg in [CipherAlgorithm::Aes256, CipherAlgorithm::Twofish, CipherAlgorithm::ChaCha20] {
            let encrypted = encrypt(alg, &data);
            let iv = vec![1u8; alg.iv_len()];
            let mut reader = DecryptReader::new(
                Cursor::new(encrypted),
                alg.decryptor(&[2u8; 32], &iv).unwrap(),
                64,
            );
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out, data);
        }
    }

    #[test]
    fn test_truncated_stream_reports_integrity_failure() {
        let mut encrypted = encrypt(CipherAlgorithm::Aes256, b"some body bytes");
        encrypted.truncate(encrypted.len() - 3);
        let mut reader = DecryptReader::new(
            Cursor::new(encrypted),
            CipherAlgorithm::Aes256.decryptor(&[2u8; 32], &[1u8; 16]).unwrap(),
            4096,
        );
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(Error::from(err), Error::IntegrityFailure);
    }
}
