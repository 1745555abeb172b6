//! Body ciphers: AES-256-CBC, Twofish-CBC and ChaCha20
//!
//! Each algorithm hands out an incremental [`CipherTransform`] so the body can
//! be processed as a stream. CBC modes buffer at most one partial block (plus
//! the final block on decryption, which carries the PKCS7 padding).

use crate::error::{Error, Result};
use aes::Aes256;
use chacha20::ChaCha20;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};
use twofish::Twofish;
use uuid::Uuid;

/// 31c1f2e6-bf71-4350-be58-05216afc5aff
pub const AES256_UUID: Uuid = Uuid::from_bytes([
    0x31, 0xc1, 0xf2, 0xe6, 0xbf, 0x71, 0x43, 0x50,
    0xbe, 0x58, 0x05, 0x21, 0x6a, 0xfc, 0x5a, 0xff,
]);

/// ad68f29f-576f-4bb9-a36a-d47af965346c
pub const TWOFISH_UUID: Uuid = Uuid::from_bytes([
    0xad, 0x68, 0xf2, 0x9f, 0x57, 0x6f, 0x4b, 0xb9,
    0xa3, 0x6a, 0xd4, 0x7a, 0xf9, 0x65, 0x34, 0x6c,
]);

/// d6038a2b-8b6f-4cb5-a524-339a31dbb59a
pub const CHACHA20_UUID: Uuid = Uuid::from_bytes([
    0xd6, 0x03, 0x8a, 0x2b, 0x8b, 0x6f, 0x4c, 0xb5,
    0xa5, 0x24, 0x33, 0x9a, 0x31, 0xdb, 0xb5, 0x9a,
]);

const BLOCK_LEN: usize = 16;

/// Cipher used to encrypt the database body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CipherAlgorithm {
    #[default]
    Aes256,
    Twofish,
    ChaCha20,
}

impl CipherAlgorithm {
    /// Look up the algorithm for a header cipher id
    pub fn from_uuid(uuid: &Uuid) -> Result<Self> {
        match *uuid {
            AES256_UUID => Ok(Self::Aes256),
            TWOFISH_UUID => Ok(Self::Twofish),
            CHACHA20_UUID => Ok(Self::ChaCha20),
            other => Err(Error::UnsupportedAlgorithm(format!("cipher {}", other))),
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            Self::Aes256 => AES256_UUID,
            Self::Twofish => TWOFISH_UUID,
            Self::ChaCha20 => CHACHA20_UUID,
        }
    }

    pub fn key_len(self) -> usize {
        32
    }

    pub fn iv_len(self) -> usize {
        match self {
            Self::Aes256 | Self::Twofish => 16,
            Self::ChaCha20 => 12,
        }
    }

    pub fn encryptor(self, key: &[u8], iv: &[u8]) -> Result<CipherTransform> {
        let mode = match self {
            Self::Aes256 => Mode::Encrypt(CbcEncryptor::Aes(
                cbc::Encryptor::<Aes256>::new_from_slices(key, iv).map_err(bad_key)?,
            )),
            Self::Twofish => Mode::Encrypt(CbcEncryptor::Twofish(
                cbc::Encryptor::<Twofish>::new_from_slices(key, iv).map_err(bad_key)?,
            )),
            Self::ChaCha20 => Mode::Stream(ChaCha20::new_from_slices(key, iv).map_err(bad_key)?),
        };
        Ok(CipherTransform::new(mode))
    }

    pub fn decryptor(self, key: &[u8], iv: &[u8]) -> Result<CipherTransform> {
        let mode = match self {
            Self::Aes256 => Mode::Decrypt(CbcDecryptor::Aes(
                cbc::Decryptor::<Aes256>::new_from_slices(key, iv).map_err(bad_key)?,
            )),
            Self::Twofish => Mode::Decrypt(CbcDecryptor::Twofish(
                cbc::Decryptor::<Twofish>::new_from_slices(key, iv).map_err(bad_key)?,
            )),
            Self::ChaCha20 => Mode::Stream(ChaCha20::new_from_slices(key, iv).map_err(bad_key)?),
        };
        Ok(CipherTransform::new(mode))
    }
}

fn bad_key(_: cipher::InvalidLength) -> Error {
    Error::MalformedHeader("Invalid key or IV length for cipher".to_string())
}

enum CbcEncryptor {
    Aes(cbc::Encryptor<Aes256>),
    Twofish(cbc::Encryptor<Twofish>),
}

enum CbcDecryptor {
    Aes(cbc::Decryptor<Aes256>),
    Twofish(cbc::Decryptor<Twofish>),
}

enum Mode {
    Encrypt(CbcEncryptor),
    Decrypt(CbcDecryptor),
    Stream(ChaCha20),
}

/// An incremental encrypt or decrypt transform
pub struct CipherTransform {
    mode: Mode,
    pending: Vec<u8>,
}

impl std::fmt::Debug for CipherTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CipherTransform(pending={})", self.pending.len())
    }
}

impl CipherTransform {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            pending: Vec::with_capacity(BLOCK_LEN * 2),
        }
    }

    /// Feed more input, returning whatever output is ready
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        match &mut self.mode {
            Mode::Stream(cipher) => {
                let mut out = input.to_vec();
                cipher.apply_keystream(&mut out);
                out
            }
            Mode::Encrypt(enc) => {
                self.pending.extend_from_slice(input);
                let ready = self.pending.len() / BLOCK_LEN * BLOCK_LEN;
                let mut out: Vec<u8> = self.pending.drain(..ready).collect();
                match enc {
                    CbcEncryptor::Aes(c) => encrypt_blocks(c, &mut out),
                    CbcEncryptor::Twofish(c) => encrypt_blocks(c, &mut out),
                }
                out
            }
            Mode::Decrypt(dec) => {
                self.pending.extend_from_slice(input);
                // Hold back the last complete block: it may carry the padding
                let len = self.pending.len();
                let keep = match len % BLOCK_LEN {
                    0 => BLOCK_LEN.min(len),
                    rem => rem,
                };
                let mut out: Vec<u8> = self.pending.drain(..len - keep).collect();
                match dec {
                    CbcDecryptor::Aes(c) => decrypt_blocks(c, &mut out),
                    CbcDecryptor::Twofish(c) => decrypt_blocks(c, &mut out),
                }
                out
            }
        }
    }

    /// Flush the transform: pads on encryption, validates and strips padding on decryption
    pub fn finish(mut self) -> Result<Vec<u8>> {
        match self.mode {
            Mode::Stream(_) => Ok(Vec::new()),
            Mode::Encrypt(mut enc) => {
                let pad = BLOCK_LEN - self.pending.len() % BLOCK_LEN;
                self.pending.extend(std::iter::repeat(pad as u8).take(pad));
                match &mut enc {
                    CbcEncryptor::Aes(c) => encrypt_blocks(c, &mut self.pending),
                    CbcEncryptor::Twofish(c) => encrypt_blocks(c, &mut self.pending),
                }
                Ok(std::mem::take(&mut self.pending))
            }
            Mode::Decrypt(mut dec) => {
                if self.pending.len() != BLOCK_LEN {
                    return Err(Error::IntegrityFailure);
                }
                match &mut dec {
                    CbcDecryptor::Aes(c) => decrypt_blocks(c, &mut self.pending),
                    CbcDecryptor::Twofish(c) => decrypt_blocks(c, &mut self.pending),
                }
                let pad = self.pending[BLOCK_LEN - 1] as usize;
                if pad == 0
                    || pad > BLOCK_LEN
                    || self.pending[BLOCK_LEN - pad..].iter().any(|&b| b as usize != pad)
                {
                    return Err(Error::IntegrityFailure);
                }
                self.pending.truncate(BLOCK_LEN - pad);
                Ok(std::mem::take(&mut self.pending))
            }
        }
    }
}

fn encrypt_blocks<C: BlockEncryptMut>(cipher: &mut C, data: &mut [u8]) {
    for block in data.chunks_exact_mut(C::block_size()) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn decrypt_blocks<C: BlockDecryptMut>(cipher: &mut C, data: &mut [u8]) {
    for block in data.chunks_exact_mut(C::block_size()) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CipherAlgorithm; 3] = [
        CipherAlgorithm::Aes256,
        CipherAlgorithm::Twofish,
        CipherAlgorithm::ChaCha20,
    ];

    fn run(transform: &mut CipherTransform, data: &[u8], step: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in data.chunks(step.max(1)) {
            out.extend(transform.update(chunk));
        }
        out
    }

    #[test]
    fn test_uuid_lookup() {
        for alg in ALL {
            assert_eq!(CipherAlgorithm::from_uuid(&alg.uuid()).unwrap(), alg);
        }
        assert!(matches!(
            CipherAlgorithm::from_uuid(&Uuid::nil()),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_roundtrip_in_odd_chunks() {
        let key = [7u8; 32];
        let plain: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        for alg in ALL {
            let iv = vec![3u8; alg.iv_len()];
            for step in [1, 15, 16, 17, 333, 4096] {
                let mut enc = alg.encryptor(&key, &iv).unwrap();
                let mut cipher_text = run(&mut enc, &plain, step);
                cipher_text.extend(enc.finish().unwrap());

                let mut dec = alg.decryptor(&key, &iv).unwrap();
                let mut round = run(&mut dec, &cipher_text, step);
                round.extend(dec.finish().unwrap());
                assert_eq!(round, plain, "{:?} step {}", alg, step);
            }
        }
    }

    #[test]
    fn test_cbc_pads_full_block() {
        let mut enc = CipherAlgorithm::Aes256.encryptor(&[0u8; 32], &[0u8; 16]).unwrap();
        let mut out = enc.update(&[1u8; 32]);
        out.extend(enc.finish().unwrap());
        assert_eq!(out.len(), 48);
    }

    #[test]
    fn test_wrong_key_fails_padding_or_differs() {
        let mut enc = CipherAlgorithm::Aes256.encryptor(&[1u8; 32], &[0u8; 16]).unwrap();
        let mut ct = enc.update(b"attack at dawn");
        ct.extend(enc.finish().unwrap());

        let mut dec = CipherAlgorithm::Aes256.decryptor(&[2u8; 32], &[0u8; 16]).unwrap();
        let mut out = dec.update(&ct);
        match dec.finish() {
            Ok(tail) => {
                out.extend(tail);
                assert_ne!(out, b"attack at dawn");
            }
            Err(err) => assert_eq!(err, Error::IntegrityFailure),
        }
    }

    #[test]
    fn test_truncated_ciphertext_is_integrity_failure() {
        let mut dec = CipherAlgorithm::Twofish.decryptor(&[0u8; 32], &[0u8; 16]).unwrap();
        let _ = dec.update(&[0u8; 20]);
        assert_eq!(dec.finish().unwrap_err(), Error::IntegrityFailure);
    }

    #[test]
    fn test_bad_iv_length() {
        assert!(CipherAlgorithm::ChaCha20.encryptor(&[0u8; 32], &[0u8; 16]).is_err());
    }
}
