//! Inner keystream used to obfuscate protected values inside the XML body
//!
//! A single instance is driven through the whole document in order: every
//! protected value consumes exactly as many keystream bytes as it is long.

use crate::error::{Error, Result};
use chacha20::ChaCha20;
use cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;
use sha2::{Digest, Sha256, Sha512};

const SALSA20_IV: [u8; 8] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

/// Inner stream algorithm ids as stored in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InnerStreamAlgorithm {
    Null,
    Salsa20,
    ChaCha20,
}

impl InnerStreamAlgorithm {
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(Self::Null),
            1 => Err(Error::UnsupportedAlgorithm("ArcFour inner stream".to_string())),
            2 => Ok(Self::Salsa20),
            3 => Ok(Self::ChaCha20),
            other => Err(Error::UnsupportedAlgorithm(format!("inner stream {}", other))),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Salsa20 => 2,
            Self::ChaCha20 => 3,
        }
    }

    /// Length of the random key generated on save
    pub fn key_len(self) -> usize {
        match self {
            Self::Null => 0,
            Self::Salsa20 => 32,
            Self::ChaCha20 => 64,
        }
    }
}

enum Engine {
    Null,
    Salsa20(Box<Salsa20>),
    ChaCha20(Box<ChaCha20>),
}

/// Stateful keystream XOR
pub struct InnerStream {
    engine: Engine,
}

impl std::fmt::Debug for InnerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.engine {
            Engine::Null => "Null",
            Engine::Salsa20(_) => "Salsa20",
            Engine::ChaCha20(_) => "ChaCha20",
        };
        write!(f, "InnerStream({})", name)
    }
}

impl InnerStream {
    pub fn new(algorithm: InnerStreamAlgorithm, key: &[u8]) -> Self {
        let engine = match algorithm {
            InnerStreamAlgorithm::Null => Engine::Null,
            InnerStreamAlgorithm::Salsa20 => {
                let key: [u8; 32] = Sha256::digest(key).into();
                Engine::Salsa20(Box::new(Salsa20::new(&key.into(), &SALSA20_IV.into())))
            }
            InnerStreamAlgorithm::ChaCha20 => {
                let hash = Sha512::digest(key);
                let mut key = [0u8; 32];
                let mut nonce = [0u8; 12];
                key.copy_from_slice(&hash[0..32]);
                nonce.copy_from_slice(&hash[32..44]);
                Engine::ChaCha20(Box::new(ChaCha20::new(&key.into(), &nonce.into())))
            }
        };
        Self { engine }
    }

    /// XOR the next `data.len()` keystream bytes into `data`
    pub fn process(&mut self, data: &mut [u8]) {
        match &mut self.engine {
            Engine::Null => {}
            Engine::Salsa20(c) => c.apply_keystream(data),
            Engine::ChaCha20(c) => c.apply_keystream(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids() {
        assert_eq!(InnerStreamAlgorithm::from_id(2).unwrap(), InnerStreamAlgorithm::Salsa20);
        assert_eq!(InnerStreamAlgorithm::from_id(3).unwrap().id(), 3);
        assert!(matches!(
            InnerStreamAlgorithm::from_id(1),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(InnerStreamAlgorithm::from_id(9).is_err());
    }

    #[test]
    fn test_correct_key_recovers_plaintext() {
        for alg in [InnerStreamAlgorithm::Salsa20, InnerStreamAlgorithm::ChaCha20] {
            let key = vec![0x42u8; alg.key_len()];
            let mut enc = InnerStream::new(alg, &key);
            let mut dec = InnerStream::new(alg, &key);

            let mut first = b"hunter2".to_vec();
            let mut second = b"correct horse".to_vec();
            enc.process(&mut first);
            enc.process(&mut second);
            assert_ne!(first, b"hunter2");

            dec.process(&mut first);
            dec.process(&mut second);
            assert_eq!(first, b"hunter2");
            assert_eq!(second, b"correct horse");
        }
    }

    #[test]
    fn test_wrong_key_differs_without_error() {
        let mut enc = InnerStream::new(InnerStreamAlgorithm::ChaCha20, &[1u8; 64]);
        let mut dec = InnerStream::new(InnerStreamAlgorithm::ChaCha20, &[2u8; 64]);
        let mut data = b"secret value".to_vec();
        enc.process(&mut data);
        dec.process(&mut data);
        assert_ne!(data, b"secret value");
    }

    #[test]
    fn test_keystream_is_sequential() {
        let key = [9u8; 32];
        let mut whole = InnerStream::new(InnerStreamAlgorithm::Salsa20, &key);
        let mut split = InnerStream::new(InnerStreamAlgorithm::Salsa20, &key);

        let mut a = vec![0u8; 100];
        whole.process(&mut a);

        let mut b = vec![0u8; 100];
        let (left, right) = b.split_at_mut(37);
        split.process(left);
        split.process(right);
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_stream_is_identity() {
        let mut stream = InnerStream::new(InnerStreamAlgorithm::Null, &[]);
        let mut data = b"plain".to_vec();
        stream.process(&mut data);
        assert_eq!(data, b"plain");
    }
}
