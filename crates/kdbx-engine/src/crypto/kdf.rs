//! Key derivation: AES-KDF and Argon2d/Argon2id
//!
//! Parameters travel as a [`VariantDictionary`] (that is how they are stored in
//! the header); [`KdfEngine`] is the parsed form that actually runs.

use crate::error::{Error, Result};
use crate::variant::{Variant, VariantDictionary};
use aes::Aes256;
use argon2::{Algorithm, Argon2, AssociatedData, ParamsBuilder, Version};
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

/// c9d9f39a-628a-4460-bf74-0d08c18a4fea
pub const AES_KDF_UUID: Uuid = Uuid::from_bytes([
    0xc9, 0xd9, 0xf3, 0x9a, 0x62, 0x8a, 0x44, 0x60,
    0xbf, 0x74, 0x0d, 0x08, 0xc1, 0x8a, 0x4f, 0xea,
]);

/// ef636ddf-8c29-444b-91f7-a9a403e30a0c
pub const ARGON2D_UUID: Uuid = Uuid::from_bytes([
    0xef, 0x63, 0x6d, 0xdf, 0x8c, 0x29, 0x44, 0x4b,
    0x91, 0xf7, 0xa9, 0xa4, 0x03, 0xe3, 0x0a, 0x0c,
]);

/// 9e298b19-56db-4773-b23d-fc3ec6f0a1e6
pub const ARGON2ID_UUID: Uuid = Uuid::from_bytes([
    0x9e, 0x29, 0x8b, 0x19, 0x56, 0xdb, 0x47, 0x73,
    0xb2, 0x3d, 0xfc, 0x3e, 0xc6, 0xf0, 0xa1, 0xe6,
]);

const KEY_UUID: &str = "$UUID";
const KEY_ROUNDS: &str = "R";
const KEY_SALT: &str = "S";
const KEY_PARALLELISM: &str = "P";
const KEY_MEMORY: &str = "M";
const KEY_ITERATIONS: &str = "I";
const KEY_VERSION: &str = "V";
const KEY_SECRET: &str = "K";
const KEY_ASSOC: &str = "A";

pub const DEFAULT_AES_ROUNDS: u64 = 6000;
pub const DEFAULT_ARGON2_ITERATIONS: u64 = 2;
pub const DEFAULT_ARGON2_MEMORY: u64 = 1024 * 1024;
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 2;
pub const DEFAULT_ARGON2_VERSION: u32 = 0x13;

const SEED_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KdfAlgorithm {
    AesKdf,
    Argon2d,
    Argon2id,
}

impl KdfAlgorithm {
    pub fn from_uuid(uuid: &Uuid) -> Result<Self> {
        match *uuid {
            AES_KDF_UUID => Ok(Self::AesKdf),
            ARGON2D_UUID => Ok(Self::Argon2d),
            ARGON2ID_UUID => Ok(Self::Argon2id),
            other => Err(Error::UnsupportedAlgorithm(format!("KDF {}", other))),
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            Self::AesKdf => AES_KDF_UUID,
            Self::Argon2d => ARGON2D_UUID,
            Self::Argon2id => ARGON2ID_UUID,
        }
    }
}

/// KDF parameter dictionary, including its `$UUID`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParameters {
    dict: VariantDictionary,
}

impl Default for KdfParameters {
    fn default() -> Self {
        Self::argon2(
            KdfAlgorithm::Argon2d,
            DEFAULT_ARGON2_ITERATIONS,
            DEFAULT_ARGON2_MEMORY,
            DEFAULT_ARGON2_PARALLELISM,
        )
    }
}

impl KdfParameters {
    /// AES-KDF with a fresh random seed
    pub fn aes(rounds: u64) -> Self {
        Self::aes_with_seed(rounds, random_seed())
    }

    /// AES-KDF with an explicit seed (legacy headers store it this way)
    pub fn aes_with_seed(rounds: u64, seed: Vec<u8>) -> Self {
        let mut dict = VariantDictionary::new();
        dict.set(KEY_UUID, Variant::Bytes(AES_KDF_UUID.as_bytes().to_vec()));
        dict.set(KEY_ROUNDS, Variant::UInt64(rounds));
        dict.set(KEY_SALT, Variant::Bytes(seed));
        Self { dict }
    }

    /// Argon2 with a fresh random salt; `memory` is in bytes
    pub fn argon2(variant: KdfAlgorithm, iterations: u64, memory: u64, parallelism: u32) -> Self {
        let variant = match variant {
            KdfAlgorithm::AesKdf => KdfAlgorithm::Argon2d,
            other => other,
        };
        let mut dict = VariantDictionary::new();
        dict.set(KEY_UUID, Variant::Bytes(variant.uuid().as_bytes().to_vec()));
        dict.set(KEY_SALT, Variant::Bytes(random_seed()));
        dict.set(KEY_PARALLELISM, Variant::UInt32(parallelism));
        dict.set(KEY_MEMORY, Variant::UInt64(memory));
        dict.set(KEY_ITERATIONS, Variant::UInt64(iterations));
        dict.set(KEY_VERSION, Variant::UInt32(DEFAULT_ARGON2_VERSION));
        Self { dict }
    }

    /// Defaults for the given algorithm
    pub fn default_for(algorithm: KdfAlgorithm) -> Self {
        match algorithm {
            KdfAlgorithm::AesKdf => Self::aes(DEFAULT_AES_ROUNDS),
            other => Self::argon2(
                other,
                DEFAULT_ARGON2_ITERATIONS,
                DEFAULT_ARGON2_MEMORY,
                DEFAULT_ARGON2_PARALLELISM,
            ),
        }
    }

    /// Wrap a decoded dictionary; it must carry a 16-byte `$UUID`
    pub fn from_dictionary(dict: VariantDictionary) -> Result<Self> {
        match dict.get_bytes(KEY_UUID) {
            Some(bytes) if bytes.len() == 16 => Ok(Self { dict }),
            _ => Err(Error::MalformedHeader(
                "KDF parameters without a valid $UUID".to_string(),
            )),
        }
    }

    pub fn dictionary(&self) -> &VariantDictionary {
        &self.dict
    }

    pub fn uuid(&self) -> Uuid {
        self.dict
            .get_bytes(KEY_UUID)
            .and_then(|b| Uuid::from_slice(b).ok())
            .unwrap_or_else(Uuid::nil)
    }

    pub fn algorithm(&self) -> Result<KdfAlgorithm> {
        KdfAlgorithm::from_uuid(&self.uuid())
    }

    /// Seed (AES-KDF) or salt (Argon2)
    pub fn seed(&self) -> Option<&[u8]> {
        self.dict.get_bytes(KEY_SALT)
    }

    pub fn aes_rounds(&self) -> Option<u64> {
        self.dict.get_u64(KEY_ROUNDS)
    }

    /// Replace the seed/salt with fresh random bytes; nothing else changes
    pub fn randomize(&mut self) {
        self.dict.set(KEY_SALT, Variant::Bytes(random_seed()));
    }

    /// Parse into a runnable engine
    pub fn engine(&self) -> Result<KdfEngine> {
        KdfEngine::from_parameters(self)
    }
}

fn random_seed() -> Vec<u8> {
    let mut seed = vec![0u8; SEED_LEN];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

/// A parsed KDF, carrying only what its algorithm needs
#[derive(Clone)]
pub enum KdfEngine {
    Aes {
        rounds: u64,
        seed: Vec<u8>,
    },
    Argon2 {
        algorithm: Algorithm,
        version: Version,
        salt: Vec<u8>,
        iterations: u32,
        memory_kib: u32,
        parallelism: u32,
        secret: Zeroizing<Vec<u8>>,
        assoc: Vec<u8>,
    },
}

impl std::fmt::Debug for KdfEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KdfEngine::Aes { rounds, .. } => write!(f, "AesKdf(rounds={})", rounds),
            KdfEngine::Argon2 {
                algorithm,
                iterations,
                memory_kib,
                parallelism,
                ..
            } => write!(
                f,
                "{:?}(t={}, m={}KiB, p={})",
                algorithm, iterations, memory_kib, parallelism
            ),
        }
    }
}

impl KdfEngine {
    pub fn from_parameters(params: &KdfParameters) -> Result<Self> {
        let dict = params.dictionary();
        let missing = |name: &str| Error::MalformedHeader(format!("KDF parameter '{}' missing", name));

        let algorithm = params.algorithm()?;
        let seed = dict
            .get_bytes(KEY_SALT)
            .ok_or_else(|| missing(KEY_SALT))?
            .to_vec();

        if algorithm == KdfAlgorithm::AesKdf {
            if seed.len() != 32 {
                return Err(Error::MalformedHeader(format!(
                    "AES-KDF seed must be 32 bytes, got {}",
                    seed.len()
                )));
            }
            let rounds = dict.get_u64(KEY_ROUNDS).ok_or_else(|| missing(KEY_ROUNDS))?;
            return Ok(KdfEngine::Aes { rounds, seed });
        }

        let version = match dict.get_u32(KEY_VERSION).unwrap_or(DEFAULT_ARGON2_VERSION) {
            0x10 => Version::V0x10,
            // The argon2 crate only implements 0x10 and 0x13
            0x11..=0x13 => Version::V0x13,
            other => {
                return Err(Error::UnsupportedVersion(format!(
                    "Argon2 version 0x{:x}",
                    other
                )))
            }
        };
        let iterations = dict
            .get_u64(KEY_ITERATIONS)
            .ok_or_else(|| missing(KEY_ITERATIONS))?;
        let memory = dict.get_u64(KEY_MEMORY).ok_or_else(|| missing(KEY_MEMORY))?;
        let parallelism = dict
            .get_u32(KEY_PARALLELISM)
            .ok_or_else(|| missing(KEY_PARALLELISM))?;

        let out_of_range = |name: &str| Error::MalformedHeader(format!("Argon2 {} out of range", name));
        Ok(KdfEngine::Argon2 {
            algorithm: if algorithm == KdfAlgorithm::Argon2id {
                Algorithm::Argon2id
            } else {
                Algorithm::Argon2d
            },
            version,
            salt: seed,
            iterations: u32::try_from(iterations).map_err(|_| out_of_range("iterations"))?,
            memory_kib: u32::try_from(memory / 1024).map_err(|_| out_of_range("memory"))?,
            parallelism,
            secret: Zeroizing::new(dict.get_bytes(KEY_SECRET).unwrap_or_default().to_vec()),
            assoc: dict.get_bytes(KEY_ASSOC).unwrap_or_default().to_vec(),
        })
    }

    /// Stretch the 32-byte composite key
    pub fn transform(&self, key: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
        match self {
            KdfEngine::Aes { rounds, seed } => aes_kdf(key, seed, *rounds),
            KdfEngine::Argon2 {
                algorithm,
                version,
                salt,
                iterations,
                memory_kib,
                parallelism,
                secret,
                assoc,
            } => {
                let invalid = |e: argon2::Error| Error::MalformedHeader(format!("Argon2 parameters: {}", e));

                let mut builder = ParamsBuilder::new();
                builder
                    .m_cost(*memory_kib)
                    .t_cost(*iterations)
                    .p_cost(*parallelism)
                    .output_len(32);
                if !assoc.is_empty() {
                    builder.data(AssociatedData::new(assoc).map_err(invalid)?);
                }
                let params = builder.build().map_err(invalid)?;

                let argon = if secret.is_empty() {
                    Argon2::new(*algorithm, *version, params)
                } else {
                    Argon2::new_with_secret(secret, *algorithm, *version, params).map_err(invalid)?
                };

                let mut out = Zeroizing::new([0u8; 32]);
                argon
                    .hash_password_into(key, salt, &mut out[..])
                    .map_err(invalid)?;
                Ok(out)
            }
        }
    }
}

fn aes_kdf(key: &[u8; 32], seed: &[u8], rounds: u64) -> Result<Zeroizing<[u8; 32]>> {
    let cipher = Aes256::new_from_slice(seed)
        .map_err(|_| Error::MalformedHeader("AES-KDF seed must be 32 bytes".to_string()))?;

    let mut block = Zeroizing::new(*key);
    {
        let (left, right) = block.split_at_mut(16);
        let left = GenericArray::from_mut_slice(left);
        let right = GenericArray::from_mut_slice(right);
        for _ in 0..rounds {
            cipher.encrypt_block(left);
            cipher.encrypt_block(right);
        }
    }

    Ok(Zeroizing::new(Sha256::digest(&block[..]).into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_argon2(variant: KdfAlgorithm) -> KdfParameters {
        KdfParameters::argon2(variant, 1, 64 * 1024, 1)
    }

    #[test]
    fn test_aes_kdf_zero_rounds_is_sha256() {
        let key = [5u8; 32];
        let params = KdfParameters::aes_with_seed(0, vec![1u8; 32]);
        let out = params.engine().unwrap().transform(&key).unwrap();
        let expected: [u8; 32] = Sha256::digest(key).into();
        assert_eq!(*out, expected);
    }

    #[test]
    fn test_aes_kdf_rounds_change_output() {
        let key = [5u8; 32];
        let one = KdfParameters::aes_with_seed(1, vec![1u8; 32]);
        let two = KdfParameters::aes_with_seed(2, vec![1u8; 32]);
        assert_ne!(
            *one.engine().unwrap().transform(&key).unwrap(),
            *two.engine().unwrap().transform(&key).unwrap()
        );
    }

    #[test]
    fn test_argon2_is_deterministic() {
        for variant in [KdfAlgorithm::Argon2d, KdfAlgorithm::Argon2id] {
            let params = cheap_argon2(variant);
            let engine = params.engine().unwrap();
            let a = engine.transform(&[3u8; 32]).unwrap();
            let b = engine.transform(&[3u8; 32]).unwrap();
            assert_eq!(*a, *b);
            assert_ne!(*a, *engine.transform(&[4u8; 32]).unwrap());
        }
    }

    #[test]
    fn test_argon2_variants_differ() {
        let mut d = cheap_argon2(KdfAlgorithm::Argon2d);
        let mut id = cheap_argon2(KdfAlgorithm::Argon2id);
        d.dict.set(KEY_SALT, Variant::Bytes(vec![7u8; 32]));
        id.dict.set(KEY_SALT, Variant::Bytes(vec![7u8; 32]));
        assert_ne!(
            *d.engine().unwrap().transform(&[0u8; 32]).unwrap(),
            *id.engine().unwrap().transform(&[0u8; 32]).unwrap()
        );
    }

    #[test]
    fn test_randomize_keeps_algorithm() {
        let mut params = KdfParameters::default_for(KdfAlgorithm::Argon2id);
        let before = params.seed().unwrap().to_vec();
        params.randomize();
        assert_ne!(params.seed().unwrap(), &before[..]);
        assert_eq!(params.algorithm().unwrap(), KdfAlgorithm::Argon2id);
        assert_eq!(params.dictionary().get_u64(KEY_ITERATIONS), Some(2));
    }

    #[test]
    fn test_unknown_uuid() {
        let mut dict = VariantDictionary::new();
        dict.set(KEY_UUID, Variant::Bytes(vec![0u8; 16]));
        let params = KdfParameters::from_dictionary(dict).unwrap();
        assert!(matches!(params.engine(), Err(Error::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_missing_uuid_is_malformed() {
        assert!(matches!(
            KdfParameters::from_dictionary(VariantDictionary::new()),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_argon2_version_range() {
        let mut params = cheap_argon2(KdfAlgorithm::Argon2d);
        params.dict.set(KEY_VERSION, Variant::UInt32(0x14));
        assert!(matches!(params.engine(), Err(Error::UnsupportedVersion(_))));

        params.dict.set(KEY_VERSION, Variant::UInt32(0x10));
        assert!(params.engine().unwrap().transform(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_argon2_secret_changes_output() {
        let mut params = cheap_argon2(KdfAlgorithm::Argon2d);
        let plain = params.engine().unwrap().transform(&[1u8; 32]).unwrap();
        params.dict.set(KEY_SECRET, Variant::Bytes(vec![9u8; 16]));
        params.dict.set(KEY_ASSOC, Variant::Bytes(vec![8u8; 16]));
        let keyed = params.engine().unwrap().transform(&[1u8; 32]).unwrap();
        assert_ne!(*plain, *keyed);
    }
}
