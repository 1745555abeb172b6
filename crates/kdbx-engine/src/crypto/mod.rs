//! Cryptographic building blocks: body ciphers, the inner keystream, key
//! derivation and the composite key

pub mod cipher;
pub mod kdf;
pub mod key;
pub mod keystream;

pub use self::cipher::{CipherAlgorithm, CipherTransform};
pub use self::kdf::{KdfAlgorithm, KdfEngine, KdfParameters};
pub use self::key::{CompositeKey, Credentials};
pub use self::keystream::{InnerStream, InnerStreamAlgorithm};
