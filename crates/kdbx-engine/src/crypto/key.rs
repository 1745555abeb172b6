//! Credentials, composite key and the final key schedule
//!
//! ```text
//! composite = SHA256( SHA256(password) || keyfile_key )
//! transformed = KDF(composite)
//! data_key  = resize( SHA256/512 of seed || transformed )
//! hmac_key  = SHA512( seed || transformed || 0x01 )
//! ```

use crate::error::{Error, Result};
use crate::xml::dom;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use zeroize::{Zeroize, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

/// Password and/or key file supplied by the user
#[derive(Clone, Default)]
pub struct Credentials {
    password: Option<Zeroizing<String>>,
    key_file: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("key_file", &self.key_file.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the password. An empty password counts as no password.
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = if password.is_empty() {
            None
        } else {
            Some(Zeroizing::new(password.to_string()))
        };
        self
    }

    /// Read a key file from any stream
    pub fn with_key_file<R: Read>(mut self, mut reader: R) -> Result<Self> {
        let mut data = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut data)
            .map_err(|e| Error::KeyFileError(e.to_string()))?;
        if data.is_empty() {
            return Err(Error::KeyFileError("Key file is empty".to_string()));
        }
        self.key_file = Some(data);
        Ok(self)
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn has_key_file(&self) -> bool {
        self.key_file.is_some()
    }

    /// Combine the components into the 32-byte composite key
    pub fn composite_key(&self) -> Result<CompositeKey> {
        let mut hasher = Sha256::new();
        let mut any = false;

        if let Some(password) = &self.password {
            hasher.update(Sha256::digest(password.as_bytes()));
            any = true;
        }
        if let Some(data) = &self.key_file {
            let key = key_file_key(data)?;
            hasher.update(&key[..]);
            any = true;
        }

        if !any {
            return Err(Error::EmptyCredentials);
        }
        Ok(CompositeKey(Zeroizing::new(hasher.finalize().into())))
    }
}

/// SHA-256 over the credential components; what the KDF stretches
#[derive(Clone, PartialEq, Eq)]
pub struct CompositeKey(Zeroizing<[u8; 32]>);

impl std::fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompositeKey([REDACTED])")
    }
}

impl CompositeKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Extract the key bytes from a key file
pub fn key_file_key(data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.is_empty() {
        return Err(Error::KeyFileError("Key file is empty".to_string()));
    }

    if data.len() == 32 {
        return Ok(Zeroizing::new(data.to_vec()));
    }

    if data.len() == 64 {
        if let Ok(bytes) = hex::decode(data) {
            return Ok(Zeroizing::new(bytes));
        }
    }

    if let Some(key) = xml_key_file(data)? {
        return Ok(key);
    }

    Ok(Zeroizing::new(Sha256::digest(data).to_vec()))
}

/// Parse an XML key file. `Ok(None)` means "not an XML key file".
fn xml_key_file(data: &[u8]) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let text = match std::str::from_utf8(data) {
        Ok(t) => t.trim_start_matches('\u{feff}').trim_start(),
        Err(_) => return Ok(None),
    };
    if !text.starts_with('<') {
        return Ok(None);
    }
    let root = match dom::parse(text.as_bytes()) {
        Ok(root) if root.name == "KeyFile" => root,
        _ => return Ok(None),
    };

    let version = root
        .child("Meta")
        .and_then(|m| m.child("Version"))
        .map(|v| v.text.trim().to_string())
        .unwrap_or_default();
    let Some(data_el) = root.child("Key").and_then(|k| k.child("Data")) else {
        return Err(Error::KeyFileError("Key file has no Key/Data element".to_string()));
    };

    if version.starts_with("1.") {
        let key = BASE64
            .decode(data_el.text.trim())
            .map_err(|e| Error::KeyFileError(format!("Invalid base64 key data: {}", e)))?;
        return Ok(Some(Zeroizing::new(key)));
    }

    if version.starts_with("2.") {
        let hex_text: String = data_el.text.chars().filter(|c| !c.is_whitespace()).collect();
        let key = hex::decode(&hex_text)
            .map_err(|e| Error::KeyFileError(format!("Invalid hex key data: {}", e)))?;

        if let Some(expected) = data_el.attr("Hash") {
            let digest = Sha256::digest(&key);
            let matches = hex::decode(expected.trim())
                .map(|h| h.len() >= 4 && h[..4] == digest[..4])
                .unwrap_or(false);
            if !matches {
                tracing::warn!("Key file hash attribute does not match key data");
            }
        }
        return Ok(Some(Zeroizing::new(key)));
    }

    Err(Error::KeyFileError(format!(
        "Unsupported key file version '{}'",
        version
    )))
}

/// Keys for the body cipher and the HMAC block stream
pub struct DerivedKeys {
    pub data_key: Zeroizing<Vec<u8>>,
    pub hmac_key: Zeroizing<[u8; 64]>,
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKeys([REDACTED])")
    }
}

/// Combine the master seed with the transformed key
pub fn derive_keys(master_seed: &[u8], transformed: &[u8], key_len: usize) -> Result<DerivedKeys> {
    if master_seed.len() != 32 {
        return Err(Error::MalformedHeader(format!(
            "Master seed must be 32 bytes, got {}",
            master_seed.len()
        )));
    }

    let normalized: Zeroizing<Vec<u8>> = if transformed.len() == 32 {
        Zeroizing::new(transformed.to_vec())
    } else {
        Zeroizing::new(Sha256::digest(transformed).to_vec())
    };

    let mut scratch = [0u8; 65];
    scratch[..32].copy_from_slice(master_seed);
    scratch[32..64].copy_from_slice(&normalized);
    scratch[64] = 0x01;

    let data_key = Zeroizing::new(resize_key(&scratch[..64], key_len));
    let mut hmac_key = Zeroizing::new([0u8; 64]);
    hmac_key.copy_from_slice(&Sha512::digest(scratch));
    scratch.zeroize();

    Ok(DerivedKeys { data_key, hmac_key })
}

/// Squeeze or stretch key material to `len` bytes
pub fn resize_key(input: &[u8], len: usize) -> Vec<u8> {
    if len == 0 {
        return Vec::new();
    }
    if len <= 32 {
        return Sha256::digest(input)[..len].to_vec();
    }

    let hash = Zeroizing::new(Sha512::digest(input).to_vec());
    if len <= 64 {
        return hash[..len].to_vec();
    }

    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        // HMAC accepts keys of any length
        let Ok(mut mac) = HmacSha256::new_from_slice(&hash) else {
            break;
        };
        mac.update(&counter.to_le_bytes());
        let block = mac.finalize().into_bytes();
        let take = (len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);
        counter += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_only_is_double_sha256() {
        let key = Credentials::new().with_password("pw").composite_key().unwrap();
        let expected: [u8; 32] = Sha256::digest(Sha256::digest(b"pw")).into();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_empty_password_counts_as_absent() {
        let err = Credentials::new().with_password("").composite_key().unwrap_err();
        assert_eq!(err, Error::EmptyCredentials);
    }

    #[test]
    fn test_key_file_only() {
        let raw = [0x11u8; 32];
        let key = Credentials::new()
            .with_key_file(&raw[..])
            .unwrap()
            .composite_key()
            .unwrap();
        let expected: [u8; 32] = Sha256::digest(raw).into();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_password_and_key_file() {
        let raw = [0x22u8; 32];
        let key = Credentials::new()
            .with_password("pw")
            .with_key_file(&raw[..])
            .unwrap()
            .composite_key()
            .unwrap();

        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(b"pw"));
        hasher.update(raw);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_empty_key_file_is_error() {
        assert!(matches!(
            Credentials::new().with_key_file(&b""[..]),
            Err(Error::KeyFileError(_))
        ));
    }

    #[test]
    fn test_hex_key_file() {
        let hex_text = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let key = key_file_key(hex_text.as_bytes()).unwrap();
        assert_eq!(*key, hex::decode(hex_text).unwrap());
    }

    #[test]
    fn test_arbitrary_key_file_is_hashed() {
        let data = b"just some bytes that are not a key";
        let key = key_file_key(data).unwrap();
        assert_eq!(*key, Sha256::digest(data).to_vec());
    }

    #[test]
    fn test_xml_v1_key_file() {
        let raw = [0x33u8; 32];
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<KeyFile><Meta><Version>1.00</Version></Meta><Key><Data>{}</Data></Key></KeyFile>",
            BASE64.encode(raw)
        );
        assert_eq!(*key_file_key(xml.as_bytes()).unwrap(), raw.to_vec());
    }

    #[test]
    fn test_xml_v2_key_file_with_hash() {
        let raw = [0x44u8; 32];
        let digest = Sha256::digest(raw);
        let hex_text = hex::encode_upper(raw);
        let xml = format!(
            "<KeyFile>\n<Meta><Version>2.0</Version></Meta>\n<Key><Data Hash=\"{}\">\n {} {}\n</Data></Key>\n</KeyFile>",
            hex::encode_upper(&digest[..4]),
            &hex_text[..32],
            &hex_text[32..]
        );
        assert_eq!(*key_file_key(xml.as_bytes()).unwrap(), raw.to_vec());
    }

    #[test]
    fn test_xml_v2_bad_hash_is_not_fatal() {
        let raw = [0x55u8; 32];
        let xml = format!(
            "<KeyFile><Meta><Version>2.0</Version></Meta><Key><Data Hash=\"DEADBEEF\">{}</Data></Key></KeyFile>",
            hex::encode(raw)
        );
        assert_eq!(*key_file_key(xml.as_bytes()).unwrap(), raw.to_vec());
    }

    #[test]
    fn test_derive_keys_layout() {
        let seed = [1u8; 32];
        let transformed = [2u8; 32];
        let keys = derive_keys(&seed, &transformed, 32).unwrap();

        let mut scratch = Vec::new();
        scratch.extend_from_slice(&seed);
        scratch.extend_from_slice(&transformed);
        let expected_data: [u8; 32] = Sha256::digest(&scratch).into();
        scratch.push(1);
        let expected_hmac = Sha512::digest(&scratch);

        assert_eq!(keys.data_key.as_slice(), &expected_data[..]);
        assert_eq!(&keys.hmac_key[..], &expected_hmac[..]);
    }

    #[test]
    fn test_derive_keys_rejects_short_seed() {
        assert!(matches!(
            derive_keys(&[0u8; 16], &[0u8; 32], 32),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_resize_key_lengths() {
        let input = [7u8; 64];
        assert_eq!(resize_key(&input, 16).len(), 16);
        assert_eq!(resize_key(&input, 64), Sha512::digest(input).to_vec());
        let long = resize_key(&input, 100);
        assert_eq!(long.len(), 100);
        assert_eq!(&long[..64], &resize_key(&input, 128)[..64]);
    }
}
