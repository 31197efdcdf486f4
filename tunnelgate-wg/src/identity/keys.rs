//! WireGuard key types.
//!
//! Curve25519 keypairs and preshared keys with proper secret handling:
//! - Private and preshared keys are zeroized on drop
//! - No Debug/Display implementations that leak secrets
//! - Preshared key comparison is constant-time
//! - Text form is standard base64 with padding, as `wg` prints it
//! - Fingerprint format for logs: `SHA256:{url_safe_base64_no_padding}`

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of every WireGuard key in bytes.
pub const KEY_LEN: usize = 32;

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The provided bytes have an invalid length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The text is not valid base64.
    #[error("invalid key encoding")]
    InvalidEncoding,

    /// The OS random number generator failed.
    #[error("entropy source failed: {0}")]
    Entropy(String),
}

fn decode_key(text: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, KeyError> {
    let decoded = Zeroizing::new(
        STANDARD
            .decode(text.trim())
            .map_err(|_| KeyError::InvalidEncoding)?,
    );
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    if decoded.len() != KEY_LEN {
        return Err(KeyError::InvalidLength {
            expected: KEY_LEN,
            actual: decoded.len(),
        });
    }
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}

fn random_bytes() -> Result<Zeroizing<[u8; KEY_LEN]>, KeyError> {
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    OsRng
        .try_fill_bytes(&mut bytes[..])
        .map_err(|e| KeyError::Entropy(e.to_string()))?;
    Ok(bytes)
}

/// A Curve25519 private key.
///
/// # Security
///
/// - Zeroized on drop (`StaticSecret` implements `ZeroizeOnDrop`)
/// - No `Debug` implementation to prevent accidental logging
#[derive(Clone)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

impl PrivateKey {
    /// Generate a new random private key, clamped the way `wg genkey` does.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Entropy` if the OS RNG fails.
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = random_bytes()?;
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;
        Ok(Self(x25519_dalek::StaticSecret::from(*bytes)))
    }

    /// Load a private key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(x25519_dalek::StaticSecret::from(bytes)))
    }

    /// Parse the base64 text form.
    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let bytes = decode_key(text)?;
        Ok(Self(x25519_dalek::StaticSecret::from(*bytes)))
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0).to_bytes())
    }

    /// Export the base64 text form.
    ///
    /// # Security
    ///
    /// The returned string is zeroized on drop. Copying it out defeats that.
    #[must_use]
    pub fn to_base64(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.0.to_bytes());
        Zeroizing::new(STANDARD.encode(&bytes[..]))
    }
}

// Explicitly NO Debug implementation for PrivateKey

/// A Curve25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Load a public key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Parse the base64 text form.
    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let bytes = decode_key(text)?;
        Ok(Self(*bytes))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }

    /// The base64 text form used in WireGuard config files.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_public_key(self)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl std::str::FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// A WireGuard preshared key: 32 random bytes shared by both peers.
///
/// # Security
///
/// Zeroized on drop; equality is constant-time; no `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PresharedKey([u8; KEY_LEN]);

impl PresharedKey {
    /// # Errors
    ///
    /// Returns `KeyError::Entropy` if the OS RNG fails.
    pub fn generate() -> Result<Self, KeyError> {
        let bytes = random_bytes()?;
        Ok(Self(*bytes))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let bytes = decode_key(text)?;
        Ok(Self(*bytes))
    }

    /// Raw bytes, for persistence.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.0))
    }
}

impl PartialEq for PresharedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PresharedKey {}

/// A SHA-256 fingerprint of a public key, safe to log.
///
/// Format: `SHA256:{base64_no_padding}`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The prefix used for fingerprint strings.
    pub const PREFIX: &'static str = "SHA256:";

    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let hash = Sha256::digest(public_key.to_bytes());
        Self(format!("{}{}", Self::PREFIX, URL_SAFE_NO_PAD.encode(hash)))
    }

    /// First characters of the hash, enough to tell peers apart in logs.
    #[must_use]
    pub fn short(&self) -> &str {
        let end = (Self::PREFIX.len() + 12).min(self.0.len());
        &self.0[Self::PREFIX.len()..end]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_private_key_is_clamped() {
        let key = PrivateKey::generate().unwrap();
        let bytes = STANDARD.decode(key.to_base64().as_str()).unwrap();
        assert_eq!(bytes[0] & 7, 0);
        assert_eq!(bytes[31] & 128, 0);
        assert_eq!(bytes[31] & 64, 64);
    }

    #[test]
    fn private_key_base64_roundtrip_keeps_public_key() {
        let key = PrivateKey::generate().unwrap();
        let restored = PrivateKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.public_key(), restored.public_key());
    }

    #[test]
    fn public_key_matches_known_vector() {
        // RFC 7748 section 6.1, Alice's keypair.
        let private = PrivateKey::from_bytes(&[
            0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2,
            0x66, 0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5,
            0x1d, 0xb9, 0x2c, 0x2a,
        ])
        .unwrap();
        let expected = [
            0x85, 0x20, 0xf0, 0x09, 0x89, 0x30, 0xa7, 0x54, 0x74, 0x8b, 0x7d, 0xdc, 0xb4, 0x3e,
            0xf7, 0x5a, 0x0d, 0xbf, 0x3a, 0x0d, 0x26, 0x38, 0x1a, 0xf4, 0xeb, 0xa4, 0xa9, 0x8e,
            0xaa, 0x9b, 0x4e, 0x6a,
        ];
        assert_eq!(private.public_key().to_bytes(), expected);
    }

    #[test]
    fn base64_text_is_44_chars() {
        let key = PrivateKey::generate().unwrap();
        assert_eq!(key.to_base64().len(), 44);
        assert_eq!(key.public_key().to_base64().len(), 44);
        assert_eq!(PresharedKey::generate().unwrap().to_base64().len(), 44);
    }

    #[test]
    fn invalid_text_is_rejected() {
        assert_eq!(
            PublicKey::from_base64("not base64!"),
            Err(KeyError::InvalidEncoding)
        );
        assert_eq!(
            PublicKey::from_base64("YWJj"),
            Err(KeyError::InvalidLength {
                expected: 32,
                actual: 3
            })
        );
    }

    #[test]
    fn preshared_keys_differ() {
        let a = PresharedKey::generate().unwrap();
        let b = PresharedKey::generate().unwrap();
        assert!(a != b);
        assert!(a == a.clone());
    }

    #[test]
    fn fingerprint_format() {
        let public = PrivateKey::generate().unwrap().public_key();
        let fingerprint = public.fingerprint();
        assert!(fingerprint.as_str().starts_with("SHA256:"));
        assert_eq!(fingerprint.as_str().len(), 50);
        assert_eq!(fingerprint.short().len(), 12);
        assert_eq!(format!("{public:?}"), format!("PublicKey({fingerprint})"));
    }

    #[test]
    fn public_key_serializes_as_base64() {
        let public = PrivateKey::generate().unwrap().public_key();
        let json = serde_json::to_string(&public).unwrap();
        assert_eq!(json, format!("\"{}\"", public.to_base64()));
        let parsed: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, public);
    }
}
