//! Key material generation for new peers.

use super::keys::{KeyError, PresharedKey, PrivateKey, PublicKey};

/// Everything a new peer needs: its keypair and the preshared key it shares
/// with the server.
#[derive(Clone)]
pub struct KeyMaterial {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
    pub preshared_key: PresharedKey,
}

impl KeyMaterial {
    /// Assemble key material from a private key, deriving the public half.
    pub fn new(private_key: PrivateKey, preshared_key: PresharedKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
            preshared_key,
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Source of fresh key material.
///
/// Injected into the enrollment orchestrator so tests can supply fixed keys.
pub trait KeyMaterialProvider: Send + Sync {
    /// Generate a private key, its public key and a preshared key.
    ///
    /// # Errors
    ///
    /// Returns an error if the entropy source fails. Never returns partial
    /// material.
    fn generate(&self) -> Result<KeyMaterial, KeyError>;
}

/// Generates keys in-process with `x25519-dalek` and the OS RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Provider;

impl KeyMaterialProvider for X25519Provider {
    fn generate(&self) -> Result<KeyMaterial, KeyError> {
        let private_key = PrivateKey::generate()?;
        let preshared_key = PresharedKey::generate()?;
        Ok(KeyMaterial::new(private_key, preshared_key))
    }
}

/// Derive the public key for a base64 private key, like `wg pubkey`.
pub fn public_key_from_private(private_key: &str) -> Result<PublicKey, KeyError> {
    PrivateKey::from_base64(private_key).map(|key| key.public_key())
}
