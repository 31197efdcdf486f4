//! WireGuard peer identity.
//!
//! - [`PrivateKey`] - Curve25519 key with automatic zeroization on drop
//! - [`PublicKey`] - The key peers name each other by
//! - [`PresharedKey`] - Symmetric key mixed into the handshake
//! - [`Fingerprint`] - Loggable digest of a public key
//! - [`KeyMaterialProvider`] - Source of fresh key material for new peers
//!
//! # Example
//!
//! ```
//! use tunnelgate_wg::identity::{KeyMaterialProvider, X25519Provider};
//!
//! let material = X25519Provider.generate().unwrap();
//! println!("new peer {}", material.public_key.fingerprint());
//! ```

mod keys;
mod provider;

pub use keys::{Fingerprint, KeyError, PresharedKey, PrivateKey, PublicKey, KEY_LEN};
pub use provider::{public_key_from_private, KeyMaterial, KeyMaterialProvider, X25519Provider};
