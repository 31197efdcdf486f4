//! Pure WireGuard provisioning library for tunnelgate.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! Dependencies are injected via traits:
//! - [`identity::KeyMaterialProvider`] - Source of fresh peer keys
//!
//! # Example
//!
//! ```ignore
//! use tunnelgate_wg::{render_client, ConfigParams, KeyMaterialProvider, X25519Provider};
//!
//! let material = X25519Provider.generate()?;
//! let params = ConfigParams::builder()
//!     .key_material(&material)
//!     .client_address(address)
//!     /* ... */
//!     .build()?;
//! let config = render_client(&params);
//! ```

pub mod identity;
pub mod render;

pub use identity::{
    public_key_from_private, Fingerprint, KeyError, KeyMaterial, KeyMaterialProvider,
    PresharedKey, PrivateKey, PublicKey, X25519Provider,
};
pub use render::{
    contains_peer, render_client, render_server_peer, ClientConfig, ConfigParams,
    ConfigParamsBuilder, ServerPeer, TemplateError,
};
