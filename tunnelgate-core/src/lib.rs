//! # Tunnelgate Core
//!
//! Pure domain types for enrolling devices into a WireGuard overlay network.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//!
//! All types are plain Rust structs/enums with serde serialization. Storage,
//! artifacts and the HTTP surface live in `tunnelgate-daemon`.
//!
//! ## Modules
//!
//! - [`address`] - Overlay addresses and sequential allocation arithmetic
//! - [`capability`] - Device capabilities and the capability list format
//! - [`credential`] - Token identifiers and words
//! - [`enrollment`] - Enrollment stages and results
//! - [`identity`] - Device and owner identifiers

pub mod address;
pub mod capability;
pub mod credential;
pub mod enrollment;
pub mod identity;

// Re-export commonly used types at crate root for convenience.

pub use address::{AddressError, AddressSpace, NetworkAddress};
pub use capability::{parse_capability_list, Capability, CapabilityError, CapabilitySpec};
pub use credential::{normalize_word, TokenId, TokenPosition, TokenTriple, TokenWords};
pub use enrollment::{InitiateStage, InitiatedEnrollment, RedeemStage, ReleasedConfig};
pub use identity::{Device, DeviceId, DeviceName, OwnerId};
