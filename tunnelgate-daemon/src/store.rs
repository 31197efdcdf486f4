//! SQLite-backed stores for devices, credentials and capabilities.
//!
//! Each store holds a clone of the shared pool. Operations that must commit
//! together take a `&mut SqliteConnection` so the caller can pass a
//! transaction; standalone operations use the pool directly.

use chrono::{DateTime, Utc};

mod capabilities;
mod credentials;
mod devices;

pub use capabilities::{CapabilityRegistry, RegistryError};
pub use credentials::{CredentialError, CredentialStore, Redemption};
pub use devices::{AllocationError, DeviceStore};

/// Wrap a domain parse failure on a stored value as a decode error.
pub(crate) fn decode_error<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Every timestamp column holds RFC 3339 text.
fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}
