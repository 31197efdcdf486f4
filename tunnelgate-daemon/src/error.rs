//! Enrollment error taxonomy.

use tunnelgate_core::{CapabilityError, DeviceId, NetworkAddress, TokenPosition};
use tunnelgate_wg::{KeyError, TemplateError};

use crate::store::{AllocationError, CredentialError, RegistryError};

/// Database or filesystem failure underneath an enrollment operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    /// Another writer claimed the address between allocation and insert.
    #[error("address {0} was assigned concurrently")]
    AddressConflict(NetworkAddress),
}

/// Errors from initiating or redeeming an enrollment.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("address space exhausted after {last}")]
    AllocationExhausted { last: NetworkAddress },

    /// Unknown word, unknown triple, or credential already used.
    #[error("credential not found")]
    CredentialNotFound,

    #[error(transparent)]
    MalformedCapability(#[from] CapabilityError),

    #[error("no free token identifier for {0}")]
    TokenSpaceExhausted(TokenPosition),

    #[error("device {0} already holds a live credential")]
    CredentialAlreadyIssued(DeviceId),

    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("key generation failed: {0}")]
    KeyMaterial(#[from] KeyError),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StorageError),
}

impl EnrollmentError {
    /// Failures the caller caused, as opposed to faults in this service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialNotFound | Self::MalformedCapability(_)
        )
    }
}

impl From<sqlx::Error> for EnrollmentError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageFailure(StorageError::Database(err))
    }
}

impl From<std::io::Error> for EnrollmentError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageFailure(StorageError::Io(err))
    }
}

impl From<AllocationError> for EnrollmentError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Exhausted { last } => Self::AllocationExhausted { last },
            AllocationError::AddressTaken(address) => {
                Self::StorageFailure(StorageError::AddressConflict(address))
            }
            AllocationError::Database(e) => e.into(),
        }
    }
}

impl From<CredentialError> for EnrollmentError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound => Self::CredentialNotFound,
            CredentialError::TokenSpaceExhausted(position) => Self::TokenSpaceExhausted(position),
            CredentialError::AlreadyIssued(device) => Self::CredentialAlreadyIssued(device),
            CredentialError::UnknownDevice(device) => Self::UnknownDevice(device),
            CredentialError::Database(e) => e.into(),
        }
    }
}

impl From<RegistryError> for EnrollmentError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownDevice(device) => Self::UnknownDevice(device),
            RegistryError::Database(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        assert!(matches!(
            EnrollmentError::from(CredentialError::NotFound),
            EnrollmentError::CredentialNotFound
        ));
        assert!(matches!(
            EnrollmentError::from(CredentialError::TokenSpaceExhausted(TokenPosition::Two)),
            EnrollmentError::TokenSpaceExhausted(TokenPosition::Two)
        ));
        assert!(matches!(
            EnrollmentError::from(RegistryError::UnknownDevice(DeviceId::new(3))),
            EnrollmentError::UnknownDevice(_)
        ));

        let last: NetworkAddress = "fc00::ffff".parse().unwrap();
        assert!(matches!(
            EnrollmentError::from(AllocationError::Exhausted { last }),
            EnrollmentError::AllocationExhausted { .. }
        ));
        assert!(matches!(
            EnrollmentError::from(AllocationError::AddressTaken(last)),
            EnrollmentError::StorageFailure(_)
        ));
    }

    #[test]
    fn client_errors() {
        assert!(EnrollmentError::CredentialNotFound.is_client_error());
        assert!(!EnrollmentError::UnknownDevice(DeviceId::new(1)).is_client_error());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!EnrollmentError::from(io).is_client_error());
    }
}
