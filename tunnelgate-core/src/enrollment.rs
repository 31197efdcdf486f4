//! Enrollment stages.
//!
//! Each enrollment attempt walks one of two fixed stage sequences. The stage
//! reached when an attempt fails is recorded in logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::address::NetworkAddress;
use crate::credential::TokenWords;
use crate::identity::DeviceId;

/// Stages of creating a device and its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiateStage {
    Requested,
    Allocated,
    KeyMaterialized,
    ConfigWritten,
    CredentialIssued,
}

impl InitiateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Allocated => "allocated",
            Self::KeyMaterialized => "key_materialized",
            Self::ConfigWritten => "config_written",
            Self::CredentialIssued => "credential_issued",
        }
    }
}

impl fmt::Display for InitiateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages of exchanging a credential for a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeemStage {
    CredentialPresented,
    Validated,
    CapabilitiesRegistered,
    CredentialRevoked,
    ConfigReleased,
}

impl RedeemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialPresented => "credential_presented",
            Self::Validated => "validated",
            Self::CapabilitiesRegistered => "capabilities_registered",
            Self::CredentialRevoked => "credential_revoked",
            Self::ConfigReleased => "config_released",
        }
    }
}

impl fmt::Display for RedeemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful initiate call.
///
/// `client_config` holds the device's private key; `Debug` leaves it out.
#[derive(Clone)]
pub struct InitiatedEnrollment {
    pub device_id: DeviceId,
    pub network_address: NetworkAddress,
    pub client_config: Zeroizing<String>,
    pub words: TokenWords,
}

impl fmt::Debug for InitiatedEnrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitiatedEnrollment")
            .field("device_id", &self.device_id)
            .field("network_address", &self.network_address)
            .field("client_config", &"..")
            .field("words", &self.words)
            .finish()
    }
}

/// Result of a successful redemption.
#[derive(Clone)]
pub struct ReleasedConfig {
    pub device_id: DeviceId,
    /// File name the config is delivered under.
    pub file_name: String,
    pub contents: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ReleasedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleasedConfig")
            .field("device_id", &self.device_id)
            .field("file_name", &self.file_name)
            .field("contents", &format_args!("{} bytes", self.contents.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_match_serde() {
        assert_eq!(
            serde_json::to_string(&InitiateStage::KeyMaterialized).unwrap(),
            format!("\"{}\"", InitiateStage::KeyMaterialized)
        );
        assert_eq!(
            serde_json::to_string(&RedeemStage::CapabilitiesRegistered).unwrap(),
            format!("\"{}\"", RedeemStage::CapabilitiesRegistered)
        );
    }

    #[test]
    fn debug_output_omits_config_text() {
        let config = "[Interface]\nPrivateKey = c2VjcmV0\n";
        let initiated = InitiatedEnrollment {
            device_id: DeviceId::new(3),
            network_address: "fc00::3".parse().unwrap(),
            client_config: Zeroizing::new(config.to_string()),
            words: TokenWords::new("vague", "soldier", "noodle"),
        };
        let debug = format!("{initiated:?}");
        assert!(debug.contains("fc00::3"));
        assert!(!debug.contains("PrivateKey"));
        assert!(!debug.contains("soldier"));

        let released = ReleasedConfig {
            device_id: DeviceId::new(3),
            file_name: "fc003".into(),
            contents: Zeroizing::new(config.as_bytes().to_vec()),
        };
        let debug = format!("{released:#?}");
        assert!(debug.contains("fc003"));
        assert!(!debug.contains("PrivateKey"));
        assert!(!debug.contains("c2VjcmV0"));
    }
}
