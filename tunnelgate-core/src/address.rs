//! Overlay network addresses and sequential allocation arithmetic.
//!
//! Allocation is derived, not stored: the next address is the highest address
//! currently assigned plus one. This module only does the arithmetic; reading
//! the current maximum is the caller's job and must come from the
//! authoritative device table.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors from address parsing and allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// No address is left in the overlay network.
    #[error("address space exhausted after {last}")]
    Exhausted { last: NetworkAddress },

    /// The string is not an IP address.
    #[error("invalid network address: {0}")]
    Invalid(String),

    /// A stored address has the wrong byte length.
    #[error("invalid stored address: expected 16 bytes, got {0}")]
    InvalidEncoding(usize),

    /// The initial address does not belong to the overlay network.
    #[error("address {address} is outside overlay network {network}")]
    OutsideNetwork {
        address: NetworkAddress,
        network: IpNetwork,
    },

    /// The initial address is the network or broadcast address of an IPv4
    /// overlay.
    #[error("address {address} is reserved in overlay network {network}")]
    Reserved {
        address: NetworkAddress,
        network: IpNetwork,
    },
}

/// An address inside the overlay network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkAddress(IpAddr);

impl NetworkAddress {
    pub fn new(ip: impl Into<IpAddr>) -> Self {
        Self(ip.into())
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// The address that follows this one, or `None` on overflow.
    pub fn successor(&self) -> Option<Self> {
        match self.0 {
            IpAddr::V4(v4) => u32::from(v4)
                .checked_add(1)
                .map(|n| Self(IpAddr::V4(n.into()))),
            IpAddr::V6(v6) => u128::from(v6)
                .checked_add(1)
                .map(|n| Self(IpAddr::V6(n.into()))),
        }
    }

    /// File name for this address's client config: the textual address with
    /// separator characters removed, so it can be rebuilt from the address.
    pub fn config_file_name(&self) -> String {
        self.0
            .to_string()
            .chars()
            .filter(|c| *c != ':' && *c != '.')
            .collect()
    }

    /// Fixed-width big-endian encoding used as the database column value.
    ///
    /// IPv4 addresses are stored IPv4-mapped so byte order matches numeric
    /// order within a family.
    pub fn to_storage_bytes(&self) -> [u8; 16] {
        match self.0 {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }

    /// Decode a value written by [`to_storage_bytes`](Self::to_storage_bytes).
    pub fn from_storage_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let octets: [u8; 16] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidEncoding(bytes.len()))?;
        Ok(Self(Ipv6Addr::from(octets).to_canonical()))
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<IpAddr>()
            .map(Self)
            .map_err(|_| AddressError::Invalid(s.to_string()))
    }
}

impl From<IpAddr> for NetworkAddress {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl Serialize for NetworkAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NetworkAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The range of addresses handed out to devices.
///
/// IPv4 overlays wider than /31 never hand out their network or broadcast
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    network: IpNetwork,
    initial: NetworkAddress,
}

impl AddressSpace {
    /// Create an address space. `initial` is returned for the first device
    /// and must lie inside `network`.
    pub fn new(network: IpNetwork, initial: NetworkAddress) -> Result<Self, AddressError> {
        if !network.contains(initial.ip()) {
            return Err(AddressError::OutsideNetwork {
                address: initial,
                network,
            });
        }
        let space = Self { network, initial };
        if space.is_reserved(initial) {
            return Err(AddressError::Reserved {
                address: initial,
                network,
            });
        }
        Ok(space)
    }

    pub fn network(&self) -> IpNetwork {
        self.network
    }

    pub fn initial(&self) -> NetworkAddress {
        self.initial
    }

    /// Compute the address to assign given the current maximum.
    ///
    /// `None` means no device exists yet. Fails with
    /// [`AddressError::Exhausted`] when the successor overflows, leaves the
    /// overlay network or would be its IPv4 broadcast address.
    pub fn next_after(
        &self,
        current_max: Option<NetworkAddress>,
    ) -> Result<NetworkAddress, AddressError> {
        let Some(max) = current_max else {
            return Ok(self.initial);
        };

        if max < self.initial {
            return Ok(self.initial);
        }

        let next = max
            .successor()
            .ok_or(AddressError::Exhausted { last: max })?;

        if !self.network.contains(next.ip()) || self.is_reserved(next) {
            return Err(AddressError::Exhausted { last: max });
        }

        Ok(next)
    }

    fn is_reserved(&self, address: NetworkAddress) -> bool {
        match (self.network, address.ip()) {
            // RFC 3021 point-to-point links use both addresses.
            (IpNetwork::V4(net), IpAddr::V4(ip)) if net.prefix() < 31 => {
                ip == net.network() || ip == net.broadcast()
            }
            _ => false,
        }
    }
}
