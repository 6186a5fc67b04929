use crate::error::InventoryError;
use crate::resolver::NameResolver;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    V4,
    V6,
}

/// An IPv4 or IPv6 address.
///
/// Ordering is family first (IPv4 before IPv6), then the binary payload
/// compared byte by byte, so it is usable as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(IpAddr);

impl Address {
    pub fn from_v4_bytes(octets: [u8; 4]) -> Self {
        Self(IpAddr::V4(Ipv4Addr::from(octets)))
    }

    pub fn from_v6_bytes(octets: [u8; 16]) -> Self {
        Self(IpAddr::V6(Ipv6Addr::from(octets)))
    }

    /// The wildcard address of `family` (0.0.0.0 or ::)
    pub fn any(family: Family) -> Self {
        match family {
            Family::V4 => Self(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Family::V6 => Self(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        }
    }

    pub fn family(&self) -> Family {
        match self.0 {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// Render for display, going through `resolver` when one is given.
    pub fn to_display_string(&self, resolver: Option<&dyn NameResolver>) -> String {
        match resolver {
            Some(resolver) => resolver.resolve(self),
            None => self.to_string(),
        }
    }

    /// Decode an address field of a `/proc/net/{tcp,udp}[6]` row.
    ///
    /// The kernel prints each 32-bit word of the network-order address as a
    /// host-order integer, so every 8-digit group is converted back through
    /// native endianness.
    pub fn parse_proc_hex(field: &str) -> Result<Self, InventoryError> {
        let invalid = || InventoryError::InvalidAddress(field.to_string());

        if !field.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        match field.len() {
            8 => {
                let word = u32::from_str_radix(field, 16).map_err(|_| invalid())?;
                Ok(Self::from_v4_bytes(word.to_ne_bytes()))
            }
            32 => {
                let mut octets = [0u8; 16];
                for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                    let group = &field[i * 8..(i + 1) * 8];
                    let word = u32::from_str_radix(group, 16).map_err(|_| invalid())?;
                    chunk.copy_from_slice(&word.to_ne_bytes());
                }
                Ok(Self::from_v6_bytes(octets))
            }
            _ => Err(invalid()),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self(IpAddr::V4(ip))
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Self(IpAddr::V6(ip))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
