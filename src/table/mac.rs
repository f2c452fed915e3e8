//! Hardware (MAC) address type.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Length of an Ethernet hardware address.
pub const ETH_ALEN: usize = 6;

/// A 6-byte hardware address, the key of the terminal table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr([u8; ETH_ALEN]);

/// Error returned when a string is not a colon-separated hardware address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid MAC address: {input}")]
pub struct ParseMacError {
    input: String,
}

impl MacAddr {
    pub const fn new(octets: [u8; ETH_ALEN]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; ETH_ALEN] {
        self.0
    }

    /// The NIC-specific part of the address plus the last OUI byte
    /// (bytes 3 to 6), used as the hash key.
    pub fn hash_key(&self) -> u32 {
        u32::from_ne_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }
}

impl From<[u8; ETH_ALEN]> for MacAddr {
    fn from(octets: [u8; ETH_ALEN]) -> Self {
        Self(octets)
    }
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Parse `AA:BB:CC:DD:EE:FF`. Hex digits are case-insensitive and each
    /// group may carry one or two digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacError {
            input: s.to_string(),
        };

        let mut octets = [0u8; ETH_ALEN];
        let mut groups = s.split(':');
        for octet in octets.iter_mut() {
            let group = groups.next().ok_or_else(err)?;
            if group.is_empty()
                || group.len() > 2
                || !group.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(err());
            }
            *octet = u8::from_str_radix(group, 16).map_err(|_| err())?;
        }
        if groups.next().is_some() {
            return Err(err());
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        // Pad through the formatter so `{:<17}` works in table output.
        f.pad(&format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        ))
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({})", self)
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
