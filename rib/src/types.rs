// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Formatter};
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, Eq, Hash, PartialEq, JsonSchema,
)]
pub struct Prefix4 {
    pub value: Ipv4Addr,
    pub length: u8,
}

impl PartialOrd for Prefix4 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix4 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl Prefix4 {
    /// Create a new `Prefix4` from an IP address and net mask.
    /// The newly created `Prefix4` will have its host bits zeroed upon creation
    /// e.g.
    /// ```
    /// use rib::types::Prefix4;
    /// use std::net::Ipv4Addr;
    /// let p4 = Prefix4::new(Ipv4Addr::new(10, 0, 0, 10), 24);
    /// assert_eq!(p4.value, Ipv4Addr::new(10, 0, 0, 0));
    /// ```
    pub fn new(ip: Ipv4Addr, length: u8) -> Self {
        let length = length.min(32);
        let mut new = Self { value: ip, length };
        new.unset_host_bits();
        new
    }

    fn mask(&self) -> u32 {
        match self.length {
            0 => 0,
            l => (!0u32) << (32 - l.min(32)),
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        self.value.to_bits() & self.mask() == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        self.value = Ipv4Addr::from_bits(self.value.to_bits() & self.mask())
    }

    /// Returns true if this prefix is equal to or more specific than `other`.
    pub fn within(&self, other: &Prefix4) -> bool {
        if self.length < other.length {
            return false;
        }
        let mask = other.mask();
        self.value.to_bits() & mask == other.value.to_bits() & mask
    }
}

impl fmt::Display for Prefix4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix4 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;
        let length: u8 = length
            .parse()
            .map_err(|_| "malformed length".to_string())?;
        if length > 32 {
            return Err(format!("prefix length {length} exceeds 32"));
        }
        Ok(Self::new(
            value
                .parse()
                .map_err(|_| "malformed ip addr".to_string())?,
            length,
        ))
    }
}

#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, JsonSchema,
)]
pub struct Prefix6 {
    pub value: Ipv6Addr,
    pub length: u8,
}

impl PartialOrd for Prefix6 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix6 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl fmt::Display for Prefix6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl Prefix6 {
    /// Create a new `Prefix6` from an IP address and net mask.
    /// The newly created `Prefix6` will have its host bits zeroed upon creation
    /// e.g.
    /// ```
    /// use rib::types::Prefix6;
    /// use std::net::Ipv6Addr;
    /// use std::str::FromStr;
    /// let p6 = Prefix6::new(Ipv6Addr::from_str("2001:db8::1").unwrap(), 64);
    /// assert_eq!(p6.value, Ipv6Addr::from_str("2001:db8::").unwrap());
    /// ```
    pub fn new(ip: Ipv6Addr, length: u8) -> Self {
        let length = length.min(128);
        let mut new = Self { value: ip, length };
        new.unset_host_bits();
        new
    }

    fn mask(&self) -> u128 {
        match self.length {
            0 => 0,
            l => (!0u128) << (128 - l.min(128)),
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        self.value.to_bits() & self.mask() == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        self.value = Ipv6Addr::from_bits(self.value.to_bits() & self.mask())
    }

    /// Returns true if this prefix is equal to or more specific than `other`.
    pub fn within(&self, other: &Prefix6) -> bool {
        if self.length < other.length {
            return false;
        }
        let mask = other.mask();
        self.value.to_bits() & mask == other.value.to_bits() & mask
    }
}

impl FromStr for Prefix6 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;
        let length: u8 = length
            .parse()
            .map_err(|_| "malformed length".to_string())?;
        if length > 128 {
            return Err(format!("prefix length {length} exceeds 128"));
        }
        Ok(Self::new(
            value
                .parse()
                .map_err(|_| "malformed ip addr".to_string())?,
            length,
        ))
    }
}

/// A destination prefix. The `Display` form (`10.0.0.0/24`, `2001:db8::/32`)
/// is the canonical string key used by the route store.
#[derive(
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    JsonSchema,
    PartialOrd,
    Ord,
)]
pub enum Prefix {
    V4(Prefix4),
    V6(Prefix6),
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Prefix::V4(p) => p.fmt(f),
            Prefix::V6(p) => p.fmt(f),
        }
    }
}

impl From<Prefix4> for Prefix {
    fn from(value: Prefix4) -> Self {
        Self::V4(value)
    }
}

impl From<Prefix6> for Prefix {
    fn from(value: Prefix6) -> Self {
        Self::V6(value)
    }
}

impl FromStr for Prefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(prefix4) = s.parse::<Prefix4>() {
            Ok(Self::V4(prefix4))
        } else if let Ok(prefix6) = s.parse::<Prefix6>() {
            Ok(Self::V6(prefix6))
        } else {
            Err(format!("malformed prefix {s}"))
        }
    }
}

impl Prefix {
    pub fn new(ip: IpAddr, length: u8) -> Self {
        match ip {
            IpAddr::V4(ip4) => Self::V4(Prefix4::new(ip4, length)),
            IpAddr::V6(ip6) => Self::V6(Prefix6::new(ip6, length)),
        }
    }

    pub fn length(&self) -> u8 {
        match self {
            Self::V4(p) => p.length,
            Self::V6(p) => p.length,
        }
    }

    pub fn family(&self) -> AddressFamily {
        match self {
            Self::V4(_) => AddressFamily::Ipv4,
            Self::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Returns true if this prefix is equal to or more specific than `other`.
    /// Cross-family comparisons are always false.
    pub fn within(&self, other: &Prefix) -> bool {
        match (self, other) {
            (Prefix::V4(a), Prefix::V4(b)) => a.within(b),
            (Prefix::V6(a), Prefix::V6(b)) => a.within(b),
            _ => false,
        }
    }

    /// Strictly more specific than `other`.
    pub fn more_specific_of(&self, other: &Prefix) -> bool {
        self.within(other) && self.length() > other.length()
    }
}

#[derive(
    Clone,
    Copy,
    Eq,
    Debug,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum AddressFamily {
    /// IPv4 unicast, carried in the classic UPDATE fields.
    Ipv4,
    /// IPv6 unicast, carried in MP_REACH_NLRI / MP_UNREACH_NLRI.
    Ipv6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }
}

/// Network layer reachability information: a prefix and the path identifier
/// it was announced with. The path identifier is zero when ADD-PATH has not
/// been negotiated.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct Nlri {
    pub prefix: Prefix,
    pub path_id: u32,
}

impl Nlri {
    pub fn new(prefix: Prefix, path_id: u32) -> Self {
        Self { prefix, path_id }
    }
}

impl From<Prefix> for Nlri {
    fn from(prefix: Prefix) -> Self {
        Self { prefix, path_id: 0 }
    }
}

impl fmt::Display for Nlri {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} id {}", self.prefix, self.path_id)
    }
}
