// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structural model of the outbound messages built by the Adj-RIB-Out.
//! Encoding to the wire happens elsewhere.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use rib::{
    AddressFamily, Aggregator, AsPathSegment, Nlri, Origin, PathAttrs,
};
use std::net::{IpAddr, Ipv4Addr};

/// Ref: RFC 4271 §4.3
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct UpdateMessage {
    /// Withdrawn IPv4 unicast routes.
    pub withdrawn: Vec<Nlri>,
    pub path_attributes: Vec<PathAttribute>,
    /// Announced IPv4 unicast routes.
    pub nlri: Vec<Nlri>,
}

impl UpdateMessage {
    pub fn get(&self, code: PathAttributeTypeCode) -> Option<&PathAttributeValue> {
        self.path_attributes
            .iter()
            .find(|a| a.typ.type_code == code)
            .map(|a| &a.value)
    }

    pub fn get_mut(
        &mut self,
        code: PathAttributeTypeCode,
    ) -> Option<&mut PathAttributeValue> {
        self.path_attributes
            .iter_mut()
            .find(|a| a.typ.type_code == code)
            .map(|a| &mut a.value)
    }

    /// Set an attribute, replacing any existing attribute of the same type.
    /// Attributes are kept in type code order.
    pub fn set(&mut self, value: PathAttributeValue) {
        let attr = PathAttribute::from(value);
        let code = attr.typ.type_code;
        self.path_attributes.retain(|a| a.typ.type_code != code);
        let pos = self
            .path_attributes
            .iter()
            .position(|a| u8::from(a.typ.type_code) > u8::from(code))
            .unwrap_or(self.path_attributes.len());
        self.path_attributes.insert(pos, attr);
    }

    pub fn remove(&mut self, code: PathAttributeTypeCode) {
        self.path_attributes.retain(|a| a.typ.type_code != code);
    }

    /// The message announces something, either in the classic NLRI field or
    /// through MP_REACH_NLRI.
    pub fn has_reachable(&self) -> bool {
        !self.nlri.is_empty()
            || self.get(PathAttributeTypeCode::MpReachNlri).is_some()
    }

    pub fn nexthop(&self) -> Option<IpAddr> {
        match self.get(PathAttributeTypeCode::MpReachNlri) {
            Some(PathAttributeValue::MpReachNlri(mp)) => Some(mp.next_hop),
            _ => match self.get(PathAttributeTypeCode::NextHop) {
                Some(PathAttributeValue::NextHop(nh)) => Some(*nh),
                _ => None,
            },
        }
    }

    /// Rewrite the next hop wherever the message carries one.
    pub fn set_nexthop(&mut self, next_hop: IpAddr) {
        if let Some(PathAttributeValue::MpReachNlri(mp)) =
            self.get_mut(PathAttributeTypeCode::MpReachNlri)
        {
            mp.next_hop = next_hop;
            return;
        }
        self.set(PathAttributeValue::NextHop(next_hop));
    }

    /// Every announced route regardless of address family.
    pub fn announced(&self) -> Vec<Nlri> {
        let mut result = self.nlri.clone();
        if let Some(PathAttributeValue::MpReachNlri(mp)) =
            self.get(PathAttributeTypeCode::MpReachNlri)
        {
            result.extend_from_slice(&mp.nlri);
        }
        result
    }

    /// Every withdrawn route regardless of address family.
    pub fn withdrawn_all(&self) -> Vec<Nlri> {
        let mut result = self.withdrawn.clone();
        if let Some(PathAttributeValue::MpUnreachNlri(mp)) =
            self.get(PathAttributeTypeCode::MpUnreachNlri)
        {
            result.extend_from_slice(&mp.withdrawn);
        }
        result
    }

    pub fn as_path(&self) -> Option<&[AsPathSegment]> {
        match self.get(PathAttributeTypeCode::AsPath) {
            Some(PathAttributeValue::AsPath(segments)) => Some(segments),
            _ => None,
        }
    }

    /// An announcement for `nlri` carrying the attributes of a path.
    pub fn announce(nlri: Nlri, attrs: &PathAttrs) -> Self {
        let mut msg = UpdateMessage::default();
        msg.set(PathAttributeValue::Origin(attrs.origin.into()));
        msg.set(PathAttributeValue::AsPath(attrs.as_path.clone()));
        if let Some(med) = attrs.med {
            msg.set(PathAttributeValue::MultiExitDisc(med));
        }
        if let Some(local_pref) = attrs.local_pref {
            msg.set(PathAttributeValue::LocalPref(local_pref));
        }
        if attrs.atomic_aggregate {
            msg.set(PathAttributeValue::AtomicAggregate);
        }
        if let Some(aggregator) = attrs.aggregator {
            msg.set(PathAttributeValue::Aggregator(aggregator));
        }
        if !attrs.communities.is_empty() {
            msg.set(PathAttributeValue::Communities(
                attrs.communities.iter().map(|c| Community::from(*c)).collect(),
            ));
        }
        if let Some(originator_id) = attrs.originator_id {
            msg.set(PathAttributeValue::OriginatorId(originator_id));
        }
        if !attrs.cluster_list.is_empty() {
            msg.set(PathAttributeValue::ClusterList(attrs.cluster_list.clone()));
        }

        let unspecified = match nlri.prefix.family() {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        };
        let next_hop = attrs.next_hop.unwrap_or(unspecified);
        match nlri.prefix.family() {
            AddressFamily::Ipv4 => {
                msg.nlri.push(nlri);
                msg.set(PathAttributeValue::NextHop(next_hop));
            }
            AddressFamily::Ipv6 => {
                msg.set(PathAttributeValue::MpReachNlri(MpReachNlri {
                    afi: Afi::Ipv6,
                    next_hop,
                    nlri: vec![nlri],
                }));
            }
        }
        msg
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PathAttribute {
    pub typ: PathAttributeType,
    pub value: PathAttributeValue,
}

impl From<PathAttributeValue> for PathAttribute {
    fn from(v: PathAttributeValue) -> Self {
        let flags = match v {
            PathAttributeValue::Origin(_)
            | PathAttributeValue::AsPath(_)
            | PathAttributeValue::NextHop(_)
            | PathAttributeValue::LocalPref(_)
            | PathAttributeValue::AtomicAggregate => {
                path_attribute_flags::TRANSITIVE
            }
            PathAttributeValue::Aggregator(_)
            | PathAttributeValue::Communities(_) => {
                path_attribute_flags::OPTIONAL
                    | path_attribute_flags::TRANSITIVE
            }
            PathAttributeValue::MpReachNlri(_)
            | PathAttributeValue::MpUnreachNlri(_) => {
                path_attribute_flags::OPTIONAL
                    | path_attribute_flags::EXTENDED_LENGTH
            }
            _ => path_attribute_flags::OPTIONAL,
        };
        Self {
            typ: PathAttributeType {
                flags,
                type_code: (&v).into(),
            },
            value: v,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PathAttributeType {
    pub flags: u8,
    pub type_code: PathAttributeTypeCode,
}

pub mod path_attribute_flags {
    pub const OPTIONAL: u8 = 0b10000000;
    pub const TRANSITIVE: u8 = 0b01000000;
    pub const PARTIAL: u8 = 0b00100000;
    pub const EXTENDED_LENGTH: u8 = 0b00010000;
}

#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum PathAttributeTypeCode {
    /// RFC 4271
    Origin = 1,
    AsPath = 2,
    NextHop = 3,
    MultiExitDisc = 4,
    LocalPref = 5,
    AtomicAggregate = 6,
    Aggregator = 7,

    /// RFC 1997
    Communities = 8,

    /// RFC 4456
    OriginatorId = 9,
    ClusterList = 10,

    /// RFC 4760
    MpReachNlri = 14,
    MpUnreachNlri = 15,
}

impl From<&PathAttributeValue> for PathAttributeTypeCode {
    fn from(v: &PathAttributeValue) -> Self {
        match v {
            PathAttributeValue::Origin(_) => PathAttributeTypeCode::Origin,
            PathAttributeValue::AsPath(_) => PathAttributeTypeCode::AsPath,
            PathAttributeValue::NextHop(_) => PathAttributeTypeCode::NextHop,
            PathAttributeValue::MultiExitDisc(_) => {
                PathAttributeTypeCode::MultiExitDisc
            }
            PathAttributeValue::LocalPref(_) => {
                PathAttributeTypeCode::LocalPref
            }
            PathAttributeValue::AtomicAggregate => {
                PathAttributeTypeCode::AtomicAggregate
            }
            PathAttributeValue::Aggregator(_) => {
                PathAttributeTypeCode::Aggregator
            }
            PathAttributeValue::Communities(_) => {
                PathAttributeTypeCode::Communities
            }
            PathAttributeValue::OriginatorId(_) => {
                PathAttributeTypeCode::OriginatorId
            }
            PathAttributeValue::ClusterList(_) => {
                PathAttributeTypeCode::ClusterList
            }
            PathAttributeValue::MpReachNlri(_) => {
                PathAttributeTypeCode::MpReachNlri
            }
            PathAttributeValue::MpUnreachNlri(_) => {
                PathAttributeTypeCode::MpUnreachNlri
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PathAttributeValue {
    Origin(PathOrigin),
    /// Four octet AS numbers throughout.
    AsPath(Vec<AsPathSegment>),
    NextHop(IpAddr),
    MultiExitDisc(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator(Aggregator),
    Communities(Vec<Community>),
    OriginatorId(Ipv4Addr),
    ClusterList(Vec<Ipv4Addr>),
    MpReachNlri(MpReachNlri),
    MpUnreachNlri(MpUnreachNlri),
}

/// Address family identifiers.
///
/// Ref: RFC 4760 §3
#[derive(
    Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u16)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MpReachNlri {
    pub afi: Afi,
    pub next_hop: IpAddr,
    pub nlri: Vec<Nlri>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MpUnreachNlri {
    pub afi: Afi,
    pub withdrawn: Vec<Nlri>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Community {
    /// All routes received carrying a communities attribute
    /// containing this value MUST NOT be advertised outside a BGP
    /// confederation boundary.
    NoExport,

    /// All routes received carrying a communities attribute
    /// containing this value MUST NOT be advertised to other BGP
    /// peers.
    NoAdvertise,

    /// Not advertised to external BGP peers, including peers in other
    /// members autonomous systems inside a confederation.
    NoExportSubConfed,

    UserDefined(u32),
}

impl From<u32> for Community {
    fn from(value: u32) -> Self {
        match value {
            rib::COMMUNITY_NO_EXPORT => Community::NoExport,
            rib::COMMUNITY_NO_ADVERTISE => Community::NoAdvertise,
            0xFFFFFF03 => Community::NoExportSubConfed,
            x => Community::UserDefined(x),
        }
    }
}

impl From<Community> for u32 {
    fn from(value: Community) -> Self {
        match value {
            Community::NoExport => rib::COMMUNITY_NO_EXPORT,
            Community::NoAdvertise => rib::COMMUNITY_NO_ADVERTISE,
            Community::NoExportSubConfed => 0xFFFFFF03,
            Community::UserDefined(x) => x,
        }
    }
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum PathOrigin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

impl From<Origin> for PathOrigin {
    fn from(value: Origin) -> Self {
        match value {
            Origin::Igp => PathOrigin::Igp,
            Origin::Egp => PathOrigin::Egp,
            Origin::Incomplete => PathOrigin::Incomplete,
        }
    }
}

/// Ref: RFC 4271 §4.5
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    Header = 1,
    Open,
    Update,
    HoldTimerExpired,
    Fsm,
    Cease,
}

/// Ref: RFC 4486 §4
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CeaseErrorSubcode {
    Unspecific = 0,
    MaximumNumberofPrefixesReached,
    AdministrativeShutdown,
    PeerDeconfigured,
    AdministrativeReset,
    ConnectionRejected,
    OtherConfigurationChange,
    ConnectionCollisionResolution,
    OutOfResources,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NotificationMessage {
    pub error_code: ErrorCode,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub fn cease(subcode: CeaseErrorSubcode) -> Self {
        Self {
            error_code: ErrorCode::Cease,
            error_subcode: subcode.into(),
            data: Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rib::Prefix;

    #[test]
    fn attributes_stay_ordered() {
        let mut msg = UpdateMessage::default();
        msg.set(PathAttributeValue::LocalPref(100));
        msg.set(PathAttributeValue::Origin(PathOrigin::Igp));
        msg.set(PathAttributeValue::NextHop("192.0.2.1".parse().unwrap()));
        msg.set(PathAttributeValue::LocalPref(200));
        let codes: Vec<PathAttributeTypeCode> =
            msg.path_attributes.iter().map(|a| a.typ.type_code).collect();
        assert_eq!(
            codes,
            vec![
                PathAttributeTypeCode::Origin,
                PathAttributeTypeCode::NextHop,
                PathAttributeTypeCode::LocalPref,
            ]
        );
        assert_eq!(
            msg.get(PathAttributeTypeCode::LocalPref),
            Some(&PathAttributeValue::LocalPref(200))
        );
    }

    #[test]
    fn ipv6_announcements_use_mp_reach() {
        let prefix: Prefix = "2001:db8::/32".parse().unwrap();
        let attrs = PathAttrs {
            next_hop: Some("fd00::1".parse().unwrap()),
            ..Default::default()
        };
        let msg = UpdateMessage::announce(Nlri::from(prefix), &attrs);
        assert!(msg.nlri.is_empty());
        assert!(msg.get(PathAttributeTypeCode::NextHop).is_none());
        assert_eq!(msg.announced(), vec![Nlri::from(prefix)]);
        assert_eq!(msg.nexthop(), attrs.next_hop);
    }

    #[test]
    fn community_values() {
        assert_eq!(Community::from(0xFFFFFF01), Community::NoExport);
        assert_eq!(u32::from(Community::UserDefined(42)), 42);
    }
}
