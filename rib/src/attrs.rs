// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BGP path attributes as held by the Loc-RIB. These are the decoded,
//! protocol independent forms; the UPDATE message model in the `bgp` crate
//! converts to and from them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

/// Well-known community: do not advertise outside the local AS.
pub const COMMUNITY_NO_EXPORT: u32 = 0xFFFFFF01;

/// Well-known community: do not advertise to any peer.
pub const COMMUNITY_NO_ADVERTISE: u32 = 0xFFFFFF02;

#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum Origin {
    #[default]
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

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
pub enum AsPathType {
    AsSet = 1,
    AsSequence = 2,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct AsPathSegment {
    pub typ: AsPathType,
    pub value: Vec<u32>,
}

impl AsPathSegment {
    pub fn sequence(value: Vec<u32>) -> Self {
        Self {
            typ: AsPathType::AsSequence,
            value,
        }
    }

    pub fn set(value: Vec<u32>) -> Self {
        Self {
            typ: AsPathType::AsSet,
            value,
        }
    }
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct Aggregator {
    pub asn: u32,
    pub address: Ipv4Addr,
}

#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct PathAttrs {
    pub origin: Origin,
    pub as_path: Vec<AsPathSegment>,
    pub next_hop: Option<IpAddr>,
    pub local_pref: Option<u32>,
    pub med: Option<u32>,
    pub communities: Vec<u32>,
    pub cluster_list: Vec<Ipv4Addr>,
    pub originator_id: Option<Ipv4Addr>,
    pub atomic_aggregate: bool,
    pub aggregator: Option<Aggregator>,
}

impl PathAttrs {
    /// Length of the AS path for the purpose of route selection. Each AS in
    /// a sequence counts, an AS_SET counts as one regardless of its size
    /// (RFC 4271 §9.1.2.2).
    pub fn as_path_len(&self) -> usize {
        self.as_path
            .iter()
            .map(|s| match s.typ {
                AsPathType::AsSequence => s.value.len(),
                AsPathType::AsSet => usize::from(!s.value.is_empty()),
            })
            .sum()
    }

    /// The neighboring AS, i.e. the leftmost AS of the leading sequence.
    /// Used to scope MED comparison.
    pub fn neighbor_as(&self) -> Option<u32> {
        match self.as_path.first() {
            Some(seg) if seg.typ == AsPathType::AsSequence => {
                seg.value.first().copied()
            }
            _ => None,
        }
    }

    /// Every AS number mentioned anywhere in the path.
    pub fn as_numbers(&self) -> BTreeSet<u32> {
        self.as_path
            .iter()
            .flat_map(|s| s.value.iter().copied())
            .collect()
    }

    pub fn contains_as(&self, asn: u32) -> bool {
        self.as_path.iter().any(|s| s.value.contains(&asn))
    }

    /// Prepend `asn` to the AS path, extending the leading sequence when
    /// there is one.
    pub fn prepend_as(&mut self, asn: u32) {
        match self.as_path.first_mut() {
            Some(seg)
                if seg.typ == AsPathType::AsSequence
                    && seg.value.len() < usize::from(u8::MAX) =>
            {
                seg.value.insert(0, asn)
            }
            _ => self.as_path.insert(0, AsPathSegment::sequence(vec![asn])),
        }
    }

    pub fn has_community(&self, community: u32) -> bool {
        self.communities.contains(&community)
    }
}
