// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::attrs::{Origin, PathAttrs};
use crate::reachability::ReachabilityInfo;
use crate::types::Prefix;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr};

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum RouteType {
    /// Learned from a BGP neighbor.
    Peer,
    /// Redistributed from a connected interface.
    Connected,
    /// Redistributed from a static route.
    Static,
    /// Synthesized by route aggregation.
    Aggregate,
}

/// Who a path came from. Local sources order before neighbors so that,
/// all else being equal, locally sourced paths win the final tie-break.
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
pub enum PathSource {
    Connected,
    Static,
    Aggregate,
    Neighbor(IpAddr),
}

/// Identity of a path within a destination: one path per source and
/// received path identifier.
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
pub struct PathKey {
    pub source: PathSource,
    pub path_id: u32,
}

impl PathKey {
    pub fn neighbor(addr: IpAddr, path_id: u32) -> Self {
        Self {
            source: PathSource::Neighbor(addr),
            path_id,
        }
    }

    pub fn aggregate() -> Self {
        Self {
            source: PathSource::Aggregate,
            path_id: 0,
        }
    }
}

impl Display for PathKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.source {
            PathSource::Neighbor(addr) => write!(f, "{addr}#{}", self.path_id),
            PathSource::Connected => write!(f, "connected#{}", self.path_id),
            PathSource::Static => write!(f, "static#{}", self.path_id),
            PathSource::Aggregate => write!(f, "aggregate#{}", self.path_id),
        }
    }
}

/// The properties of a neighbor that route selection and advertisement
/// depend on.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct NeighborInfo {
    pub address: IpAddr,
    pub asn: u32,
    pub router_id: Ipv4Addr,
    /// Neighbor is in the local AS.
    pub ibgp: bool,
    /// Neighbor is a route reflector client of this speaker.
    pub rr_client: bool,
    /// Maximum number of prefixes accepted from this neighbor.
    pub max_prefixes: Option<u32>,
}

/// What one contributing prefix brings to an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub origin: Origin,
    pub as_numbers: BTreeSet<u32>,
}

/// Bookkeeping carried by synthetic aggregate paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateState {
    pub generate_as_set: bool,
    pub send_summary_only: bool,
    pub contributors: BTreeMap<Prefix, Contribution>,
}

/// One candidate route for a destination.
#[derive(Debug, Clone)]
pub struct Path {
    pub attrs: PathAttrs,
    pub route_type: RouteType,
    /// The neighbor the path was learned from, `None` for local and
    /// aggregate paths.
    pub neighbor: Option<NeighborInfo>,
    /// `None` while the next hop is unresolved.
    pub reachability: Option<ReachabilityInfo>,
    pub aggregate: Option<AggregateState>,
    /// Outbound path identifier used when this path is advertised as an
    /// ADD-PATH runner-up. Assigned by the owning destination.
    pub local_id: u32,
    /// Bumped by the owning destination whenever the path content changes.
    pub revision: u64,
}

impl Path {
    pub fn from_neighbor(neighbor: NeighborInfo, attrs: PathAttrs) -> Self {
        Self {
            attrs,
            route_type: RouteType::Peer,
            neighbor: Some(neighbor),
            reachability: None,
            aggregate: None,
            local_id: 0,
            revision: 0,
        }
    }

    pub fn local(route_type: RouteType, attrs: PathAttrs) -> Self {
        Self {
            attrs,
            route_type,
            neighbor: None,
            reachability: None,
            aggregate: None,
            local_id: 0,
            revision: 0,
        }
    }

    pub fn source(&self) -> PathSource {
        match (self.route_type, self.neighbor) {
            (_, Some(n)) => PathSource::Neighbor(n.address),
            (RouteType::Connected, None) => PathSource::Connected,
            (RouteType::Static, None) => PathSource::Static,
            (RouteType::Aggregate, None) | (RouteType::Peer, None) => {
                PathSource::Aggregate
            }
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachability.is_some()
    }

    pub fn is_ibgp(&self) -> bool {
        self.neighbor.map(|n| n.ibgp).unwrap_or(false)
    }

    pub fn is_local(&self) -> bool {
        self.route_type != RouteType::Peer
    }

    /// Local preference used for selection. LOCAL_PREF received from an
    /// external neighbor is not meaningful and is replaced by the default.
    pub fn effective_local_pref(&self, default: u32) -> u32 {
        match self.neighbor {
            Some(n) if !n.ibgp => default,
            _ => self.attrs.local_pref.unwrap_or(default),
        }
    }

    pub fn igp_metric(&self) -> u32 {
        self.reachability.map(|r| r.metric).unwrap_or(u32::MAX)
    }

    /// BGP identifier used for the final tie-break. Paths with no neighbor
    /// sort ahead of everything.
    pub fn router_id(&self) -> Ipv4Addr {
        self.neighbor
            .map(|n| n.router_id)
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    /// Equality of everything that is visible to route selection and
    /// advertisement. Destination managed identifiers are ignored.
    pub fn same_route(&self, other: &Path) -> bool {
        self.attrs == other.attrs
            && self.route_type == other.route_type
            && self.neighbor == other.neighbor
            && self.reachability == other.reachability
            && self.aggregate == other.aggregate
    }
}
