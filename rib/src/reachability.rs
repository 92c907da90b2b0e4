// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Next hop reachability. BGP next hops are resolved to an egress through
//! an external route manager and the answers are cached per next hop.

use rib_common::{read_lock, write_lock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, RwLock};

#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum InterfaceType {
    #[default]
    Unknown,
    Physical,
    Vlan,
    Loopback,
    Tunnel,
}

/// Answer from the route manager for a next hop lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NextHopInfo {
    /// The resolved (IGP) next hop. All zeros when the BGP next hop is
    /// directly connected and should be used as-is.
    pub next_hop: IpAddr,
    pub if_type: InterfaceType,
    pub if_index: u32,
    pub metric: u32,
}

/// The external route manager consulted for next hop resolution.
pub trait RouteManager: Send {
    fn get_next_hop_info(&self, ip: IpAddr) -> Option<NextHopInfo>;
}

/// How a path's next hop is reached.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct ReachabilityInfo {
    pub next_hop: IpAddr,
    pub if_type: InterfaceType,
    pub if_index: u32,
    pub metric: u32,
}

impl ReachabilityInfo {
    /// Reachability for locally originated routes that have no next hop of
    /// their own.
    pub fn local() -> Self {
        Self {
            next_hop: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            if_type: InterfaceType::Loopback,
            if_index: 0,
            metric: 0,
        }
    }

    /// Reachability of a directly connected next hop.
    pub fn direct(next_hop: IpAddr, if_index: u32) -> Self {
        Self {
            next_hop,
            if_type: InterfaceType::Physical,
            if_index,
            metric: 0,
        }
    }

    pub(crate) fn from_lookup(bgp_next_hop: IpAddr, info: NextHopInfo) -> Self {
        let next_hop = if info.next_hop.is_unspecified() {
            bgp_next_hop
        } else {
            info.next_hop
        };
        Self {
            next_hop,
            if_type: info.if_type,
            if_index: info.if_index,
            metric: info.metric,
        }
    }
}

/// Caching front end to a [`RouteManager`].
pub struct ReachabilityResolver {
    manager: Box<dyn RouteManager>,
    cache: BTreeMap<IpAddr, ReachabilityInfo>,
}

impl ReachabilityResolver {
    pub fn new(manager: Box<dyn RouteManager>) -> Self {
        Self {
            manager,
            cache: BTreeMap::new(),
        }
    }

    /// Resolve `next_hop`, consulting the cache first. Failed lookups are not
    /// cached so a later call may succeed.
    pub fn resolve(&mut self, next_hop: IpAddr) -> Option<ReachabilityInfo> {
        if let Some(info) = self.cache.get(&next_hop) {
            return Some(*info);
        }
        let info = self.manager.get_next_hop_info(next_hop)?;
        let info = ReachabilityInfo::from_lookup(next_hop, info);
        self.cache.insert(next_hop, info);
        Some(info)
    }

    /// Record reachability learned from an asynchronous notification.
    pub fn insert(&mut self, next_hop: IpAddr, info: ReachabilityInfo) {
        self.cache.insert(next_hop, info);
    }

    pub fn invalidate(&mut self, next_hop: IpAddr) -> Option<ReachabilityInfo> {
        self.cache.remove(&next_hop)
    }

    pub fn cached(&self, next_hop: &IpAddr) -> Option<&ReachabilityInfo> {
        self.cache.get(next_hop)
    }
}

/// A route manager backed by a shared table. Clones share the table, so the
/// owner of one handle can change reachability seen by another.
#[derive(Clone, Default)]
pub struct TableRouteManager {
    entries: Arc<RwLock<BTreeMap<IpAddr, NextHopInfo>>>,
}

impl TableRouteManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ip: IpAddr, info: NextHopInfo) {
        write_lock!(self.entries).insert(ip, info);
    }

    /// Mark `ip` as directly connected.
    pub fn set_connected(&self, ip: IpAddr, if_index: u32) {
        self.set(
            ip,
            NextHopInfo {
                next_hop: match ip {
                    IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
                    IpAddr::V6(_) => std::net::Ipv6Addr::UNSPECIFIED.into(),
                },
                if_type: InterfaceType::Physical,
                if_index,
                metric: 0,
            },
        );
    }

    pub fn remove(&self, ip: &IpAddr) {
        write_lock!(self.entries).remove(ip);
    }
}

impl RouteManager for TableRouteManager {
    fn get_next_hop_info(&self, ip: IpAddr) -> Option<NextHopInfo> {
        read_lock!(self.entries).get(&ip).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn zero_next_hop_uses_bgp_next_hop() {
        let rm = TableRouteManager::new();
        let nh: IpAddr = Ipv4Addr::new(192, 0, 2, 1).into();
        rm.set_connected(nh, 3);
        let mut resolver = ReachabilityResolver::new(Box::new(rm.clone()));
        let info = resolver.resolve(nh).expect("resolved");
        assert_eq!(info.next_hop, nh);
        assert_eq!(info.if_index, 3);

        // answers are cached even after the manager forgets the next hop
        rm.remove(&nh);
        assert!(resolver.resolve(nh).is_some());
        resolver.invalidate(nh);
        assert!(resolver.resolve(nh).is_none());
    }

    #[test]
    fn recursive_next_hop() {
        let rm = TableRouteManager::new();
        let nh: IpAddr = Ipv4Addr::new(198, 51, 100, 7).into();
        let igp: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        rm.set(
            nh,
            NextHopInfo {
                next_hop: igp,
                if_type: InterfaceType::Vlan,
                if_index: 9,
                metric: 20,
            },
        );
        let mut resolver = ReachabilityResolver::new(Box::new(rm));
        let info = resolver.resolve(nh).expect("resolved");
        assert_eq!(info.next_hop, igp);
        assert_eq!(info.metric, 20);
    }
}
