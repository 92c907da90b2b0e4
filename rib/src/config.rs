// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::bestpath::SelectionPolicy;
use crate::types::{AddressFamily, Prefix};
use crate::{
    DEFAULT_LOCAL_PREF, DEFAULT_MAX_ECMP_PATHS, DEFAULT_SNAPSHOT_IDLE_SECS,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

fn default_local_pref() -> u32 {
    DEFAULT_LOCAL_PREF
}

fn default_max_ecmp_paths() -> usize {
    DEFAULT_MAX_ECMP_PATHS
}

fn default_snapshot_idle_secs() -> u64 {
    DEFAULT_SNAPSHOT_IDLE_SECS
}

/// Router-wide settings for the Loc-RIB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RibConfig {
    /// Local autonomous system number.
    pub asn: u32,

    /// BGP identifier of this speaker.
    pub router_id: Ipv4Addr,

    /// Route reflection cluster identifier. Defaults to the router id.
    #[serde(default)]
    pub cluster_id: Option<Ipv4Addr>,

    #[serde(default = "default_local_pref")]
    pub default_local_pref: u32,

    /// Compare MED between paths from different neighboring autonomous
    /// systems.
    #[serde(default)]
    pub always_compare_med: bool,

    #[serde(default = "default_max_ecmp_paths")]
    pub max_ecmp_paths: usize,

    /// Local interface address used as next hop for IPv4 aggregates
    /// configured with next-hop-self.
    #[serde(default)]
    pub local_v4: Option<Ipv4Addr>,

    /// Local interface address used as next hop for IPv6 aggregates
    /// configured with next-hop-self.
    #[serde(default)]
    pub local_v6: Option<Ipv6Addr>,

    #[serde(default = "default_snapshot_idle_secs")]
    pub snapshot_idle_secs: u64,
}

impl RibConfig {
    pub fn new(asn: u32, router_id: Ipv4Addr) -> Self {
        Self {
            asn,
            router_id,
            cluster_id: None,
            default_local_pref: DEFAULT_LOCAL_PREF,
            always_compare_med: false,
            max_ecmp_paths: DEFAULT_MAX_ECMP_PATHS,
            local_v4: None,
            local_v6: None,
            snapshot_idle_secs: DEFAULT_SNAPSHOT_IDLE_SECS,
        }
    }

    pub fn cluster_id(&self) -> Ipv4Addr {
        self.cluster_id.unwrap_or(self.router_id)
    }

    pub fn local_address(&self, family: AddressFamily) -> Option<IpAddr> {
        match family {
            AddressFamily::Ipv4 => self.local_v4.map(IpAddr::V4),
            AddressFamily::Ipv6 => self.local_v6.map(IpAddr::V6),
        }
    }

    pub fn snapshot_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_idle_secs)
    }

    pub fn policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            default_local_pref: self.default_local_pref,
            always_compare_med: self.always_compare_med,
            max_ecmp_paths: self.max_ecmp_paths.max(1),
        }
    }
}

/// A configured aggregate route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AggregateConfig {
    pub prefix: Prefix,

    /// Carry the AS numbers of contributors as an AS_SET.
    #[serde(default)]
    pub generate_as_set: bool,

    /// Advertise only the aggregate and suppress contributing routes.
    #[serde(default)]
    pub send_summary_only: bool,

    /// Use the local interface address as the aggregate's next hop.
    #[serde(default)]
    pub next_hop_self: bool,
}

impl AggregateConfig {
    pub fn new(prefix: Prefix) -> Self {
        Self {
            prefix,
            generate_as_set: false,
            send_summary_only: false,
            next_hop_self: false,
        }
    }
}
