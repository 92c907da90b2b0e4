// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod aggregate;
pub mod attrs;
pub mod bestpath;
pub mod config;
pub mod destination;
pub mod error;
pub mod locrib;
pub mod log;
pub mod path;
pub mod reachability;
pub mod snapshot;
pub mod store;
pub mod types;

pub use attrs::*;
pub use bestpath::SelectionPolicy;
pub use config::{AggregateConfig, RibConfig};
pub use destination::{
    AggregateMembership, Destination, InstalledRoute, RouteAction, Selection,
};
pub use locrib::{LocRib, LocalRoute, RibChanges, RibUpdate, UpdateOutcome};
pub use path::*;
pub use reachability::{
    InterfaceType, NextHopInfo, ReachabilityInfo, RouteManager,
    TableRouteManager,
};
pub use snapshot::{BulkRoutes, RouteSnapshot, RouteState};
pub use store::{NullStore, RouteStore, SledStore};
pub use types::*;

mod proptest;

/// Test utilities for creating unique test stores and canned paths.
pub mod test;

/// Local preference assumed for paths that do not carry one.
pub const DEFAULT_LOCAL_PREF: u32 = 100;

/// Number of equal cost paths installed per prefix unless configured.
pub const DEFAULT_MAX_ECMP_PATHS: usize = 1;

/// How long a bulk route reader may sit idle before the snapshot list is
/// compacted underneath it.
pub const DEFAULT_SNAPSHOT_IDLE_SECS: u64 = 30;

pub const COMPONENT_RIB: &str = "rib";
pub const MOD_LOC_RIB: &str = "loc_rib";
pub const MOD_AGGREGATE: &str = "aggregate";
