// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Loc-RIB: every destination known to the speaker, the paths received
//! for each, and the result of route selection.
//!
//! All mutation goes through `&mut self` and is expected to be driven from a
//! single event loop. Only the route snapshot is shared with other threads.

use crate::attrs::{Origin, PathAttrs};
use crate::bestpath::SelectionPolicy;
use crate::config::{AggregateConfig, RibConfig};
use crate::destination::{Destination, RouteAction, Selection};
use crate::error::Error;
use crate::log::rib_log;
use crate::path::{NeighborInfo, Path, PathKey, PathSource, RouteType};
use crate::reachability::{
    NextHopInfo, ReachabilityInfo, ReachabilityResolver, RouteManager,
};
use crate::snapshot::RouteSnapshot;
use crate::store::RouteStore;
use crate::types::{Nlri, Prefix};
use crate::MOD_LOC_RIB;
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// A decoded UPDATE as seen by the Loc-RIB.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RibUpdate {
    /// Announced prefixes, all sharing `path`.
    pub added: Vec<Nlri>,
    pub path: Option<PathAttrs>,
    pub withdrawn: Vec<Nlri>,
}

/// Prefixes whose advertisement state may have changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RibChanges {
    /// The installed route was added or replaced.
    pub updated: BTreeSet<Prefix>,
    /// The installed route is gone.
    pub withdrawn: BTreeSet<Prefix>,
    /// The ADD-PATH runner-up list changed.
    pub updated_add_paths: BTreeSet<Prefix>,
}

impl RibChanges {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
            && self.withdrawn.is_empty()
            && self.updated_add_paths.is_empty()
    }

    pub(crate) fn record(&mut self, prefix: Prefix, selection: &Selection) {
        match selection.action {
            RouteAction::Add | RouteAction::Replace => {
                self.withdrawn.remove(&prefix);
                self.updated.insert(prefix);
            }
            RouteAction::Delete => {
                self.updated.remove(&prefix);
                self.withdrawn.insert(prefix);
            }
            RouteAction::None => {}
        }
        if selection.add_paths_modified {
            self.updated_add_paths.insert(prefix);
        }
    }

    /// Fold in changes that happened after `self`.
    pub fn merge(&mut self, other: RibChanges) {
        for p in other.updated {
            self.withdrawn.remove(&p);
            self.updated.insert(p);
        }
        for p in other.withdrawn {
            self.updated.remove(&p);
            self.withdrawn.insert(p);
        }
        self.updated_add_paths.extend(other.updated_add_paths);
    }

    /// Every prefix mentioned.
    pub fn touched(&self) -> BTreeSet<Prefix> {
        self.updated
            .iter()
            .chain(self.withdrawn.iter())
            .chain(self.updated_add_paths.iter())
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub changes: RibChanges,
    /// False when the neighbor's prefix limit kept some announced prefixes
    /// out of the table.
    pub added_all_prefixes: bool,
}

/// A locally sourced route handed to redistribution.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalRoute {
    pub prefix: Prefix,
    /// The directly connected gateway or interface address.
    pub next_hop: IpAddr,
    pub if_index: u32,
}

/// A path waiting for its next hop to become reachable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct StagedPath {
    pub next_hop: IpAddr,
    pub prefix: Prefix,
    pub key: PathKey,
}

pub struct LocRib {
    pub(crate) config: RibConfig,
    pub(crate) policy: SelectionPolicy,
    pub(crate) destinations: BTreeMap<Prefix, Destination>,
    resolver: ReachabilityResolver,
    unreachable: BTreeSet<StagedPath>,
    prefix_counts: BTreeMap<IpAddr, u32>,
    pub(crate) aggregates: BTreeMap<Prefix, AggregateConfig>,
    snapshot: RouteSnapshot,
    store: Box<dyn RouteStore>,
    pub(crate) log: Logger,
}

impl LocRib {
    pub fn new(
        config: RibConfig,
        manager: Box<dyn RouteManager>,
        store: Box<dyn RouteStore>,
        log: Logger,
    ) -> Self {
        Self {
            policy: config.policy(),
            config,
            destinations: BTreeMap::new(),
            resolver: ReachabilityResolver::new(manager),
            unreachable: BTreeSet::new(),
            prefix_counts: BTreeMap::new(),
            aggregates: BTreeMap::new(),
            snapshot: RouteSnapshot::new(),
            store,
            log,
        }
    }

    pub fn config(&self) -> &RibConfig {
        &self.config
    }

    pub fn destination(&self, prefix: &Prefix) -> Option<&Destination> {
        self.destinations.get(prefix)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.values()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// A handle on the route snapshot for bulk readers on other threads.
    pub fn snapshot(&self) -> RouteSnapshot {
        self.snapshot.clone()
    }

    /// Number of prefixes currently held from a neighbor.
    pub fn prefix_count(&self, neighbor: &IpAddr) -> u32 {
        self.prefix_counts.get(neighbor).copied().unwrap_or(0)
    }

    /// Whether the path is parked waiting on its next hop.
    pub fn is_staged(&self, prefix: &Prefix, key: &PathKey) -> bool {
        self.unreachable
            .iter()
            .any(|s| s.prefix == *prefix && s.key == *key)
    }

    pub fn staged_count(&self) -> usize {
        self.unreachable.len()
    }

    /// Resolve how a path's next hop is reached. Local routes without a
    /// next hop are always reachable.
    pub fn get_reachability_info(
        &mut self,
        path: &Path,
    ) -> Option<ReachabilityInfo> {
        match path.attrs.next_hop {
            Some(nh) => self.resolver.resolve(nh),
            None if path.is_local() => Some(ReachabilityInfo::local()),
            None => None,
        }
    }

    fn check_route_loop(
        &self,
        neighbor: &NeighborInfo,
        attrs: &PathAttrs,
    ) -> Result<(), Error> {
        let cluster_id = self.config.cluster_id();
        if attrs.cluster_list.contains(&cluster_id) {
            return Err(Error::ClusterLoop(cluster_id));
        }
        if attrs.originator_id == Some(self.config.router_id) {
            return Err(Error::OriginatorLoop(self.config.router_id));
        }
        if !neighbor.ibgp && attrs.contains_as(self.config.asn) {
            return Err(Error::AsPathLoop(self.config.asn));
        }
        Ok(())
    }

    /// Apply an UPDATE from `neighbor`. Withdrawals are handled before
    /// announcements, and a prefix that is both withdrawn and announced in
    /// the same message is treated as a replacement.
    ///
    /// Looped paths reject the whole message before anything changes.
    pub fn process_update(
        &mut self,
        neighbor: &NeighborInfo,
        update: &RibUpdate,
        add_path_count: usize,
    ) -> Result<UpdateOutcome, Error> {
        if !update.added.is_empty() {
            let attrs = update
                .path
                .as_ref()
                .ok_or(Error::MissingPath(neighbor.address))?;
            if let Err(e) = self.check_route_loop(neighbor, attrs) {
                rib_log!(self, warn, MOD_LOC_RIB,
                    "rejecting update: {e}";
                    "peer" => neighbor.address.to_string()
                );
                return Err(e);
            }
            if attrs.next_hop.is_none() {
                return Err(Error::MissingNexthop(neighbor.address));
            }
        }

        let mut changes = RibChanges::default();
        let announced: BTreeSet<Nlri> = update.added.iter().copied().collect();

        for nlri in &update.withdrawn {
            if announced.contains(nlri) {
                continue;
            }
            let key = PathKey::neighbor(neighbor.address, nlri.path_id);
            if self
                .withdraw_path(nlri.prefix, key, add_path_count, &mut changes)
                .is_none()
            {
                rib_log!(self, warn, MOD_LOC_RIB,
                    "withdrawal for unknown path {key}";
                    "prefix" => nlri.prefix.to_string()
                );
            }
        }

        let mut added_all_prefixes = true;
        if let Some(attrs) = &update.path {
            for nlri in &update.added {
                let key = PathKey::neighbor(neighbor.address, nlri.path_id);
                if !self.neighbor_has_prefix(&nlri.prefix, neighbor.address) {
                    if let Some(max) = neighbor.max_prefixes {
                        if self.prefix_count(&neighbor.address) >= max {
                            rib_log!(self, warn, MOD_LOC_RIB,
                                "prefix limit {max} reached";
                                "peer" => neighbor.address.to_string(),
                                "prefix" => nlri.prefix.to_string()
                            );
                            added_all_prefixes = false;
                            continue;
                        }
                    }
                    *self.prefix_counts.entry(neighbor.address).or_default() +=
                        1;
                }
                let mut path = Path::from_neighbor(*neighbor, attrs.clone());
                path.reachability = self.get_reachability_info(&path);
                self.install_path(
                    nlri.prefix,
                    key,
                    path,
                    add_path_count,
                    &mut changes,
                );
            }
        }

        Ok(UpdateOutcome {
            changes,
            added_all_prefixes,
        })
    }

    /// Insert or replace a path and rerun selection. Paths whose next hop
    /// did not resolve are staged until it does.
    pub(crate) fn install_path(
        &mut self,
        prefix: Prefix,
        key: PathKey,
        path: Path,
        add_path_count: usize,
        changes: &mut RibChanges,
    ) {
        let staged_next_hop = match path.reachability {
            None => path.attrs.next_hop,
            Some(_) => None,
        };
        let dest = self
            .destinations
            .entry(prefix)
            .or_insert_with(|| Destination::new(prefix));
        if let Some(previous) = dest.insert_path(key, path) {
            self.unstage(prefix, key, &previous);
        }
        if let Some(next_hop) = staged_next_hop {
            rib_log!(self, debug, MOD_LOC_RIB,
                "staging {key} until {next_hop} is reachable";
                "prefix" => prefix.to_string()
            );
            self.unreachable.insert(StagedPath {
                next_hop,
                prefix,
                key,
            });
        }
        self.run_selection(prefix, add_path_count, changes);
    }

    /// Remove a path and rerun selection.
    pub(crate) fn withdraw_path(
        &mut self,
        prefix: Prefix,
        key: PathKey,
        add_path_count: usize,
        changes: &mut RibChanges,
    ) -> Option<Path> {
        let removed = self.destinations.get_mut(&prefix)?.remove_path(&key)?;
        self.unstage(prefix, key, &removed);
        if let PathSource::Neighbor(addr) = key.source {
            if !self.neighbor_has_prefix(&prefix, addr) {
                if let Some(count) = self.prefix_counts.get_mut(&addr) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        self.run_selection(prefix, add_path_count, changes);
        Some(removed)
    }

    /// Whether `neighbor` has any path for `prefix`, under any path id.
    fn neighbor_has_prefix(&self, prefix: &Prefix, neighbor: IpAddr) -> bool {
        let source = PathSource::Neighbor(neighbor);
        self.destinations
            .get(prefix)
            .map(|d| d.paths().keys().any(|k| k.source == source))
            .unwrap_or(false)
    }

    /// Push the current route state of `prefix` to the snapshot list and
    /// the store, for changes that do not go through selection.
    pub(crate) fn refresh_route_state(&mut self, prefix: Prefix) {
        let Some(dest) = self.destinations.get(&prefix) else {
            return;
        };
        let (Some(index), Some(state)) = (dest.snapshot_index, dest.route_state())
        else {
            return;
        };
        self.snapshot.replace(index, state.clone());
        if let Err(e) = self.store.update_object(&state) {
            rib_log!(self, error, MOD_LOC_RIB,
                "failed to persist route update: {e}";
                "prefix" => prefix.to_string()
            );
        }
    }

    fn unstage(&mut self, prefix: Prefix, key: PathKey, path: &Path) {
        if let Some(next_hop) = path.attrs.next_hop {
            self.unreachable.remove(&StagedPath {
                next_hop,
                prefix,
                key,
            });
        }
    }

    /// Rerun selection for `prefix` and propagate the result to the snapshot
    /// list and the store. Empty destinations are dropped.
    pub(crate) fn run_selection(
        &mut self,
        prefix: Prefix,
        add_path_count: usize,
        changes: &mut RibChanges,
    ) -> Option<Selection> {
        let dest = self.destinations.get_mut(&prefix)?;
        let selection = dest.select_route_for_loc_rib(add_path_count, &self.policy);

        match selection.action {
            RouteAction::Add => {
                if let Some(state) = dest.route_state() {
                    dest.snapshot_index = Some(self.snapshot.append(state.clone()));
                    if let Err(e) = self.store.add_object(&state) {
                        rib_log!(self, error, MOD_LOC_RIB,
                            "failed to persist route: {e}";
                            "prefix" => prefix.to_string()
                        );
                    }
                }
            }
            RouteAction::Replace => {
                if let Some(state) = dest.route_state() {
                    if let Some(index) = dest.snapshot_index {
                        self.snapshot.replace(index, state.clone());
                    }
                    if let Err(e) = self.store.update_object(&state) {
                        rib_log!(self, error, MOD_LOC_RIB,
                            "failed to persist route update: {e}";
                            "prefix" => prefix.to_string()
                        );
                    }
                }
            }
            RouteAction::Delete => {
                let removed = dest
                    .snapshot_index
                    .take()
                    .and_then(|index| self.snapshot.remove(index));
                if let Some(state) = removed {
                    if let Err(e) = self.store.delete_object(&state) {
                        rib_log!(self, error, MOD_LOC_RIB,
                            "failed to remove persisted route: {e}";
                            "prefix" => prefix.to_string()
                        );
                    }
                }
            }
            RouteAction::None => {
                let refresh = selection.add_paths_modified
                    || !selection.added.is_empty()
                    || !selection.updated.is_empty()
                    || !selection.deleted.is_empty();
                if refresh {
                    if let (Some(index), Some(state)) =
                        (dest.snapshot_index, dest.route_state())
                    {
                        self.snapshot.replace(index, state.clone());
                        if let Err(e) = self.store.update_object(&state) {
                            rib_log!(self, error, MOD_LOC_RIB,
                                "failed to persist route update: {e}";
                                "prefix" => prefix.to_string()
                            );
                        }
                    }
                }
            }
        }

        if selection.action != RouteAction::None {
            rib_log!(self, debug, MOD_LOC_RIB,
                "selection {:?}", selection.action;
                "prefix" => prefix.to_string(),
                "best" => dest
                    .loc_rib_path()
                    .map(|(k, _)| k.to_string())
                    .unwrap_or_default()
            );
        }

        if dest.is_empty() {
            self.destinations.remove(&prefix);
        }
        changes.record(prefix, &selection);
        Some(selection)
    }

    /// A next hop became reachable. Activate every path staged on it.
    pub fn process_routes_for_reachable_routes(
        &mut self,
        next_hop: IpAddr,
        info: NextHopInfo,
        add_path_count: usize,
    ) -> RibChanges {
        let reachability = ReachabilityInfo::from_lookup(next_hop, info);
        self.resolver.insert(next_hop, reachability);

        let staged: Vec<StagedPath> = self
            .unreachable
            .iter()
            .filter(|s| s.next_hop == next_hop)
            .copied()
            .collect();

        let mut prefixes = BTreeSet::new();
        for s in &staged {
            self.unreachable.remove(s);
            if let Some(dest) = self.destinations.get_mut(&s.prefix) {
                if dest.set_reachability(&s.key, Some(reachability)) {
                    prefixes.insert(s.prefix);
                }
            }
        }

        let mut changes = RibChanges::default();
        for prefix in prefixes {
            self.run_selection(prefix, add_path_count, &mut changes);
        }
        changes
    }

    /// A next hop is no longer reachable. Every path using it is staged
    /// again and loses eligibility.
    pub fn process_routes_for_unreachable_next_hop(
        &mut self,
        next_hop: IpAddr,
        add_path_count: usize,
    ) -> RibChanges {
        self.resolver.invalidate(next_hop);

        let mut affected = Vec::new();
        for (prefix, dest) in &self.destinations {
            for (key, path) in dest.paths() {
                let redistributed = matches!(
                    path.route_type,
                    RouteType::Connected | RouteType::Static
                );
                if path.attrs.next_hop == Some(next_hop) && !redistributed {
                    affected.push(StagedPath {
                        next_hop,
                        prefix: *prefix,
                        key: *key,
                    });
                }
            }
        }

        let mut prefixes = BTreeSet::new();
        for s in affected {
            if let Some(dest) = self.destinations.get_mut(&s.prefix) {
                if dest.set_reachability(&s.key, None) {
                    prefixes.insert(s.prefix);
                }
            }
            self.unreachable.insert(s);
        }

        let mut changes = RibChanges::default();
        for prefix in prefixes {
            self.run_selection(prefix, add_path_count, &mut changes);
        }
        changes
    }

    /// Drop every path learned from `neighbor`.
    pub fn remove_updates_from_neighbor(
        &mut self,
        neighbor: IpAddr,
        add_path_count: usize,
    ) -> RibChanges {
        let source = PathSource::Neighbor(neighbor);
        let targets: Vec<(Prefix, PathKey)> = self
            .destinations
            .iter()
            .flat_map(|(prefix, dest)| {
                dest.paths()
                    .keys()
                    .filter(|k| k.source == source)
                    .map(move |k| (*prefix, *k))
            })
            .collect();

        let mut changes = RibChanges::default();
        for (prefix, key) in targets {
            self.withdraw_path(prefix, key, add_path_count, &mut changes);
        }
        self.prefix_counts.remove(&neighbor);
        rib_log!(self, info, MOD_LOC_RIB,
            "removed routes from neighbor";
            "peer" => neighbor.to_string(),
            "withdrawn" => changes.withdrawn.len()
        );
        changes
    }

    /// Drop every path learned from any neighbor.
    pub fn remove_updates_from_all_neighbors(
        &mut self,
        add_path_count: usize,
    ) -> RibChanges {
        let neighbors: BTreeSet<IpAddr> = self
            .destinations
            .values()
            .flat_map(|d| d.paths().keys())
            .filter_map(|k| match k.source {
                PathSource::Neighbor(addr) => Some(addr),
                _ => None,
            })
            .collect();

        let mut changes = RibChanges::default();
        for neighbor in neighbors {
            let c = self.remove_updates_from_neighbor(neighbor, add_path_count);
            changes.merge(c);
        }
        self.prefix_counts.clear();
        changes
    }

    /// Redistribute connected routes into the table.
    pub fn process_connected_routes(
        &mut self,
        added: &[LocalRoute],
        removed: &[Prefix],
        add_path_count: usize,
    ) -> RibChanges {
        self.redistribute(RouteType::Connected, added, removed, add_path_count)
    }

    /// Redistribute static routes into the table.
    pub fn process_static_routes(
        &mut self,
        added: &[LocalRoute],
        removed: &[Prefix],
        add_path_count: usize,
    ) -> RibChanges {
        self.redistribute(RouteType::Static, added, removed, add_path_count)
    }

    fn redistribute(
        &mut self,
        route_type: RouteType,
        added: &[LocalRoute],
        removed: &[Prefix],
        add_path_count: usize,
    ) -> RibChanges {
        let source = match route_type {
            RouteType::Static => PathSource::Static,
            _ => PathSource::Connected,
        };
        let key = PathKey { source, path_id: 0 };

        let mut changes = RibChanges::default();
        for prefix in removed {
            self.withdraw_path(*prefix, key, add_path_count, &mut changes);
        }
        for route in added {
            let attrs = PathAttrs {
                origin: Origin::Igp,
                ..Default::default()
            };
            let mut path = Path::local(route_type, attrs);
            path.reachability =
                Some(ReachabilityInfo::direct(route.next_hop, route.if_index));
            self.install_path(route.prefix, key, path, add_path_count, &mut changes);
        }
        changes
    }

    /// Rerun selection everywhere, for when the number of ADD-PATH
    /// runner-ups wanted by peers changes.
    pub fn refresh_add_paths(&mut self, add_path_count: usize) -> RibChanges {
        let prefixes: Vec<Prefix> = self.destinations.keys().copied().collect();
        let mut changes = RibChanges::default();
        for prefix in prefixes {
            self.run_selection(prefix, add_path_count, &mut changes);
        }
        changes
    }

    /// Compact the snapshot list and renumber destinations to match.
    /// Returns true if compaction ran.
    pub fn compact_snapshot(&mut self, force: bool) -> bool {
        let Some(order) = self.snapshot.compact(force) else {
            return false;
        };
        for (index, prefix) in order.iter().enumerate() {
            if let Some(dest) = self.destinations.get_mut(prefix) {
                dest.snapshot_index = Some(index);
            }
        }
        rib_log!(self, debug, MOD_LOC_RIB,
            "compacted route snapshot";
            "routes" => order.len()
        );
        true
    }
}
