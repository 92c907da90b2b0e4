// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-prefix candidate path sets and best path selection.

use crate::bestpath::{bestpath, rank_paths, SelectionPolicy};
use crate::path::{Path, PathKey};
use crate::reachability::ReachabilityInfo;
use crate::snapshot::RouteState;
use crate::types::Prefix;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteAction {
    None,
    Add,
    Replace,
    Delete,
}

/// A forwarding entry derived from the multipath set of a destination.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InstalledRoute {
    pub prefix: Prefix,
    pub next_hop: IpAddr,
    pub path: PathKey,
    pub revision: u64,
}

/// The outcome of running the decision process on a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub action: RouteAction,
    /// The ADD-PATH runner-up list changed.
    pub add_paths_modified: bool,
    pub added: Vec<InstalledRoute>,
    pub updated: Vec<InstalledRoute>,
    pub deleted: Vec<InstalledRoute>,
}

/// Link from a contributing destination to the aggregate covering it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AggregateMembership {
    pub aggregate: Prefix,
    /// The aggregate is configured summary-only, so the contributor itself
    /// is not advertised.
    pub suppress: bool,
}

#[derive(Debug, Clone)]
struct PathIdAllocator {
    next: u32,
    free: BTreeSet<u32>,
}

impl Default for PathIdAllocator {
    fn default() -> Self {
        // Identifier zero is what peers without ADD-PATH see.
        Self {
            next: 1,
            free: BTreeSet::new(),
        }
    }
}

impl PathIdAllocator {
    fn allocate(&mut self) -> u32 {
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        id
    }

    fn release(&mut self, id: u32) {
        if id != 0 {
            self.free.insert(id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Destination {
    prefix: Prefix,
    paths: BTreeMap<PathKey, Path>,
    loc_rib_path: Option<(PathKey, u64)>,
    loc_rib_path_id: Option<u32>,
    add_paths: Vec<(PathKey, u64)>,
    installed: Vec<InstalledRoute>,
    aggregate: Option<AggregateMembership>,
    ids: PathIdAllocator,
    revision: u64,
    pub(crate) snapshot_index: Option<usize>,
}

impl Destination {
    pub fn new(prefix: Prefix) -> Self {
        Self {
            prefix,
            paths: BTreeMap::new(),
            loc_rib_path: None,
            loc_rib_path_id: None,
            add_paths: Vec::new(),
            installed: Vec::new(),
            aggregate: None,
            ids: PathIdAllocator::default(),
            revision: 0,
            snapshot_index: None,
        }
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    pub fn paths(&self) -> &BTreeMap<PathKey, Path> {
        &self.paths
    }

    pub fn path(&self, key: &PathKey) -> Option<&Path> {
        self.paths.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The selected path, if any.
    pub fn loc_rib_path(&self) -> Option<(&PathKey, &Path)> {
        let (key, _) = self.loc_rib_path.as_ref()?;
        self.paths.get_key_value(key)
    }

    /// Outbound path identifier of the selected path. Stable for as long as
    /// the destination has a selected path.
    pub fn loc_rib_path_id(&self) -> Option<u32> {
        self.loc_rib_path_id
    }

    /// ADD-PATH runner-ups in rank order, best first.
    pub fn add_paths(&self) -> impl Iterator<Item = (&PathKey, &Path)> {
        self.add_paths
            .iter()
            .filter_map(|(k, _)| self.paths.get_key_value(k))
    }

    pub fn installed(&self) -> &[InstalledRoute] {
        &self.installed
    }

    pub fn snapshot_index(&self) -> Option<usize> {
        self.snapshot_index
    }

    pub fn aggregate(&self) -> Option<AggregateMembership> {
        self.aggregate
    }

    pub(crate) fn set_aggregate(
        &mut self,
        membership: Option<AggregateMembership>,
    ) -> bool {
        let changed = self.aggregate != membership;
        self.aggregate = membership;
        changed
    }

    /// The route is covered by a summary-only aggregate and must not be
    /// advertised on its own.
    pub fn is_suppressed(&self) -> bool {
        self.aggregate.map(|m| m.suppress).unwrap_or(false)
    }

    /// Insert a path or replace the one with the same key. Returns the path
    /// that was replaced.
    pub fn insert_path(&mut self, key: PathKey, mut path: Path) -> Option<Path> {
        self.revision += 1;
        let revision = self.revision;
        match self.paths.entry(key) {
            Entry::Occupied(mut e) => {
                let existing = e.get();
                path.local_id = existing.local_id;
                path.revision = if existing.same_route(&path) {
                    existing.revision
                } else {
                    revision
                };
                Some(e.insert(path))
            }
            Entry::Vacant(e) => {
                path.local_id = self.ids.allocate();
                path.revision = revision;
                e.insert(path);
                None
            }
        }
    }

    pub fn remove_path(&mut self, key: &PathKey) -> Option<Path> {
        let path = self.paths.remove(key)?;
        self.ids.release(path.local_id);
        Some(path)
    }

    /// Update the reachability of a path in place. Returns false when the
    /// path does not exist or nothing changed.
    pub fn set_reachability(
        &mut self,
        key: &PathKey,
        reachability: Option<ReachabilityInfo>,
    ) -> bool {
        let Some(path) = self.paths.get_mut(key) else {
            return false;
        };
        if path.reachability == reachability {
            return false;
        }
        self.revision += 1;
        path.reachability = reachability;
        path.revision = self.revision;
        true
    }

    fn keyed_revision(&self, key: &PathKey) -> Option<(PathKey, u64)> {
        self.paths.get(key).map(|p| (*key, p.revision))
    }

    /// Run the decision process over the current path set and reconcile the
    /// selected path, the multipath set and the ADD-PATH runner-up list.
    ///
    /// ADD-PATH runner-ups are only tracked when `add_path_count` exceeds
    /// one, in which case up to `add_path_count - 1` of them are kept.
    pub fn select_route_for_loc_rib(
        &mut self,
        add_path_count: usize,
        policy: &SelectionPolicy,
    ) -> Selection {
        let bp = bestpath(self.paths.iter(), policy);
        let selected = bp.as_ref().and_then(|b| self.keyed_revision(&b.best));

        let action = match (self.loc_rib_path, selected) {
            (None, None) => RouteAction::None,
            (None, Some(_)) => RouteAction::Add,
            (Some(_), None) => RouteAction::Delete,
            (Some(old), Some(new)) if old == new => RouteAction::None,
            (Some(_), Some(_)) => RouteAction::Replace,
        };

        match action {
            RouteAction::Add => self.loc_rib_path_id = Some(self.ids.allocate()),
            RouteAction::Delete => {
                if let Some(id) = self.loc_rib_path_id.take() {
                    self.ids.release(id);
                }
            }
            RouteAction::Replace | RouteAction::None => {}
        }
        self.loc_rib_path = selected;

        let installed: Vec<InstalledRoute> = bp
            .map(|b| b.multipath)
            .unwrap_or_default()
            .iter()
            .filter_map(|k| {
                let path = self.paths.get(k)?;
                let reach = path.reachability?;
                Some(InstalledRoute {
                    prefix: self.prefix,
                    next_hop: reach.next_hop,
                    path: *k,
                    revision: path.revision,
                })
            })
            .collect();
        let (added, updated, deleted) = diff_installed(&self.installed, &installed);
        self.installed = installed;

        let runners: Vec<(PathKey, u64)> = if add_path_count > 1 {
            rank_paths(&self.paths, policy, add_path_count)
                .iter()
                .skip(1)
                .filter_map(|k| self.keyed_revision(k))
                .collect()
        } else {
            Vec::new()
        };
        let add_paths_modified = runners != self.add_paths;
        self.add_paths = runners;

        Selection {
            action,
            add_paths_modified,
            added,
            updated,
            deleted,
        }
    }

    /// A serializable view of the installed route.
    pub fn route_state(&self) -> Option<RouteState> {
        let (key, path) = self.loc_rib_path()?;
        Some(RouteState::new(
            self.prefix,
            *key,
            path,
            self.loc_rib_path_id.unwrap_or(0),
            self.installed.iter().map(|r| r.next_hop).collect(),
            self.add_paths.len(),
            self.is_suppressed(),
        ))
    }
}

type InstalledDiff = (Vec<InstalledRoute>, Vec<InstalledRoute>, Vec<InstalledRoute>);

fn diff_installed(old: &[InstalledRoute], new: &[InstalledRoute]) -> InstalledDiff {
    let mut added = Vec::new();
    let mut updated = Vec::new();
    for r in new {
        match old.iter().find(|o| o.next_hop == r.next_hop) {
            None => added.push(*r),
            Some(o) if o.path != r.path || o.revision != r.revision => {
                updated.push(*r)
            }
            Some(_) => {}
        }
    }
    let deleted = old
        .iter()
        .filter(|o| !new.iter().any(|r| r.next_hop == o.next_hop))
        .copied()
        .collect();
    (added, updated, deleted)
}
