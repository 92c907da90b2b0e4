// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A flat list of installed routes for paginated management reads.
//!
//! The event loop is the only writer. Readers walk the list with
//! [`RouteSnapshot::bulk_get_routes`], resuming from the index returned by
//! the previous call. Removing a route leaves a hole so that indices held by
//! readers stay valid; holes are squeezed out by compaction, which is held
//! off while a reader is part way through the list.

use crate::attrs::{AsPathSegment, Origin};
use crate::path::{Path, PathKey, RouteType};
use crate::types::Prefix;
use chrono::{DateTime, Utc};
use rib_common::thread::ManagedThread;
use rib_common::{lock, read_lock, write_lock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Serializable view of the installed route for a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouteState {
    pub prefix: Prefix,
    pub path: PathKey,
    pub route_type: RouteType,
    pub path_id: u32,
    pub next_hop: Option<IpAddr>,
    pub resolved_next_hop: Option<IpAddr>,
    pub origin: Origin,
    pub as_path: Vec<AsPathSegment>,
    pub local_pref: Option<u32>,
    pub med: Option<u32>,
    pub communities: Vec<u32>,
    pub ecmp_next_hops: Vec<IpAddr>,
    pub add_paths: usize,
    pub suppressed: bool,
    pub updated_at: DateTime<Utc>,
}

impl RouteState {
    pub fn new(
        prefix: Prefix,
        key: PathKey,
        path: &Path,
        path_id: u32,
        ecmp_next_hops: Vec<IpAddr>,
        add_paths: usize,
        suppressed: bool,
    ) -> Self {
        Self {
            prefix,
            path: key,
            route_type: path.route_type,
            path_id,
            next_hop: path.attrs.next_hop,
            resolved_next_hop: path.reachability.map(|r| r.next_hop),
            origin: path.attrs.origin,
            as_path: path.attrs.as_path.clone(),
            local_pref: path.attrs.local_pref,
            med: path.attrs.med,
            communities: path.attrs.communities.clone(),
            ecmp_next_hops,
            add_paths,
            suppressed,
            updated_at: Utc::now(),
        }
    }
}

/// One page of routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BulkRoutes {
    /// Index to resume from, zero once the end of the list is reached.
    pub next_index: usize,
    pub count: usize,
    pub routes: Vec<RouteState>,
}

#[derive(Default)]
struct SnapshotList {
    entries: Vec<Option<RouteState>>,
    holes: usize,
}

#[derive(Default)]
struct Pager {
    active: bool,
    last_read: Option<Instant>,
}

/// Shared handle to the snapshot list. Clones refer to the same list.
#[derive(Clone, Default)]
pub struct RouteSnapshot {
    list: Arc<RwLock<SnapshotList>>,
    pager: Arc<Mutex<Pager>>,
}

impl RouteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live routes.
    pub fn len(&self) -> usize {
        let list = read_lock!(self.list);
        list.entries.len() - list.holes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn holes(&self) -> usize {
        read_lock!(self.list).holes
    }

    pub fn pager_active(&self) -> bool {
        lock!(self.pager).active
    }

    pub(crate) fn append(&self, state: RouteState) -> usize {
        let mut list = write_lock!(self.list);
        list.entries.push(Some(state));
        list.entries.len() - 1
    }

    pub(crate) fn replace(&self, index: usize, state: RouteState) {
        let mut list = write_lock!(self.list);
        if let Some(entry) = list.entries.get_mut(index) {
            *entry = Some(state);
        }
    }

    pub(crate) fn remove(&self, index: usize) -> Option<RouteState> {
        let mut list = write_lock!(self.list);
        let removed = list.entries.get_mut(index).and_then(Option::take);
        if removed.is_some() {
            list.holes += 1;
        }
        removed
    }

    /// Read up to `count` routes starting at `index`. A zero `count` reads
    /// nothing and leaves the reader state alone.
    ///
    /// Lock order is pager, then list, here and in [`Self::compact`].
    pub fn bulk_get_routes(&self, index: usize, count: usize) -> BulkRoutes {
        let mut pager = lock!(self.pager);
        let list = read_lock!(self.list);
        if count == 0 {
            let more = list
                .entries
                .get(index..)
                .map(|rest| rest.iter().any(Option::is_some))
                .unwrap_or(false);
            return BulkRoutes {
                next_index: if more { index } else { 0 },
                count: 0,
                routes: Vec::new(),
            };
        }
        let mut routes = Vec::new();
        let mut i = index;
        while i < list.entries.len() && routes.len() < count {
            if let Some(route) = &list.entries[i] {
                routes.push(route.clone());
            }
            i += 1;
        }
        let more = list.entries[i.min(list.entries.len())..]
            .iter()
            .any(Option::is_some);

        pager.active = more;
        pager.last_read = Some(Instant::now());

        BulkRoutes {
            next_index: if more { i } else { 0 },
            count: routes.len(),
            routes,
        }
    }

    /// Forget a reader that has not come back within `idle`. Returns true if
    /// a reader was forgotten.
    pub fn expire_idle_pager(&self, idle: Duration) -> bool {
        let mut pager = lock!(self.pager);
        let expired = pager.active
            && pager.last_read.map(|t| t.elapsed() >= idle).unwrap_or(true);
        if expired {
            pager.active = false;
        }
        expired
    }

    /// Squeeze holes out of the list. Without `force`, compaction only runs
    /// once a quarter of the list is holes. Never runs while a reader is
    /// active. Returns the prefix at each index of the compacted list.
    pub(crate) fn compact(&self, force: bool) -> Option<Vec<Prefix>> {
        // held across the rewrite
        let pager = lock!(self.pager);
        if pager.active {
            return None;
        }
        let mut list = write_lock!(self.list);
        if list.holes == 0 || (!force && list.holes * 4 < list.entries.len()) {
            return None;
        }
        list.entries.retain(Option::is_some);
        list.holes = 0;
        Some(
            list.entries
                .iter()
                .flatten()
                .map(|r| r.prefix)
                .collect(),
        )
    }

    /// Spawn a timer that expires idle readers and calls `notify` whenever
    /// compaction is due as a result.
    pub fn spawn_idle_timer<F>(
        &self,
        idle: Duration,
        resolution: Duration,
        notify: F,
    ) -> std::io::Result<ManagedThread>
    where
        F: Fn() + Send + 'static,
    {
        let snapshot = self.clone();
        let timer = ManagedThread::new();
        timer.spawn("snapshot-idle-timer", move |stop| {
            while !stop.load(Ordering::Relaxed) {
                if snapshot.expire_idle_pager(idle) && snapshot.holes() > 0 {
                    notify();
                }
                std::thread::sleep(resolution);
            }
        })?;
        Ok(timer)
    }
}
