// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test utilities for rib tests.

use crate::attrs::{AsPathSegment, PathAttrs};
use crate::error::Error;
use crate::path::{NeighborInfo, Path};
use crate::reachability::ReachabilityInfo;
use crate::store::SledStore;
use slog::Logger;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

/// A test store that removes its database directory when dropped, but only
/// if the test succeeded. Failed tests leave the database in /tmp for
/// debugging.
#[derive(Clone)]
pub struct TestStore {
    store: SledStore,
    path: String,
}

impl TestStore {
    pub fn store(&self) -> &SledStore {
        &self.store
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Deref for TestStore {
    type Target = SledStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let _ = std::fs::remove_dir_all(&self.path);
        } else {
            eprintln!("Test failed - database left at: {}", self.path);
        }
    }
}

/// Get a unique test store. Paths include the process id and a counter so
/// tests running in parallel do not collide.
pub fn get_test_store(test_name: &str, log: Logger) -> Result<TestStore, Error> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    std::fs::create_dir_all("/tmp").expect("create tmp dir");

    let path = format!(
        "/tmp/{}_{}_{}.db",
        test_name,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    );

    // Clean up a stale database left by a crashed run.
    if std::path::Path::new(&path).exists() {
        let _ = std::fs::remove_dir_all(&path);
    }

    let store = SledStore::new(&path, log)?;
    Ok(TestStore { store, path })
}

/// Neighbor `192.0.2.<n>` with router id `1.1.1.<n>`.
pub fn neighbor(n: u8, asn: u32, ibgp: bool) -> NeighborInfo {
    NeighborInfo {
        address: IpAddr::V4(Ipv4Addr::new(192, 0, 2, n)),
        asn,
        router_id: Ipv4Addr::new(1, 1, 1, n),
        ibgp,
        rr_client: false,
        max_prefixes: None,
    }
}

/// Attributes with the given AS sequence and the neighbor as next hop.
pub fn peer_attrs(n: &NeighborInfo, as_path: &[u32]) -> PathAttrs {
    PathAttrs {
        as_path: if as_path.is_empty() {
            Vec::new()
        } else {
            vec![AsPathSegment::sequence(as_path.to_vec())]
        },
        next_hop: Some(n.address),
        ..Default::default()
    }
}

/// A directly reachable path learned from `n`.
pub fn peer_path(n: NeighborInfo, as_path: &[u32]) -> Path {
    let mut path = Path::from_neighbor(n, peer_attrs(&n, as_path));
    path.reachability = Some(ReachabilityInfo::direct(n.address, 1));
    path
}
