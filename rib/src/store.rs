// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence of installed routes.
//!
//! Routes are kept in a sled tree keyed by the canonical prefix string with
//! CBOR encoded [`RouteState`] values.

use crate::error::Error;
use crate::snapshot::RouteState;
use crate::types::Prefix;
use slog::{error, Logger};

/// The name of the sled tree holding installed routes.
const LOC_RIB: &str = "loc_rib";

/// Receiver of installed route changes. Called once per change to what a
/// destination has installed.
pub trait RouteStore: Send {
    fn add_object(&self, route: &RouteState) -> Result<(), Error>;
    fn update_object(&self, route: &RouteState) -> Result<(), Error>;
    fn delete_object(&self, route: &RouteState) -> Result<(), Error>;
}

/// A store that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl RouteStore for NullStore {
    fn add_object(&self, _route: &RouteState) -> Result<(), Error> {
        Ok(())
    }

    fn update_object(&self, _route: &RouteState) -> Result<(), Error> {
        Ok(())
    }

    fn delete_object(&self, _route: &RouteState) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct SledStore {
    persistent: sled::Db,
    log: Logger,
}

impl SledStore {
    pub fn new(path: &str, log: Logger) -> Result<Self, Error> {
        Ok(Self {
            persistent: sled::open(path)?,
            log,
        })
    }

    fn put(&self, route: &RouteState) -> Result<(), Error> {
        let tree = self.persistent.open_tree(LOC_RIB)?;
        let key = route.prefix.to_string();
        tree.insert(key.as_str(), to_buf(route)?)?;
        tree.flush()?;
        Ok(())
    }

    pub fn get_route(&self, prefix: &Prefix) -> Result<Option<RouteState>, Error> {
        let tree = self.persistent.open_tree(LOC_RIB)?;
        match tree.get(prefix.to_string())? {
            Some(value) => Ok(Some(from_buf(&value)?)),
            None => Ok(None),
        }
    }

    /// All stored routes. Entries that fail to decode are logged and
    /// skipped.
    pub fn get_routes(&self) -> Result<Vec<RouteState>, Error> {
        let tree = self.persistent.open_tree(LOC_RIB)?;
        let result = tree
            .scan_prefix(vec![])
            .filter_map(|item| {
                let (key, value) = match item {
                    Ok(item) => item,
                    Err(e) => {
                        error!(self.log, "db: error fetching route entry: {e}");
                        return None;
                    }
                };
                match from_buf(&value) {
                    Ok(route) => Some(route),
                    Err(e) => {
                        error!(
                            self.log,
                            "db: error parsing route entry {}: {e}",
                            String::from_utf8_lossy(&key)
                        );
                        None
                    }
                }
            })
            .collect();
        Ok(result)
    }
}

impl RouteStore for SledStore {
    fn add_object(&self, route: &RouteState) -> Result<(), Error> {
        self.put(route)
    }

    fn update_object(&self, route: &RouteState) -> Result<(), Error> {
        self.put(route)
    }

    fn delete_object(&self, route: &RouteState) -> Result<(), Error> {
        let tree = self.persistent.open_tree(LOC_RIB)?;
        tree.remove(route.prefix.to_string())?;
        tree.flush()?;
        Ok(())
    }
}

fn to_buf(route: &RouteState) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    ciborium::into_writer(route, &mut buf)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(buf)
}

fn from_buf(buf: &[u8]) -> Result<RouteState, Error> {
    ciborium::from_reader(buf).map_err(|e| Error::DbValue(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path::PathKey;
    use crate::test::{get_test_store, neighbor, peer_path};
    use rib_common::log::init_file_logger;

    #[test]
    fn store_round_trip() {
        let log = init_file_logger("store_round_trip.log");
        let store = get_test_store("store_round_trip", log).expect("store");
        let n = neighbor(1, 65001, false);
        let prefix: Prefix = "10.1.0.0/16".parse().unwrap();
        let mut route = RouteState::new(
            prefix,
            PathKey::neighbor(n.address, 0),
            &peer_path(n, &[65001]),
            1,
            Vec::new(),
            0,
            false,
        );
        store.add_object(&route).expect("add");
        assert_eq!(store.get_route(&prefix).expect("get"), Some(route.clone()));

        route.med = Some(20);
        store.update_object(&route).expect("update");
        let routes = store.get_routes().expect("list");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].med, Some(20));

        store.delete_object(&route).expect("delete");
        assert!(store.get_routes().expect("list").is_empty());
    }
}
