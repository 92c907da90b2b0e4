// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::{IpAddr, Ipv4Addr};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("datastore error {0}")]
    DataStore(#[from] sled::Error),

    #[error("serialization error {0}")]
    Serialization(String),

    #[error("db value error {0}")]
    DbValue(String),

    #[error("route loop: cluster id {0} found in cluster list")]
    ClusterLoop(Ipv4Addr),

    #[error("route loop: originator id {0} is the local router id")]
    OriginatorLoop(Ipv4Addr),

    #[error("route loop: local asn {0} found in as path")]
    AsPathLoop(u32),

    #[error("update from {0} carries nlri but no path")]
    MissingPath(IpAddr),

    #[error("update from {0} carries no next hop")]
    MissingNexthop(IpAddr),
}

impl Error {
    /// Loop errors reject an update as a whole rather than individual
    /// prefixes.
    pub fn is_route_loop(&self) -> bool {
        matches!(
            self,
            Error::ClusterLoop(_) | Error::OriginatorLoop(_) | Error::AsPathLoop(_)
        )
    }
}
