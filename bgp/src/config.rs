// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Context;
use rib::{AggregateConfig, RibConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

fn default_add_path_tx() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct PeerConfig {
    pub name: String,
    pub address: IpAddr,
    /// The peer's autonomous system number.
    pub asn: u32,
    /// Local end of the session, used as next hop toward external peers.
    pub local_address: IpAddr,
    /// The peer is a route reflector client of this speaker.
    #[serde(default)]
    pub rr_client: bool,
    /// Number of paths per prefix to send when ADD-PATH is negotiated.
    /// One means a single path without path identifiers.
    #[serde(default = "default_add_path_tx")]
    pub add_path_tx: usize,
    #[serde(default)]
    pub max_prefixes: Option<u32>,
    /// Close the session when the peer exceeds `max_prefixes`.
    #[serde(default)]
    pub teardown_on_max_prefixes: bool,
}

impl PeerConfig {
    pub fn new(
        name: &str,
        address: IpAddr,
        asn: u32,
        local_address: IpAddr,
    ) -> Self {
        Self {
            name: name.to_string(),
            address,
            asn,
            local_address,
            rr_client: false,
            add_path_tx: 1,
            max_prefixes: None,
            teardown_on_max_prefixes: false,
        }
    }
}

/// A full router configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    pub rib: RibConfig,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub aggregates: Vec<AggregateConfig>,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config {path}"))?;
        Self::from_json(&contents)
            .with_context(|| format!("parse config {path}"))
    }

    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}
