// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod adj_rib_out;
pub mod config;
pub mod egress;
pub mod error;
pub mod log;
pub mod messages;
pub mod server;


pub const COMPONENT_BGP: &str = "bgp";
pub const MOD_PEER: &str = "peer";
pub const MOD_SERVER: &str = "server";

/// How long the event loop waits on its queue before checking in.
// XXX: Make this configurable
pub const EVENT_TIMEOUT: std::time::Duration =
    std::time::Duration::from_millis(100);

/// How often the snapshot idle timer checks for abandoned readers.
pub const IDLE_TIMER_RESOLUTION: std::time::Duration =
    std::time::Duration::from_secs(1);
