// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::IpAddr;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rib: {0}")]
    Rib(#[from] rib::error::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown peer {0}")]
    UnknownPeer(IpAddr),

    #[error("peer {0} is not established")]
    PeerNotEstablished(IpAddr),

    #[error("channel send: {0}")]
    ChannelSend(String),
}
