// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::messages::{NotificationMessage, UpdateMessage};
use slog::Logger;
use std::sync::mpsc::Sender;

/// What the Adj-RIB-Out hands to a peer's session for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressEvent {
    Announce(UpdateMessage),
    /// Tear the session down with the given notification.
    Cease(NotificationMessage),
}

/// The outbound side of a peer session. A peer with no sender attached
/// drops everything.
pub struct Egress {
    pub event_tx: Option<Sender<EgressEvent>>,
    pub log: Logger,
}

impl Egress {
    pub fn new(event_tx: Option<Sender<EgressEvent>>, log: Logger) -> Self {
        Self { event_tx, log }
    }

    pub fn send(&self, event: EgressEvent) {
        if let Some(tx) = self.event_tx.as_ref() {
            if let Err(e) = tx.send(event) {
                slog::error!(self.log, "egress send failed: {e}");
            }
        }
    }

    pub fn announce(&self, update: &UpdateMessage) {
        self.send(EgressEvent::Announce(update.clone()));
    }
}
