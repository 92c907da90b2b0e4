// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The single writer for the Loc-RIB and every peer's Adj-RIB-Out.
//!
//! Everything that changes routing state arrives as a [`RibEvent`] on one
//! queue and is handled to completion before the next event is taken, so
//! events are applied in the order they were sent.

use crate::adj_rib_out::Peer;
use crate::config::{Config, PeerConfig};
use crate::egress::{Egress, EgressEvent};
use crate::error::Error;
use crate::log::server_log;
use crate::messages::CeaseErrorSubcode;
use crate::{EVENT_TIMEOUT, IDLE_TIMER_RESOLUTION};
use rib::{
    AggregateConfig, LocRib, LocalRoute, NextHopInfo, Prefix, RibChanges,
    RibUpdate, RouteManager, RouteSnapshot, RouteStore,
};
use rib_common::thread::ManagedThread;
use slog::Logger;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};

#[derive(Debug, Clone)]
pub enum RibEvent {
    /// A decoded UPDATE from an established peer.
    Update { peer: IpAddr, update: RibUpdate },

    /// A session reached established. `add_path_tx` is the negotiated
    /// number of paths to send, one without ADD-PATH.
    PeerUp {
        peer: IpAddr,
        router_id: Ipv4Addr,
        add_path_tx: usize,
    },

    PeerDown(IpAddr),

    /// Take every session down and drop all learned routes.
    ResetAll,

    ConnectedRoutes {
        added: Vec<LocalRoute>,
        removed: Vec<Prefix>,
    },

    StaticRoutes {
        added: Vec<LocalRoute>,
        removed: Vec<Prefix>,
    },

    NextHopReachable { next_hop: IpAddr, info: NextHopInfo },

    NextHopUnreachable(IpAddr),

    AggregateAdd(AggregateConfig),

    AggregateRemove(Prefix),

    /// Compact the route snapshot even if a reader appears to be active.
    CompactSnapshot,

    Shutdown,
}

impl RibEvent {
    pub fn title(&self) -> &'static str {
        match self {
            RibEvent::Update { .. } => "update",
            RibEvent::PeerUp { .. } => "peer up",
            RibEvent::PeerDown(_) => "peer down",
            RibEvent::ResetAll => "reset all",
            RibEvent::ConnectedRoutes { .. } => "connected routes",
            RibEvent::StaticRoutes { .. } => "static routes",
            RibEvent::NextHopReachable { .. } => "next hop reachable",
            RibEvent::NextHopUnreachable(_) => "next hop unreachable",
            RibEvent::AggregateAdd(_) => "aggregate add",
            RibEvent::AggregateRemove(_) => "aggregate remove",
            RibEvent::CompactSnapshot => "compact snapshot",
            RibEvent::Shutdown => "shutdown",
        }
    }
}

pub struct RibServer {
    rib: LocRib,
    peers: BTreeMap<IpAddr, Peer>,
    event_tx: Sender<RibEvent>,
    event_rx: Receiver<RibEvent>,
    idle_timer: Option<ManagedThread>,
    log: Logger,
}

impl RibServer {
    pub fn new(
        config: &Config,
        manager: Box<dyn RouteManager>,
        store: Box<dyn RouteStore>,
        log: Logger,
    ) -> Self {
        let (event_tx, event_rx) = channel();
        let mut rib =
            LocRib::new(config.rib.clone(), manager, store, log.clone());
        for aggregate in &config.aggregates {
            // the table is empty, there is nothing to announce yet
            rib.add_aggregate(aggregate.clone(), 1);
        }
        let mut server = Self {
            rib,
            peers: BTreeMap::new(),
            event_tx,
            event_rx,
            idle_timer: None,
            log,
        };
        for peer in &config.peers {
            server.add_peer(peer.clone(), None);
        }
        server
    }

    /// A handle for posting events to the server.
    pub fn sender(&self) -> Sender<RibEvent> {
        self.event_tx.clone()
    }

    /// Queue an event for the server.
    pub fn post(&self, event: RibEvent) -> Result<(), Error> {
        self.event_tx
            .send(event)
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }

    pub fn rib(&self) -> &LocRib {
        &self.rib
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        self.rib.snapshot()
    }

    pub fn peer(&self, addr: &IpAddr) -> Option<&Peer> {
        self.peers.get(addr)
    }

    /// Add a peer, replacing any existing peer with the same address.
    pub fn add_peer(
        &mut self,
        config: PeerConfig,
        event_tx: Option<Sender<EgressEvent>>,
    ) {
        let address = config.address;
        let log = self.log.new(slog::o!("peer" => config.name.clone()));
        let egress = Egress::new(event_tx, log.clone());
        let peer = Peer::new(config, self.rib.config(), egress, log);
        if self.peers.insert(address, peer).is_some() {
            server_log!(self, info, "replaced peer";
                "peer" => address.to_string()
            );
        }
    }

    /// Connect a peer's outbound side to its session.
    pub fn attach_egress(
        &mut self,
        addr: IpAddr,
        event_tx: Sender<EgressEvent>,
    ) -> Result<(), Error> {
        let peer = self.peers.get_mut(&addr).ok_or(Error::UnknownPeer(addr))?;
        let log = peer.log.clone();
        peer.set_egress(Egress::new(Some(event_tx), log));
        Ok(())
    }

    /// Start the timer that forces snapshot compaction once a bulk reader
    /// has been idle for the configured timeout.
    pub fn start_idle_timer(&mut self) -> Result<(), Error> {
        let tx = self.event_tx.clone();
        let timer = self.rib.snapshot().spawn_idle_timer(
            self.rib.config().snapshot_idle_timeout(),
            IDLE_TIMER_RESOLUTION,
            move || {
                let _ = tx.send(RibEvent::CompactSnapshot);
            },
        )?;
        self.idle_timer = Some(timer);
        Ok(())
    }

    /// Number of ADD-PATH runner-ups the Loc-RIB has to keep so that the
    /// most demanding established peer is served.
    fn add_path_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.is_established())
            .map(|p| p.add_path_tx())
            .max()
            .unwrap_or(1)
    }

    /// Process events until shutdown.
    pub fn run(&mut self) {
        server_log!(self, info, "rib server started");
        loop {
            match self.event_rx.recv_timeout(EVENT_TIMEOUT) {
                Ok(event) => {
                    if !self.handle(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        server_log!(self, info, "rib server stopped");
    }

    /// Handle one event. Returns false once the server should stop.
    pub fn handle(&mut self, event: RibEvent) -> bool {
        server_log!(self, trace, "handling {}", event.title());
        let apc = self.add_path_count();
        match event {
            RibEvent::Update { peer, update } => {
                if let Err(e) = self.handle_update(peer, &update) {
                    server_log!(self, warn, "update rejected: {e}";
                        "peer" => peer.to_string()
                    );
                }
            }
            RibEvent::PeerUp {
                peer,
                router_id,
                add_path_tx,
            } => {
                if let Err(e) = self.peer_up(peer, router_id, add_path_tx) {
                    server_log!(self, warn, "peer up failed: {e}";
                        "peer" => peer.to_string()
                    );
                }
            }
            RibEvent::PeerDown(peer) => self.peer_down(peer),
            RibEvent::ResetAll => self.reset_all(),
            RibEvent::ConnectedRoutes { added, removed } => {
                let changes =
                    self.rib.process_connected_routes(&added, &removed, apc);
                self.distribute(changes);
            }
            RibEvent::StaticRoutes { added, removed } => {
                let changes =
                    self.rib.process_static_routes(&added, &removed, apc);
                self.distribute(changes);
            }
            RibEvent::NextHopReachable { next_hop, info } => {
                let changes = self
                    .rib
                    .process_routes_for_reachable_routes(next_hop, info, apc);
                self.distribute(changes);
            }
            RibEvent::NextHopUnreachable(next_hop) => {
                let changes = self
                    .rib
                    .process_routes_for_unreachable_next_hop(next_hop, apc);
                self.distribute(changes);
            }
            RibEvent::AggregateAdd(cfg) => {
                let changes = self.rib.add_aggregate(cfg, apc);
                self.distribute(changes);
            }
            RibEvent::AggregateRemove(prefix) => {
                let changes = self.rib.remove_aggregate(prefix, apc);
                self.distribute(changes);
            }
            RibEvent::CompactSnapshot => {
                self.rib.compact_snapshot(true);
            }
            RibEvent::Shutdown => return false,
        }
        true
    }

    fn handle_update(
        &mut self,
        addr: IpAddr,
        update: &RibUpdate,
    ) -> Result<(), Error> {
        let peer = self.peers.get(&addr).ok_or(Error::UnknownPeer(addr))?;
        if !peer.is_established() {
            return Err(Error::PeerNotEstablished(addr));
        }
        let neighbor = peer.neighbor_info();
        let teardown = peer.config.teardown_on_max_prefixes;

        let apc = self.add_path_count();
        let outcome = self.rib.process_update(&neighbor, update, apc)?;
        self.distribute(outcome.changes);

        if !outcome.added_all_prefixes && teardown {
            server_log!(self, warn, "prefix limit exceeded, closing session";
                "peer" => addr.to_string()
            );
            if let Some(peer) = self.peers.get(&addr) {
                peer.cease(CeaseErrorSubcode::MaximumNumberofPrefixesReached);
            }
            self.peer_down(addr);
        }
        Ok(())
    }

    fn peer_up(
        &mut self,
        addr: IpAddr,
        router_id: Ipv4Addr,
        add_path_tx: usize,
    ) -> Result<(), Error> {
        let before = self.add_path_count();
        self.peers
            .get_mut(&addr)
            .ok_or(Error::UnknownPeer(addr))?
            .session_up(router_id, add_path_tx);

        let after = self.add_path_count();
        if after != before {
            let changes = self.rib.refresh_add_paths(after);
            self.distribute(changes);
        }
        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.advertise_all(&self.rib);
        }
        Ok(())
    }

    fn peer_down(&mut self, addr: IpAddr) {
        match self.peers.get_mut(&addr) {
            Some(peer) => peer.session_down(),
            None => {
                server_log!(self, warn, "peer down for unknown peer";
                    "peer" => addr.to_string()
                );
                return;
            }
        }

        let apc = self.add_path_count();
        let changes = self.rib.remove_updates_from_neighbor(addr, apc);
        self.distribute(changes);
    }

    fn reset_all(&mut self) {
        server_log!(self, info, "resetting all peers");
        for peer in self.peers.values_mut() {
            if peer.is_established() {
                peer.session_down();
            }
        }
        let changes = self.rib.remove_updates_from_all_neighbors(1);
        self.distribute(changes);
    }

    /// Run aggregation over a set of changes and push the result to every
    /// established peer.
    fn distribute(&mut self, mut changes: RibChanges) {
        let apc = self.add_path_count();
        self.rib.apply_aggregation(&mut changes, apc);
        if changes.is_empty() {
            return;
        }
        for peer in self.peers.values_mut().filter(|p| p.is_established()) {
            peer.send_update(
                &self.rib,
                &changes.updated,
                &changes.withdrawn,
                &changes.updated_add_paths,
            );
        }
        self.rib.compact_snapshot(false);
    }
}
