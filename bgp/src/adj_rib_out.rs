// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-peer Adj-RIB-Out.
//!
//! Each peer remembers, per prefix, which outbound path identifiers it has
//! announced and what was bound to them. After every Loc-RIB change the
//! desired set is recomputed and only the difference is sent.

use crate::config::PeerConfig;
use crate::egress::{Egress, EgressEvent};
use crate::log::peer_log;
use crate::messages::{
    Afi, CeaseErrorSubcode, MpUnreachNlri, NotificationMessage,
    PathAttributeTypeCode, PathAttributeValue, UpdateMessage,
};
use rib::{
    AddressFamily, Destination, LocRib, NeighborInfo, Nlri, Path, PathAttrs,
    PathKey, Prefix, RibConfig, COMMUNITY_NO_ADVERTISE, COMMUNITY_NO_EXPORT,
};
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// What a peer was last sent under one outbound path identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertised {
    pub key: PathKey,
    pub revision: u64,
}

/// Result of diffing the desired advertisements for a prefix against what
/// was previously sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddPathsDelta {
    /// Identifiers no longer advertised.
    pub withdraw: Vec<u32>,
    /// Identifiers that are new or now bound to a different path.
    pub update: Vec<(u32, PathKey)>,
}

/// One path the peer should currently have for a prefix.
pub type DesiredPath<'a> = (u32, PathKey, &'a Path);

pub struct Peer {
    pub config: PeerConfig,
    local_asn: u32,
    cluster_id: Ipv4Addr,
    default_local_pref: u32,
    router_id: Option<Ipv4Addr>,
    established: bool,
    add_path_tx: usize,
    advertised: BTreeMap<Prefix, BTreeMap<u32, Advertised>>,
    egress: Egress,
    pub(crate) log: Logger,
}

impl Peer {
    pub fn new(
        config: PeerConfig,
        rib_config: &RibConfig,
        egress: Egress,
        log: Logger,
    ) -> Self {
        Self {
            config,
            local_asn: rib_config.asn,
            cluster_id: rib_config.cluster_id(),
            default_local_pref: rib_config.default_local_pref,
            router_id: None,
            established: false,
            add_path_tx: 1,
            advertised: BTreeMap::new(),
            egress,
            log,
        }
    }

    pub fn is_ibgp(&self) -> bool {
        self.config.asn == self.local_asn
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Number of paths per prefix sent to this peer. One means no ADD-PATH.
    pub fn add_path_tx(&self) -> usize {
        self.add_path_tx
    }

    pub fn set_egress(&mut self, egress: Egress) {
        self.egress = egress;
    }

    /// How routes learned from this peer are described to the Loc-RIB.
    pub fn neighbor_info(&self) -> NeighborInfo {
        NeighborInfo {
            address: self.config.address,
            asn: self.config.asn,
            router_id: self.router_id.unwrap_or(Ipv4Addr::UNSPECIFIED),
            ibgp: self.is_ibgp(),
            rr_client: self.config.rr_client,
            max_prefixes: self.config.max_prefixes,
        }
    }

    /// The session came up. `add_path_tx` is what was negotiated with the
    /// peer, one if ADD-PATH send was not negotiated.
    pub fn session_up(&mut self, router_id: Ipv4Addr, add_path_tx: usize) {
        self.router_id = Some(router_id);
        self.established = true;
        self.add_path_tx = add_path_tx.min(self.config.add_path_tx).max(1);
        self.advertised.clear();
        peer_log!(self, info, "session up";
            "router_id" => router_id.to_string(),
            "add_path_tx" => self.add_path_tx
        );
    }

    /// The session went down. Nothing is considered advertised anymore.
    pub fn session_down(&mut self) {
        self.established = false;
        self.advertised.clear();
        peer_log!(self, info, "session down");
    }

    pub fn cease(&self, subcode: CeaseErrorSubcode) {
        peer_log!(self, warn, "sending cease {:?}", subcode);
        self.egress
            .send(EgressEvent::Cease(NotificationMessage::cease(subcode)));
    }

    pub fn advertised(&self, prefix: &Prefix) -> Option<&BTreeMap<u32, Advertised>> {
        self.advertised.get(prefix)
    }

    pub fn advertised_prefixes(&self) -> usize {
        self.advertised.len()
    }

    /// Whether `path` may be sent to this peer. Routes are never reflected
    /// back to the neighbor they came from, routes from internal peers only
    /// go to other internal peers through a route reflector client, and the
    /// well-known NO_ADVERTISE and NO_EXPORT communities are honored.
    pub fn is_advertisable(&self, path: &Path) -> bool {
        if path.attrs.has_community(COMMUNITY_NO_ADVERTISE) {
            return false;
        }
        if !self.is_ibgp() && path.attrs.has_community(COMMUNITY_NO_EXPORT) {
            return false;
        }
        match path.neighbor {
            Some(n) if n.address == self.config.address => false,
            Some(n) if n.ibgp && self.is_ibgp() => {
                n.rr_client || self.config.rr_client
            }
            _ => true,
        }
    }

    /// Rewrite the attributes of an outgoing announcement of `path` for
    /// this peer.
    pub fn update_path_attrs(&self, msg: &mut UpdateMessage, path: &Path) {
        if !msg.has_reachable() {
            return;
        }

        if self.is_ibgp() {
            if path.is_ibgp() {
                // reflected
                let originator =
                    path.attrs.originator_id.unwrap_or_else(|| path.router_id());
                msg.set(PathAttributeValue::OriginatorId(originator));
                let mut cluster_list = vec![self.cluster_id];
                cluster_list.extend(path.attrs.cluster_list.iter().copied());
                msg.set(PathAttributeValue::ClusterList(cluster_list));
            } else {
                msg.set(PathAttributeValue::LocalPref(
                    path.effective_local_pref(self.default_local_pref),
                ));
                msg.remove(PathAttributeTypeCode::OriginatorId);
                msg.remove(PathAttributeTypeCode::ClusterList);
            }
            if path.attrs.next_hop.is_none() {
                msg.set_nexthop(self.config.local_address);
            }
            return;
        }

        msg.remove(PathAttributeTypeCode::LocalPref);
        if !path.is_local() {
            msg.remove(PathAttributeTypeCode::MultiExitDisc);
        }
        msg.remove(PathAttributeTypeCode::OriginatorId);
        msg.remove(PathAttributeTypeCode::ClusterList);

        let mut attrs = PathAttrs {
            as_path: msg.as_path().map(|s| s.to_vec()).unwrap_or_default(),
            ..Default::default()
        };
        attrs.prepend_as(self.local_asn);
        msg.set(PathAttributeValue::AsPath(attrs.as_path));
        msg.set_nexthop(self.config.local_address);
    }

    /// The paths this peer should have for a destination: the selected path
    /// under its outbound identifier, then ADD-PATH runner-ups under theirs.
    pub fn desired_paths<'a>(&self, dest: &'a Destination) -> Vec<DesiredPath<'a>> {
        let mut result = Vec::new();
        if dest.is_suppressed() {
            return result;
        }
        let Some((key, path)) = dest.loc_rib_path() else {
            return result;
        };
        if self.add_path_tx <= 1 {
            if self.is_advertisable(path) {
                result.push((0, *key, path));
            }
            return result;
        }
        if self.is_advertisable(path) {
            result.push((dest.loc_rib_path_id().unwrap_or(0), *key, path));
        }
        for (k, p) in dest.add_paths().take(self.add_path_tx - 1) {
            if self.is_advertisable(p) {
                result.push((p.local_id, *k, p));
            }
        }
        result
    }

    /// Diff the desired paths for `prefix` against what was sent before and
    /// record the desired set as sent.
    pub fn calculate_add_paths_advertisements(
        &mut self,
        prefix: Prefix,
        desired: &[DesiredPath<'_>],
    ) -> AddPathsDelta {
        let previous = self.advertised.remove(&prefix).unwrap_or_default();
        let mut current = BTreeMap::new();
        let mut delta = AddPathsDelta::default();
        for (id, key, path) in desired {
            let entry = Advertised {
                key: *key,
                revision: path.revision,
            };
            if previous.get(id) != Some(&entry) {
                delta.update.push((*id, *key));
            }
            current.insert(*id, entry);
        }
        delta.withdraw = previous
            .keys()
            .filter(|id| !current.contains_key(id))
            .copied()
            .collect();
        if !current.is_empty() {
            self.advertised.insert(prefix, current);
        }
        delta
    }

    /// Bring the peer up to date with a set of Loc-RIB changes. Withdrawals
    /// go out first in a single message, IPv4 in the withdrawn routes field
    /// and IPv6 in MP_UNREACH_NLRI. Announcements are grouped so each
    /// distinct attribute set is sent once. Returns what was sent.
    pub fn send_update(
        &mut self,
        rib: &LocRib,
        updated: &BTreeSet<Prefix>,
        withdrawn: &BTreeSet<Prefix>,
        updated_add_paths: &BTreeSet<Prefix>,
    ) -> Vec<UpdateMessage> {
        if !self.established {
            return Vec::new();
        }

        let mut prefixes: BTreeSet<Prefix> =
            updated.union(withdrawn).copied().collect();
        if self.add_path_tx > 1 {
            prefixes.extend(updated_add_paths.iter().copied());
        }

        let mut withdraw4 = Vec::new();
        let mut withdraw6 = Vec::new();
        let mut groups: Vec<(UpdateMessage, Vec<Nlri>)> = Vec::new();

        for prefix in prefixes {
            let desired = rib
                .destination(&prefix)
                .map(|d| self.desired_paths(d))
                .unwrap_or_default();
            let delta = self.calculate_add_paths_advertisements(prefix, &desired);

            for id in delta.withdraw {
                let nlri = Nlri::new(prefix, id);
                match prefix.family() {
                    AddressFamily::Ipv4 => withdraw4.push(nlri),
                    AddressFamily::Ipv6 => withdraw6.push(nlri),
                }
            }

            for (id, _) in delta.update {
                let Some((_, _, path)) = desired.iter().find(|(i, ..)| *i == id)
                else {
                    continue;
                };
                let nlri = Nlri::new(prefix, id);
                let mut msg = UpdateMessage::announce(nlri, &path.attrs);
                self.update_path_attrs(&mut msg, path);
                let template = without_nlri(msg);
                match groups.iter_mut().find(|(t, _)| *t == template) {
                    Some((_, members)) => members.push(nlri),
                    None => groups.push((template, vec![nlri])),
                }
            }
        }

        let mut out = Vec::new();
        if !withdraw4.is_empty() || !withdraw6.is_empty() {
            let mut msg = UpdateMessage {
                withdrawn: withdraw4,
                ..Default::default()
            };
            if !withdraw6.is_empty() {
                msg.set(PathAttributeValue::MpUnreachNlri(MpUnreachNlri {
                    afi: Afi::Ipv6,
                    withdrawn: withdraw6,
                }));
            }
            out.push(msg);
        }
        for (mut msg, members) in groups {
            match msg.get_mut(PathAttributeTypeCode::MpReachNlri) {
                Some(PathAttributeValue::MpReachNlri(mp)) => mp.nlri = members,
                _ => msg.nlri = members,
            }
            out.push(msg);
        }

        for msg in &out {
            self.egress.announce(msg);
        }
        if !out.is_empty() {
            peer_log!(self, debug, "sent {} updates", out.len();
                "announced" => out.iter().map(|m| m.announced().len()).sum::<usize>(),
                "withdrawn" => out.iter().map(|m| m.withdrawn_all().len()).sum::<usize>()
            );
        }
        out
    }

    /// Send the whole table, as on session establishment.
    pub fn advertise_all(&mut self, rib: &LocRib) -> Vec<UpdateMessage> {
        let all: BTreeSet<Prefix> = rib.destinations().map(|d| d.prefix()).collect();
        self.send_update(rib, &all, &BTreeSet::new(), &BTreeSet::new())
    }
}

/// The attribute template of an announcement, used to group prefixes that
/// share identical outgoing attributes.
fn without_nlri(mut msg: UpdateMessage) -> UpdateMessage {
    msg.nlri.clear();
    if let Some(PathAttributeValue::MpReachNlri(mp)) =
        msg.get_mut(PathAttributeTypeCode::MpReachNlri)
    {
        mp.nlri.clear();
    }
    msg
}
