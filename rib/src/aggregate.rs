// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Route aggregation.
//!
//! An aggregate is a synthetic path installed at the aggregate prefix. Its
//! [`AggregateState`] holds the member set keyed by contributing prefix; each
//! contributing destination holds the aggregate prefix. Neither side refers
//! to the other directly, both are resolved through the destination table.

use crate::attrs::{AsPathSegment, Aggregator, Origin, PathAttrs};
use crate::config::AggregateConfig;
use crate::destination::AggregateMembership;
use crate::locrib::{LocRib, RibChanges};
use crate::log::rib_log;
use crate::path::{AggregateState, Contribution, Path, PathKey, RouteType};
use crate::types::{AddressFamily, Prefix};
use crate::MOD_AGGREGATE;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Recompute the attributes an aggregate derives from its members.
fn refresh_aggregate_attrs(path: &mut Path) {
    let Some(state) = &path.aggregate else {
        return;
    };
    path.attrs.origin = state
        .contributors
        .values()
        .map(|c| c.origin)
        .max()
        .unwrap_or(Origin::Igp);
    let asns: BTreeSet<u32> = state
        .contributors
        .values()
        .flat_map(|c| c.as_numbers.iter().copied())
        .collect();
    path.attrs.as_path = if state.generate_as_set && !asns.is_empty() {
        vec![AsPathSegment::set(asns.into_iter().collect())]
    } else {
        Vec::new()
    };
    path.attrs.atomic_aggregate = !state.generate_as_set;
}

impl LocRib {
    fn is_contributor(&self, aggregate: &Prefix, prefix: &Prefix) -> bool {
        self.destinations
            .get(aggregate)
            .and_then(|d| d.path(&PathKey::aggregate()))
            .and_then(|p| p.aggregate.as_ref())
            .map(|s| s.contributors.contains_key(prefix))
            .unwrap_or(false)
    }

    /// Merge the installed route of `prefix` into the aggregate at
    /// `agg_prefix`, creating the aggregate path if needed.
    pub fn add_route_to_aggregate(
        &mut self,
        prefix: Prefix,
        agg_prefix: Prefix,
        family: AddressFamily,
        local_iface_ip: Option<IpAddr>,
        cfg: &AggregateConfig,
        add_path_count: usize,
    ) -> RibChanges {
        let mut changes = RibChanges::default();
        if prefix.family() != family || !prefix.more_specific_of(&agg_prefix) {
            rib_log!(self, warn, MOD_AGGREGATE,
                "{prefix} cannot contribute to {agg_prefix}";
                "family" => format!("{family:?}")
            );
            return changes;
        }

        let contribution = match self
            .destinations
            .get(&prefix)
            .and_then(|d| d.loc_rib_path())
        {
            Some((_, p)) => Contribution {
                origin: p.attrs.origin,
                as_numbers: p.attrs.as_numbers(),
            },
            None => {
                rib_log!(self, warn, MOD_AGGREGATE,
                    "no installed route to aggregate";
                    "prefix" => prefix.to_string(),
                    "aggregate" => agg_prefix.to_string()
                );
                return changes;
            }
        };

        let membership = AggregateMembership {
            aggregate: agg_prefix,
            suppress: cfg.send_summary_only,
        };
        let joined = self
            .destinations
            .get_mut(&prefix)
            .map(|d| d.set_aggregate(Some(membership)))
            .unwrap_or(false);
        if joined {
            changes.updated.insert(prefix);
            self.refresh_route_state(prefix);
        }

        let key = PathKey::aggregate();
        let existing = self
            .destinations
            .get(&agg_prefix)
            .and_then(|d| d.path(&key))
            .cloned();
        let mut path = match existing {
            Some(mut path) => {
                if let Some(state) = path.aggregate.as_mut() {
                    state.contributors.insert(prefix, contribution);
                }
                path
            }
            None => {
                rib_log!(self, info, MOD_AGGREGATE,
                    "creating aggregate";
                    "aggregate" => agg_prefix.to_string()
                );
                let attrs = PathAttrs {
                    next_hop: if cfg.next_hop_self {
                        local_iface_ip
                    } else {
                        None
                    },
                    aggregator: Some(Aggregator {
                        asn: self.config.asn,
                        address: self.config.router_id,
                    }),
                    ..Default::default()
                };
                let mut path = Path::local(RouteType::Aggregate, attrs);
                path.aggregate = Some(AggregateState {
                    generate_as_set: cfg.generate_as_set,
                    send_summary_only: cfg.send_summary_only,
                    contributors: BTreeMap::from([(prefix, contribution)]),
                });
                path
            }
        };
        refresh_aggregate_attrs(&mut path);
        path.reachability = self.get_reachability_info(&path);
        self.install_path(agg_prefix, key, path, add_path_count, &mut changes);
        changes
    }

    /// Detach `prefix` from the aggregate at `agg_prefix`. The aggregate is
    /// withdrawn with its last member.
    pub fn remove_route_from_aggregate(
        &mut self,
        prefix: Prefix,
        agg_prefix: Prefix,
        add_path_count: usize,
    ) -> RibChanges {
        let mut changes = RibChanges::default();
        let left = match self.destinations.get_mut(&prefix) {
            Some(dest) => {
                let member =
                    dest.aggregate().map(|m| m.aggregate) == Some(agg_prefix);
                member && dest.set_aggregate(None) && dest.loc_rib_path().is_some()
            }
            None => false,
        };
        if left {
            changes.updated.insert(prefix);
            self.refresh_route_state(prefix);
        }

        let key = PathKey::aggregate();
        let existing = self
            .destinations
            .get(&agg_prefix)
            .and_then(|d| d.path(&key))
            .cloned();
        let Some(mut path) = existing else {
            rib_log!(self, warn, MOD_AGGREGATE,
                "no aggregate to remove contributor from";
                "prefix" => prefix.to_string(),
                "aggregate" => agg_prefix.to_string()
            );
            return changes;
        };
        let Some(state) = path.aggregate.as_mut() else {
            return changes;
        };
        state.contributors.remove(&prefix);

        if state.contributors.is_empty() {
            rib_log!(self, info, MOD_AGGREGATE,
                "last contributor gone, removing aggregate";
                "aggregate" => agg_prefix.to_string()
            );
            self.withdraw_path(agg_prefix, key, add_path_count, &mut changes);
        } else {
            refresh_aggregate_attrs(&mut path);
            self.install_path(agg_prefix, key, path, add_path_count, &mut changes);
        }
        changes
    }

    /// Bring configured aggregates in line with a set of changes. Prefixes
    /// with an installed route join every aggregate covering them, prefixes
    /// that lost their route leave. Resulting changes are folded into
    /// `changes`.
    pub fn apply_aggregation(
        &mut self,
        changes: &mut RibChanges,
        add_path_count: usize,
    ) {
        if self.aggregates.is_empty() {
            return;
        }
        for prefix in changes.touched() {
            let covering: Vec<AggregateConfig> = self
                .aggregates
                .values()
                .filter(|cfg| prefix.more_specific_of(&cfg.prefix))
                .cloned()
                .collect();
            for cfg in covering {
                let sub = self.sync_contributor(prefix, &cfg, add_path_count);
                changes.merge(sub);
            }
        }
    }

    fn sync_contributor(
        &mut self,
        prefix: Prefix,
        cfg: &AggregateConfig,
        add_path_count: usize,
    ) -> RibChanges {
        let installed = self
            .destinations
            .get(&prefix)
            .and_then(|d| d.loc_rib_path())
            .map(|(_, p)| p.route_type != RouteType::Aggregate);
        match installed {
            Some(true) => {
                let family = prefix.family();
                let local = self.config.local_address(family);
                self.add_route_to_aggregate(
                    prefix,
                    cfg.prefix,
                    family,
                    local,
                    cfg,
                    add_path_count,
                )
            }
            _ if self.is_contributor(&cfg.prefix, &prefix) => {
                self.remove_route_from_aggregate(prefix, cfg.prefix, add_path_count)
            }
            _ => RibChanges::default(),
        }
    }

    /// Configure an aggregate and enroll the installed routes it covers.
    /// Reconfiguring an existing aggregate rebuilds it.
    pub fn add_aggregate(
        &mut self,
        cfg: AggregateConfig,
        add_path_count: usize,
    ) -> RibChanges {
        let mut changes = RibChanges::default();
        if self.aggregates.contains_key(&cfg.prefix) {
            changes.merge(self.remove_aggregate(cfg.prefix, add_path_count));
        }
        self.aggregates.insert(cfg.prefix, cfg.clone());

        let covered: Vec<Prefix> = self
            .destinations
            .keys()
            .filter(|p| p.more_specific_of(&cfg.prefix))
            .copied()
            .collect();
        for prefix in covered {
            changes.merge(self.sync_contributor(prefix, &cfg, add_path_count));
        }
        changes
    }

    /// Remove an aggregate and release its contributors.
    pub fn remove_aggregate(
        &mut self,
        prefix: Prefix,
        add_path_count: usize,
    ) -> RibChanges {
        let mut changes = RibChanges::default();
        if self.aggregates.remove(&prefix).is_none() {
            rib_log!(self, warn, MOD_AGGREGATE,
                "no such aggregate";
                "aggregate" => prefix.to_string()
            );
            return changes;
        }
        let contributors: Vec<Prefix> = self
            .destinations
            .get(&prefix)
            .and_then(|d| d.path(&PathKey::aggregate()))
            .and_then(|p| p.aggregate.as_ref())
            .map(|s| s.contributors.keys().copied().collect())
            .unwrap_or_default();
        for contributor in contributors {
            changes.merge(self.remove_route_from_aggregate(
                contributor,
                prefix,
                add_path_count,
            ));
        }
        changes
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &AggregateConfig> {
        self.aggregates.values()
    }
}

#[cfg(test)]
mod test {
    use crate::attrs::Origin;
    use crate::config::{AggregateConfig, RibConfig};
    use crate::locrib::{LocRib, RibUpdate};
    use crate::path::PathKey;
    use crate::reachability::TableRouteManager;
    use crate::store::NullStore;
    use crate::test::{get_test_store, neighbor, peer_attrs};
    use crate::types::{Nlri, Prefix};
    use crate::AsPathType;
    use rib_common::log::{discard_logger, init_file_logger};
    use std::net::Ipv4Addr;

    fn rib() -> (LocRib, TableRouteManager) {
        let rm = TableRouteManager::new();
        let rib = LocRib::new(
            RibConfig::new(65000, Ipv4Addr::new(10, 255, 0, 1)),
            Box::new(rm.clone()),
            Box::new(NullStore),
            discard_logger(),
        );
        (rib, rm)
    }

    fn p(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn aggregate_lifecycle() {
        let (mut rib, rm) = rib();
        let n1 = neighbor(1, 65001, false);
        let n2 = neighbor(2, 65002, false);
        rm.set_connected(n1.address, 1);
        rm.set_connected(n2.address, 2);

        let agg = p("10.0.0.0/16");
        let mut cfg = AggregateConfig::new(agg);
        cfg.generate_as_set = true;
        cfg.send_summary_only = true;
        let changes = rib.add_aggregate(cfg, 1);
        assert!(changes.is_empty());

        let mut changes = rib
            .process_update(
                &n1,
                &RibUpdate {
                    added: vec![Nlri::from(p("10.0.1.0/24"))],
                    path: Some(peer_attrs(&n1, &[65001])),
                    withdrawn: vec![],
                },
                1,
            )
            .expect("update")
            .changes;
        rib.apply_aggregation(&mut changes, 1);
        assert!(changes.updated.contains(&agg));

        let mut attrs = peer_attrs(&n2, &[65002]);
        attrs.origin = Origin::Egp;
        let mut changes = rib
            .process_update(
                &n2,
                &RibUpdate {
                    added: vec![Nlri::from(p("10.0.2.0/24"))],
                    path: Some(attrs),
                    withdrawn: vec![],
                },
                1,
            )
            .expect("update")
            .changes;
        rib.apply_aggregation(&mut changes, 1);

        let dest = rib.destination(&agg).expect("aggregate destination");
        let (key, path) = dest.loc_rib_path().expect("aggregate installed");
        assert_eq!(*key, PathKey::aggregate());
        assert_eq!(path.attrs.origin, Origin::Egp);
        assert_eq!(path.attrs.as_path.len(), 1);
        assert_eq!(path.attrs.as_path[0].typ, AsPathType::AsSet);
        assert_eq!(path.attrs.as_path[0].value, vec![65001, 65002]);
        assert!(!path.attrs.atomic_aggregate);
        let aggregator = path.attrs.aggregator.expect("aggregator");
        assert_eq!(aggregator.asn, 65000);
        assert!(rib.destination(&p("10.0.1.0/24")).unwrap().is_suppressed());

        // withdraw both contributors
        for (n, prefix) in [(n1, "10.0.1.0/24"), (n2, "10.0.2.0/24")] {
            let mut changes = rib
                .process_update(
                    &n,
                    &RibUpdate {
                        added: vec![],
                        path: None,
                        withdrawn: vec![Nlri::from(p(prefix))],
                    },
                    1,
                )
                .expect("withdraw")
                .changes;
            rib.apply_aggregation(&mut changes, 1);
        }
        assert!(rib.destination(&agg).is_none());
        assert!(rib.is_empty());
    }

    #[test]
    fn last_contributor_lifts_suppression() {
        let (mut rib, rm) = rib();
        let n1 = neighbor(1, 65001, false);
        rm.set_connected(n1.address, 1);
        let agg = p("10.0.0.0/16");
        let contributor = p("10.0.1.0/24");

        let mut changes = rib
            .process_update(
                &n1,
                &RibUpdate {
                    added: vec![Nlri::from(contributor)],
                    path: Some(peer_attrs(&n1, &[65001])),
                    withdrawn: vec![],
                },
                1,
            )
            .expect("update")
            .changes;
        rib.apply_aggregation(&mut changes, 1);

        let mut cfg = AggregateConfig::new(agg);
        cfg.send_summary_only = true;
        let changes = rib.add_aggregate(cfg, 1);
        assert!(changes.updated.contains(&agg));
        assert!(changes.updated.contains(&contributor));
        assert!(rib.destination(&contributor).unwrap().is_suppressed());
        let path = rib.destination(&agg).unwrap().loc_rib_path().unwrap().1;
        assert!(path.attrs.atomic_aggregate);
        assert!(path.attrs.as_path.is_empty());

        let changes = rib.remove_route_from_aggregate(contributor, agg, 1);
        assert!(changes.withdrawn.contains(&agg));
        assert!(changes.updated.contains(&contributor));
        assert!(rib.destination(&agg).is_none());
        assert!(!rib.destination(&contributor).unwrap().is_suppressed());

        // nothing left to remove
        let changes = rib.remove_route_from_aggregate(contributor, agg, 1);
        assert!(changes.is_empty());
    }

    #[test]
    fn suppression_reaches_snapshot_and_store() {
        let log = init_file_logger("aggregate_suppression.log");
        let store = get_test_store("aggregate_suppression", log.clone())
            .expect("store");
        let rm = TableRouteManager::new();
        let mut rib = LocRib::new(
            RibConfig::new(65000, Ipv4Addr::new(10, 255, 0, 1)),
            Box::new(rm.clone()),
            Box::new(store.store().clone()),
            log,
        );
        let n1 = neighbor(1, 65001, false);
        rm.set_connected(n1.address, 1);
        let agg = p("10.0.0.0/16");
        let contributor = p("10.0.1.0/24");

        rib.process_update(
            &n1,
            &RibUpdate {
                added: vec![Nlri::from(contributor)],
                path: Some(peer_attrs(&n1, &[65001])),
                withdrawn: vec![],
            },
            1,
        )
        .expect("update");

        let suppressed = |rib: &LocRib| {
            rib.snapshot()
                .bulk_get_routes(0, 10)
                .routes
                .into_iter()
                .find(|r| r.prefix == contributor)
                .map(|r| r.suppressed)
        };
        assert_eq!(suppressed(&rib), Some(false));

        let mut cfg = AggregateConfig::new(agg);
        cfg.send_summary_only = true;
        rib.add_aggregate(cfg, 1);
        assert_eq!(suppressed(&rib), Some(true));
        let stored = store.get_route(&contributor).expect("get").expect("route");
        assert!(stored.suppressed);

        rib.remove_route_from_aggregate(contributor, agg, 1);
        assert_eq!(suppressed(&rib), Some(false));
        let stored = store.get_route(&contributor).expect("get").expect("route");
        assert!(!stored.suppressed);
    }
}
