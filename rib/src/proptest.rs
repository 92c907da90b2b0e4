// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for destinations and route selection using
//! proptest.

#[cfg(test)]
mod proptest {
    use crate::bestpath::SelectionPolicy;
    use crate::destination::{Destination, RouteAction};
    use crate::path::PathKey;
    use crate::test::{neighbor, peer_path};
    use crate::types::Prefix;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone)]
    enum Op {
        Announce { peer: u8, path_id: u32, as_path_len: usize },
        Withdraw { peer: u8, path_id: u32 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u8..=4, 0u32..3, 0usize..4).prop_map(
                |(peer, path_id, as_path_len)| Op::Announce {
                    peer,
                    path_id,
                    as_path_len
                }
            ),
            (1u8..=4, 0u32..3)
                .prop_map(|(peer, path_id)| Op::Withdraw { peer, path_id }),
        ]
    }

    fn prefix() -> Prefix {
        "198.51.100.0/24".parse().unwrap()
    }

    proptest! {
        /// Property: a destination holds exactly one path per key, and the
        /// selected path is always one of them (or nothing when empty)
        #[test]
        fn prop_one_path_per_key_and_selection_is_member(
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let policy = SelectionPolicy::default();
            let mut dest = Destination::new(prefix());
            let mut model: BTreeMap<PathKey, usize> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Announce { peer, path_id, as_path_len } => {
                        let n = neighbor(peer, 65000 + peer as u32, false);
                        let as_path = vec![n.asn; as_path_len];
                        let key = PathKey::neighbor(n.address, path_id);
                        dest.insert_path(key, peer_path(n, &as_path));
                        model.insert(key, as_path_len);
                    }
                    Op::Withdraw { peer, path_id } => {
                        let n = neighbor(peer, 65000 + peer as u32, false);
                        let key = PathKey::neighbor(n.address, path_id);
                        dest.remove_path(&key);
                        model.remove(&key);
                    }
                }
                dest.select_route_for_loc_rib(3, &policy);

                prop_assert_eq!(dest.paths().len(), model.len());
                match dest.loc_rib_path() {
                    Some((key, _)) => {
                        prop_assert!(model.contains_key(key));
                        prop_assert!(dest.loc_rib_path_id().is_some());
                    }
                    None => prop_assert!(model.is_empty()),
                }
                for (key, _) in dest.add_paths() {
                    prop_assert!(model.contains_key(key));
                }
            }
        }

        /// Property: among otherwise tied paths, the lowest router id wins
        /// no matter the insertion order
        #[test]
        fn prop_tie_break_is_order_independent(
            order in Just(vec![1u8, 2, 3, 4, 5]).prop_shuffle()
        ) {
            let policy = SelectionPolicy::default();
            let mut dest = Destination::new(prefix());
            for peer in order {
                let n = neighbor(peer, 65001, false);
                dest.insert_path(
                    PathKey::neighbor(n.address, 0),
                    peer_path(n, &[65001]),
                );
                dest.select_route_for_loc_rib(1, &policy);
            }
            let best = neighbor(1, 65001, false);
            prop_assert_eq!(
                dest.loc_rib_path().map(|(k, _)| *k),
                Some(PathKey::neighbor(best.address, 0))
            );
        }

        /// Property: reprocessing an identical path is not a change
        #[test]
        fn prop_reinsert_is_idempotent(
            peer in 1u8..=4,
            as_path_len in 0usize..4,
            add_path_count in 1usize..4
        ) {
            let policy = SelectionPolicy::default();
            let mut dest = Destination::new(prefix());
            let n = neighbor(peer, 65001, false);
            let as_path = vec![65001; as_path_len];
            let key = PathKey::neighbor(n.address, 0);

            dest.insert_path(key, peer_path(n, &as_path));
            let first = dest.select_route_for_loc_rib(add_path_count, &policy);
            prop_assert_eq!(first.action, RouteAction::Add);

            dest.insert_path(key, peer_path(n, &as_path));
            let second = dest.select_route_for_loc_rib(add_path_count, &policy);
            prop_assert_eq!(second.action, RouteAction::None);
            prop_assert!(!second.add_paths_modified);
            prop_assert!(second.updated.is_empty());
        }
    }
}
