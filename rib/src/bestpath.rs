// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::path::{Path, PathKey};
use itertools::Itertools;
use std::collections::BTreeMap;

/// Knobs that influence the BGP decision process.
#[derive(Debug, Clone, Copy)]
pub struct SelectionPolicy {
    pub default_local_pref: u32,
    /// Compare MED between paths from different neighboring ASes.
    pub always_compare_med: bool,
    pub max_ecmp_paths: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            default_local_pref: crate::DEFAULT_LOCAL_PREF,
            always_compare_med: false,
            max_ecmp_paths: crate::DEFAULT_MAX_ECMP_PATHS,
        }
    }
}

/// Result of a single pass of the decision process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestPath {
    pub best: PathKey,
    /// Paths that are equal to `best` up to and including the IGP metric
    /// step, `best` first. Capped at the configured ECMP fanout.
    pub multipath: Vec<PathKey>,
}

type Candidate<'a> = (&'a PathKey, &'a Path);

/// The bestpath algorithm chooses the single best path from `candidates`.
/// Candidates are narrowed by the following ordered filters until one
/// remains.
///
/// - discard paths whose next hop is unresolved
/// - keep the paths with the highest local preference
/// - keep the paths with the shortest AS path
/// - keep the paths with the lowest origin code
/// - keep the paths with the lowest MED, compared among paths from the same
///   neighboring AS unless `always_compare_med` is set
/// - prefer paths learned over eBGP to those learned over iBGP
/// - keep the paths with the lowest IGP metric to the next hop
///
/// Whatever survives is the multipath set. The winner is the survivor with
/// the lowest router id, then the lowest path key, which makes the
/// ordering total.
pub fn bestpath<'a, I>(candidates: I, policy: &SelectionPolicy) -> Option<BestPath>
where
    I: IntoIterator<Item = Candidate<'a>>,
{
    let candidates: Vec<Candidate> = candidates
        .into_iter()
        .filter(|(_, path)| path.is_reachable())
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let candidates = candidates
        .into_iter()
        .max_set_by_key(|(_, p)| p.effective_local_pref(policy.default_local_pref));

    let candidates = candidates
        .into_iter()
        .min_set_by_key(|(_, p)| p.attrs.as_path_len());

    let candidates = candidates
        .into_iter()
        .min_set_by_key(|(_, p)| p.attrs.origin);

    let candidates = if policy.always_compare_med {
        candidates
            .into_iter()
            .min_set_by_key(|(_, p)| p.attrs.med.unwrap_or(0))
    } else {
        // Group candidates by neighboring AS and keep the lowest MED of each
        // group.
        let mut groups: BTreeMap<Option<u32>, Vec<Candidate>> = BTreeMap::new();
        for c in candidates {
            groups.entry(c.1.attrs.neighbor_as()).or_default().push(c);
        }
        groups
            .into_values()
            .flat_map(|group| {
                group
                    .into_iter()
                    .min_set_by_key(|(_, p)| p.attrs.med.unwrap_or(0))
            })
            .collect()
    };

    let candidates = candidates.into_iter().min_set_by_key(|(_, p)| p.is_ibgp());

    let candidates = candidates
        .into_iter()
        .min_set_by_key(|(_, p)| p.igp_metric());

    let mut survivors: Vec<(&PathKey, &Path)> = candidates;
    survivors.sort_by_key(|(k, p)| (p.router_id(), **k));

    let best = *survivors.first()?.0;
    let multipath = survivors
        .iter()
        .take(policy.max_ecmp_paths.max(1))
        .map(|(k, _)| **k)
        .collect();

    Some(BestPath { best, multipath })
}

/// Rank up to `count` paths by repeatedly running the decision process and
/// removing the winner. The first element is the overall best path.
pub fn rank_paths(
    paths: &BTreeMap<PathKey, Path>,
    policy: &SelectionPolicy,
    count: usize,
) -> Vec<PathKey> {
    let mut remaining: Vec<Candidate> = paths.iter().collect();
    let mut ranked = Vec::new();
    while ranked.len() < count {
        let Some(bp) = bestpath(remaining.iter().copied(), policy) else {
            break;
        };
        remaining.retain(|(k, _)| **k != bp.best);
        ranked.push(bp.best);
    }
    ranked
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attrs::{AsPathSegment, Origin, PathAttrs};
    use crate::path::NeighborInfo;
    use crate::reachability::ReachabilityInfo;
    use std::net::{IpAddr, Ipv4Addr};

    fn nbr(last: u8, asn: u32, ibgp: bool) -> NeighborInfo {
        NeighborInfo {
            address: IpAddr::V4(Ipv4Addr::new(203, 0, 113, last)),
            asn,
            router_id: Ipv4Addr::new(1, 1, 1, last),
            ibgp,
            rr_client: false,
            max_prefixes: None,
        }
    }

    fn path(n: NeighborInfo, as_path: Vec<u32>, med: Option<u32>) -> Path {
        let mut p = Path::from_neighbor(
            n,
            PathAttrs {
                as_path: vec![AsPathSegment::sequence(as_path)],
                next_hop: Some(n.address),
                med,
                ..Default::default()
            },
        );
        p.reachability = Some(ReachabilityInfo::direct(n.address, 1));
        p
    }

    fn rib(paths: Vec<Path>) -> BTreeMap<PathKey, Path> {
        paths
            .into_iter()
            .map(|p| (PathKey::neighbor(p.neighbor.unwrap().address, 0), p))
            .collect()
    }

    #[test]
    fn test_bestpath() {
        let policy = SelectionPolicy {
            max_ecmp_paths: 4,
            ..Default::default()
        };
        let n1 = nbr(1, 64500, false);
        let n2 = nbr(2, 64500, false);
        let n3 = nbr(3, 64501, false);

        // empty
        assert!(bestpath(BTreeMap::new().iter(), &policy).is_none());

        // shorter as path wins
        let paths = rib(vec![
            path(n1, vec![64500, 64510], None),
            path(n2, vec![64500], None),
        ]);
        let bp = bestpath(paths.iter(), &policy).unwrap();
        assert_eq!(bp.best, PathKey::neighbor(n2.address, 0));
        assert_eq!(bp.multipath.len(), 1);

        // MED is only compared within the same neighboring AS, so the higher
        // MED path from a different AS survives into the multipath set
        let paths = rib(vec![
            path(n1, vec![64500], Some(50)),
            path(n2, vec![64500], Some(10)),
            path(n3, vec![64501], Some(90)),
        ]);
        let bp = bestpath(paths.iter(), &policy).unwrap();
        assert_eq!(
            bp.multipath,
            vec![
                PathKey::neighbor(n2.address, 0),
                PathKey::neighbor(n3.address, 0)
            ]
        );

        // unless always compare is configured
        let always = SelectionPolicy {
            always_compare_med: true,
            ..policy
        };
        let bp = bestpath(paths.iter(), &always).unwrap();
        assert_eq!(bp.multipath, vec![PathKey::neighbor(n2.address, 0)]);
    }

    #[test]
    fn origin_and_ebgp_preference() {
        let policy = SelectionPolicy::default();
        let n1 = nbr(1, 65000, true);
        let n2 = nbr(2, 64500, false);
        let mut p1 = path(n1, vec![64510], None);
        p1.attrs.origin = Origin::Igp;
        let mut p2 = path(n2, vec![64500], None);
        p2.attrs.origin = Origin::Incomplete;
        let paths = rib(vec![p1.clone(), p2.clone()]);
        let bp = bestpath(paths.iter(), &policy).unwrap();
        assert_eq!(bp.best, PathKey::neighbor(n1.address, 0));

        // equal origin, ebgp beats ibgp despite the worse router id
        p2.attrs.origin = Origin::Igp;
        let paths = rib(vec![p1, p2]);
        let bp = bestpath(paths.iter(), &policy).unwrap();
        assert_eq!(bp.best, PathKey::neighbor(n2.address, 0));
    }

    #[test]
    fn unreachable_paths_are_ignored() {
        let policy = SelectionPolicy::default();
        let n1 = nbr(1, 64500, false);
        let mut p = path(n1, vec![64500], None);
        p.reachability = None;
        let paths = rib(vec![p]);
        assert!(bestpath(paths.iter(), &policy).is_none());
        assert!(rank_paths(&paths, &policy, 3).is_empty());
    }

    #[test]
    fn ranking_is_ordered() {
        let policy = SelectionPolicy::default();
        let paths = rib(vec![
            path(nbr(1, 64500, false), vec![64500, 1, 2], None),
            path(nbr(2, 64500, false), vec![64500], None),
            path(nbr(3, 64500, false), vec![64500, 1], None),
        ]);
        let ranked = rank_paths(&paths, &policy, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(
            ranked[0].source,
            crate::path::PathSource::Neighbor(IpAddr::V4(Ipv4Addr::new(
                203, 0, 113, 2
            )))
        );
        assert_eq!(
            ranked[1].source,
            crate::path::PathSource::Neighbor(IpAddr::V4(Ipv4Addr::new(
                203, 0, 113, 3
            )))
        );
    }
}
