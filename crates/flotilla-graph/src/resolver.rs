//! Wave resolution over the descriptor dependency graph.
//!
//! Dependencies come from two sources: tier *k* implicitly depends on every
//! descriptor of a lower tier in the batch, and `depends_on` adds explicit
//! edges. Kahn layering over the combined graph produces the waves; with no
//! explicit edges this degenerates to exactly "group by tier". Resolution
//! is deterministic: members are stable-sorted by name within each wave.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use flotilla_core::Descriptor;

/// Unsatisfiable ordering — the named workloads depend on each other.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dependency cycle among workloads: {}", members.join(", "))]
pub struct CycleError {
    /// Participating workload names, sorted.
    pub members: Vec<String>,
}

/// One deployment batch. Members deploy concurrently; waves deploy in order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Wave {
    pub index: usize,
    pub members: Vec<Descriptor>,
}

impl Wave {
    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|d| d.name.clone()).collect()
    }
}

/// Order a descriptor batch into waves, or fail on a dependency cycle.
///
/// Invariant on success: every member of wave *n* depends only on members
/// of waves < *n*. A same-tier explicit dependency splits the tier across
/// waves — the invariant wins over tier cohabitation.
pub fn resolve(descriptors: &[Descriptor]) -> Result<Vec<Wave>, CycleError> {
    // Unresolved dependencies per workload name.
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for d in descriptors {
        let mut deps: BTreeSet<&str> = descriptors
            .iter()
            .filter(|other| other.tier < d.tier)
            .map(|other| other.name.as_str())
            .collect();
        deps.extend(d.depends_on.iter().map(String::as_str));
        pending.insert(d.name.as_str(), deps);
    }

    let by_name: BTreeMap<&str, &Descriptor> =
        descriptors.iter().map(|d| (d.name.as_str(), d)).collect();

    let mut waves = Vec::new();
    while !pending.is_empty() {
        // BTreeMap iteration already yields the ready set sorted by name.
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            let members: Vec<String> = pending.keys().map(|n| n.to_string()).collect();
            return Err(CycleError { members });
        }

        for name in &ready {
            pending.remove(name);
        }
        for deps in pending.values_mut() {
            for name in &ready {
                deps.remove(name);
            }
        }

        let index = waves.len();
        debug!(wave = index, members = ?ready, "wave resolved");
        waves.push(Wave {
            index,
            members: ready.iter().map(|name| by_name[name].clone()).collect(),
        });
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::RawDescriptor;

    fn descriptor(name: &str, tier: i64, depends_on: &[&str]) -> Descriptor {
        Descriptor::load(RawDescriptor {
            name: Some(name.to_string()),
            tier: Some(tier),
            image: Some(format!("registry.local/{name}:v1")),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            ..RawDescriptor::default()
        })
        .unwrap()
    }

    fn names(wave: &Wave) -> Vec<&str> {
        wave.members.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn empty_input_yields_no_waves() {
        assert_eq!(resolve(&[]).unwrap(), vec![]);
    }

    #[test]
    fn tiers_group_into_waves() {
        let batch = vec![
            descriptor("app", 1, &[]),
            descriptor("db", 0, &[]),
            descriptor("cache", 0, &[]),
        ];
        let waves = resolve(&batch).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(names(&waves[0]), vec!["cache", "db"]);
        assert_eq!(names(&waves[1]), vec!["app"]);
    }

    #[test]
    fn two_tier_scenario() {
        let batch = vec![descriptor("db", 0, &[]), descriptor("app", 1, &[])];
        let waves = resolve(&batch).unwrap();
        assert_eq!(names(&waves[0]), vec!["db"]);
        assert_eq!(names(&waves[1]), vec!["app"]);
    }

    #[test]
    fn tier_numbers_need_not_be_contiguous() {
        let batch = vec![descriptor("db", 0, &[]), descriptor("app", 5, &[])];
        let waves = resolve(&batch).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(names(&waves[1]), vec!["app"]);
    }

    #[test]
    fn wave_members_sorted_by_name() {
        let batch = vec![
            descriptor("zebra", 0, &[]),
            descriptor("alpha", 0, &[]),
            descriptor("mid", 0, &[]),
        ];
        let waves = resolve(&batch).unwrap();
        assert_eq!(names(&waves[0]), vec!["alpha", "mid", "zebra"]);
    }

    #[test]
    fn resolution_is_deterministic() {
        let batch = vec![
            descriptor("b", 0, &[]),
            descriptor("a", 0, &[]),
            descriptor("c", 1, &["a"]),
        ];
        let first = resolve(&batch).unwrap();
        let second = resolve(&batch).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn same_tier_explicit_dependency_splits_the_tier() {
        let batch = vec![
            descriptor("migrations", 0, &[]),
            descriptor("db", 0, &["migrations"]),
        ];
        let waves = resolve(&batch).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(names(&waves[0]), vec!["migrations"]);
        assert_eq!(names(&waves[1]), vec!["db"]);
    }

    #[test]
    fn later_tiers_wait_for_split_tiers() {
        // "db" is delayed within tier 0 by an explicit dependency; tier 1
        // still deploys after every tier-0 member.
        let batch = vec![
            descriptor("migrations", 0, &[]),
            descriptor("db", 0, &["migrations"]),
            descriptor("app", 1, &[]),
        ];
        let waves = resolve(&batch).unwrap();
        assert_eq!(names(&waves[0]), vec!["migrations"]);
        assert_eq!(names(&waves[1]), vec!["db"]);
        assert_eq!(names(&waves[2]), vec!["app"]);
    }

    #[test]
    fn cycle_yields_error_naming_members() {
        // Tier ordering says db (0) before app (1); the explicit edge says
        // the opposite.
        let batch = vec![
            descriptor("db", 0, &["app"]),
            descriptor("app", 1, &[]),
        ];
        let err = resolve(&batch).unwrap_err();
        assert_eq!(err.members, vec!["app".to_string(), "db".to_string()]);
    }

    #[test]
    fn cycle_error_excludes_resolvable_members() {
        let batch = vec![
            descriptor("db", 0, &["app"]),
            descriptor("app", 1, &[]),
            descriptor("standalone", 0, &[]),
        ];
        let err = resolve(&batch).unwrap_err();
        assert!(!err.members.contains(&"standalone".to_string()));
    }

    #[test]
    fn explicit_cross_tier_dependency_is_redundant_but_legal() {
        let batch = vec![
            descriptor("db", 0, &[]),
            descriptor("app", 1, &["db"]),
        ];
        let waves = resolve(&batch).unwrap();
        assert_eq!(waves.len(), 2);
    }
}
