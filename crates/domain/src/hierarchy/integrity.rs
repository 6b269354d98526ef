use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::{InstitutionId, InstitutionNode, ROOT_LEVEL};

use super::InstitutionTree;

/// Node whose stored level disagrees with its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelInconsistency {
    /// Offending node.
    pub institution_id: InstitutionId,
    /// Stored level.
    pub level: u16,
    /// Level implied by the parent.
    pub expected_level: u16,
}

/// Aggregate counters over one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HierarchyStatistics {
    /// All nodes.
    pub total: usize,
    /// Active nodes.
    pub active: usize,
    /// Inactive nodes.
    pub inactive: usize,
    /// Deepest stored level, zero for an empty tree.
    pub max_depth: u16,
    /// Node count per level.
    pub per_level: BTreeMap<u16, usize>,
}

/// Structural health of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyIntegrityReport {
    /// Snapshot version inspected.
    pub version: u64,
    /// Nodes whose parent does not exist.
    pub orphaned: Vec<InstitutionId>,
    /// Nodes whose level is not parent level plus one (or root level).
    pub level_inconsistencies: Vec<LevelInconsistency>,
    /// Parent chains that loop, each rotated to start at its smallest id.
    pub cycles: Vec<Vec<InstitutionId>>,
    /// Counters over the snapshot.
    pub statistics: HierarchyStatistics,
}

impl HierarchyIntegrityReport {
    /// Returns whether no structural problem was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.orphaned.is_empty() && self.level_inconsistencies.is_empty() && self.cycles.is_empty()
    }
}

impl InstitutionTree {
    /// Inspects every node for orphans, level drift and parent cycles.
    #[must_use]
    pub fn integrity_report(&self) -> HierarchyIntegrityReport {
        let mut ids: Vec<InstitutionId> = self.nodes.keys().copied().collect();
        ids.sort();

        let mut orphaned = Vec::new();
        let mut level_inconsistencies = Vec::new();
        for id in &ids {
            let Some(node) = self.find(*id) else {
                continue;
            };
            let expected_level = match node.parent_id() {
                None => ROOT_LEVEL,
                Some(parent_id) => match self.find(parent_id) {
                    Some(parent) => parent.level().saturating_add(1),
                    None => {
                        orphaned.push(*id);
                        continue;
                    }
                },
            };
            if node.level() != expected_level {
                level_inconsistencies.push(LevelInconsistency {
                    institution_id: *id,
                    level: node.level(),
                    expected_level,
                });
            }
        }

        HierarchyIntegrityReport {
            version: self.version,
            orphaned,
            level_inconsistencies,
            cycles: self.parent_cycles(&ids),
            statistics: self.statistics(),
        }
    }

    /// Returns aggregate counters over the snapshot.
    #[must_use]
    pub fn statistics(&self) -> HierarchyStatistics {
        let mut statistics = HierarchyStatistics::default();
        for node in self.nodes.values() {
            statistics.total += 1;
            if node.is_active() {
                statistics.active += 1;
            } else {
                statistics.inactive += 1;
            }
            statistics.max_depth = statistics.max_depth.max(node.level());
            *statistics.per_level.entry(node.level()).or_default() += 1;
        }
        statistics
    }

    fn parent_cycles(&self, ids: &[InstitutionId]) -> Vec<Vec<InstitutionId>> {
        let mut cycles = BTreeSet::new();
        let mut finished: HashSet<InstitutionId> = HashSet::new();

        for start in ids {
            let mut chain: Vec<InstitutionId> = Vec::new();
            let mut positions: HashMap<InstitutionId, usize> = HashMap::new();
            let mut current = Some(*start);

            while let Some(id) = current {
                if finished.contains(&id) {
                    break;
                }
                if let Some(position) = positions.get(&id) {
                    cycles.insert(normalize_cycle(&chain[*position..]));
                    break;
                }
                positions.insert(id, chain.len());
                chain.push(id);
                current = self
                    .find(id)
                    .and_then(InstitutionNode::parent_id)
                    .filter(|parent_id| self.nodes.contains_key(parent_id));
            }

            finished.extend(chain);
        }

        cycles.into_iter().collect()
    }
}

fn normalize_cycle(members: &[InstitutionId]) -> Vec<InstitutionId> {
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(index, _)| index)
        .unwrap_or_default();
    let mut rotated = members[start..].to_vec();
    rotated.extend_from_slice(&members[..start]);
    rotated
}
