use std::collections::{BTreeSet, HashSet, VecDeque};

use atis_core::{AppError, AppResult};
use serde::Serialize;

use crate::{InstitutionId, MAX_INSTITUTION_LEVEL, ROOT_LEVEL};

use super::InstitutionTree;

/// Level rewrite for one node of a moved subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelChange {
    /// Node whose level is recomputed.
    pub institution_id: InstitutionId,
    /// Level before the move.
    pub previous_level: u16,
    /// Level after the move.
    pub level: u16,
}

impl LevelChange {
    /// Returns whether the level actually differs.
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.previous_level != self.level
    }
}

/// Validated, not yet applied, re-parenting of one subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReparentPlan {
    /// Root of the moved subtree.
    pub institution_id: InstitutionId,
    /// Parent before the move.
    pub previous_parent_id: Option<InstitutionId>,
    /// Parent after the move, `None` to make the node a root.
    pub new_parent_id: Option<InstitutionId>,
    /// Snapshot version the plan was computed against.
    pub base_version: u64,
    /// Every node of the subtree in breadth-first order, moved node first.
    pub level_changes: Vec<LevelChange>,
}

impl ReparentPlan {
    /// Iterates over the rewrites whose level differs.
    pub fn changed_levels(&self) -> impl Iterator<Item = &LevelChange> {
        self.level_changes
            .iter()
            .filter(|change| change.is_change())
    }

    /// Returns ids of every node in the moved subtree.
    #[must_use]
    pub fn affected_ids(&self) -> BTreeSet<InstitutionId> {
        self.level_changes
            .iter()
            .map(|change| change.institution_id)
            .collect()
    }
}

impl InstitutionTree {
    /// Validates moving `id` under `new_parent_id` and computes the level
    /// rewrite for the whole subtree.
    ///
    /// Nothing is mutated. Errors: `NotFound` for an unknown node,
    /// `CycleDetected` when the new parent is the node or one of its
    /// descendants, `InvalidParent` for a missing or inactive parent and
    /// `DepthLimitExceeded` when any descendant would sit too deep.
    pub fn plan_reparent(
        &self,
        id: InstitutionId,
        new_parent_id: Option<InstitutionId>,
    ) -> AppResult<ReparentPlan> {
        let node = self.get(id)?;

        let new_level = match new_parent_id {
            None => ROOT_LEVEL,
            Some(parent_id) => {
                if parent_id == id {
                    return Err(AppError::CycleDetected(format!(
                        "institution '{id}' cannot become its own parent"
                    )));
                }
                if self.is_ancestor(id, parent_id) {
                    return Err(AppError::CycleDetected(format!(
                        "institution '{parent_id}' is a descendant of '{id}'"
                    )));
                }

                self.active_parent(parent_id)?.level().saturating_add(1)
            }
        };

        let level_changes = self.recalculate_levels(id, new_level)?;
        if let Some(too_deep) = level_changes
            .iter()
            .find(|change| change.level > MAX_INSTITUTION_LEVEL)
        {
            return Err(AppError::DepthLimitExceeded(format!(
                "moving institution '{id}' would put '{}' at level {}, deepest allowed is {MAX_INSTITUTION_LEVEL}",
                too_deep.institution_id, too_deep.level
            )));
        }

        Ok(ReparentPlan {
            institution_id: id,
            previous_parent_id: node.parent_id(),
            new_parent_id,
            base_version: self.version,
            level_changes,
        })
    }

    /// Recomputes levels for `id` placed at `level` and every descendant.
    ///
    /// Traversal is breadth-first over the child index so depth of the tree
    /// never translates into call-stack depth.
    pub fn recalculate_levels(
        &self,
        id: InstitutionId,
        level: u16,
    ) -> AppResult<Vec<LevelChange>> {
        let root = self.get(id)?;

        let mut changes = Vec::new();
        let mut visited = HashSet::from([id]);
        let mut queue = VecDeque::from([(root.id(), root.level(), level)]);

        while let Some((current, previous_level, next_level)) = queue.pop_front() {
            changes.push(LevelChange {
                institution_id: current,
                previous_level,
                level: next_level,
            });

            for child_id in self.child_ids(current) {
                if !visited.insert(child_id) {
                    continue;
                }
                if let Some(child) = self.find(child_id) {
                    queue.push_back((child_id, child.level(), next_level.saturating_add(1)));
                }
            }
        }

        Ok(changes)
    }

    /// Applies a plan computed against this snapshot's version.
    ///
    /// All checks run before the first write, so a rejected plan leaves the
    /// tree untouched. A plan built against another version fails with
    /// `Conflict`.
    pub fn apply_reparent(&mut self, plan: &ReparentPlan) -> AppResult<()> {
        if plan.base_version != self.version {
            return Err(AppError::Conflict(format!(
                "hierarchy changed since the move of institution '{}' was planned (planned at version {}, now {})",
                plan.institution_id, plan.base_version, self.version
            )));
        }

        let node = self.get(plan.institution_id)?;
        if node.parent_id() != plan.previous_parent_id {
            return Err(AppError::Conflict(format!(
                "institution '{}' parent changed since the move was planned",
                plan.institution_id
            )));
        }
        if let Some(parent_id) = plan.new_parent_id {
            self.active_parent(parent_id)?;
        }
        if let Some(missing) = plan
            .level_changes
            .iter()
            .find(|change| !self.nodes.contains_key(&change.institution_id))
        {
            return Err(AppError::Conflict(format!(
                "institution '{}' disappeared since the move was planned",
                missing.institution_id
            )));
        }

        self.unindex_child(plan.previous_parent_id, plan.institution_id);
        self.index_child(plan.new_parent_id, plan.institution_id);
        for change in &plan.level_changes {
            if let Some(node) = self.nodes.get_mut(&change.institution_id) {
                if change.institution_id == plan.institution_id {
                    node.set_parent_id(plan.new_parent_id);
                }
                node.set_level(change.level);
            }
        }
        self.version = self.version.saturating_add(1);

        Ok(())
    }
}
