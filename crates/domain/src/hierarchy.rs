//! Institution tree snapshot and its structural queries.
//!
//! An [`InstitutionTree`] is an immutable-by-default, internally consistent
//! view of every institution node plus a `version` counter. Readers work on
//! a snapshot; writers compute a plan against a snapshot and the store
//! applies it only while the version is unchanged.

mod integrity;
mod levels;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use atis_core::{AppError, AppResult};

use crate::{InstitutionId, InstitutionNode, MAX_INSTITUTION_LEVEL, ROOT_LEVEL};

pub use integrity::{HierarchyIntegrityReport, HierarchyStatistics, LevelInconsistency};
pub use levels::{LevelChange, ReparentPlan};

/// Versioned snapshot of the institution hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstitutionTree {
    version: u64,
    nodes: HashMap<InstitutionId, InstitutionNode>,
    children: HashMap<InstitutionId, Vec<InstitutionId>>,
}

impl InstitutionTree {
    /// Builds a snapshot from persisted nodes.
    ///
    /// Structural problems in the rows (orphans, level drift, cycles) are
    /// accepted and surfaced by [`InstitutionTree::integrity_report`].
    pub fn new(
        version: u64,
        nodes: impl IntoIterator<Item = InstitutionNode>,
    ) -> AppResult<Self> {
        let mut tree = Self {
            version,
            nodes: HashMap::new(),
            children: HashMap::new(),
        };

        for node in nodes {
            let id = node.id();
            if tree.nodes.contains_key(&id) {
                return Err(AppError::Validation(format!(
                    "institution '{id}' appears more than once in the snapshot"
                )));
            }
            tree.index_child(node.parent_id(), id);
            tree.nodes.insert(id, node);
        }

        Ok(tree)
    }

    /// Returns the snapshot version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the number of nodes, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the snapshot has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all nodes in unspecified order.
    pub fn nodes(&self) -> impl Iterator<Item = &InstitutionNode> {
        self.nodes.values()
    }

    /// Finds a node by id.
    #[must_use]
    pub fn find(&self, id: InstitutionId) -> Option<&InstitutionNode> {
        self.nodes.get(&id)
    }

    /// Returns a node by id or `NotFound`.
    pub fn get(&self, id: InstitutionId) -> AppResult<&InstitutionNode> {
        self.find(id)
            .ok_or_else(|| AppError::NotFound(format!("institution '{id}' was not found")))
    }

    /// Returns direct children sorted by name.
    pub fn children(&self, id: InstitutionId) -> AppResult<Vec<&InstitutionNode>> {
        self.get(id)?;
        Ok(self.sorted_nodes(self.child_ids(id)))
    }

    /// Returns root nodes sorted by name.
    #[must_use]
    pub fn roots(&self) -> Vec<&InstitutionNode> {
        self.sorted_nodes(
            self.nodes
                .values()
                .filter(|node| node.is_root())
                .map(InstitutionNode::id),
        )
    }

    /// Returns the transitive closure of children below `id`.
    ///
    /// The result excludes `id` itself and includes inactive descendants;
    /// callers filter by activity where needed.
    pub fn descendant_ids(&self, id: InstitutionId) -> AppResult<BTreeSet<InstitutionId>> {
        self.get(id)?;

        let mut descendants = BTreeSet::new();
        let mut queue: VecDeque<InstitutionId> = self.child_ids(id).collect();
        while let Some(current) = queue.pop_front() {
            if current == id || !descendants.insert(current) {
                continue;
            }
            queue.extend(self.child_ids(current));
        }

        Ok(descendants)
    }

    /// Returns the chain of nodes from the root down to `id`, inclusive.
    ///
    /// A chain that stops at a missing parent starts at the orphaned node.
    pub fn path(&self, id: InstitutionId) -> AppResult<Vec<&InstitutionNode>> {
        let mut chain = vec![self.get(id)?];
        let mut seen = HashSet::from([id]);

        while let Some(parent_id) = chain.last().and_then(|node| node.parent_id()) {
            let Some(parent) = self.find(parent_id) else {
                break;
            };
            if !seen.insert(parent_id) {
                return Err(AppError::CycleDetected(format!(
                    "institution '{id}' has a cyclic ancestor chain through '{parent_id}'"
                )));
            }
            chain.push(parent);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Returns whether `ancestor` appears on the parent chain of `id`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: InstitutionId, id: InstitutionId) -> bool {
        let mut seen = HashSet::new();
        let mut current = self.find(id).and_then(InstitutionNode::parent_id);

        while let Some(parent_id) = current {
            if parent_id == ancestor {
                return true;
            }
            if !seen.insert(parent_id) {
                return false;
            }
            current = self.find(parent_id).and_then(InstitutionNode::parent_id);
        }

        false
    }

    /// Returns ids of all active nodes.
    #[must_use]
    pub fn active_ids(&self) -> BTreeSet<InstitutionId> {
        self.nodes
            .values()
            .filter(|node| node.is_active())
            .map(InstitutionNode::id)
            .collect()
    }

    /// Returns nodes at `level` sorted by name.
    #[must_use]
    pub fn nodes_at_level(&self, level: u16) -> Vec<&InstitutionNode> {
        self.sorted_nodes(
            self.nodes
                .values()
                .filter(|node| node.level() == level)
                .map(InstitutionNode::id),
        )
    }

    /// Computes the level a new child of `parent_id` would get.
    ///
    /// Fails with `InvalidParent` when the parent is missing or inactive and
    /// with `DepthLimitExceeded` when the child would sit too deep.
    pub fn level_for_child(&self, parent_id: Option<InstitutionId>) -> AppResult<u16> {
        let Some(parent_id) = parent_id else {
            return Ok(ROOT_LEVEL);
        };

        let parent = self.active_parent(parent_id)?;
        let level = parent.level().saturating_add(1);
        if level > MAX_INSTITUTION_LEVEL {
            return Err(AppError::DepthLimitExceeded(format!(
                "a child of institution '{parent_id}' would be at level {level}, deepest allowed is {MAX_INSTITUTION_LEVEL}"
            )));
        }

        Ok(level)
    }

    /// Adds a freshly created node and bumps the version.
    ///
    /// The node's level must match what [`InstitutionTree::level_for_child`]
    /// computes against this snapshot.
    pub fn insert(&mut self, node: InstitutionNode) -> AppResult<()> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(AppError::Conflict(format!(
                "institution '{id}' already exists"
            )));
        }

        let expected_level = self.level_for_child(node.parent_id())?;
        if node.level() != expected_level {
            return Err(AppError::Conflict(format!(
                "institution '{id}' level {} does not match expected level {expected_level}",
                node.level()
            )));
        }

        self.index_child(node.parent_id(), id);
        self.nodes.insert(id, node);
        self.version = self.version.saturating_add(1);
        Ok(())
    }

    /// Sets the active flag of one node and bumps the version.
    pub fn set_active(&mut self, id: InstitutionId, is_active: bool) -> AppResult<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("institution '{id}' was not found")))?;
        node.set_active(is_active);
        self.version = self.version.saturating_add(1);
        Ok(())
    }

    pub(crate) fn active_parent(&self, parent_id: InstitutionId) -> AppResult<&InstitutionNode> {
        let parent = self.find(parent_id).ok_or_else(|| {
            AppError::InvalidParent(format!("parent institution '{parent_id}' does not exist"))
        })?;

        if !parent.is_active() {
            return Err(AppError::InvalidParent(format!(
                "parent institution '{parent_id}' is inactive"
            )));
        }

        Ok(parent)
    }

    fn child_ids(&self, id: InstitutionId) -> impl Iterator<Item = InstitutionId> + '_ {
        self.children.get(&id).into_iter().flatten().copied()
    }

    fn sorted_nodes(&self, ids: impl Iterator<Item = InstitutionId>) -> Vec<&InstitutionNode> {
        let mut listed: Vec<&InstitutionNode> =
            ids.filter_map(|id| self.nodes.get(&id)).collect();
        listed.sort_by(|left, right| {
            left.name()
                .as_str()
                .cmp(right.name().as_str())
                .then_with(|| left.id().cmp(&right.id()))
        });
        listed
    }

    fn index_child(&mut self, parent_id: Option<InstitutionId>, id: InstitutionId) {
        if let Some(parent_id) = parent_id {
            self.children.entry(parent_id).or_default().push(id);
        }
    }

    fn unindex_child(&mut self, parent_id: Option<InstitutionId>, id: InstitutionId) {
        let Some(parent_id) = parent_id else {
            return;
        };
        if let Some(siblings) = self.children.get_mut(&parent_id) {
            siblings.retain(|sibling| sibling != &id);
            if siblings.is_empty() {
                self.children.remove(&parent_id);
            }
        }
    }
}
