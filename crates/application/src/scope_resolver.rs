use std::collections::BTreeSet;

use serde::Serialize;

use atis_domain::{
    Department, DepartmentId, InstitutionId, InstitutionNode, InstitutionTree, Principal,
    PrincipalId, Role,
};

/// Resource families with their own role-by-resource visibility rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// User accounts.
    Users,
    /// Institution rows.
    Institutions,
    /// Department rows.
    Departments,
    /// Institution-owned records such as surveys, tasks or documents.
    Records,
}

/// Filter descriptor a query layer applies to one resource family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum ResourceScope {
    /// No restriction.
    Unrestricted,
    /// Rows owned by one of these institutions.
    Institutions(BTreeSet<InstitutionId>),
    /// Rows owned by one of these departments.
    Departments(BTreeSet<DepartmentId>),
    /// Rows created by or assigned to this principal.
    OwnRecords(PrincipalId),
    /// Nothing is visible.
    Nothing,
}

impl ResourceScope {
    /// Returns whether the scope hides every row.
    #[must_use]
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }
}

/// Derives visibility for a principal from one hierarchy snapshot.
///
/// Every call recomputes from the snapshot it was built with; nothing is
/// cached between calls, so a resolver built after a move sees the move.
/// Inconsistent principal configuration resolves to an empty scope and is
/// reported as a `scope resolution failed closed` warning.
#[derive(Debug, Clone, Copy)]
pub struct ScopeResolver<'a> {
    tree: &'a InstitutionTree,
    departments: &'a [Department],
}

impl<'a> ScopeResolver<'a> {
    /// Creates a resolver over one hierarchy snapshot and its departments.
    #[must_use]
    pub fn new(tree: &'a InstitutionTree, departments: &'a [Department]) -> Self {
        Self { tree, departments }
    }

    /// Returns the active institutions `principal` may see.
    #[must_use]
    pub fn visible_institution_ids(&self, principal: &Principal) -> BTreeSet<InstitutionId> {
        if !principal.is_active() {
            fail_closed(principal, "principal is inactive");
            return BTreeSet::new();
        }

        match principal.role() {
            Role::SuperAdmin => self.tree.active_ids(),
            Role::RegionAdmin | Role::RegionOperator => self
                .active_home(principal)
                .map(|home| self.active_closure(home))
                .unwrap_or_default(),
            Role::SektorAdmin => match self.active_home(principal) {
                Some(home) if home.is_sector() => self.active_closure(home),
                Some(_) => {
                    fail_closed(principal, "home institution is not a sector office");
                    BTreeSet::new()
                }
                None => BTreeSet::new(),
            },
            Role::SchoolAdmin | Role::Teacher => self
                .active_home(principal)
                .map(|home| BTreeSet::from([home.id()]))
                .unwrap_or_default(),
        }
    }

    /// Returns the active departments `principal` may see.
    ///
    /// Operators see only their own department; admin roles see every active
    /// department of a visible institution.
    #[must_use]
    pub fn visible_department_ids(&self, principal: &Principal) -> BTreeSet<DepartmentId> {
        let institutions = self.visible_institution_ids(principal);
        if institutions.is_empty() {
            return BTreeSet::new();
        }

        let in_scope = |department: &&Department| {
            department.is_active() && institutions.contains(&department.institution_id())
        };

        if principal.role() != Role::RegionOperator {
            return self
                .departments
                .iter()
                .filter(in_scope)
                .map(Department::id)
                .collect();
        }

        let Some(home_department_id) = principal.home_department_id() else {
            fail_closed(principal, "operator has no home department");
            return BTreeSet::new();
        };

        let home_department = self
            .departments
            .iter()
            .filter(in_scope)
            .find(|department| department.id() == home_department_id);
        match home_department {
            Some(department) => BTreeSet::from([department.id()]),
            None => {
                fail_closed(principal, "home department is inactive or outside the region");
                BTreeSet::new()
            }
        }
    }

    /// Returns whether `principal` may see institution `id`.
    #[must_use]
    pub fn can_access_institution(&self, principal: &Principal, id: InstitutionId) -> bool {
        self.visible_institution_ids(principal).contains(&id)
    }

    /// Returns whether `principal` may see department `id`.
    #[must_use]
    pub fn can_access_department(&self, principal: &Principal, id: DepartmentId) -> bool {
        self.visible_department_ids(principal).contains(&id)
    }

    /// Returns the row filter for one resource family.
    #[must_use]
    pub fn resource_scope(&self, principal: &Principal, kind: ResourceKind) -> ResourceScope {
        if !principal.is_active() {
            fail_closed(principal, "principal is inactive");
            return ResourceScope::Nothing;
        }

        let role = principal.role();
        if role == Role::SuperAdmin {
            return ResourceScope::Unrestricted;
        }

        match (kind, role) {
            (ResourceKind::Departments, _)
            | (ResourceKind::Users | ResourceKind::Records, Role::RegionOperator) => {
                non_empty(self.visible_department_ids(principal), ResourceScope::Departments)
            }
            (ResourceKind::Users | ResourceKind::Records, Role::Teacher) => {
                if self.visible_institution_ids(principal).is_empty() {
                    ResourceScope::Nothing
                } else {
                    ResourceScope::OwnRecords(principal.id())
                }
            }
            _ => non_empty(
                self.visible_institution_ids(principal),
                ResourceScope::Institutions,
            ),
        }
    }

    fn active_home(&self, principal: &Principal) -> Option<&'a InstitutionNode> {
        let Some(home_id) = principal.home_institution_id() else {
            fail_closed(principal, "principal has no home institution");
            return None;
        };

        match self.tree.find(home_id) {
            Some(home) if home.is_active() => Some(home),
            Some(_) => {
                fail_closed(principal, "home institution is inactive");
                None
            }
            None => {
                fail_closed(principal, "home institution does not exist");
                None
            }
        }
    }

    fn active_closure(&self, home: &InstitutionNode) -> BTreeSet<InstitutionId> {
        let mut visible = BTreeSet::from([home.id()]);
        visible.extend(self.tree.descendant_ids(home.id()).unwrap_or_default());
        visible.retain(|id| self.tree.find(*id).is_some_and(InstitutionNode::is_active));
        visible
    }
}

fn non_empty<T: Ord>(
    ids: BTreeSet<T>,
    wrap: impl FnOnce(BTreeSet<T>) -> ResourceScope,
) -> ResourceScope {
    if ids.is_empty() {
        ResourceScope::Nothing
    } else {
        wrap(ids)
    }
}

fn fail_closed(principal: &Principal, reason: &str) {
    tracing::warn!(
        principal_id = %principal.id(),
        role = principal.role().as_str(),
        reason,
        "scope resolution failed closed"
    );
}
