use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use atis_application::{
    AuditEvent, AuditRepository, DepartmentRepository, InstitutionRepository, NewInstitution,
    PrincipalRepository,
};
use atis_core::{AppError, AppResult};
use atis_domain::{
    Department, InstitutionId, InstitutionNode, InstitutionNodeInput, InstitutionTree, Permission,
    Principal, PrincipalId, ReparentPlan,
};

/// In-memory institution and department repository.
///
/// The whole tree sits behind one lock, so every snapshot handed out is
/// internally consistent and every mutation is atomic. Deactivation reads the
/// shared principal store while holding the tree lock.
#[derive(Debug)]
pub struct InMemoryInstitutionRepository {
    tree: RwLock<InstitutionTree>,
    departments: RwLock<Vec<Department>>,
    principals: Arc<InMemoryPrincipalRepository>,
}

impl InMemoryInstitutionRepository {
    /// Creates an empty repository backed by `principals`.
    #[must_use]
    pub fn new(principals: Arc<InMemoryPrincipalRepository>) -> Self {
        Self::with_snapshot(InstitutionTree::default(), Vec::new(), principals)
    }

    /// Creates a repository seeded with an existing snapshot.
    #[must_use]
    pub fn with_snapshot(
        tree: InstitutionTree,
        departments: Vec<Department>,
        principals: Arc<InMemoryPrincipalRepository>,
    ) -> Self {
        Self {
            tree: RwLock::new(tree),
            departments: RwLock::new(departments),
            principals,
        }
    }

    /// Adds or replaces one department.
    pub async fn save_department(&self, department: Department) {
        let mut departments = self.departments.write().await;
        departments.retain(|stored| stored.id() != department.id());
        departments.push(department);
    }

    fn ensure_version(tree: &InstitutionTree, base_version: u64) -> AppResult<()> {
        if tree.version() != base_version {
            return Err(AppError::Conflict(format!(
                "hierarchy version is {}, mutation was validated against {base_version}",
                tree.version()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InstitutionRepository for InMemoryInstitutionRepository {
    async fn load_tree(&self) -> AppResult<InstitutionTree> {
        Ok(self.tree.read().await.clone())
    }

    async fn find_institution(&self, id: InstitutionId) -> AppResult<Option<InstitutionNode>> {
        Ok(self.tree.read().await.find(id).cloned())
    }

    async fn insert_institution(&self, input: NewInstitution) -> AppResult<InstitutionNode> {
        let mut tree = self.tree.write().await;
        Self::ensure_version(&tree, input.base_version)?;

        let next_id = tree
            .nodes()
            .map(|node| node.id().as_i64())
            .max()
            .unwrap_or_default()
            .saturating_add(1);
        let node = InstitutionNode::new(InstitutionNodeInput {
            id: InstitutionId::new(next_id),
            parent_id: input.parent_id,
            name: input.name,
            institution_type: input.institution_type,
            level: input.level,
            is_active: true,
        })?;

        tree.insert(node.clone())?;
        Ok(node)
    }

    async fn apply_reparent(&self, plan: &ReparentPlan) -> AppResult<()> {
        self.tree.write().await.apply_reparent(plan)
    }

    async fn set_institution_active(
        &self,
        id: InstitutionId,
        is_active: bool,
        base_version: u64,
    ) -> AppResult<()> {
        let mut tree = self.tree.write().await;
        Self::ensure_version(&tree, base_version)?;
        if !is_active {
            let principals = self.principals.principals.read().await;
            let active_principals = principals
                .values()
                .filter(|principal| {
                    principal.is_active() && principal.home_institution_id() == Some(id)
                })
                .count();
            if active_principals > 0 {
                return Err(AppError::HasActivePrincipals(format!(
                    "institution '{id}' is home to {active_principals} active principal(s)"
                )));
            }
        }
        tree.set_active(id, is_active)
    }
}

#[async_trait]
impl DepartmentRepository for InMemoryInstitutionRepository {
    async fn list_departments(&self) -> AppResult<Vec<Department>> {
        let mut departments = self.departments.read().await.clone();
        departments.sort_by_key(Department::id);
        Ok(departments)
    }
}

/// In-memory principal repository.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalRepository {
    principals: RwLock<HashMap<PrincipalId, Principal>>,
}

impl InMemoryPrincipalRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one principal.
    pub async fn save_principal(&self, principal: Principal) {
        self.principals
            .write()
            .await
            .insert(principal.id(), principal);
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryPrincipalRepository {
    async fn find_principal(&self, id: PrincipalId) -> AppResult<Option<Principal>> {
        Ok(self.principals.read().await.get(&id).cloned())
    }

    async fn replace_granted_permissions(
        &self,
        id: PrincipalId,
        expected: &BTreeSet<Permission>,
        permissions: &BTreeSet<Permission>,
    ) -> AppResult<()> {
        let mut principals = self.principals.write().await;
        let principal = principals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("principal '{id}' was not found")))?;
        if principal.granted_permissions() != expected {
            return Err(AppError::Conflict(format!(
                "permissions of principal '{id}' changed since they were read"
            )));
        }
        *principal = principal.clone().with_permissions(permissions.iter().cloned());
        Ok(())
    }
}

/// In-memory append-only audit repository.
#[derive(Debug, Default)]
pub struct InMemoryAuditRepository {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns recorded events in append order.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
