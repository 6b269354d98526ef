use std::collections::BTreeSet;

use async_trait::async_trait;

use atis_core::AppResult;
use atis_domain::{
    AuditAction, Department, InstitutionId, InstitutionNode, InstitutionTree, InstitutionType,
    Permission, Principal, PrincipalId, ReparentPlan,
};

/// Input payload for creating an institution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstitutionInput {
    /// Parent institution, `None` for a new root.
    pub parent_id: Option<InstitutionId>,
    /// Display name.
    pub name: String,
    /// Institution kind.
    pub institution_type: InstitutionType,
}

/// Validated insert handed to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstitution {
    /// Parent institution, `None` for a new root.
    pub parent_id: Option<InstitutionId>,
    /// Display name.
    pub name: String,
    /// Institution kind.
    pub institution_type: InstitutionType,
    /// Level computed from the parent.
    pub level: u16,
    /// Snapshot version the level was computed against.
    pub base_version: u64,
}

/// Repository port for the institution hierarchy.
///
/// Every mutation carries the snapshot version it was validated against and
/// must fail with `AppError::Conflict` when the stored version moved on.
/// Implementations apply each mutation atomically.
#[async_trait]
pub trait InstitutionRepository: Send + Sync {
    /// Loads an internally consistent snapshot of every institution.
    async fn load_tree(&self) -> AppResult<InstitutionTree>;

    /// Finds one institution by id.
    async fn find_institution(&self, id: InstitutionId) -> AppResult<Option<InstitutionNode>>;

    /// Inserts a new institution and returns it with its assigned id.
    async fn insert_institution(&self, input: NewInstitution) -> AppResult<InstitutionNode>;

    /// Moves a subtree and rewrites its levels in one transaction.
    async fn apply_reparent(&self, plan: &ReparentPlan) -> AppResult<()>;

    /// Sets the active flag of one institution.
    ///
    /// Deactivation must fail with `AppError::HasActivePrincipals` when any
    /// active principal is homed at `id`, checked atomically with the write.
    async fn set_institution_active(
        &self,
        id: InstitutionId,
        is_active: bool,
        base_version: u64,
    ) -> AppResult<()>;
}

/// Repository port for departments.
#[async_trait]
pub trait DepartmentRepository: Send + Sync {
    /// Lists every department, active or not.
    async fn list_departments(&self) -> AppResult<Vec<Department>>;
}

/// Repository port for principals resolved by the session layer.
#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    /// Finds one principal by id.
    async fn find_principal(&self, id: PrincipalId) -> AppResult<Option<Principal>>;

    /// Replaces a principal's granted permission set.
    ///
    /// Fails with `AppError::Conflict` when the stored set no longer equals
    /// `expected`, the set the replacement was validated against.
    async fn replace_granted_permissions(
        &self,
        id: PrincipalId,
        expected: &BTreeSet<Permission>,
        permissions: &BTreeSet<Permission>,
    ) -> AppResult<()>;
}

/// Port for persisting append-only audit events.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Persists one audit event.
    async fn append_event(&self, event: AuditEvent) -> AppResult<()>;
}

/// Canonical audit event payload emitted by application use-cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Principal that performed the action.
    pub actor_id: PrincipalId,
    /// Stable action identifier.
    pub action: AuditAction,
    /// Resource kind targeted by the action.
    pub resource_type: String,
    /// Stable resource identifier.
    pub resource_id: String,
    /// Optional human-readable detail payload.
    pub detail: Option<String>,
}
