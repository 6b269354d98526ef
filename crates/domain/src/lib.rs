//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod department;
mod hierarchy;
mod institution;
mod principal;
mod role;
mod role_policy;
mod security;

pub use department::{Department, DepartmentId};
pub use hierarchy::{
    HierarchyIntegrityReport, HierarchyStatistics, InstitutionTree, LevelChange,
    LevelInconsistency, ReparentPlan,
};
pub use institution::{
    InstitutionId, InstitutionNode, InstitutionNodeInput, InstitutionType, MAX_INSTITUTION_LEVEL,
    REGION_LEVEL, ROOT_LEVEL, SCHOOL_LEVEL, SECTOR_LEVEL,
};
pub use principal::{Principal, PrincipalId};
pub use role::{Role, ScopeLevel};
pub use role_policy::{PolicyIssue, RolePermissionSummary, RolePolicy, RolePolicyTable};
pub use security::{AuditAction, Permission};
