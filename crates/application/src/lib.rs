//! Application services and ports.

#![forbid(unsafe_code)]

mod access_scope_service;
mod hierarchy_ports;
mod hierarchy_service;
mod permission_delegation;
mod permission_delegation_service;
mod scope_resolver;

pub use access_scope_service::AccessScopeService;
pub use hierarchy_ports::{
    AuditEvent, AuditRepository, CreateInstitutionInput, DepartmentRepository,
    InstitutionRepository, NewInstitution, PrincipalRepository,
};
pub use hierarchy_service::{HierarchyService, MAX_MUTATION_ATTEMPTS};
pub use permission_delegation::{PermissionDelegationValidator, ValidationReport};
pub use permission_delegation_service::PermissionDelegationService;
pub use scope_resolver::{ResourceKind, ResourceScope, ScopeResolver};
