//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_hierarchy_repository;
mod postgres_audit_repository;
mod postgres_hierarchy_repository;
mod postgres_principal_repository;
mod role_policy_file;

pub use in_memory_hierarchy_repository::{
    InMemoryAuditRepository, InMemoryInstitutionRepository, InMemoryPrincipalRepository,
};
pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_hierarchy_repository::PostgresInstitutionRepository;
pub use postgres_principal_repository::PostgresPrincipalRepository;
pub use role_policy_file::load_role_policy_file;
