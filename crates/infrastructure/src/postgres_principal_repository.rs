use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use atis_application::PrincipalRepository;
use atis_core::{AppError, AppResult};
use atis_domain::{DepartmentId, InstitutionId, Permission, Principal, PrincipalId, Role};

/// PostgreSQL-backed principal repository.
#[derive(Clone)]
pub struct PostgresPrincipalRepository {
    pool: PgPool,
}

impl PostgresPrincipalRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: i64,
    role: String,
    home_institution_id: Option<i64>,
    home_department_id: Option<i64>,
    is_active: bool,
}

#[async_trait]
impl PrincipalRepository for PostgresPrincipalRepository {
    async fn find_principal(&self, id: PrincipalId) -> AppResult<Option<Principal>> {
        let Some(row) = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT id, role, home_institution_id, home_department_id, is_active
            FROM principals
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find principal: {error}")))?
        else {
            return Ok(None);
        };

        let permissions = sqlx::query_scalar::<_, String>(
            r#"
            SELECT permission
            FROM principal_permissions
            WHERE principal_id = $1
            ORDER BY permission
            "#,
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list principal permissions: {error}"))
        })?
        .into_iter()
        .map(Permission::try_from)
        .collect::<AppResult<BTreeSet<_>>>()?;

        let mut principal = Principal::new(PrincipalId::new(row.id), Role::from_str(&row.role)?)
            .with_permissions(permissions)
            .with_active(row.is_active);
        if let Some(home_institution_id) = row.home_institution_id {
            principal = principal.with_home_institution(InstitutionId::new(home_institution_id));
        }
        if let Some(home_department_id) = row.home_department_id {
            principal = principal.with_home_department(DepartmentId::new(home_department_id));
        }

        Ok(Some(principal))
    }

    async fn replace_granted_permissions(
        &self,
        id: PrincipalId,
        expected: &BTreeSet<Permission>,
        permissions: &BTreeSet<Permission>,
    ) -> AppResult<()> {
        let mut transaction =
            self.pool.begin().await.map_err(|error| {
                AppError::Internal(format!("failed to begin transaction: {error}"))
            })?;

        let exists = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id
            FROM principals
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to lock principal: {error}")))?;

        if exists.is_none() {
            return Err(AppError::NotFound(format!("principal '{id}' was not found")));
        }

        let stored = sqlx::query_scalar::<_, String>(
            r#"
            SELECT permission
            FROM principal_permissions
            WHERE principal_id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list principal permissions: {error}"))
        })?
        .into_iter()
        .map(Permission::try_from)
        .collect::<AppResult<BTreeSet<_>>>()?;

        if &stored != expected {
            return Err(AppError::Conflict(format!(
                "permissions of principal '{id}' changed since they were read"
            )));
        }

        sqlx::query(
            r#"
            DELETE FROM principal_permissions
            WHERE principal_id = $1
            "#,
        )
        .bind(id.as_i64())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to clear principal permissions: {error}"))
        })?;

        for permission in permissions {
            sqlx::query(
                r#"
                INSERT INTO principal_permissions (principal_id, permission)
                VALUES ($1, $2)
                "#,
            )
            .bind(id.as_i64())
            .bind(permission.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to persist principal permissions: {error}"))
            })?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }
}
