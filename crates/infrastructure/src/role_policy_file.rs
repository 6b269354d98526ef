use std::path::Path;

use atis_core::{AppError, AppResult};
use atis_domain::RolePolicyTable;

/// Loads a role policy table from a JSON document on disk.
///
/// The table is read once and treated as immutable afterwards. Lint issues
/// are not rejected here; callers report them through `RolePolicyTable::lint`.
pub async fn load_role_policy_file(path: &Path) -> AppResult<RolePolicyTable> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|error| {
        AppError::Internal(format!(
            "failed to read role policy file '{}': {error}",
            path.display()
        ))
    })?;

    let table = RolePolicyTable::from_json(raw.as_str())?;

    tracing::info!(
        path = %path.display(),
        version = table.version(),
        "role policy loaded"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use atis_core::AppError;
    use atis_domain::{Permission, Role};
    use tempfile::NamedTempFile;

    use super::load_role_policy_file;

    fn policy_file(contents: &str) -> NamedTempFile {
        let mut file =
            NamedTempFile::new().unwrap_or_else(|error| panic!("temp file failed: {error}"));
        file.write_all(contents.as_bytes())
            .unwrap_or_else(|error| panic!("writing policy file failed: {error}"));
        file
    }

    #[tokio::test]
    async fn loads_policy_with_role_aliases() {
        let file = policy_file(
            r#"{
                "version": "2026-10",
                "roles": {
                    "məktəbadmin": {
                        "requires": ["institutions.read"],
                        "forbids": ["users.delete"],
                        "dependencies": { "users.update": ["users.read"] }
                    }
                }
            }"#,
        );

        let table = load_role_policy_file(file.path())
            .await
            .unwrap_or_else(|error| panic!("policy should load: {error}"));

        assert_eq!(table.version(), "2026-10");
        let policy = table.policy_for(Role::SchoolAdmin);
        let read = Permission::new("institutions.read").unwrap_or_else(|_| unreachable!());
        assert!(policy.requires().contains(&read));
        assert!(table.policy_for(Role::Teacher).requires().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_internal_error() {
        let directory =
            tempfile::tempdir().unwrap_or_else(|error| panic!("temp dir failed: {error}"));

        let result = load_role_policy_file(&directory.path().join("absent.json")).await;

        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn malformed_document_is_validation_error() {
        let file = policy_file(r#"{"version": "", "roles": {}}"#);

        let result = load_role_policy_file(file.path()).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
