//! Decision queries over the grant store.
//!
//! Precedence: a per-principal override always beats the role grant; an
//! explicit deny beats everything. A principal whose role cannot be
//! resolved (deleted role, dangling reference) is denied.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tracing::{error, warn, Instrument};
use uuid::Uuid;

use super::models::{
    valid_permission_code, valid_role_name, AccessLevel, EffectivePermission, ResolverError,
};

/// Outcome of an override mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideOutcome {
    Applied,
    UnknownPrincipal,
    UnknownPermission,
}

/// Pure read path over the grant store, constructed once at startup and
/// shared by reference. Holds no state beyond the connection pool.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    pool: PgPool,
}

impl PermissionResolver {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether the principal may perform the action named by `code`.
    ///
    /// # Errors
    /// Returns `ResolverError::MalformedPermissionCode` for invalid codes.
    /// Storage failures and unknown principals return `Ok(false)`.
    pub async fn has_permission(
        &self,
        principal_id: Uuid,
        code: &str,
    ) -> Result<bool, ResolverError> {
        if !valid_permission_code(code) {
            return Err(ResolverError::MalformedPermissionCode);
        }

        match self.lookup_override(principal_id, code).await {
            Ok(Some(granted)) => return Ok(granted),
            Ok(None) => {}
            Err(err) => {
                error!("Override lookup failed, denying {code} for {principal_id}: {err:#}");
                return Ok(false);
            }
        }

        match self.role_grants(principal_id, code).await {
            Ok(granted) => Ok(granted),
            Err(err) => {
                error!("Role grant lookup failed, denying {code} for {principal_id}: {err:#}");
                Ok(false)
            }
        }
    }

    /// Whether the principal's assigned role is exactly `role_name`.
    ///
    /// # Errors
    /// Returns `ResolverError::MalformedRoleName` for invalid names.
    pub async fn has_role(
        &self,
        principal_id: Uuid,
        role_name: &str,
    ) -> Result<bool, ResolverError> {
        if !valid_role_name(role_name) {
            return Err(ResolverError::MalformedRoleName);
        }

        let query = "SELECT 1 FROM users WHERE id = $1 AND role = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        match sqlx::query(query)
            .bind(principal_id)
            .bind(role_name)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
        {
            Ok(row) => Ok(row.is_some()),
            Err(err) => {
                error!("Role lookup failed, denying {role_name} for {principal_id}: {err:#}");
                Ok(false)
            }
        }
    }

    /// Whether the principal has scope access of at least `minimum`.
    /// Levels are ordered READ < WRITE < ADMIN.
    ///
    /// # Errors
    /// Never errors today; kept fallible for parity with the other
    /// decision methods so the gate handles all of them uniformly.
    pub async fn has_scoped_access(
        &self,
        principal_id: Uuid,
        scope_id: Uuid,
        minimum: AccessLevel,
    ) -> Result<bool, ResolverError> {
        let query = r"
            SELECT access_level
            FROM user_scope_access
            WHERE user_id = $1 AND scope_id = $2 AND granted = TRUE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = match sqlx::query(query)
            .bind(principal_id)
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
        {
            Ok(row) => row,
            Err(err) => {
                error!("Scope lookup failed, denying scope {scope_id} for {principal_id}: {err:#}");
                return Ok(false);
            }
        };

        let Some(row) = row else {
            return Ok(false);
        };

        let level: String = row.get("access_level");
        match level.parse::<AccessLevel>() {
            Ok(level) => Ok(level >= minimum),
            Err(()) => {
                warn!("Unknown access level {level:?} for {principal_id}, denying");
                Ok(false)
            }
        }
    }

    /// The principal's effective permission set: role-derived grants plus
    /// override-granted permissions, minus override-denied ones. Entries
    /// are sorted by code; `direct` marks override-sourced entries.
    /// Storage failures degrade to an empty set.
    pub async fn effective_permissions(&self, principal_id: Uuid) -> Vec<EffectivePermission> {
        match self.collect_effective(principal_id).await {
            Ok(permissions) => permissions,
            Err(err) => {
                error!("Effective permission lookup failed for {principal_id}: {err:#}");
                Vec::new()
            }
        }
    }

    /// Upsert a per-principal override and append an audit record in the
    /// same transaction.
    ///
    /// # Errors
    /// Returns an error on storage failure; unknown principal/permission
    /// are reported via the outcome, not an error.
    pub async fn grant_override(
        &self,
        actor_id: Uuid,
        principal_id: Uuid,
        code: &str,
        granted: bool,
    ) -> Result<OverrideOutcome> {
        if !valid_permission_code(code) {
            return Ok(OverrideOutcome::UnknownPermission);
        }

        let mut tx = self.pool.begin().await.context("begin override transaction")?;

        let Some(permission_id) = permission_id(&mut tx, code).await? else {
            return Ok(OverrideOutcome::UnknownPermission);
        };
        if !principal_exists(&mut tx, principal_id).await? {
            return Ok(OverrideOutcome::UnknownPrincipal);
        }

        let query = r"
            INSERT INTO user_permissions (user_id, permission_id, granted)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, permission_id) DO UPDATE SET granted = EXCLUDED.granted
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(principal_id)
            .bind(permission_id)
            .bind(granted)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to upsert permission override")?;

        let action = if granted { "GRANT" } else { "DENY" };
        append_audit(&mut tx, actor_id, action, principal_id, code).await?;

        tx.commit().await.context("commit override transaction")?;
        Ok(OverrideOutcome::Applied)
    }

    /// Remove a per-principal override so the principal reverts to
    /// role-derived access. Idempotent; removing a missing override still
    /// reports `Applied` without an audit row.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    pub async fn revoke_override(
        &self,
        actor_id: Uuid,
        principal_id: Uuid,
        code: &str,
    ) -> Result<OverrideOutcome> {
        if !valid_permission_code(code) {
            return Ok(OverrideOutcome::UnknownPermission);
        }

        let mut tx = self.pool.begin().await.context("begin revoke transaction")?;

        let query = r"
            DELETE FROM user_permissions up
            USING permissions p
            WHERE p.id = up.permission_id
              AND up.user_id = $1
              AND p.code = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(principal_id)
            .bind(code)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete permission override")?;

        if result.rows_affected() > 0 {
            append_audit(&mut tx, actor_id, "REVOKE", principal_id, code).await?;
        }

        tx.commit().await.context("commit revoke transaction")?;
        Ok(OverrideOutcome::Applied)
    }

    async fn lookup_override(&self, principal_id: Uuid, code: &str) -> Result<Option<bool>> {
        let query = r"
            SELECT up.granted
            FROM user_permissions up
            JOIN permissions p ON p.id = up.permission_id
            WHERE up.user_id = $1 AND p.code = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup permission override")?;

        Ok(row.map(|row| row.get("granted")))
    }

    async fn role_grants(&self, principal_id: Uuid, code: &str) -> Result<bool> {
        // Joining through roles.name means a deleted role simply yields no
        // row, which denies.
        let query = r"
            SELECT 1
            FROM users u
            JOIN roles r ON r.name = u.role
            JOIN role_permissions rp ON rp.role_id = r.id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE u.id = $1 AND p.code = $2
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup role grant")?;

        Ok(row.is_some())
    }

    async fn collect_effective(&self, principal_id: Uuid) -> Result<Vec<EffectivePermission>> {
        let query = r"
            SELECT p.code, p.name, p.category
            FROM users u
            JOIN roles r ON r.name = u.role
            JOIN role_permissions rp ON rp.role_id = r.id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE u.id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let role_rows = sqlx::query(query)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list role permissions")?;

        let query = r"
            SELECT p.code, p.name, p.category, up.granted
            FROM user_permissions up
            JOIN permissions p ON p.id = up.permission_id
            WHERE up.user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let override_rows = sqlx::query(query)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list permission overrides")?;

        // BTreeMap keeps the set sorted by code for stable audit output.
        let mut merged: BTreeMap<String, EffectivePermission> = BTreeMap::new();
        for row in role_rows {
            let code: String = row.get("code");
            merged.insert(
                code.clone(),
                EffectivePermission {
                    code,
                    name: row.get("name"),
                    category: row.get("category"),
                    direct: false,
                },
            );
        }
        for row in override_rows {
            let code: String = row.get("code");
            if row.get::<bool, _>("granted") {
                merged.insert(
                    code.clone(),
                    EffectivePermission {
                        code,
                        name: row.get("name"),
                        category: row.get("category"),
                        direct: true,
                    },
                );
            } else {
                merged.remove(&code);
            }
        }

        Ok(merged.into_values().collect())
    }
}

async fn permission_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    code: &str,
) -> Result<Option<i32>> {
    let row = sqlx::query("SELECT id FROM permissions WHERE code = $1")
        .bind(code)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to lookup permission id")?;
    Ok(row.map(|row| row.get("id")))
}

async fn principal_exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    principal_id: Uuid,
) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(principal_id)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to lookup principal")?;
    Ok(row.is_some())
}

async fn append_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    actor_id: Uuid,
    action: &str,
    principal_id: Uuid,
    code: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO permission_audit_log (actor_id, action, target_type, target_id, detail)
        VALUES ($1, $2, 'USER_PERMISSION', $3, $4::jsonb)
    ";
    let detail = serde_json::to_string(&json!({ "permission_code": code }))
        .context("failed to serialize audit detail")?;
    sqlx::query(query)
        .bind(actor_id)
        .bind(action)
        .bind(principal_id)
        .bind(detail)
        .execute(&mut **tx)
        .await
        .context("failed to append permission audit record")?;
    Ok(())
}
