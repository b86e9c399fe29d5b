//! Role lifecycle and assignment management.
//!
//! Roles belong to exactly one roleable owner, addressed everywhere as the
//! explicit (roleable_type, roleable_id) pair. Every mutating operation here
//! is one transaction: either all of its writes commit or none do.

use std::collections::HashSet;

use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use crate::error::{PermissionError, Result};
use crate::metadata::PermissionMetadata;
use crate::models::Role;

const ROLE_COLUMNS: &str =
    "id, roleable_type, roleable_id, name, title, description, creator_user_id, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoleParams {
    pub roleable_type: String,
    pub roleable_id: i64,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub permission_groups: Vec<String>,
    #[serde(default)]
    pub creator_user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRoleParams {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub permission_groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRolesToUserParams {
    pub user_id: i64,
    pub roleable_type: String,
    pub roleable_id: i64,
    pub role_ids: Vec<i64>,
}

/// Materialize declared preset roles for one owning entity.
///
/// Runs inside a caller-supplied transaction so that several entities can be
/// seeded atomically. Get-or-create semantics: an existing role keeps its
/// stored title and description, and existing group memberships are preserved
/// rather than replaced.
pub async fn sync_preset_roles(
    tx: &mut Transaction<'_, Postgres>,
    metadata: &PermissionMetadata,
    roleable_id: i64,
    roleable_type: &str,
) -> Result<()> {
    for preset in metadata
        .roles
        .iter()
        .filter(|r| r.roleable_type == roleable_type)
    {
        let role = get_or_create_role(
            tx,
            roleable_type,
            roleable_id,
            &preset.name,
            &preset.title,
            &preset.description,
            0,
        )
        .await?;

        for group_name in &preset.permission_groups {
            sqlx::query(
                r"
                INSERT INTO role_permission_groups (role_id, permission_group_name)
                VALUES ($1, $2)
                ON CONFLICT (role_id, permission_group_name) DO NOTHING
                ",
            )
            .bind(role.id)
            .bind(group_name)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Create a role, or return the existing one for the same identity triple.
///
/// The role's group memberships are replaced with the declared set either
/// way, in the same transaction.
#[tracing::instrument(skip(pool, params), fields(roleable_type = %params.roleable_type, roleable_id = params.roleable_id, name = %params.name))]
pub async fn create_role(pool: &PgPool, params: CreateRoleParams) -> Result<Role> {
    let mut tx = pool.begin().await?;

    let role = get_or_create_role(
        &mut tx,
        &params.roleable_type,
        params.roleable_id,
        &params.name,
        &params.title,
        &params.description,
        params.creator_user_id,
    )
    .await?;
    assign_permission_groups_to_role(&mut tx, role.id, &params.permission_groups).await?;

    tx.commit().await?;
    Ok(role)
}

/// Update a role's title, description, and group memberships.
///
/// Identity fields (roleable_type, roleable_id, name) are never changed.
#[tracing::instrument(skip(pool, params), fields(role_id = params.id))]
pub async fn update_role(pool: &PgPool, params: UpdateRoleParams) -> Result<Role> {
    let mut tx = pool.begin().await?;

    let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
    let role: Option<Role> = sqlx::query_as(&query)
        .bind(params.id)
        .fetch_optional(&mut *tx)
        .await?;
    let mut role = role.ok_or(PermissionError::RoleNotFound(params.id))?;

    sqlx::query("UPDATE roles SET title = $2, description = $3, updated_at = NOW() WHERE id = $1")
        .bind(params.id)
        .bind(&params.title)
        .bind(&params.description)
        .execute(&mut *tx)
        .await?;
    assign_permission_groups_to_role(&mut tx, role.id, &params.permission_groups).await?;

    tx.commit().await?;

    role.title = params.title;
    role.description = params.description;
    Ok(role)
}

/// Delete a role, its group memberships, and all user assignments
/// referencing it, in that dependency order.
#[tracing::instrument(skip(pool))]
pub async fn delete_role(pool: &PgPool, role_id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM role_permission_groups WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM user_roles WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(role_id, "Role deleted");
    Ok(())
}

/// Replace a user's role assignments within one ownership scope.
///
/// Every requested role id must belong to (roleable_type, roleable_id);
/// assignments the user holds under other scopes are untouched.
#[tracing::instrument(skip(pool, params), fields(user_id = params.user_id, roleable_type = %params.roleable_type, roleable_id = params.roleable_id))]
pub async fn assign_roles_to_user(pool: &PgPool, params: AssignRolesToUserParams) -> Result<()> {
    let scoped_ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM roles WHERE roleable_type = $1 AND roleable_id = $2")
            .bind(&params.roleable_type)
            .bind(params.roleable_id)
            .fetch_all(pool)
            .await?;
    let scoped_ids: HashSet<i64> = scoped_ids.into_iter().collect();

    for role_id in &params.role_ids {
        if !scoped_ids.contains(role_id) {
            return Err(PermissionError::RoleNotInScope {
                role_id: *role_id,
                roleable_type: params.roleable_type.clone(),
                roleable_id: params.roleable_id,
            });
        }
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        DELETE FROM user_roles
        WHERE user_id = $1
          AND role_id IN (
            SELECT id FROM roles WHERE roleable_type = $2 AND roleable_id = $3
          )
        ",
    )
    .bind(params.user_id)
    .bind(&params.roleable_type)
    .bind(params.roleable_id)
    .execute(&mut *tx)
    .await?;

    for role_id in &params.role_ids {
        sqlx::query(
            r"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, role_id) DO NOTHING
            ",
        )
        .bind(params.user_id)
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Insert the role if its identity triple is new, then return the stored row.
async fn get_or_create_role(
    tx: &mut Transaction<'_, Postgres>,
    roleable_type: &str,
    roleable_id: i64,
    name: &str,
    title: &str,
    description: &str,
    creator_user_id: i64,
) -> Result<Role> {
    sqlx::query(
        r"
        INSERT INTO roles (roleable_type, roleable_id, name, title, description, creator_user_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (roleable_type, roleable_id, name) DO NOTHING
        ",
    )
    .bind(roleable_type)
    .bind(roleable_id)
    .bind(name)
    .bind(title)
    .bind(description)
    .bind(creator_user_id)
    .execute(&mut **tx)
    .await?;

    let query = format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE roleable_type = $1 AND roleable_id = $2 AND name = $3"
    );
    let role: Role = sqlx::query_as(&query)
        .bind(roleable_type)
        .bind(roleable_id)
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;
    Ok(role)
}

/// Replace a role's permission-group set with the named groups.
///
/// An empty list is rejected before any read or write: a role must always
/// have at least one permission group. Unknown names fail with the full list
/// of missing groups. Duplicate names in the input are tolerated.
pub(crate) async fn assign_permission_groups_to_role(
    tx: &mut Transaction<'_, Postgres>,
    role_id: i64,
    group_names: &[String],
) -> Result<()> {
    if group_names.is_empty() {
        return Err(PermissionError::EmptyPermissionGroups);
    }

    let existing: Vec<String> =
        sqlx::query_scalar("SELECT name FROM permission_groups WHERE name = ANY($1)")
            .bind(group_names)
            .fetch_all(&mut **tx)
            .await?;
    let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let missing: Vec<String> = group_names
        .iter()
        .filter(|name| !existing.contains(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(PermissionError::PermissionGroupsNotFound(missing));
    }

    sqlx::query("DELETE FROM role_permission_groups WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut **tx)
        .await?;

    for name in group_names {
        sqlx::query(
            r"
            INSERT INTO role_permission_groups (role_id, permission_group_name)
            VALUES ($1, $2)
            ON CONFLICT (role_id, permission_group_name) DO NOTHING
            ",
        )
        .bind(role_id)
        .bind(name)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
