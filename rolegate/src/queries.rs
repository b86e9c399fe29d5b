//! Authorization query engine.
//!
//! Stateless reads against the permission tables. Each check is a single
//! statement composed of nested scope filters:
//! permission ⊂ group membership ⊂ role's groups ⊂ roles owned by
//! (roleable_type, roleable_id) ⊂ roles assigned to the user.
//!
//! Reads are not wrapped in a transaction and may observe state mid-write by
//! a concurrent reconciliation pass.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use sqlx::PgPool;

use crate::error::Result;
use crate::metadata::PermissionGroupItem;
use crate::models::{PermissionGroup, Role};

/// One authorization check: does the user, within the given ownership scope,
/// hold the exact (domain, resource, action) permission through any role.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionCheck {
    pub user_id: i64,
    pub roleable_type: String,
    pub roleable_id: i64,
    #[serde(default)]
    pub domain: String,
    pub resource: String,
    pub action: String,
}

/// Check whether a user holds an exact permission within a scope.
#[tracing::instrument(skip(pool))]
pub async fn has_permission(pool: &PgPool, check: &PermissionCheck) -> Result<bool> {
    let granted: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS(
            SELECT 1 FROM permissions
            WHERE domain = $4 AND resource = $5 AND action = $6
              AND name IN (
                SELECT permission_name FROM permission_group_permissions
                WHERE permission_group_name IN (
                    SELECT permission_group_name FROM role_permission_groups
                    WHERE role_id IN (
                        SELECT id FROM roles
                        WHERE roleable_type = $1 AND roleable_id = $2
                          AND id IN (SELECT role_id FROM user_roles WHERE user_id = $3)
                    )
                )
              )
        )
        ",
    )
    .bind(&check.roleable_type)
    .bind(check.roleable_id)
    .bind(check.user_id)
    .bind(&check.domain)
    .bind(&check.resource)
    .bind(&check.action)
    .fetch_one(pool)
    .await?;

    Ok(granted)
}

/// Check whether a user holds a permission group, directly through any of
/// their roles in the scope. Independent of the group's permission list.
pub async fn has_permission_group(
    pool: &PgPool,
    user_id: i64,
    roleable_type: &str,
    roleable_id: i64,
    group_name: &str,
) -> Result<bool> {
    let granted: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS(
            SELECT 1 FROM role_permission_groups
            WHERE permission_group_name = $4
              AND role_id IN (
                SELECT id FROM roles
                WHERE roleable_type = $1 AND roleable_id = $2
                  AND id IN (SELECT role_id FROM user_roles WHERE user_id = $3)
              )
        )
        ",
    )
    .bind(roleable_type)
    .bind(roleable_id)
    .bind(user_id)
    .bind(group_name)
    .fetch_one(pool)
    .await?;

    Ok(granted)
}

/// Batch variant of [`has_permission_group`]: one map entry per requested
/// name. An empty request yields an empty map without touching the database.
pub async fn has_permission_groups(
    pool: &PgPool,
    user_id: i64,
    roleable_type: &str,
    roleable_id: i64,
    group_names: &[String],
) -> Result<HashMap<String, bool>> {
    if group_names.is_empty() {
        return Ok(HashMap::new());
    }

    let held: Vec<String> = sqlx::query_scalar(
        r"
        SELECT DISTINCT permission_group_name FROM role_permission_groups
        WHERE permission_group_name = ANY($4)
          AND role_id IN (
            SELECT id FROM roles
            WHERE roleable_type = $1 AND roleable_id = $2
              AND id IN (SELECT role_id FROM user_roles WHERE user_id = $3)
          )
        ",
    )
    .bind(roleable_type)
    .bind(roleable_id)
    .bind(user_id)
    .bind(group_names)
    .fetch_all(pool)
    .await?;

    let held: HashSet<String> = held.into_iter().collect();
    Ok(group_names
        .iter()
        .map(|name| (name.clone(), held.contains(name)))
        .collect())
}

/// Check whether a user holds at least one role within a scope.
pub async fn has_any_role(
    pool: &PgPool,
    user_id: i64,
    roleable_id: i64,
    roleable_type: &str,
) -> Result<bool> {
    let held: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS(
            SELECT 1 FROM user_roles
            WHERE user_id = $1
              AND role_id IN (
                SELECT id FROM roles WHERE roleable_type = $2 AND roleable_id = $3
              )
        )
        ",
    )
    .bind(user_id)
    .bind(roleable_type)
    .bind(roleable_id)
    .fetch_one(pool)
    .await?;

    Ok(held)
}

/// List all roles owned by (roleable_type, roleable_id), ordered by id.
pub async fn get_roles(pool: &PgPool, roleable_id: i64, roleable_type: &str) -> Result<Vec<Role>> {
    let roles = sqlx::query_as::<_, Role>(
        r"
        SELECT id, roleable_type, roleable_id, name, title, description, creator_user_id, created_at, updated_at
        FROM roles
        WHERE roleable_type = $1 AND roleable_id = $2
        ORDER BY id ASC
        ",
    )
    .bind(roleable_type)
    .bind(roleable_id)
    .fetch_all(pool)
    .await?;

    Ok(roles)
}

/// List the roles a user holds within a scope, ordered by id.
pub async fn get_user_roles(
    pool: &PgPool,
    user_id: i64,
    roleable_id: i64,
    roleable_type: &str,
) -> Result<Vec<Role>> {
    let roles = sqlx::query_as::<_, Role>(
        r"
        SELECT id, roleable_type, roleable_id, name, title, description, creator_user_id, created_at, updated_at
        FROM roles
        WHERE roleable_type = $1 AND roleable_id = $2
          AND id IN (SELECT role_id FROM user_roles WHERE user_id = $3)
        ORDER BY id ASC
        ",
    )
    .bind(roleable_type)
    .bind(roleable_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(roles)
}

/// List the permission-group names assigned to a role.
pub async fn get_role_permission_group_names(pool: &PgPool, role_id: i64) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r"
        SELECT permission_group_name FROM role_permission_groups
        WHERE role_id = $1
        ORDER BY permission_group_name ASC
        ",
    )
    .bind(role_id)
    .fetch_all(pool)
    .await?;

    Ok(names)
}

/// List the permission groups assigned to a role, ordered by group index.
pub async fn get_role_permission_groups(
    pool: &PgPool,
    role_id: i64,
) -> Result<Vec<PermissionGroup>> {
    let groups = sqlx::query_as::<_, PermissionGroup>(
        r"
        SELECT name, domain, title, group_index, parent_name, created_at
        FROM permission_groups
        WHERE name IN (
            SELECT permission_group_name FROM role_permission_groups WHERE role_id = $1
        )
        ORDER BY group_index ASC
        ",
    )
    .bind(role_id)
    .fetch_all(pool)
    .await?;

    Ok(groups)
}

/// Distinct owner ids of one roleable type for which the user holds any role.
pub async fn get_user_roleable_ids(
    pool: &PgPool,
    user_id: i64,
    roleable_type: &str,
) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r"
        SELECT DISTINCT roleable_id FROM roles
        WHERE roleable_type = $2
          AND id IN (SELECT role_id FROM user_roles WHERE user_id = $1)
        ORDER BY roleable_id ASC
        ",
    )
    .bind(user_id)
    .bind(roleable_type)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// For each requested roleable type, the distinct owner ids for which the
/// user holds any role, deduplicated in first-seen order. Types without any
/// matching role get no entry.
pub async fn get_user_roleable_ids_map(
    pool: &PgPool,
    user_id: i64,
    roleable_types: &[String],
) -> Result<HashMap<String, Vec<i64>>> {
    if roleable_types.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(String, i64)> = sqlx::query_as(
        r"
        SELECT roleable_type, roleable_id FROM roles
        WHERE roleable_type = ANY($2)
          AND id IN (SELECT role_id FROM user_roles WHERE user_id = $1)
        ORDER BY id ASC
        ",
    )
    .bind(user_id)
    .bind(roleable_types)
    .fetch_all(pool)
    .await?;

    let mut map: HashMap<String, Vec<i64>> = HashMap::new();
    for (roleable_type, roleable_id) in rows {
        let ids = map.entry(roleable_type).or_default();
        if !ids.contains(&roleable_id) {
            ids.push(roleable_id);
        }
    }
    Ok(map)
}

/// Reconstruct the full permission-group forest for one domain from the flat
/// stored rows.
pub async fn build_full_permission_group_tree(
    pool: &PgPool,
    domain: &str,
) -> Result<Vec<PermissionGroupItem>> {
    let groups = sqlx::query_as::<_, PermissionGroup>(
        r"
        SELECT name, domain, title, group_index, parent_name, created_at
        FROM permission_groups
        WHERE domain = $1
        ORDER BY group_index ASC
        ",
    )
    .bind(domain)
    .fetch_all(pool)
    .await?;

    Ok(build_permission_group_tree(&groups, ""))
}

/// Build the nested forest under `parent_name` from flat group rows.
///
/// Roots are rows whose `parent_name` equals the argument (empty string for
/// the top level); sibling order follows the input slice, which callers keep
/// sorted by `group_index`.
#[must_use]
pub fn build_permission_group_tree(
    groups: &[PermissionGroup],
    parent_name: &str,
) -> Vec<PermissionGroupItem> {
    let mut tree = Vec::new();
    for group in groups {
        if group.parent_name == parent_name {
            tree.push(PermissionGroupItem {
                name: group.name.clone(),
                domain: group.domain.clone(),
                title: group.title.clone(),
                permissions: Vec::new(),
                permission_groups: build_permission_group_tree(groups, &group.name),
            });
        }
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(name: &str, parent_name: &str, group_index: i32) -> PermissionGroup {
        PermissionGroup {
            name: name.to_owned(),
            domain: String::new(),
            title: name.to_uppercase(),
            group_index,
            parent_name: parent_name.to_owned(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_tree_empty() {
        assert!(build_permission_group_tree(&[], "").is_empty());
    }

    #[test]
    fn test_build_tree_nesting_and_order() {
        // Flat rows sorted by group_index, as the stored query returns them.
        let groups = vec![
            row("a1", "a", 0),
            row("a", "", 0),
            row("a1x", "a1", 0),
            row("b", "", 1),
            row("a2", "a", 1),
        ];

        let tree = build_permission_group_tree(&groups, "");

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "a");
        assert_eq!(tree[1].name, "b");

        let children: Vec<&str> = tree[0]
            .permission_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(children, vec!["a1", "a2"]);

        assert_eq!(tree[0].permission_groups[0].permission_groups[0].name, "a1x");
        assert!(tree[1].permission_groups.is_empty());
    }

    #[test]
    fn test_build_tree_subtree_root() {
        let groups = vec![row("a", "", 0), row("a1", "a", 0), row("a2", "a", 1)];

        let subtree = build_permission_group_tree(&groups, "a");
        assert_eq!(subtree.len(), 2);
        assert_eq!(subtree[0].name, "a1");
        assert_eq!(subtree[0].title, "A1");
    }
}
