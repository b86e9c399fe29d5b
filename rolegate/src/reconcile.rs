//! Metadata reconciliation.
//!
//! Makes the `permissions`, `permission_groups`, and
//! `permission_group_permissions` tables match the declared metadata exactly,
//! in one transaction. Validation runs before any write for the entity type
//! being synchronized; a failure at any step rolls back the whole pass.
//!
//! The group walk is split in two: a pure planning pass over the declared
//! forest that collects upserts, deletes, and membership deltas, and an apply
//! phase that issues the SQL after the walk completes. The stored table is
//! never mutated mid-walk.

use std::collections::{HashMap, HashSet};

use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use crate::db::RECONCILE_LOCK_SEED;
use crate::error::{PermissionError, Result};
use crate::metadata::{PermissionGroupItem, PermissionItem, PermissionMetadata};

/// Synchronize stored permissions and permission groups with declared
/// metadata.
///
/// Concurrent passes are serialized with a transaction-scoped advisory lock,
/// released automatically on commit or rollback. Reconciling the same
/// metadata twice is idempotent.
#[tracing::instrument(skip_all)]
pub async fn sync_metadata(pool: &PgPool, metadata: &PermissionMetadata) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Serialize concurrent reconciliation passes.
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(RECONCILE_LOCK_SEED)
        .execute(&mut *tx)
        .await?;

    sync_permissions(&mut tx, &metadata.permissions).await?;
    sync_permission_groups(&mut tx, &metadata.permission_groups).await?;

    tx.commit().await?;

    info!(
        permissions = metadata.permissions.len(),
        permission_groups = metadata.permission_groups.len(),
        "Permission metadata reconciled"
    );
    Ok(())
}

/// Validate declared permissions and return the set of declared names.
///
/// Fails on the first duplicate name or duplicate
/// (domain, resource, action) triple.
fn validate_permissions(declared: &[PermissionItem]) -> Result<HashSet<String>> {
    let mut targets = HashSet::with_capacity(declared.len());
    let mut names = HashSet::with_capacity(declared.len());

    for p in declared {
        if !targets.insert((p.domain.as_str(), p.resource.as_str(), p.action.as_str())) {
            return Err(PermissionError::DuplicatePermissionTarget {
                domain: p.domain.clone(),
                resource: p.resource.clone(),
                action: p.action.clone(),
            });
        }
        if !names.insert(p.name.clone()) {
            return Err(PermissionError::DuplicatePermissionName(p.name.clone()));
        }
    }

    Ok(names)
}

/// Reconcile the `permissions` table against the declared list.
///
/// Stored permissions absent from the declaration are deleted along with
/// their group memberships; declared permissions are upserted keyed by name.
async fn sync_permissions(
    tx: &mut Transaction<'_, Postgres>,
    declared: &[PermissionItem],
) -> Result<()> {
    let declared_names = validate_permissions(declared)?;

    let stored_names: Vec<String> = sqlx::query_scalar("SELECT name FROM permissions")
        .fetch_all(&mut **tx)
        .await?;

    let stale: Vec<String> = stored_names
        .into_iter()
        .filter(|name| !declared_names.contains(name))
        .collect();

    if !stale.is_empty() {
        // Memberships referencing a deleted permission go with it; the schema
        // declares no foreign keys, so the cleanup is explicit.
        sqlx::query("DELETE FROM permission_group_permissions WHERE permission_name = ANY($1)")
            .bind(&stale)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM permissions WHERE name = ANY($1)")
            .bind(&stale)
            .execute(&mut **tx)
            .await?;
    }

    for p in declared {
        sqlx::query(
            r"
            INSERT INTO permissions (name, title, domain, resource, action)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET title = EXCLUDED.title,
                domain = EXCLUDED.domain,
                resource = EXCLUDED.resource,
                action = EXCLUDED.action
            ",
        )
        .bind(&p.name)
        .bind(&p.title)
        .bind(&p.domain)
        .bind(&p.resource)
        .bind(&p.action)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// One group row produced by the planning walk.
#[derive(Debug)]
struct PlannedGroup {
    name: String,
    domain: String,
    title: String,
    group_index: i32,
    parent_name: String,
}

/// Everything the group walk decided, applied only after the walk completes.
#[derive(Debug, Default)]
struct GroupSyncPlan {
    /// Visited groups in declaration order, ready to upsert.
    groups: Vec<PlannedGroup>,
    /// (group_name, permission_name) memberships to insert, duplicates
    /// suppressed at apply time.
    membership_inserts: Vec<(String, String)>,
    /// Per-group permission names whose membership is no longer declared.
    membership_deletes: Vec<(String, Vec<String>)>,
}

/// Walk the declared forest depth-first and build the sync plan.
///
/// `group_index` is the position within the parent's child list, starting at
/// 0; `parent_name` is the declaring parent's name, empty at the roots.
fn plan_group_sync(
    declared: &[PermissionGroupItem],
    known_permissions: &HashSet<String>,
    stored_memberships: &HashMap<String, Vec<String>>,
) -> Result<GroupSyncPlan> {
    let mut plan = GroupSyncPlan::default();
    for (index, group) in declared.iter().enumerate() {
        visit_group(
            group,
            index as i32,
            "",
            known_permissions,
            stored_memberships,
            &mut plan,
        )?;
    }
    Ok(plan)
}

fn visit_group(
    group: &PermissionGroupItem,
    group_index: i32,
    parent_name: &str,
    known_permissions: &HashSet<String>,
    stored_memberships: &HashMap<String, Vec<String>>,
    plan: &mut GroupSyncPlan,
) -> Result<()> {
    plan.groups.push(PlannedGroup {
        name: group.name.clone(),
        domain: group.domain.clone(),
        title: group.title.clone(),
        group_index,
        parent_name: parent_name.to_owned(),
    });

    if !group.permissions.is_empty() {
        let missing: Vec<String> = group
            .permissions
            .iter()
            .filter(|name| !known_permissions.contains(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PermissionError::UnknownPermissions {
                group: group.name.clone(),
                names: missing,
            });
        }

        let declared_names: HashSet<&str> =
            group.permissions.iter().map(String::as_str).collect();
        if let Some(existing) = stored_memberships.get(&group.name) {
            let removed: Vec<String> = existing
                .iter()
                .filter(|name| !declared_names.contains(name.as_str()))
                .cloned()
                .collect();
            if !removed.is_empty() {
                plan.membership_deletes.push((group.name.clone(), removed));
            }
        }

        for permission in &group.permissions {
            plan.membership_inserts
                .push((group.name.clone(), permission.clone()));
        }
    }

    for (index, child) in group.permission_groups.iter().enumerate() {
        visit_group(
            child,
            index as i32,
            &group.name,
            known_permissions,
            stored_memberships,
            plan,
        )?;
    }

    Ok(())
}

/// Reconcile the group forest and its memberships against the declaration.
///
/// Parents are always planned before their children, so a fresh database is
/// populated top-down and no stored parent pointer is ever followed.
async fn sync_permission_groups(
    tx: &mut Transaction<'_, Postgres>,
    declared: &[PermissionGroupItem],
) -> Result<()> {
    // Membership validation runs against permissions as stored at this point
    // in the transaction, i.e. after the permission sync committed its writes
    // into the same transaction.
    let known_permissions: HashSet<String> = sqlx::query_scalar("SELECT name FROM permissions")
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .collect();

    let membership_rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT permission_group_name, permission_name FROM permission_group_permissions",
    )
    .fetch_all(&mut **tx)
    .await?;
    let mut stored_memberships: HashMap<String, Vec<String>> = HashMap::new();
    for (group_name, permission_name) in membership_rows {
        stored_memberships
            .entry(group_name)
            .or_default()
            .push(permission_name);
    }

    let plan = plan_group_sync(declared, &known_permissions, &stored_memberships)?;

    let stored_names: Vec<String> = sqlx::query_scalar("SELECT name FROM permission_groups")
        .fetch_all(&mut **tx)
        .await?;
    let visited: HashSet<&str> = plan.groups.iter().map(|g| g.name.as_str()).collect();
    let stale: Vec<String> = stored_names
        .into_iter()
        .filter(|name| !visited.contains(name.as_str()))
        .collect();

    if !stale.is_empty() {
        sqlx::query("DELETE FROM permission_groups WHERE name = ANY($1)")
            .bind(&stale)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "DELETE FROM permission_group_permissions WHERE permission_group_name = ANY($1)",
        )
        .bind(&stale)
        .execute(&mut **tx)
        .await?;
    }

    for group in &plan.groups {
        sqlx::query(
            r"
            INSERT INTO permission_groups (name, domain, title, group_index, parent_name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET domain = EXCLUDED.domain,
                title = EXCLUDED.title,
                group_index = EXCLUDED.group_index,
                parent_name = EXCLUDED.parent_name
            ",
        )
        .bind(&group.name)
        .bind(&group.domain)
        .bind(&group.title)
        .bind(group.group_index)
        .bind(&group.parent_name)
        .execute(&mut **tx)
        .await?;
    }

    for (group_name, removed) in &plan.membership_deletes {
        sqlx::query(
            r"
            DELETE FROM permission_group_permissions
            WHERE permission_group_name = $1
              AND permission_name = ANY($2)
            ",
        )
        .bind(group_name)
        .bind(removed)
        .execute(&mut **tx)
        .await?;
    }

    for (group_name, permission_name) in &plan.membership_inserts {
        sqlx::query(
            r"
            INSERT INTO permission_group_permissions (permission_group_name, permission_name)
            VALUES ($1, $2)
            ON CONFLICT (permission_group_name, permission_name) DO NOTHING
            ",
        )
        .bind(group_name)
        .bind(permission_name)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
