//! Database models for the permission engine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// An exact-match permission: one guarded operation identified by the
/// (domain, resource, action) triple.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Permission {
    pub name: String,
    pub title: String,
    pub domain: String,
    pub resource: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

/// A node in the permission-group forest.
///
/// `parent_name` is empty for roots; `group_index` is the position within the
/// parent's child list and drives display ordering.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PermissionGroup {
    pub name: String,
    pub domain: String,
    pub title: String,
    pub group_index: i32,
    pub parent_name: String,
    pub created_at: DateTime<Utc>,
}

/// Group ↔ permission membership.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PermissionGroupPermission {
    pub permission_group_name: String,
    pub permission_name: String,
    pub created_at: DateTime<Utc>,
}

/// A role owned by one roleable entity.
///
/// Identity is the (roleable_type, roleable_id, name) triple and is immutable
/// after creation; only title and description may change.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Role {
    pub id: i64,
    pub roleable_type: String,
    pub roleable_id: i64,
    pub name: String,
    pub title: String,
    pub description: String,
    pub creator_user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role ↔ permission-group assignment.
///
/// A role's authorization surface is exactly the union of permissions in its
/// assigned groups; parent groups do not contribute transitively.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RolePermissionGroup {
    pub role_id: i64,
    pub permission_group_name: String,
    pub created_at: DateTime<Utc>,
}

/// User ↔ role assignment. Users themselves live outside this engine.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRole {
    pub user_id: i64,
    pub role_id: i64,
    pub created_at: DateTime<Utc>,
}
