//! Error types for the permission engine.

use thiserror::Error;

/// Errors surfaced by reconciliation, role management, and queries.
///
/// Validation variants carry the offending names or ids so callers can report
/// exactly what was wrong with the declared metadata or request.
#[derive(Debug, Error)]
pub enum PermissionError {
    /// Two declared permissions share the same name.
    #[error("permission name {0} declared more than once")]
    DuplicatePermissionName(String),

    /// Two declared permissions address the same guarded operation.
    #[error("permission domain:{domain} resource:{resource} action:{action} declared more than once")]
    DuplicatePermissionTarget {
        domain: String,
        resource: String,
        action: String,
    },

    /// A declared permission group references permissions that do not exist.
    #[error("permission group {group} references unknown permissions: {names:?}")]
    UnknownPermissions { group: String, names: Vec<String> },

    /// A group-assignment request named permission groups that do not exist.
    #[error("permission groups not found: {0:?}")]
    PermissionGroupsNotFound(Vec<String>),

    /// A role must always carry at least one permission group.
    #[error("role must have at least one permission group")]
    EmptyPermissionGroups,

    /// A requested role id does not belong to the given ownership scope.
    #[error("role {role_id} not found in {roleable_type}:{roleable_id}")]
    RoleNotInScope {
        role_id: i64,
        roleable_type: String,
        roleable_id: i64,
    },

    /// Role lookup by id matched nothing.
    #[error("role {0} not found")]
    RoleNotFound(i64),

    /// Backend failure, propagated unchanged. Rolls back the enclosing
    /// transaction.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, PermissionError>;
