//! Hierarchical role-based access control backed by `PostgreSQL`.
//!
//! Operators declare the full permission surface — permissions, a forest of
//! permission groups, preset roles — as metadata. The reconciler makes stored
//! state match that declaration atomically; the query engine answers
//! "does user X have permission/role/group Y" against the same tables.
//!
//! - [`reconcile`]: diffs declared metadata against stored state
//! - [`roles`]: role lifecycle and user assignment
//! - [`queries`]: authorization checks and permission-group trees

pub mod config;
pub mod db;
pub mod error;
pub mod metadata;
pub mod models;
pub mod queries;
pub mod reconcile;
pub mod roles;


pub use error::{PermissionError, Result};
pub use metadata::{PermissionGroupItem, PermissionItem, PermissionMetadata, RolePresetItem};
pub use models::*;
pub use queries::*;
pub use reconcile::sync_metadata;
pub use roles::{
    assign_roles_to_user, create_role, delete_role, sync_preset_roles, update_role,
    AssignRolesToUserParams, CreateRoleParams, UpdateRoleParams,
};
