//! Declared permission metadata.
//!
//! Operators describe the full permission surface in a YAML or JSON document:
//! a flat list of permissions, a forest of permission groups, and preset role
//! definitions. The reconciler makes stored state match this declaration.

use serde::{Deserialize, Serialize};

/// One declared permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionItem {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub domain: String,
    pub resource: String,
    pub action: String,
}

/// One declared permission group, with an optional flat permission list and
/// nested child groups.
///
/// Also returned by the tree builders in [`crate::queries`] when
/// reconstructing the forest from stored rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_groups: Vec<PermissionGroupItem>,
}

/// A preset role definition, materialized per owning entity of the matching
/// `roleable_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePresetItem {
    pub roleable_type: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub permission_groups: Vec<String>,
}

/// The full declared metadata document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionMetadata {
    #[serde(default)]
    pub permissions: Vec<PermissionItem>,
    #[serde(default)]
    pub permission_groups: Vec<PermissionGroupItem>,
    #[serde(default)]
    pub roles: Vec<RolePresetItem>,
}

impl PermissionMetadata {
    /// Parse a YAML metadata document.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Parse a JSON metadata document.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}
