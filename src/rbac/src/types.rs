//! Core RBAC types

use crate::code;
use crate::error::{RbacError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Unique resource identifier
pub type ResourceId = String;

/// Unique role identifier
pub type RoleId = String;

/// Kind of protected resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceType {
    /// Navigation menu entry
    Menu,
    /// Page route
    Page,
    /// API endpoint
    Api,
    /// Module or button-level action
    Module,
}

impl ResourceType {
    /// All resource types, in legacy code order
    pub const ALL: [ResourceType; 4] = [Self::Menu, Self::Page, Self::Api, Self::Module];

    /// Prefix used in resource codes
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Menu => "MENU",
            Self::Page => "PAGE",
            Self::Api => "API",
            Self::Module => "MODULE",
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::Page => "page",
            Self::Api => "api",
            Self::Module => "module",
        }
    }

    /// Whether codes for this type are derived from a path
    ///
    /// Module resources take a manual suffix instead.
    pub fn requires_path(&self) -> bool {
        !matches!(self, Self::Module)
    }

    /// Legacy small-integer encoding
    pub fn code(&self) -> u8 {
        match self {
            Self::Menu => 1,
            Self::Page => 2,
            Self::Api => 3,
            Self::Module => 4,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = RbacError;

    /// Accepts names (`menu`) or code prefixes (`MENU`), case insensitive
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RbacError::UnknownResourceType(s.to_string()))
    }
}

impl TryFrom<u8> for ResourceType {
    type Error = RbacError;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == value)
            .ok_or_else(|| RbacError::UnknownResourceType(value.to_string()))
    }
}

/// Protected resource (menu, page, API endpoint or module)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource identifier
    pub id: ResourceId,

    /// Display name
    pub name: String,

    /// Resource kind, immutable after creation
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// Route or endpoint path (Menu, Page, Api)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Manual code suffix (Module)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_suffix: Option<String>,

    /// Canonical, type-prefixed code
    pub res_code: String,

    /// Parent resource, `None` for roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ResourceId>,

    /// Dot-joined ancestor chain ending in `id`
    pub whole_id: String,

    /// Sibling order, ascending
    #[serde(default)]
    pub sort_order: i64,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Resource {
    /// Whether this resource is declared as a root
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Path, or the empty string for Module resources
    pub fn path_or_empty(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}

/// Input for creating a resource
///
/// The store assigns the id; the code and `whole_id` are derived in
/// [`NewResource::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResource {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub custom_suffix: Option<String>,
    #[serde(default)]
    pub parent_id: Option<ResourceId>,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewResource {
    /// Create a new resource input
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
            path: None,
            custom_suffix: None,
            parent_id: None,
            sort_order: 0,
            description: None,
        }
    }

    /// Set the route or endpoint path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the manual code suffix (Module resources)
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.custom_suffix = Some(suffix.into());
        self
    }

    /// Set the parent resource
    pub fn with_parent(mut self, parent_id: impl Into<ResourceId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the sibling order
    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Materialize the resource under `id`
    ///
    /// `parent` must be the resource named by `parent_id` when one is set.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the code cannot be generated, or `parent` does not
    ///   match `parent_id`
    pub fn build(self, id: impl Into<ResourceId>, parent: Option<&Resource>) -> Result<Resource> {
        let id = id.into();

        match (&self.parent_id, parent) {
            (Some(expected), Some(p)) if *expected == p.id => {}
            (None, None) => {}
            (Some(expected), _) => {
                return Err(RbacError::InvalidInput(format!(
                    "Parent '{}' must be supplied to build resource '{}'",
                    expected, id
                )));
            }
            (None, Some(p)) => {
                return Err(RbacError::InvalidInput(format!(
                    "Resource '{}' has no parent_id but parent '{}' was supplied",
                    id, p.id
                )));
            }
        }

        let res_code = code::generate(
            self.resource_type,
            self.path.as_deref().unwrap_or(""),
            self.custom_suffix.as_deref(),
        )?;

        let whole_id = match parent {
            Some(p) => code::derive_whole_id(code::whole_id_segments(&p.whole_id), &id),
            None => id.clone(),
        };

        // Module resources ignore paths
        let path = if self.resource_type.requires_path() { self.path } else { None };
        let custom_suffix = if self.resource_type.requires_path() { None } else { self.custom_suffix };

        Ok(Resource {
            id,
            name: self.name,
            resource_type: self.resource_type,
            path,
            custom_suffix,
            res_code,
            parent_id: self.parent_id,
            whole_id,
            sort_order: self.sort_order,
            description: self.description,
        })
    }
}

/// Update of the mutable metadata of a resource
///
/// Type and code are immutable; re-parenting goes through `move_to`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

impl ResourceUpdate {
    /// Apply to a resource in place
    pub fn apply(&self, resource: &mut Resource) {
        if let Some(name) = &self.name {
            resource.name = name.clone();
        }
        if let Some(path) = &self.path {
            if resource.resource_type.requires_path() {
                resource.path = Some(path.clone());
            }
        }
        if let Some(description) = &self.description {
            resource.description = Some(description.clone());
        }
        if let Some(sort_order) = self.sort_order {
            resource.sort_order = sort_order;
        }
    }
}

/// Role with directly attached resources
///
/// Attaching a parent resource does not grant its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Role identifier
    pub id: RoleId,

    /// Role name
    pub name: String,

    /// Role description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inactive roles grant nothing
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Super-admin roles hold every resource
    #[serde(default)]
    pub is_super_admin: bool,

    /// Directly attached resource ids
    #[serde(default)]
    pub resources: HashSet<ResourceId>,
}

fn default_true() -> bool {
    true
}

impl Role {
    /// Create a new active, non-super-admin role
    pub fn new(id: impl Into<RoleId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            is_active: true,
            is_super_admin: false,
            resources: HashSet::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark as super admin
    pub fn super_admin(mut self) -> Self {
        self.is_super_admin = true;
        self
    }

    /// Mark as inactive
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Attach resources
    pub fn with_resources<I, S>(mut self, resource_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        self.resources.extend(resource_ids.into_iter().map(Into::into));
        self
    }
}

/// Reference to a resource by id or by code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceRef {
    Id(ResourceId),
    Code(String),
}

impl ResourceRef {
    /// Reference by id
    pub fn id(id: impl Into<ResourceId>) -> Self {
        Self::Id(id.into())
    }

    /// Reference by resource code
    pub fn code(res_code: impl Into<String>) -> Self {
        Self::Code(res_code.into())
    }

    /// Whether `resource` is the referenced one
    pub fn matches(&self, resource: &Resource) -> bool {
        match self {
            Self::Id(id) => resource.id == *id,
            Self::Code(res_code) => resource.res_code == *res_code,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{}", id),
            Self::Code(res_code) => write!(f, "code:{}", res_code),
        }
    }
}
