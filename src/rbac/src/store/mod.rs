//! Resource and role storage
//!
//! Stores own persistence and the write transaction boundary: every write
//! validates the resulting catalog under the store's own write lock before
//! committing, and rejects the write with `StructuralViolation` otherwise.

pub mod memory;

pub use memory::{InMemoryResourceStore, InMemoryRoleStore};

use crate::error::Result;
use crate::types::{NewResource, Resource, ResourceId, ResourceUpdate, Role, RoleId};
use async_trait::async_trait;
use std::collections::HashSet;

/// Resource catalog storage
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Every resource in the catalog
    async fn list_all(&self) -> Result<Vec<Resource>>;

    /// Get a resource by id (`NotFound` if absent)
    async fn get_by_id(&self, id: &str) -> Result<Resource>;

    /// Direct children of `parent_id`, or the roots for `None`
    async fn list_children(&self, parent_id: Option<&str>) -> Result<Vec<Resource>>;

    /// Create a resource, assigning its id, code and `whole_id`
    async fn create(&self, input: NewResource) -> Result<Resource>;

    /// Update mutable metadata
    async fn update(&self, id: &str, update: ResourceUpdate) -> Result<Resource>;

    /// Re-parent a resource, rewriting the `whole_id` of its subtree
    async fn move_to(&self, id: &str, new_parent_id: Option<&str>) -> Result<Resource>;

    /// Delete a childless resource
    async fn delete(&self, id: &str) -> Result<Resource>;
}

/// Role and role-resource attachment storage
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Get a role by id (`NotFound` if absent)
    async fn get_role(&self, role_id: &str) -> Result<Role>;

    /// Resources attached to a role (`NotFound` if the role is absent)
    async fn get_resource_ids(&self, role_id: &str) -> Result<HashSet<ResourceId>>;

    /// Every role
    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// Create or replace a role
    async fn put_role(&self, role: Role) -> Result<()>;

    /// Delete a role and its attachments
    async fn delete_role(&self, role_id: &str) -> Result<Role>;

    /// Attach resources to a role; already attached ids are ignored
    async fn assign(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()>;

    /// Detach resources from a role; unattached ids are ignored
    async fn unassign(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()>;

    /// Roles that have `resource_id` attached
    async fn roles_referencing(&self, resource_id: &str) -> Result<Vec<RoleId>>;
}
