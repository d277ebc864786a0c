//! RBAC engine
//!
//! Facade over the stores, the permission aggregator and its caches. Consumer
//! entry points resolve and check permissions; admin entry points mutate the
//! catalog and roles and invalidate exactly the cache keys they affect.

use crate::aggregator::{PermissionAggregator, PermissionView};
use crate::cache::CacheStats;
use crate::code;
use crate::config::RbacConfig;
use crate::error::{RbacError, Result};
use crate::store::{InMemoryResourceStore, InMemoryRoleStore, ResourceStore, RoleStore};
use crate::tree::{ResourceTree, TreeValidator, Violation};
use crate::types::{NewResource, Resource, ResourceId, ResourceRef, ResourceUpdate, Role, RoleId};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Statistics of both engine caches
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub grant_cache: CacheStats,
    pub catalog_cache: CacheStats,
}

/// Main RBAC engine
pub struct RbacEngine {
    config: RbacConfig,
    resources: Arc<dyn ResourceStore>,
    roles: Arc<dyn RoleStore>,
    aggregator: PermissionAggregator,
    validator: TreeValidator,
    /// Serializes resource deletion against writes that attach resources
    /// to roles
    attach_lock: Mutex<()>,
}

impl RbacEngine {
    /// Create a new engine over the given stores
    ///
    /// # Errors
    ///
    /// - `Config` if the configuration does not validate
    pub fn new(
        config: RbacConfig,
        resources: Arc<dyn ResourceStore>,
        roles: Arc<dyn RoleStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RbacError::Config(e.to_string()))?;

        let aggregator = PermissionAggregator::new(Arc::clone(&roles), Arc::clone(&resources), &config);
        let validator = TreeValidator::with_mode(config.validation.mode());

        info!(
            grant_cache_capacity = config.grant_cache.capacity,
            grant_cache_ttl_secs = config.grant_cache.ttl_secs,
            catalog_cache_ttl_secs = config.catalog_cache.ttl_secs,
            validation = ?validator.mode(),
            "RbacEngine initialized"
        );

        Ok(Self {
            config,
            resources,
            roles,
            aggregator,
            validator,
            attach_lock: Mutex::new(()),
        })
    }

    /// Create an engine over empty in-memory stores
    pub fn in_memory(config: RbacConfig) -> Result<Self> {
        let resources = Arc::new(InMemoryResourceStore::with_mode(config.validation.mode()));
        let roles = Arc::new(InMemoryRoleStore::new());
        Self::new(config, resources, roles)
    }

    /// Engine configuration
    pub fn config(&self) -> &RbacConfig {
        &self.config
    }

    /// The permission aggregator
    pub fn aggregator(&self) -> &PermissionAggregator {
        &self.aggregator
    }

    // ------------------------------------------------------------------------
    // Consumer entry points
    // ------------------------------------------------------------------------

    /// Resolve `role_ids` against a caller-supplied catalog
    pub async fn resolve_permissions(
        &self,
        role_ids: &[RoleId],
        catalog: &[Resource],
    ) -> Result<PermissionView> {
        self.aggregator.resolve(role_ids, catalog).await
    }

    /// Resolve `role_ids` against the stored catalog (read only)
    pub async fn preview_by_role_ids(&self, role_ids: &[RoleId]) -> Result<PermissionView> {
        self.aggregator.preview_by_role_ids(role_ids).await
    }

    /// Whether `role_ids` hold the resource named by id or code
    pub async fn check_permission(&self, role_ids: &[RoleId], resource: &ResourceRef) -> Result<bool> {
        self.aggregator.check(role_ids, resource).await
    }

    /// Generate a resource code; `resource_type` is a name or legacy code
    pub fn generate_res_code(
        &self,
        resource_type: &str,
        path: &str,
        custom_suffix: Option<&str>,
    ) -> Result<String> {
        code::generate_from_name(resource_type, path, custom_suffix)
    }

    /// Validate the stored catalog
    pub async fn validate_resource_tree(&self) -> Result<Vec<Violation>> {
        let catalog = self.resources.list_all().await?;
        let violations = self.validator.validate_catalog(&catalog);
        if !violations.is_empty() {
            info!(violations = violations.len(), "stored resource tree has violations");
        }
        Ok(violations)
    }

    /// Forest of the stored catalog
    pub async fn resource_tree(&self) -> Result<ResourceTree> {
        let catalog = self.aggregator.catalog().await?;
        Ok(ResourceTree::from_resources(catalog.iter().cloned()))
    }

    // ------------------------------------------------------------------------
    // Resource administration
    // ------------------------------------------------------------------------

    /// Every stored resource
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.resources.list_all().await
    }

    /// Get a resource by id
    pub async fn get_resource(&self, id: &str) -> Result<Resource> {
        self.resources.get_by_id(id).await
    }

    /// Direct children of a resource, or the roots
    pub async fn list_children(&self, parent_id: Option<&str>) -> Result<Vec<Resource>> {
        self.resources.list_children(parent_id).await
    }

    /// Create a resource
    pub async fn create_resource(&self, input: NewResource) -> Result<Resource> {
        let resource = self.resources.create(input).await?;
        self.aggregator.invalidate_catalog();
        Ok(resource)
    }

    /// Update resource metadata
    pub async fn update_resource(&self, id: &str, update: ResourceUpdate) -> Result<Resource> {
        let resource = self.resources.update(id, update).await?;
        self.aggregator.invalidate_catalog();
        Ok(resource)
    }

    /// Re-parent a resource
    pub async fn move_resource(&self, id: &str, new_parent_id: Option<&str>) -> Result<Resource> {
        let resource = self.resources.move_to(id, new_parent_id).await?;
        self.aggregator.invalidate_catalog();
        Ok(resource)
    }

    /// Delete a resource that has no children and no role attachments
    ///
    /// The role check and the delete run under the same lock as
    /// [`put_role`](Self::put_role) and
    /// [`assign_resources`](Self::assign_resources), so no role attached
    /// through this engine can reference a deleted resource. Writes made
    /// directly on the stores bypass the lock.
    pub async fn delete_resource(&self, id: &str) -> Result<Resource> {
        let _guard = self.attach_lock.lock().await;
        let role_ids = self.roles.roles_referencing(id).await?;
        if !role_ids.is_empty() {
            return Err(RbacError::StructuralViolation(vec![
                Violation::ReferencedByRoles {
                    resource_id: id.to_string(),
                    role_ids,
                },
            ]));
        }

        let resource = self.resources.delete(id).await?;
        self.aggregator.invalidate_catalog();
        Ok(resource)
    }

    // ------------------------------------------------------------------------
    // Role administration
    // ------------------------------------------------------------------------

    /// Get a role by id
    pub async fn get_role(&self, role_id: &str) -> Result<Role> {
        self.roles.get_role(role_id).await
    }

    /// Resources directly attached to a role
    pub async fn role_resource_ids(&self, role_id: &str) -> Result<HashSet<ResourceId>> {
        self.roles.get_resource_ids(role_id).await
    }

    /// Every role
    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.roles.list_roles().await
    }

    /// Create or replace a role
    ///
    /// # Errors
    ///
    /// - `NotFound` if an attached resource is not in the catalog
    pub async fn put_role(&self, role: Role) -> Result<()> {
        let resource_ids: Vec<ResourceId> = role.resources.iter().cloned().collect();
        let _guard = self.attach_lock.lock().await;
        self.ensure_resources_exist(&resource_ids).await?;

        let role_id = role.id.clone();
        self.roles.put_role(role).await?;
        self.aggregator.invalidate_role(&role_id);
        Ok(())
    }

    /// Delete a role
    pub async fn delete_role(&self, role_id: &str) -> Result<Role> {
        let role = self.roles.delete_role(role_id).await?;
        self.aggregator.invalidate_all();
        Ok(role)
    }

    /// Attach resources to a role
    ///
    /// # Errors
    ///
    /// - `NotFound` if the role or a resource does not exist
    pub async fn assign_resources(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()> {
        let _guard = self.attach_lock.lock().await;
        self.ensure_resources_exist(resource_ids).await?;
        self.roles.assign(role_id, resource_ids).await?;
        self.aggregator.invalidate_role(role_id);
        info!(role_id = %role_id, resources = resource_ids.len(), "assigned resources to role");
        Ok(())
    }

    /// Detach resources from a role
    pub async fn unassign_resources(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()> {
        self.roles.unassign(role_id, resource_ids).await?;
        self.aggregator.invalidate_role(role_id);
        info!(role_id = %role_id, resources = resource_ids.len(), "unassigned resources from role");
        Ok(())
    }

    /// Cache statistics
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            grant_cache: self.aggregator.grant_cache_stats(),
            catalog_cache: self.aggregator.catalog_cache_stats(),
        }
    }

    async fn ensure_resources_exist(&self, resource_ids: &[ResourceId]) -> Result<()> {
        if resource_ids.is_empty() {
            return Ok(());
        }
        let known: HashSet<ResourceId> = self
            .resources
            .list_all()
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        match resource_ids.iter().find(|id| !known.contains(*id)) {
            Some(missing) => {
                debug!(resource_id = %missing, "rejecting unknown resource");
                Err(RbacError::NotFound(format!("resource '{}'", missing)))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceType;

    async fn engine() -> RbacEngine {
        let engine = RbacEngine::in_memory(RbacConfig::default()).unwrap();
        engine
            .create_resource(NewResource::new("System", ResourceType::Menu).with_path("/system"))
            .await
            .unwrap();
        engine
            .create_resource(
                NewResource::new("User detail", ResourceType::Api)
                    .with_path("/api/users/:id")
                    .with_parent("1"),
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = RbacConfig::default();
        config.catalog_cache.capacity = 0;
        assert!(matches!(
            RbacEngine::in_memory(config),
            Err(RbacError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_res_code() {
        let engine = engine().await;
        assert_eq!(
            engine.generate_res_code("MODULE", "", Some("user_export")).unwrap(),
            "MODULE_user_export"
        );
        assert!(matches!(
            engine.generate_res_code("widget", "/x", None),
            Err(RbacError::UnknownResourceType(_))
        ));
    }

    #[tokio::test]
    async fn test_catalog_invalidated_on_create() {
        let engine = engine().await;
        engine
            .put_role(Role::new("root", "Root").super_admin())
            .await
            .unwrap();
        let roles = vec!["root".to_string()];

        assert_eq!(engine.preview_by_role_ids(&roles).await.unwrap().len(), 2);
        engine
            .create_resource(NewResource::new("Audit", ResourceType::Page).with_path("/audit"))
            .await
            .unwrap();
        assert_eq!(engine.preview_by_role_ids(&roles).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_assign_unknown_resource_rejected() {
        let engine = engine().await;
        engine.put_role(Role::new("editor", "Editors")).await.unwrap();

        let err = engine
            .assign_resources("editor", &["99".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_guarded_by_role_reference() {
        let engine = engine().await;
        engine
            .put_role(Role::new("editor", "Editors").with_resources(["2"]))
            .await
            .unwrap();

        let err = engine.delete_resource("2").await.unwrap_err();
        assert_eq!(
            err.violations(),
            &[Violation::ReferencedByRoles {
                resource_id: "2".to_string(),
                role_ids: vec!["editor".to_string()],
            }]
        );

        engine
            .unassign_resources("editor", &["2".to_string()])
            .await
            .unwrap();
        engine.delete_resource("2").await.unwrap();
        assert!(engine.validate_resource_tree().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_role_drops_grants() {
        let engine = engine().await;
        engine
            .put_role(Role::new("editor", "Editors").with_resources(["1"]))
            .await
            .unwrap();
        let roles = vec!["editor".to_string()];
        assert!(engine
            .check_permission(&roles, &ResourceRef::id("1"))
            .await
            .unwrap());

        engine.delete_role("editor").await.unwrap();
        assert!(!engine
            .check_permission(&roles, &ResourceRef::id("1"))
            .await
            .unwrap());
    }
}
