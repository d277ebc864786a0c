//! In-memory store implementations

use super::{ResourceStore, RoleStore};
use crate::code;
use crate::error::{RbacError, Result};
use crate::tree::builder::compare_ids;
use crate::tree::{TreeValidator, ValidationMode, Violation};
use crate::types::{NewResource, Resource, ResourceId, ResourceUpdate, Role, RoleId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory resource catalog
///
/// Ids are decimal strings from a monotonic counter.
pub struct InMemoryResourceStore {
    resources: Arc<RwLock<HashMap<ResourceId, Resource>>>,
    next_id: AtomicU64,
    validator: TreeValidator,
}

impl InMemoryResourceStore {
    /// Create an empty store validating writes in strict mode
    pub fn new() -> Self {
        Self::with_mode(ValidationMode::Strict)
    }

    /// Create an empty store with an explicit validation mode
    pub fn with_mode(mode: ValidationMode) -> Self {
        Self {
            resources: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            validator: TreeValidator::with_mode(mode),
        }
    }

    /// Create a store seeded with an existing catalog
    ///
    /// # Errors
    ///
    /// - `StructuralViolation` if the catalog is not valid
    pub fn with_resources(resources: Vec<Resource>, mode: ValidationMode) -> Result<Self> {
        let validator = TreeValidator::with_mode(mode);
        validator.validate_catalog_or_err(&resources)?;

        let next_id = resources
            .iter()
            .filter_map(|r| r.id.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1);

        let resources = resources.into_iter().map(|r| (r.id.clone(), r)).collect();

        Ok(Self {
            resources: Arc::new(RwLock::new(resources)),
            next_id: AtomicU64::new(next_id),
            validator,
        })
    }

    /// Validation mode applied to writes
    pub fn validation_mode(&self) -> ValidationMode {
        self.validator.mode()
    }

    fn allocate_id(&self, existing: &HashMap<ResourceId, Resource>) -> ResourceId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            if !existing.contains_key(&id) {
                return id;
            }
        }
    }

    /// Validate the catalog as it would be after replacing `changed`
    fn check_candidate(
        &self,
        resources: &HashMap<ResourceId, Resource>,
        changed: &[Resource],
    ) -> Result<()> {
        let mut candidate: HashMap<&str, &Resource> =
            resources.iter().map(|(id, r)| (id.as_str(), r)).collect();
        for resource in changed {
            candidate.insert(resource.id.as_str(), resource);
        }
        let candidate = sorted(candidate.into_values().cloned().collect());

        self.validator.validate_catalog_or_err(&candidate)
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut resources: Vec<Resource>) -> Vec<Resource> {
    resources.sort_by(|a, b| compare_ids(&a.id, &b.id));
    resources
}

fn not_found(id: &str) -> RbacError {
    RbacError::NotFound(format!("resource '{}'", id))
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn list_all(&self) -> Result<Vec<Resource>> {
        let resources = self.resources.read().await;
        Ok(sorted(resources.values().cloned().collect()))
    }

    async fn get_by_id(&self, id: &str) -> Result<Resource> {
        let resources = self.resources.read().await;
        resources.get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn list_children(&self, parent_id: Option<&str>) -> Result<Vec<Resource>> {
        let resources = self.resources.read().await;
        if let Some(parent_id) = parent_id {
            if !resources.contains_key(parent_id) {
                return Err(not_found(parent_id));
            }
        }

        let mut children: Vec<Resource> = resources
            .values()
            .filter(|r| r.parent_id.as_deref() == parent_id)
            .cloned()
            .collect();
        children.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| compare_ids(&a.id, &b.id))
        });
        Ok(children)
    }

    async fn create(&self, input: NewResource) -> Result<Resource> {
        let mut resources = self.resources.write().await;

        let parent = match &input.parent_id {
            Some(parent_id) => Some(
                resources
                    .get(parent_id)
                    .cloned()
                    .ok_or_else(|| not_found(parent_id))?,
            ),
            None => None,
        };

        let id = self.allocate_id(&resources);
        let resource = input.build(id, parent.as_ref())?;
        self.check_candidate(&resources, std::slice::from_ref(&resource))?;

        info!(
            resource_id = %resource.id,
            res_code = %resource.res_code,
            whole_id = %resource.whole_id,
            "created resource"
        );
        resources.insert(resource.id.clone(), resource.clone());
        Ok(resource)
    }

    async fn update(&self, id: &str, update: ResourceUpdate) -> Result<Resource> {
        let mut resources = self.resources.write().await;

        let mut resource = resources.get(id).cloned().ok_or_else(|| not_found(id))?;
        update.apply(&mut resource);
        self.check_candidate(&resources, std::slice::from_ref(&resource))?;

        debug!(resource_id = %id, "updated resource");
        resources.insert(resource.id.clone(), resource.clone());
        Ok(resource)
    }

    async fn move_to(&self, id: &str, new_parent_id: Option<&str>) -> Result<Resource> {
        let mut resources = self.resources.write().await;

        let resource = resources.get(id).cloned().ok_or_else(|| not_found(id))?;
        let new_whole_id = match new_parent_id {
            Some(parent_id) => {
                let parent = resources.get(parent_id).ok_or_else(|| not_found(parent_id))?;
                if parent.id == resource.id || code::is_descendant_of(&parent.whole_id, id) {
                    // Cycle through the subtree: id -> ... -> new parent -> id
                    let mut resource_ids: Vec<ResourceId> = code::whole_id_segments(&parent.whole_id)
                        .skip_while(|segment| *segment != id)
                        .map(str::to_string)
                        .collect();
                    if resource_ids.is_empty() {
                        resource_ids.push(id.to_string());
                    }
                    resource_ids.push(id.to_string());
                    return Err(RbacError::StructuralViolation(vec![Violation::Cycle {
                        resource_ids,
                    }]));
                }
                code::derive_whole_id(code::whole_id_segments(&parent.whole_id), id)
            }
            None => id.to_string(),
        };

        let old_whole_id = resource.whole_id.clone();
        let mut changed = Vec::new();
        for other in resources.values() {
            if other.id == id {
                continue;
            }
            if let Some(rebased) = code::rebase_whole_id(&other.whole_id, &old_whole_id, &new_whole_id) {
                let mut other = other.clone();
                other.whole_id = rebased;
                changed.push(other);
            }
        }

        let mut moved = resource;
        moved.parent_id = new_parent_id.map(str::to_string);
        moved.whole_id = new_whole_id;
        changed.push(moved.clone());

        self.check_candidate(&resources, &changed)?;

        info!(
            resource_id = %id,
            from = %old_whole_id,
            to = %moved.whole_id,
            rewritten = changed.len(),
            "moved resource"
        );
        for resource in changed {
            resources.insert(resource.id.clone(), resource);
        }
        Ok(moved)
    }

    async fn delete(&self, id: &str) -> Result<Resource> {
        let mut resources = self.resources.write().await;

        if !resources.contains_key(id) {
            return Err(not_found(id));
        }

        let child_ids: Vec<ResourceId> = sorted(
            resources
                .values()
                .filter(|r| r.parent_id.as_deref() == Some(id))
                .cloned()
                .collect(),
        )
        .into_iter()
        .map(|r| r.id)
        .collect();
        if !child_ids.is_empty() {
            return Err(RbacError::StructuralViolation(vec![Violation::HasChildren {
                resource_id: id.to_string(),
                child_ids,
            }]));
        }

        let removed = resources.remove(id).ok_or_else(|| not_found(id))?;
        info!(resource_id = %id, res_code = %removed.res_code, "deleted resource");
        Ok(removed)
    }
}

/// In-memory role store
pub struct InMemoryRoleStore {
    roles: Arc<RwLock<HashMap<RoleId, Role>>>,
}

impl InMemoryRoleStore {
    /// Create a new in-memory role store
    pub fn new() -> Self {
        Self {
            roles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a store seeded with roles
    pub fn with_roles<I>(roles: I) -> Self
    where
        I: IntoIterator<Item = Role>,
    {
        Self {
            roles: Arc::new(RwLock::new(
                roles.into_iter().map(|r| (r.id.clone(), r)).collect(),
            )),
        }
    }
}

impl Default for InMemoryRoleStore {
    fn default() -> Self {
        Self::new()
    }
}

fn role_not_found(role_id: &str) -> RbacError {
    RbacError::NotFound(format!("role '{}'", role_id))
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn get_role(&self, role_id: &str) -> Result<Role> {
        let roles = self.roles.read().await;
        roles.get(role_id).cloned().ok_or_else(|| role_not_found(role_id))
    }

    async fn get_resource_ids(&self, role_id: &str) -> Result<HashSet<ResourceId>> {
        let roles = self.roles.read().await;
        roles
            .get(role_id)
            .map(|role| role.resources.clone())
            .ok_or_else(|| role_not_found(role_id))
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let roles = self.roles.read().await;
        let mut roles: Vec<Role> = roles.values().cloned().collect();
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(roles)
    }

    async fn put_role(&self, role: Role) -> Result<()> {
        let mut roles = self.roles.write().await;
        debug!(role_id = %role.id, resources = role.resources.len(), "stored role");
        roles.insert(role.id.clone(), role);
        Ok(())
    }

    async fn delete_role(&self, role_id: &str) -> Result<Role> {
        let mut roles = self.roles.write().await;
        let removed = roles.remove(role_id).ok_or_else(|| role_not_found(role_id))?;
        info!(role_id = %role_id, "deleted role");
        Ok(removed)
    }

    async fn assign(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()> {
        let mut roles = self.roles.write().await;
        let role = roles.get_mut(role_id).ok_or_else(|| role_not_found(role_id))?;
        role.resources.extend(resource_ids.iter().cloned());
        debug!(role_id = %role_id, assigned = resource_ids.len(), "assigned resources");
        Ok(())
    }

    async fn unassign(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()> {
        let mut roles = self.roles.write().await;
        let role = roles.get_mut(role_id).ok_or_else(|| role_not_found(role_id))?;
        for resource_id in resource_ids {
            role.resources.remove(resource_id);
        }
        debug!(role_id = %role_id, unassigned = resource_ids.len(), "unassigned resources");
        Ok(())
    }

    async fn roles_referencing(&self, resource_id: &str) -> Result<Vec<RoleId>> {
        let roles = self.roles.read().await;
        let mut role_ids: Vec<RoleId> = roles
            .values()
            .filter(|role| role.resources.contains(resource_id))
            .map(|role| role.id.clone())
            .collect();
        role_ids.sort();
        Ok(role_ids)
    }
}
