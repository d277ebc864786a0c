//! Permission aggregation
//!
//! Resolves a set of role ids into a permission tree over the resource
//! catalog.
//!
//! # Architecture
//!
//! ```text
//! role ids ──▶ grant cache (single-flight, per role) ──▶ union ─┐
//!                                                               ├─▶ projection ─▶ PermissionView
//! catalog  ──▶ catalog cache (single-flight) ──▶ ResourceTree ──┘
//! ```
//!
//! Role grants are fetched concurrently. An unknown role degrades to an empty
//! grant, an inactive role grants nothing, and any super-admin role grants
//! every resource.

pub mod view;

pub use view::{PermissionTreeNode, PermissionView};

use crate::cache::{CacheStats, SingleFlightCache};
use crate::config::RbacConfig;
use crate::error::Result;
use crate::store::{ResourceStore, RoleStore};
use crate::tree::ResourceTree;
use crate::types::{Resource, ResourceId, ResourceRef, Role, RoleId};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache key of the full catalog
const CATALOG_KEY: &str = "catalog";

/// What a single role grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    pub role_id: RoleId,
    pub is_super_admin: bool,
    pub resource_ids: HashSet<ResourceId>,
}

impl RoleGrant {
    /// Grant of nothing
    pub fn empty(role_id: impl Into<RoleId>) -> Self {
        Self {
            role_id: role_id.into(),
            is_super_admin: false,
            resource_ids: HashSet::new(),
        }
    }

    /// Grant of a stored role; inactive roles grant nothing
    pub fn from_role(role: Role) -> Self {
        if !role.is_active {
            return Self::empty(role.id);
        }
        Self {
            role_id: role.id,
            is_super_admin: role.is_super_admin,
            resource_ids: role.resources,
        }
    }
}

/// Union of several role grants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    /// Some role is a super admin
    pub super_admin: bool,
    /// Union of directly attached resources
    pub resource_ids: HashSet<ResourceId>,
}

impl GrantSet {
    /// Union of `grants`
    pub fn union<'a, I>(grants: I) -> Self
    where
        I: IntoIterator<Item = &'a RoleGrant>,
    {
        let mut set = Self::default();
        for grant in grants {
            set.super_admin |= grant.is_super_admin;
            set.resource_ids.extend(grant.resource_ids.iter().cloned());
        }
        set
    }

    /// Whether `resource_id` is granted
    pub fn grants(&self, resource_id: &str) -> bool {
        self.super_admin || self.resource_ids.contains(resource_id)
    }
}

/// Resolves role sets into permission views
///
/// Owns the grant and catalog caches; invalidation goes through
/// [`invalidate_role`](Self::invalidate_role),
/// [`invalidate_catalog`](Self::invalidate_catalog) and
/// [`invalidate_all`](Self::invalidate_all).
pub struct PermissionAggregator {
    roles: Arc<dyn RoleStore>,
    resources: Arc<dyn ResourceStore>,
    grant_cache: SingleFlightCache<RoleGrant>,
    catalog_cache: SingleFlightCache<Arc<Vec<Resource>>>,
}

impl PermissionAggregator {
    /// Create a new aggregator over the given stores
    pub fn new(
        roles: Arc<dyn RoleStore>,
        resources: Arc<dyn ResourceStore>,
        config: &RbacConfig,
    ) -> Self {
        Self {
            roles,
            resources,
            grant_cache: SingleFlightCache::new("role_grants", &config.grant_cache),
            catalog_cache: SingleFlightCache::new("resource_catalog", &config.catalog_cache),
        }
    }

    /// Resolve `role_ids` against `catalog`
    ///
    /// # Errors
    ///
    /// - `CacheFetchFailure` if a role store read fails for a reason other
    ///   than the role being unknown
    pub async fn resolve(&self, role_ids: &[RoleId], catalog: &[Resource]) -> Result<PermissionView> {
        let grants = self.collect_grants(role_ids).await?;
        Ok(self.project(role_ids, &grants, catalog))
    }

    /// Resolve `role_ids` against the full catalog
    ///
    /// Read only; the catalog and grants are fetched concurrently through the
    /// caches.
    pub async fn preview_by_role_ids(&self, role_ids: &[RoleId]) -> Result<PermissionView> {
        let (catalog, grants) = futures::join!(self.catalog(), self.collect_grants(role_ids));
        let (catalog, grants) = (catalog?, grants?);
        Ok(self.project(role_ids, &grants, &catalog))
    }

    /// Whether `role_ids` hold the referenced resource
    ///
    /// Agrees with membership in the preview's assigned id list.
    pub async fn check(&self, role_ids: &[RoleId], resource: &ResourceRef) -> Result<bool> {
        let view = self.preview_by_role_ids(role_ids).await?;
        let allowed = view.is_assigned(resource);
        debug!(roles = ?role_ids, resource = %resource, allowed, "permission check");
        Ok(allowed)
    }

    /// Union of the grants of `role_ids`
    ///
    /// Duplicate ids are fetched once. Every fetch settles before the union.
    pub async fn collect_grants(&self, role_ids: &[RoleId]) -> Result<GrantSet> {
        let unique: BTreeSet<&str> = role_ids.iter().map(String::as_str).collect();
        let results = join_all(unique.into_iter().map(|role_id| self.grant(role_id))).await;

        let grants = results.into_iter().collect::<Result<Vec<RoleGrant>>>()?;
        let set = GrantSet::union(&grants);
        if set.super_admin {
            info!(roles = ?role_ids, "super admin role present, granting all resources");
        }
        Ok(set)
    }

    /// Grant of one role, through the cache
    pub async fn grant(&self, role_id: &str) -> Result<RoleGrant> {
        let roles = Arc::clone(&self.roles);
        let owned_id = role_id.to_string();

        self.grant_cache
            .get_or_fetch(role_id, move || async move {
                let role = roles.get_role(&owned_id).await;
                match role {
                    Ok(role) => Ok(RoleGrant::from_role(role)),
                    Err(err) if err.is_not_found() => {
                        warn!(role_id = %owned_id, "unknown role, treating as empty grant");
                        Ok(RoleGrant::empty(owned_id))
                    }
                    Err(err) => Err(err),
                }
            })
            .await
    }

    /// Full catalog, through the cache
    pub async fn catalog(&self) -> Result<Arc<Vec<Resource>>> {
        let resources = Arc::clone(&self.resources);
        self.catalog_cache
            .get_or_fetch(CATALOG_KEY, move || async move {
                let catalog = resources.list_all().await?;
                debug!(resources = catalog.len(), "loaded resource catalog");
                Ok(Arc::new(catalog))
            })
            .await
    }

    /// Drop the cached grant of one role
    pub fn invalidate_role(&self, role_id: &str) {
        self.grant_cache.invalidate(role_id);
    }

    /// Drop the cached catalog
    pub fn invalidate_catalog(&self) {
        self.catalog_cache.invalidate(CATALOG_KEY);
    }

    /// Drop every cached grant and the catalog
    pub fn invalidate_all(&self) {
        self.grant_cache.invalidate_all();
        self.catalog_cache.invalidate_all();
    }

    /// Grant cache statistics
    pub fn grant_cache_stats(&self) -> CacheStats {
        self.grant_cache.stats()
    }

    /// Catalog cache statistics
    pub fn catalog_cache_stats(&self) -> CacheStats {
        self.catalog_cache.stats()
    }

    fn project(&self, role_ids: &[RoleId], grants: &GrantSet, catalog: &[Resource]) -> PermissionView {
        let tree = ResourceTree::from_resources(catalog.iter().cloned());
        let view = PermissionView::project(&tree, grants.super_admin, |id| grants.grants(id));

        debug!(
            roles = ?role_ids,
            resources = tree.len(),
            assigned = view.assigned_ids.len(),
            super_admin = grants.super_admin,
            "resolved permissions"
        );
        view
    }
}
