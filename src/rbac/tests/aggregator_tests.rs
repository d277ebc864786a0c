//! Permission aggregation integration tests
//!
//! Resolution semantics over real stores, plus cache coalescing and failure
//! behaviour under concurrent resolution.

use async_trait::async_trait;
use cretoai_rbac::{
    InMemoryResourceStore, InMemoryRoleStore, NewResource, PermissionAggregator, RbacConfig,
    RbacError, Resource, ResourceId, ResourceRef, ResourceStore, ResourceType, Result, Role,
    RoleId, RoleStore,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};

/// Role store that counts reads and can be made to fail
struct CountingRoleStore {
    inner: InMemoryRoleStore,
    reads: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl CountingRoleStore {
    fn new(roles: Vec<Role>, delay: Duration) -> Self {
        Self {
            inner: InMemoryRoleStore::with_roles(roles),
            reads: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleStore for CountingRoleStore {
    async fn get_role(&self, role_id: &str) -> Result<Role> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(RbacError::Internal("role backend unavailable".to_string()));
        }
        self.inner.get_role(role_id).await
    }

    async fn get_resource_ids(&self, role_id: &str) -> Result<HashSet<ResourceId>> {
        self.inner.get_resource_ids(role_id).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        self.inner.list_roles().await
    }

    async fn put_role(&self, role: Role) -> Result<()> {
        self.inner.put_role(role).await
    }

    async fn delete_role(&self, role_id: &str) -> Result<Role> {
        self.inner.delete_role(role_id).await
    }

    async fn assign(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()> {
        self.inner.assign(role_id, resource_ids).await
    }

    async fn unassign(&self, role_id: &str, resource_ids: &[ResourceId]) -> Result<()> {
        self.inner.unassign(role_id, resource_ids).await
    }

    async fn roles_referencing(&self, resource_id: &str) -> Result<Vec<RoleId>> {
        self.inner.roles_referencing(resource_id).await
    }
}

/// system(1)
/// ├── users(2)
/// │   ├── GET /api/users/:id (3)
/// │   └── MODULE user_export (4)
/// └── roles(5)
/// audit(6)
async fn catalog_store() -> InMemoryResourceStore {
    let store = InMemoryResourceStore::new();
    let inputs = vec![
        NewResource::new("System", ResourceType::Menu).with_path("/system"),
        NewResource::new("Users", ResourceType::Page)
            .with_path("/system/users")
            .with_parent("1"),
        NewResource::new("User detail", ResourceType::Api)
            .with_path("/api/users/:id")
            .with_parent("2"),
        NewResource::new("Export users", ResourceType::Module)
            .with_suffix("user_export")
            .with_parent("2")
            .with_sort_order(1),
        NewResource::new("Roles", ResourceType::Page)
            .with_path("/system/roles")
            .with_parent("1")
            .with_sort_order(1),
        NewResource::new("Audit", ResourceType::Menu)
            .with_path("/audit")
            .with_sort_order(1),
    ];
    for input in inputs {
        store.create(input).await.unwrap();
    }
    store
}

fn roles(ids: &[&str]) -> Vec<RoleId> {
    ids.iter().map(|id| id.to_string()).collect()
}

async fn aggregator_with(role_store: Arc<dyn RoleStore>) -> PermissionAggregator {
    PermissionAggregator::new(role_store, Arc::new(catalog_store().await), &RbacConfig::default())
}

// ============================================================================
// RESOLUTION SEMANTICS
// ============================================================================

#[tokio::test]
async fn test_two_resource_scenario() {
    let system = NewResource::new("System", ResourceType::Menu)
        .with_path("/system")
        .build("1", None)
        .unwrap();
    let detail = NewResource::new("User detail", ResourceType::Api)
        .with_path("/api/users/:id")
        .with_parent("1")
        .build("2", Some(&system))
        .unwrap();
    assert_eq!(detail.res_code, "API_users_id");

    let role_store = Arc::new(InMemoryRoleStore::with_roles([
        Role::new("r", "R").with_resources(["2"]),
    ]));
    let aggregator = aggregator_with(role_store).await;

    let view = aggregator
        .resolve(&roles(&["r"]), &[system, detail])
        .await
        .unwrap();

    let node1 = &view.tree[0];
    let node2 = &node1.children[0];
    assert_eq!(node1.resource_id, "1");
    assert!(!node1.is_assigned);
    assert!(node1.is_indeterminate);
    assert!(node2.is_assigned);
    assert_eq!(view.assigned_ids, vec!["2"]);
}

#[tokio::test]
async fn test_preview_against_full_catalog() {
    let role_store = Arc::new(InMemoryRoleStore::with_roles([
        Role::new("support", "Support").with_resources(["3", "6"]),
        Role::new("exporter", "Exporter").with_resources(["4"]),
    ]));
    let aggregator = aggregator_with(role_store).await;

    let view = aggregator
        .preview_by_role_ids(&roles(&["support", "exporter"]))
        .await
        .unwrap();

    let order: Vec<&str> = view.iter().map(|n| n.resource_id.as_str()).collect();
    assert_eq!(order, vec!["1", "2", "3", "4", "5", "6"]);
    assert_eq!(view.assigned_ids, vec!["3", "4", "6"]);

    let find = |id: &str| view.find(&ResourceRef::id(id)).unwrap();
    assert!(find("1").is_indeterminate);
    assert!(find("2").is_indeterminate);
    assert!(!find("5").is_assigned && !find("5").is_indeterminate);
    assert!(find("6").is_assigned && !find("6").is_indeterminate);
    assert_eq!(find("4").level, 2);
}

#[tokio::test]
async fn test_resolve_is_idempotent() {
    let role_store = Arc::new(InMemoryRoleStore::with_roles([
        Role::new("support", "Support").with_resources(["2", "5"]),
    ]));
    let aggregator = aggregator_with(role_store).await;
    let role_ids = roles(&["support"]);

    let first = aggregator.preview_by_role_ids(&role_ids).await.unwrap();
    let second = aggregator.preview_by_role_ids(&role_ids).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_empty_role_set_is_unassigned() {
    let aggregator = aggregator_with(Arc::new(InMemoryRoleStore::new())).await;
    let view = aggregator.preview_by_role_ids(&[]).await.unwrap();

    assert_eq!(view.len(), 6);
    assert!(view.assigned_ids.is_empty());
    assert!(view.iter().all(|n| !n.is_assigned && !n.is_indeterminate));
}

#[tokio::test]
async fn test_super_admin_assigns_every_node() {
    let role_store = Arc::new(InMemoryRoleStore::with_roles([
        Role::new("root", "Root").super_admin(),
        Role::new("support", "Support").with_resources(["3"]),
    ]));
    let aggregator = aggregator_with(role_store).await;

    let view = aggregator
        .preview_by_role_ids(&roles(&["support", "root"]))
        .await
        .unwrap();

    assert!(view.super_admin);
    assert_eq!(view.assigned_ids.len(), 6);
    assert!(view.iter().all(|n| n.is_assigned && !n.is_indeterminate));
}

#[tokio::test]
async fn test_inactive_super_admin_grants_nothing() {
    let role_store = Arc::new(InMemoryRoleStore::with_roles([
        Role::new("root", "Root").super_admin().inactive(),
    ]));
    let aggregator = aggregator_with(role_store).await;

    let view = aggregator.preview_by_role_ids(&roles(&["root"])).await.unwrap();
    assert!(!view.super_admin);
    assert!(view.assigned_ids.is_empty());
}

#[tokio::test]
async fn test_check_agrees_with_assigned_ids() {
    let role_store = Arc::new(InMemoryRoleStore::with_roles([
        Role::new("support", "Support").with_resources(["1", "4"]),
    ]));
    let aggregator = aggregator_with(role_store).await;
    let role_ids = roles(&["support"]);

    let view = aggregator.preview_by_role_ids(&role_ids).await.unwrap();
    for node in view.iter() {
        let expected = view.assigned_ids.contains(&node.resource_id);
        let by_id = aggregator
            .check(&role_ids, &ResourceRef::id(node.resource_id.clone()))
            .await
            .unwrap();
        let by_code = aggregator
            .check(&role_ids, &ResourceRef::code(node.res_code.clone()))
            .await
            .unwrap();
        assert_eq!(by_id, expected, "id check for {}", node.resource_id);
        assert_eq!(by_code, expected, "code check for {}", node.res_code);
    }

    // Parent grant does not cover children
    assert!(aggregator.check(&role_ids, &ResourceRef::id("1")).await.unwrap());
    assert!(!aggregator.check(&role_ids, &ResourceRef::id("2")).await.unwrap());
    assert!(aggregator
        .check(&role_ids, &ResourceRef::code("MODULE_user_export"))
        .await
        .unwrap());
    assert!(!aggregator.check(&role_ids, &ResourceRef::id("404")).await.unwrap());
}

#[tokio::test]
async fn test_partial_catalog_keeps_orphans() {
    let role_store = Arc::new(InMemoryRoleStore::with_roles([
        Role::new("support", "Support").with_resources(["3"]),
    ]));
    let aggregator = aggregator_with(role_store).await;

    let full: Vec<Resource> = catalog_store().await.list_all().await.unwrap();
    let partial: Vec<Resource> = full.into_iter().filter(|r| r.id != "1").collect();

    let view = aggregator.resolve(&roles(&["support"]), &partial).await.unwrap();
    let roots: Vec<&str> = view.tree.iter().map(|n| n.resource_id.as_str()).collect();
    assert_eq!(roots, vec!["2", "5", "6"]);
    assert_eq!(view.len(), 5);
    assert!(view.tree[0].is_indeterminate);
}

// ============================================================================
// CACHING AND CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_previews_fetch_each_role_once() {
    let role_store = Arc::new(CountingRoleStore::new(
        vec![
            Role::new("a", "A").with_resources(["3"]),
            Role::new("b", "B").with_resources(["5"]),
        ],
        Duration::from_millis(50),
    ));
    let aggregator = Arc::new(aggregator_with(role_store.clone()).await);

    let mut join_set = JoinSet::new();
    for _ in 0..10 {
        let aggregator = aggregator.clone();
        join_set.spawn(async move {
            aggregator
                .preview_by_role_ids(&roles(&["a", "b"]))
                .await
                .map(|view| view.assigned_ids)
        });
    }

    while let Some(result) = join_set.join_next().await {
        assert_eq!(result.unwrap().unwrap(), vec!["3", "5"]);
    }

    assert_eq!(role_store.reads(), 2, "one fetch per role");
    let stats = aggregator.grant_cache_stats();
    assert_eq!(stats.fetches, 2);
    assert_eq!(stats.failures, 0);
    assert_eq!(aggregator.catalog_cache_stats().fetches, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_fetch_is_shared_then_retried() {
    let role_store = Arc::new(CountingRoleStore::new(
        vec![Role::new("a", "A").with_resources(["3"])],
        Duration::from_millis(50),
    ));
    role_store.failing.store(true, Ordering::SeqCst);
    let aggregator = Arc::new(aggregator_with(role_store.clone()).await);

    let mut join_set = JoinSet::new();
    for _ in 0..6 {
        let aggregator = aggregator.clone();
        join_set.spawn(async move { aggregator.preview_by_role_ids(&roles(&["a"])).await });
    }

    while let Some(result) = join_set.join_next().await {
        match result.unwrap() {
            Err(RbacError::CacheFetchFailure { key, source }) => {
                assert_eq!(key, "a");
                assert!(matches!(*source, RbacError::Internal(_)));
            }
            other => panic!("expected a shared fetch failure, got {:?}", other),
        }
    }
    assert_eq!(role_store.reads(), 1);

    // Failures are not cached; the next call retries
    role_store.failing.store(false, Ordering::SeqCst);
    let view = aggregator.preview_by_role_ids(&roles(&["a"])).await.unwrap();
    assert_eq!(view.assigned_ids, vec!["3"]);
    assert_eq!(role_store.reads(), 2);
}

#[tokio::test]
async fn test_unknown_role_is_cached_until_invalidated() {
    let role_store = Arc::new(CountingRoleStore::new(vec![], Duration::ZERO));
    let aggregator = aggregator_with(role_store.clone()).await;

    for _ in 0..3 {
        let view = aggregator.preview_by_role_ids(&roles(&["ghost"])).await.unwrap();
        assert!(view.assigned_ids.is_empty());
    }
    assert_eq!(role_store.reads(), 1);

    role_store
        .put_role(Role::new("ghost", "Ghost").with_resources(["6"]))
        .await
        .unwrap();
    aggregator.invalidate_role("ghost");

    let view = aggregator.preview_by_role_ids(&roles(&["ghost"])).await.unwrap();
    assert_eq!(view.assigned_ids, vec!["6"]);
    assert_eq!(role_store.reads(), 2);
}
