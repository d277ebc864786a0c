//! # CretoAI Resource RBAC
//!
//! Resource-based access control core: menus, pages, API endpoints and
//! modules form a resource tree; roles attach resources directly; a set of
//! roles resolves into a permission tree for UIs and into allow/deny checks
//! for enforcement points.
//!
//! ## Features
//!
//! - **Resource codes**: canonical, type-prefixed identifiers generated from
//!   paths (`API_users_id`) or manual suffixes (`MODULE_user_export`)
//! - **Arena-backed resource trees** built leniently from flat records
//! - **Structural validation** on write paths (unique codes, `whole_id`
//!   chains, cycles, sort order)
//! - **Permission aggregation** with assigned and indeterminate node states
//! - **Single-flight caching** of role grants and the catalog
//! - **Async-first design** using Tokio runtime
//!
//! ## Example
//!
//! ```rust
//! use cretoai_rbac::{NewResource, RbacConfig, RbacEngine, ResourceRef, ResourceType, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = RbacEngine::in_memory(RbacConfig::default())?;
//!
//!     let system = engine
//!         .create_resource(NewResource::new("System", ResourceType::Menu).with_path("/system"))
//!         .await?;
//!     let detail = engine
//!         .create_resource(
//!             NewResource::new("User detail", ResourceType::Api)
//!                 .with_path("/api/users/:id")
//!                 .with_parent(system.id.clone()),
//!         )
//!         .await?;
//!     assert_eq!(detail.res_code, "API_users_id");
//!
//!     engine
//!         .put_role(Role::new("support", "Support").with_resources([detail.id.clone()]))
//!         .await?;
//!
//!     let roles = vec!["support".to_string()];
//!     let view = engine.preview_by_role_ids(&roles).await?;
//!     assert!(view.tree[0].is_indeterminate);
//!     assert!(engine.check_permission(&roles, &ResourceRef::code("API_users_id")).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod cache;
pub mod code;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod tree;
pub mod types;

// Re-export commonly used types
pub use aggregator::{GrantSet, PermissionAggregator, PermissionTreeNode, PermissionView, RoleGrant};
pub use cache::{CacheConfig, CacheStats, SingleFlightCache};
pub use config::{RbacConfig, ValidationConfig};
pub use engine::{EngineStats, RbacEngine};
pub use error::{RbacError, Result};
pub use store::{InMemoryResourceStore, InMemoryRoleStore, ResourceStore, RoleStore};
pub use tree::{ResourceTree, ResourceTreeBuilder, TreeNode, TreeValidator, ValidationMode, Violation};
pub use types::{
    NewResource, Resource, ResourceId, ResourceRef, ResourceType, ResourceUpdate, Role, RoleId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
