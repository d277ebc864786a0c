//! Resource hierarchy
//!
//! Builds an arena-backed forest from flat resource records and validates its
//! structural invariants.
//!
//! # Features
//!
//! - **Lenient building**: records whose parent is missing from the input
//!   become roots, so partial catalog views still render
//! - **Stable ordering**: siblings ordered by `sort_order`, then id
//! - **Cycle containment**: parent cycles never hang a walk; one member is
//!   promoted to root and the validator reports the cycle
//! - **Structural validation**: code uniqueness, `whole_id` chaining, cycles,
//!   sort order, with an optional strict mode for dangling parents
//!
//! # Example
//!
//! ```rust
//! use cretoai_rbac::tree::{ResourceTree, TreeValidator};
//! use cretoai_rbac::{NewResource, ResourceType};
//!
//! let system = NewResource::new("System", ResourceType::Menu)
//!     .with_path("/system")
//!     .build("1", None)
//!     .unwrap();
//! let tree = ResourceTree::from_resources(vec![system]);
//!
//! assert!(TreeValidator::strict().validate(&tree).is_empty());
//! ```

pub mod builder;
pub mod validator;


pub use builder::{PreOrder, ResourceTree, ResourceTreeBuilder, TreeNode};
pub use validator::{TreeValidator, ValidationMode, Violation};
