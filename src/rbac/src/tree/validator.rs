//! Structural validation of resource forests
//!
//! Runs on write paths (create, move, delete) before a store commits.
//! Checks, in order:
//!
//! 1. `res_code` uniqueness across the catalog
//! 2. `whole_id` chaining (`parent.whole_id + "." + id`, roots are `id`)
//! 3. Parent cycles, walking each parent chain with a visited set and a
//!    catalog-size bound
//! 4. Non-negative `sort_order`
//!
//! followed by duplicate ids, code format and type/prefix agreement, and in
//! strict mode dangling parents.

use super::builder::ResourceTree;
use crate::code;
use crate::error::{RbacError, Result};
use crate::types::{Resource, ResourceId, ResourceType, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;
use tracing::debug;

/// A broken structural invariant
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Two or more resources share a code
    #[error("Duplicate resource code '{res_code}' on {resource_ids:?}")]
    DuplicateResCode {
        res_code: String,
        resource_ids: Vec<ResourceId>,
    },

    /// `whole_id` does not extend the parent chain
    #[error("Resource '{resource_id}' has whole_id '{actual}', expected '{expected}'")]
    WholeIdMismatch {
        resource_id: ResourceId,
        expected: String,
        actual: String,
    },

    /// A resource is its own ancestor
    #[error("Parent cycle detected: {}", .resource_ids.join(" -> "))]
    Cycle { resource_ids: Vec<ResourceId> },

    /// Sibling order below zero
    #[error("Resource '{resource_id}' has negative sort order {sort_order}")]
    NegativeSortOrder {
        resource_id: ResourceId,
        sort_order: i64,
    },

    /// Two records share an id
    #[error("Duplicate resource id '{resource_id}'")]
    DuplicateId { resource_id: ResourceId },

    /// Code does not match the code pattern
    #[error("Resource '{resource_id}' has malformed code '{res_code}'")]
    MalformedResCode {
        resource_id: ResourceId,
        res_code: String,
    },

    /// Code prefix names a different type
    #[error("Resource '{resource_id}' of type {resource_type} has code '{res_code}'")]
    CodePrefixMismatch {
        resource_id: ResourceId,
        resource_type: ResourceType,
        res_code: String,
    },

    /// Parent is not part of the catalog (strict mode)
    #[error("Resource '{resource_id}' references missing parent '{parent_id}'")]
    DanglingParent {
        resource_id: ResourceId,
        parent_id: ResourceId,
    },

    /// Deleting would orphan children
    #[error("Resource '{resource_id}' still has children {child_ids:?}")]
    HasChildren {
        resource_id: ResourceId,
        child_ids: Vec<ResourceId>,
    },

    /// Deleting would leave dangling role attachments
    #[error("Resource '{resource_id}' is still attached to roles {role_ids:?}")]
    ReferencedByRoles {
        resource_id: ResourceId,
        role_ids: Vec<RoleId>,
    },
}

/// How to treat parents missing from the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Missing parents are tolerated (partial catalog views)
    #[default]
    Lenient,
    /// Missing parents are violations (write paths)
    Strict,
}

/// Checks structural invariants over a [`ResourceTree`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeValidator {
    mode: ValidationMode,
}

impl TreeValidator {
    /// Lenient validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict validator (dangling parents are violations)
    pub fn strict() -> Self {
        Self::with_mode(ValidationMode::Strict)
    }

    /// Validator with an explicit mode
    pub fn with_mode(mode: ValidationMode) -> Self {
        Self { mode }
    }

    /// Configured mode
    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Every violation found in `tree`; empty means valid
    pub fn validate(&self, tree: &ResourceTree) -> Vec<Violation> {
        let mut violations = Vec::new();

        check_unique_codes(tree, &mut violations);
        check_whole_ids(tree, &mut violations);
        check_cycles(tree, &mut violations);
        check_sort_orders(tree, &mut violations);
        check_unique_ids(tree, &mut violations);
        check_code_format(tree, &mut violations);
        if self.mode == ValidationMode::Strict {
            check_dangling_parents(tree, &mut violations);
        }

        debug!(
            resources = tree.len(),
            violations = violations.len(),
            mode = ?self.mode,
            "validated resource tree"
        );
        violations
    }

    /// Validate, converting findings into `StructuralViolation`
    pub fn validate_or_err(&self, tree: &ResourceTree) -> Result<()> {
        let violations = self.validate(tree);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(RbacError::StructuralViolation(violations))
        }
    }

    /// Build a forest from flat records and validate it
    pub fn validate_catalog(&self, resources: &[Resource]) -> Vec<Violation> {
        self.validate(&ResourceTree::from_resources(resources.iter().cloned()))
    }

    /// [`validate_catalog`](Self::validate_catalog), converting findings into
    /// `StructuralViolation`
    pub fn validate_catalog_or_err(&self, resources: &[Resource]) -> Result<()> {
        self.validate_or_err(&ResourceTree::from_resources(resources.iter().cloned()))
    }
}

fn check_unique_codes(tree: &ResourceTree, violations: &mut Vec<Violation>) {
    let mut by_code: BTreeMap<&str, Vec<ResourceId>> = BTreeMap::new();
    for resource in tree.resources() {
        by_code
            .entry(resource.res_code.as_str())
            .or_default()
            .push(resource.id.clone());
    }

    for (res_code, resource_ids) in by_code {
        if resource_ids.len() > 1 {
            violations.push(Violation::DuplicateResCode {
                res_code: res_code.to_string(),
                resource_ids,
            });
        }
    }
}

fn check_whole_ids(tree: &ResourceTree, violations: &mut Vec<Violation>) {
    for resource in tree.resources() {
        let expected = match &resource.parent_id {
            None => resource.id.clone(),
            Some(parent_id) if *parent_id == resource.id => continue,
            Some(parent_id) => match tree.get(parent_id) {
                Some(parent) => format!(
                    "{}{}{}",
                    parent.resource.whole_id,
                    code::WHOLE_ID_SEPARATOR,
                    resource.id
                ),
                // Unknown parent chain; reported by strict mode
                None => continue,
            },
        };

        if resource.whole_id != expected {
            violations.push(Violation::WholeIdMismatch {
                resource_id: resource.id.clone(),
                expected,
                actual: resource.whole_id.clone(),
            });
        }
    }
}

fn check_cycles(tree: &ResourceTree, violations: &mut Vec<Violation>) {
    let bound = tree.len();
    let mut reported: HashSet<BTreeSet<ResourceId>> = HashSet::new();

    for resource in tree.resources() {
        let mut path = vec![resource.id.clone()];
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = resource.parent_id.as_deref();
        let mut steps = 0;
        let mut cyclic = false;

        while let Some(parent_id) = current {
            if parent_id == resource.id {
                path.push(parent_id.to_string());
                cyclic = true;
                break;
            }
            // A loop further up that does not include this resource
            if !visited.insert(parent_id) {
                break;
            }
            path.push(parent_id.to_string());
            steps += 1;
            if steps > bound {
                cyclic = true;
                break;
            }
            current = tree
                .get(parent_id)
                .and_then(|node| node.resource.parent_id.as_deref());
        }

        if cyclic {
            let members: BTreeSet<ResourceId> = path.iter().cloned().collect();
            if reported.insert(members) {
                violations.push(Violation::Cycle { resource_ids: path });
            }
        }
    }
}

fn check_sort_orders(tree: &ResourceTree, violations: &mut Vec<Violation>) {
    for resource in tree.resources() {
        if resource.sort_order < 0 {
            violations.push(Violation::NegativeSortOrder {
                resource_id: resource.id.clone(),
                sort_order: resource.sort_order,
            });
        }
    }
}

fn check_unique_ids(tree: &ResourceTree, violations: &mut Vec<Violation>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<&str> = HashSet::new();
    for resource in tree.resources() {
        if !seen.insert(&resource.id) && reported.insert(&resource.id) {
            violations.push(Violation::DuplicateId {
                resource_id: resource.id.clone(),
            });
        }
    }
}

fn check_code_format(tree: &ResourceTree, violations: &mut Vec<Violation>) {
    for resource in tree.resources() {
        if !code::validate(&resource.res_code) {
            violations.push(Violation::MalformedResCode {
                resource_id: resource.id.clone(),
                res_code: resource.res_code.clone(),
            });
        } else if code::extract_type(&resource.res_code) != Some(resource.resource_type) {
            violations.push(Violation::CodePrefixMismatch {
                resource_id: resource.id.clone(),
                resource_type: resource.resource_type,
                res_code: resource.res_code.clone(),
            });
        }
    }
}

fn check_dangling_parents(tree: &ResourceTree, violations: &mut Vec<Violation>) {
    for resource in tree.resources() {
        if let Some(parent_id) = &resource.parent_id {
            if !tree.contains(parent_id) {
                violations.push(Violation::DanglingParent {
                    resource_id: resource.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
        }
    }
}
