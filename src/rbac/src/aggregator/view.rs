//! Permission tree views
//!
//! Projection of a [`ResourceTree`] against a grant set. A node is assigned
//! when its own id is granted; granting a parent never grants its children.
//! An unassigned node with an assigned or indeterminate descendant is
//! indeterminate, which drives the half-checked state of tree pickers.

use crate::tree::ResourceTree;
use crate::types::{ResourceId, ResourceRef, ResourceType};
use serde::{Deserialize, Serialize};

/// Node of a permission tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionTreeNode {
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,
    pub res_code: String,
    pub is_assigned: bool,
    pub is_indeterminate: bool,
    pub level: usize,
    #[serde(default)]
    pub children: Vec<PermissionTreeNode>,
}

impl PermissionTreeNode {
    /// Number of nodes in this subtree, including this one
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
    }
}

/// Resolved permissions for a set of roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionView {
    /// Permission forest, roots in sibling order
    pub tree: Vec<PermissionTreeNode>,

    /// Assigned resource ids, in tree pre-order
    pub assigned_ids: Vec<ResourceId>,

    /// Whether a super-admin role granted everything
    pub super_admin: bool,
}

impl PermissionView {
    /// Project `tree` against a grant predicate
    pub fn project<F>(tree: &ResourceTree, super_admin: bool, is_granted: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let mut assigned_ids = Vec::new();
        let roots = tree
            .roots()
            .iter()
            .map(|&root| project_node(tree, root, &is_granted, &mut assigned_ids))
            .collect();

        Self {
            tree: roots,
            assigned_ids,
            super_admin,
        }
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.tree.iter().map(PermissionTreeNode::subtree_len).sum()
    }

    /// Whether the view has no nodes
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Nodes in pre-order
    pub fn iter(&self) -> impl Iterator<Item = &PermissionTreeNode> {
        let mut stack: Vec<&PermissionTreeNode> = self.tree.iter().rev().collect();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Node for a resource reference
    pub fn find(&self, resource: &ResourceRef) -> Option<&PermissionTreeNode> {
        self.iter().find(|node| match resource {
            ResourceRef::Id(id) => node.resource_id == *id,
            ResourceRef::Code(res_code) => node.res_code == *res_code,
        })
    }

    /// Whether the referenced resource is assigned
    ///
    /// Resources outside the view are not assigned.
    pub fn is_assigned(&self, resource: &ResourceRef) -> bool {
        match resource {
            ResourceRef::Id(id) => self.assigned_ids.iter().any(|assigned| assigned == id),
            ResourceRef::Code(_) => self
                .find(resource)
                .is_some_and(|node| self.assigned_ids.contains(&node.resource_id)),
        }
    }
}

fn project_node<F>(
    tree: &ResourceTree,
    index: usize,
    is_granted: &F,
    assigned_ids: &mut Vec<ResourceId>,
) -> PermissionTreeNode
where
    F: Fn(&str) -> bool,
{
    let node = &tree.nodes()[index];
    let resource = &node.resource;

    let is_assigned = is_granted(&resource.id);
    if is_assigned {
        assigned_ids.push(resource.id.clone());
    }

    let children: Vec<PermissionTreeNode> = node
        .children
        .iter()
        .map(|&child| project_node(tree, child, is_granted, assigned_ids))
        .collect();

    let is_indeterminate =
        !is_assigned && children.iter().any(|c| c.is_assigned || c.is_indeterminate);

    PermissionTreeNode {
        resource_id: resource.id.clone(),
        resource_name: resource.name.clone(),
        resource_type: resource.resource_type,
        resource_path: resource.path.clone(),
        res_code: resource.res_code.clone(),
        is_assigned,
        is_indeterminate,
        level: node.level,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewResource, Resource};

    fn catalog() -> Vec<Resource> {
        let system = NewResource::new("System", ResourceType::Menu)
            .with_path("/system")
            .build("1", None)
            .unwrap();
        let users = NewResource::new("Users", ResourceType::Page)
            .with_path("/system/users")
            .with_parent("1")
            .build("2", Some(&system))
            .unwrap();
        let detail = NewResource::new("User detail", ResourceType::Api)
            .with_path("/api/users/:id")
            .with_parent("2")
            .build("3", Some(&users))
            .unwrap();
        vec![system, users, detail]
    }

    #[test]
    fn test_indeterminate_propagates_up() {
        let tree = ResourceTree::from_resources(catalog());
        let view = PermissionView::project(&tree, false, |id| id == "3");

        let system = &view.tree[0];
        let users = &system.children[0];
        assert!(!system.is_assigned && system.is_indeterminate);
        assert!(!users.is_assigned && users.is_indeterminate);
        assert!(users.children[0].is_assigned);
        assert!(!users.children[0].is_indeterminate);
        assert_eq!(view.assigned_ids, vec!["3"]);
    }

    #[test]
    fn test_assigned_parent_does_not_grant_children() {
        let tree = ResourceTree::from_resources(catalog());
        let view = PermissionView::project(&tree, false, |id| id == "1");

        let system = &view.tree[0];
        assert!(system.is_assigned);
        assert!(!system.is_indeterminate);
        assert!(!system.children[0].is_assigned);
        assert!(view.is_assigned(&ResourceRef::id("1")));
        assert!(!view.is_assigned(&ResourceRef::code("API_users_id")));
    }

    #[test]
    fn test_iter_and_find() {
        let tree = ResourceTree::from_resources(catalog());
        let view = PermissionView::project(&tree, false, |_| false);

        let ids: Vec<&str> = view.iter().map(|n| n.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(view.len(), 3);
        assert_eq!(view.find(&ResourceRef::code("PAGE_system_users")).unwrap().level, 1);
        assert!(view.find(&ResourceRef::id("9")).is_none());
    }

    #[test]
    fn test_serializes_camel_case() {
        let tree = ResourceTree::from_resources(catalog());
        let view = PermissionView::project(&tree, false, |id| id == "2");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["assignedIds"][0], "2");
        assert_eq!(json["superAdmin"], false);
        assert_eq!(json["tree"][0]["resCode"], "MENU_system");
        assert_eq!(json["tree"][0]["isIndeterminate"], true);
        assert_eq!(json["tree"][0]["children"][0]["isAssigned"], true);
        assert_eq!(json["tree"][0]["resourceType"], "MENU");
    }
}
