//! Arena-backed resource forest built from flat records
//!
//! Nodes live in a flat `Vec` and refer to each other by index, so the forest
//! has no ownership cycles and cheap copies of child lists.

use crate::types::{Resource, ResourceId};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

/// Node of a [`ResourceTree`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// The resource record
    pub resource: Resource,

    /// Index of the parent node, `None` for roots
    pub parent: Option<usize>,

    /// Child node indices, in sibling order
    pub children: Vec<usize>,

    /// Depth from the root (roots are 0)
    pub level: usize,
}

impl TreeNode {
    fn new(resource: Resource) -> Self {
        Self {
            resource,
            parent: None,
            children: Vec::new(),
            level: 0,
        }
    }

    /// Resource id
    pub fn id(&self) -> &str {
        &self.resource.id
    }
}

/// Forest of resources
///
/// Every input record appears exactly once, whatever the input order.
#[derive(Debug, Clone, Default)]
pub struct ResourceTree {
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceTree {
    /// Build a forest from flat records
    pub fn from_resources<I>(resources: I) -> Self
    where
        I: IntoIterator<Item = Resource>,
    {
        let mut builder = ResourceTreeBuilder::new();
        builder.extend(resources);
        builder.build()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the forest is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root node indices, in sibling order
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// All nodes, in input order
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Node at `index`
    pub fn node(&self, index: usize) -> Option<&TreeNode> {
        self.nodes.get(index)
    }

    /// Index of the node for `id`
    ///
    /// With duplicate ids this is the first occurrence.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Node for `id`
    pub fn get(&self, id: &str) -> Option<&TreeNode> {
        self.index_of(id).and_then(|i| self.nodes.get(i))
    }

    /// Whether `id` is part of the forest
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Direct children of `id`, in sibling order
    pub fn children_of(&self, id: &str) -> Vec<&Resource> {
        self.get(id)
            .map(|node| {
                node.children
                    .iter()
                    .map(|&child| &self.nodes[child].resource)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ancestor ids of `id`, nearest first
    pub fn ancestors(&self, id: &str) -> Vec<ResourceId> {
        let mut ancestors = Vec::new();
        let mut current = self.get(id).and_then(|node| node.parent);
        while let Some(index) = current {
            let node = &self.nodes[index];
            ancestors.push(node.resource.id.clone());
            current = node.parent;
        }
        ancestors
    }

    /// Ids of every node below `id`, pre-order
    pub fn descendant_ids(&self, id: &str) -> Vec<ResourceId> {
        let Some(start) = self.index_of(id) else {
            return Vec::new();
        };
        let mut stack: Vec<usize> = self.nodes[start].children.iter().rev().copied().collect();
        let mut ids = Vec::new();
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            ids.push(node.resource.id.clone());
            stack.extend(node.children.iter().rev());
        }
        ids
    }

    /// Node with the given resource code
    pub fn find_by_code(&self, res_code: &str) -> Option<&TreeNode> {
        self.nodes.iter().find(|node| node.resource.res_code == res_code)
    }

    /// Number of levels (0 for an empty forest)
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|node| node.level + 1).max().unwrap_or(0)
    }

    /// Pre-order walk over the forest
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder {
            tree: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    /// The resources, in input order
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.nodes.iter().map(|node| &node.resource)
    }
}

/// Pre-order iterator over a [`ResourceTree`]
pub struct PreOrder<'a> {
    tree: &'a ResourceTree,
    stack: Vec<usize>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        let node = &self.tree.nodes[index];
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Builds a [`ResourceTree`] from flat records
///
/// Records without a parent, or whose parent is not part of the input, become
/// roots. Siblings are ordered by `sort_order`, then id, then input order.
///
/// # Example
///
/// ```rust
/// use cretoai_rbac::tree::ResourceTreeBuilder;
/// use cretoai_rbac::{NewResource, ResourceType};
///
/// let system = NewResource::new("System", ResourceType::Menu)
///     .with_path("/system")
///     .build("1", None)
///     .unwrap();
/// let users = NewResource::new("Users", ResourceType::Api)
///     .with_path("/api/users/:id")
///     .with_parent("1")
///     .build("2", Some(&system))
///     .unwrap();
///
/// let mut builder = ResourceTreeBuilder::new();
/// builder.add(users);
/// builder.add(system);
/// let tree = builder.build();
///
/// assert_eq!(tree.roots().len(), 1);
/// assert_eq!(tree.get("2").unwrap().level, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResourceTreeBuilder {
    resources: Vec<Resource>,
}

impl ResourceTreeBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one record
    pub fn add(&mut self, resource: Resource) -> &mut Self {
        self.resources.push(resource);
        self
    }

    /// Add many records
    pub fn extend<I>(&mut self, resources: I) -> &mut Self
    where
        I: IntoIterator<Item = Resource>,
    {
        self.resources.extend(resources);
        self
    }

    /// Build the forest
    pub fn build(self) -> ResourceTree {
        let mut nodes: Vec<TreeNode> = self.resources.into_iter().map(TreeNode::new).collect();

        // Pass 1: id -> node index, first occurrence wins
        let mut index: HashMap<ResourceId, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            index.entry(node.resource.id.clone()).or_insert(i);
        }

        // Pass 2: attach to parent, or to the root list
        let mut roots = Vec::new();
        for i in 0..nodes.len() {
            let parent = nodes[i]
                .resource
                .parent_id
                .as_ref()
                .and_then(|parent_id| index.get(parent_id).copied())
                .filter(|&p| p != i);

            match parent {
                Some(p) => {
                    nodes[i].parent = Some(p);
                    nodes[p].children.push(i);
                }
                None => roots.push(i),
            }
        }

        for i in 0..nodes.len() {
            let mut children = std::mem::take(&mut nodes[i].children);
            children.sort_by(|&a, &b| sibling_order(&nodes, a, b));
            nodes[i].children = children;
        }
        roots.sort_by(|&a, &b| sibling_order(&nodes, a, b));

        let mut visited = vec![false; nodes.len()];
        assign_levels(&mut nodes, &roots, &mut visited);

        // Nodes on a parent cycle are unreachable from every root. Promote one
        // member per cycle so each record is still present exactly once.
        let mut promoted = Vec::new();
        for i in 0..nodes.len() {
            if visited[i] {
                continue;
            }
            let member = cycle_member(&nodes, i);
            if let Some(p) = nodes[member].parent.take() {
                nodes[p].children.retain(|&child| child != member);
            }
            warn!(
                resource_id = %nodes[member].resource.id,
                "resource is part of a parent cycle, promoting to root"
            );
            assign_levels(&mut nodes, &[member], &mut visited);
            promoted.push(member);
        }
        if !promoted.is_empty() {
            roots.extend(promoted);
            roots.sort_by(|&a, &b| sibling_order(&nodes, a, b));
        }

        ResourceTree { nodes, roots, index }
    }
}

/// First node on the parent cycle reached by walking up from `start`
fn cycle_member(nodes: &[TreeNode], start: usize) -> usize {
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current) {
        match nodes[current].parent {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}

/// Breadth-first level assignment from `starts`
fn assign_levels(nodes: &mut [TreeNode], starts: &[usize], visited: &mut [bool]) {
    let mut queue: VecDeque<(usize, usize)> = starts.iter().map(|&i| (i, 0)).collect();
    while let Some((i, level)) = queue.pop_front() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        nodes[i].level = level;
        for &child in &nodes[i].children {
            queue.push_back((child, level + 1));
        }
    }
}

fn sibling_order(nodes: &[TreeNode], a: usize, b: usize) -> Ordering {
    let ra = &nodes[a].resource;
    let rb = &nodes[b].resource;
    ra.sort_order
        .cmp(&rb.sort_order)
        .then_with(|| compare_ids(&ra.id, &rb.id))
        .then_with(|| a.cmp(&b))
}

/// Order ids numerically when both are integers, numeric ids first
pub(crate) fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_ids() {
        assert_eq!(compare_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_ids("10", "a"), Ordering::Less);
        assert_eq!(compare_ids("b", "a"), Ordering::Greater);
        assert_eq!(compare_ids("7", "7"), Ordering::Equal);
    }

    #[test]
    fn test_empty_build() {
        let tree = ResourceTreeBuilder::new().build();
        assert!(tree.is_empty());
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.iter().count(), 0);
    }
}
