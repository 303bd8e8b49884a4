//! Requirement forest: lookup, structural mutation, validation and traversal.
//!
//! Every walk over the forest is iterative with an explicit stack. Walks carry
//! the set of ids on the current root path (cycle detection), the set of ids
//! seen so far (duplicate detection) and a depth ceiling, so malformed plans
//! produce errors instead of unbounded recursion.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::node::{NodeType, RequirementNode};
use crate::errors::{TreeError, ValidationError, ValidationErrors};

/// Default depth ceiling for validation and traversal.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Ordered sequence of root requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementHierarchy {
    roots: Vec<RequirementNode>,
}

impl RequirementHierarchy {
    pub fn new(roots: Vec<RequirementNode>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[RequirementNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of nodes in the forest.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&RequirementNode> = self.roots.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Find a node anywhere in the forest. O(n).
    pub fn get_by_id(&self, id: &str) -> Option<&RequirementNode> {
        let mut stack: Vec<&RequirementNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if node.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get_by_id(id).is_some()
    }

    fn get_by_id_mut(&mut self, id: &str) -> Option<&mut RequirementNode> {
        let mut stack: Vec<&mut RequirementNode> = self.roots.iter_mut().collect();
        while let Some(node) = stack.pop() {
            if node.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter_mut());
        }
        None
    }

    /// Append a root, keeping its id. Rejects ids already in the forest.
    pub fn add_root(&mut self, mut node: RequirementNode) -> Result<(), TreeError> {
        if let Some(dup) = self.first_existing_id(&node) {
            return Err(TreeError::DuplicateId { node_id: dup });
        }
        node.parent_id = None;
        self.roots.push(node);
        Ok(())
    }

    /// Append `node` under `parent_id` with the next sequential id.
    ///
    /// The added subtree is renumbered so every descendant follows the
    /// `<parent>.<n>` scheme. Returns the id assigned to `node`.
    pub fn add_child(
        &mut self,
        parent_id: &str,
        mut node: RequirementNode,
    ) -> Result<String, TreeError> {
        let next_index = self
            .get_by_id(parent_id)
            .map(|parent| parent.children.len())
            .ok_or_else(|| TreeError::ParentNotFound {
                parent_id: parent_id.to_string(),
            })?;

        node.id = format!("{}.{}", parent_id, next_index + 1);
        node.parent_id = Some(parent_id.to_string());
        renumber_descendants(&mut node);

        if let Some(dup) = self.first_existing_id(&node) {
            return Err(TreeError::DuplicateId { node_id: dup });
        }

        let assigned = node.id.clone();
        let parent = self
            .get_by_id_mut(parent_id)
            .ok_or_else(|| TreeError::ParentNotFound {
                parent_id: parent_id.to_string(),
            })?;
        parent.children.push(node);
        Ok(assigned)
    }

    /// First id in `subtree` (pre-order) that already exists in the forest,
    /// or that repeats within the subtree itself.
    fn first_existing_id(&self, subtree: &RequirementNode) -> Option<String> {
        let existing: HashSet<&str> = self
            .preorder(usize::MAX)
            .map(|(n, _)| n.id.as_str())
            .collect();
        let mut local: HashSet<&str> = HashSet::new();
        let mut stack = vec![subtree];
        while let Some(node) = stack.pop() {
            if existing.contains(node.id.as_str()) || !local.insert(node.id.as_str()) {
                return Some(node.id.clone());
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Validate with the default depth ceiling.
    pub fn validate(&self) -> ValidationErrors {
        self.validate_with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Validate the forest. Errors are reported in pre-order, so validating an
    /// unmodified tree twice yields equal results.
    pub fn validate_with_max_depth(&self, max_depth: usize) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.roots.is_empty() {
            errors.push(ValidationError::EmptyHierarchy);
            return errors;
        }

        enum Visit<'a> {
            Enter {
                node: &'a RequirementNode,
                depth: usize,
                expected_id: Option<String>,
                expected_parent: Option<&'a str>,
            },
            Exit(&'a str),
        }

        let mut path: HashSet<&str> = HashSet::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<Visit<'_>> = self
            .roots
            .iter()
            .rev()
            .map(|node| Visit::Enter {
                node,
                depth: 0,
                expected_id: None,
                expected_parent: None,
            })
            .collect();

        while let Some(visit) = stack.pop() {
            let (node, depth, expected_id, expected_parent) = match visit {
                Visit::Exit(id) => {
                    path.remove(id);
                    continue;
                }
                Visit::Enter {
                    node,
                    depth,
                    expected_id,
                    expected_parent,
                } => (node, depth, expected_id, expected_parent),
            };
            let id = node.id.as_str();

            if path.contains(id) {
                errors.push(ValidationError::CycleDetected {
                    node_id: id.to_string(),
                });
                continue;
            }
            if !seen.insert(id) {
                errors.push(ValidationError::DuplicateId {
                    node_id: id.to_string(),
                });
            }

            check_node(node, depth, expected_id.as_deref(), expected_parent, &mut errors);

            if depth + 1 >= max_depth && !node.children.is_empty() {
                errors.push(ValidationError::DepthExceeded {
                    node_id: node.children[0].id.clone(),
                    max_depth,
                });
                continue;
            }

            path.insert(id);
            stack.push(Visit::Exit(id));
            for (index, child) in node.children.iter().enumerate().rev() {
                stack.push(Visit::Enter {
                    node: child,
                    depth: depth + 1,
                    expected_id: Some(node.child_id(index)),
                    expected_parent: Some(id),
                });
            }
        }

        errors
    }

    /// Pre-order walk of the forest yielding `(node, depth)`.
    ///
    /// Nodes whose id was already yielded are skipped along with their
    /// subtrees, and nothing at or below `max_depth` is visited.
    pub fn preorder(&self, max_depth: usize) -> Preorder<'_> {
        Preorder {
            stack: self.roots.iter().rev().map(|n| (n, 0)).collect(),
            seen: HashSet::new(),
            max_depth,
        }
    }

    /// Collect the pre-order node sequence the review engine fans out over.
    pub fn preorder_nodes(&self, max_depth: usize) -> Vec<&RequirementNode> {
        self.preorder(max_depth).map(|(node, _)| node).collect()
    }
}

fn check_node(
    node: &RequirementNode,
    depth: usize,
    expected_id: Option<&str>,
    expected_parent: Option<&str>,
    errors: &mut ValidationErrors,
) {
    let id = node.id.as_str();

    if node.description.trim().is_empty() {
        errors.push(ValidationError::EmptyDescription {
            node_id: id.to_string(),
        });
    }

    if let NodeType::Unknown(value) = &node.node_type {
        errors.push(ValidationError::UnknownType {
            node_id: id.to_string(),
            value: value.clone(),
        });
    } else {
        let role_ok = if depth == 0 {
            node.node_type == NodeType::Parent
        } else {
            node.node_type != NodeType::Parent
        };
        if !role_ok {
            let expected = if depth == 0 {
                "parent"
            } else {
                "sub_process or implementation"
            };
            errors.push(ValidationError::TypeMismatch {
                node_id: id.to_string(),
                actual: node.node_type.to_string(),
                expected: expected.to_string(),
                depth,
            });
        }
        if node.node_type.is_leaf() && !node.children.is_empty() {
            errors.push(ValidationError::LeafHasChildren {
                node_id: id.to_string(),
            });
        }
    }

    if let Some(expected) = expected_id {
        if id != expected {
            errors.push(ValidationError::NonSequentialId {
                node_id: id.to_string(),
                expected: expected.to_string(),
            });
        }
    }

    // Children may omit parent_id; a root must not declare one.
    let parent_mismatch = match (expected_parent, node.parent_id.as_deref()) {
        (None, Some(_)) => true,
        (Some(expected), Some(found)) => expected != found,
        _ => false,
    };
    if parent_mismatch {
        errors.push(ValidationError::ParentIdMismatch {
            node_id: id.to_string(),
            expected: expected_parent.map(str::to_string),
            found: node.parent_id.clone(),
        });
    }
}

fn renumber_descendants(node: &mut RequirementNode) {
    let mut stack: Vec<&mut RequirementNode> = vec![node];
    while let Some(current) = stack.pop() {
        let parent_id = current.id.clone();
        for (index, child) in current.children.iter_mut().enumerate() {
            child.id = format!("{}.{}", parent_id, index + 1);
            child.parent_id = Some(parent_id.clone());
        }
        stack.extend(current.children.iter_mut());
    }
}

/// Iterator returned by [`RequirementHierarchy::preorder`].
pub struct Preorder<'a> {
    stack: Vec<(&'a RequirementNode, usize)>,
    seen: HashSet<&'a str>,
    max_depth: usize,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (&'a RequirementNode, usize);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, depth)) = self.stack.pop() {
            if depth >= self.max_depth || !self.seen.insert(node.id.as_str()) {
                continue;
            }
            self.stack
                .extend(node.children.iter().rev().map(|c| (c, depth + 1)));
            return Some((node, depth));
        }
        None
    }
}
