//! Requirement tree node types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a node in the three-tier hierarchy.
///
/// Unrecognised spellings are kept as [`NodeType::Unknown`] so that validation
/// can report them instead of failing the whole plan parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Parent,
    SubProcess,
    Implementation,
    Unknown(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Parent => "parent",
            NodeType::SubProcess => "sub_process",
            NodeType::Implementation => "implementation",
            NodeType::Unknown(value) => value,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, NodeType::Unknown(_))
    }

    /// Implementation nodes are leaves.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeType::Implementation)
    }
}

impl From<String> for NodeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "parent" => NodeType::Parent,
            "sub_process" | "sub-process" | "subprocess" => NodeType::SubProcess,
            "implementation" => NodeType::Implementation,
            _ => NodeType::Unknown(value),
        }
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single requirement. Children are owned exclusively by their parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementNode {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(
        default,
        alias = "parentID",
        alias = "parentId",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RequirementNode>,
    #[serde(default, alias = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, alias = "testableProperties")]
    pub testable_properties: Vec<String>,
}

impl RequirementNode {
    pub fn new(id: impl Into<String>, node_type: NodeType, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            node_type,
            parent_id: None,
            children: Vec::new(),
            acceptance_criteria: Vec::new(),
            testable_properties: Vec::new(),
        }
    }

    pub fn parent(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, NodeType::Parent, description)
    }

    pub fn sub_process(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, NodeType::SubProcess, description)
    }

    pub fn implementation(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, NodeType::Implementation, description)
    }

    pub fn with_child(mut self, mut child: RequirementNode) -> Self {
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
        self
    }

    pub fn with_acceptance_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    pub fn with_testable_property(mut self, property: impl Into<String>) -> Self {
        self.testable_properties.push(property.into());
        self
    }

    /// Id the `index`-th (0-based) child of this node must carry.
    pub fn child_id(&self, index: usize) -> String {
        format!("{}.{}", self.id, index + 1)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_parses_known_and_unknown() {
        assert_eq!(NodeType::from("parent".to_string()), NodeType::Parent);
        assert_eq!(NodeType::from("sub-process".to_string()), NodeType::SubProcess);
        assert_eq!(
            NodeType::from("epic".to_string()),
            NodeType::Unknown("epic".to_string())
        );
        assert!(!NodeType::Unknown("epic".into()).is_known());
    }

    #[test]
    fn test_node_deserializes_camel_case_aliases() {
        let json = r#"{
            "id": "REQ_001.1",
            "description": "Store sessions",
            "type": "implementation",
            "parentID": "REQ_001",
            "acceptanceCriteria": ["sessions persist"],
            "testableProperties": ["round trip"]
        }"#;
        let node: RequirementNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.parent_id.as_deref(), Some("REQ_001"));
        assert_eq!(node.node_type, NodeType::Implementation);
        assert_eq!(node.acceptance_criteria, vec!["sessions persist"]);
        assert_eq!(node.testable_properties, vec!["round trip"]);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_node_serializes_type_field() {
        let node = RequirementNode::parent("REQ_000", "x");
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "parent");
        assert!(value.get("parent_id").is_none());
    }

    #[test]
    fn test_with_child_sets_parent_id() {
        let root = RequirementNode::parent("REQ_000", "x")
            .with_child(RequirementNode::implementation("REQ_000.1", "y"));
        assert_eq!(root.children[0].parent_id.as_deref(), Some("REQ_000"));
        assert_eq!(root.child_id(1), "REQ_000.2");
    }
}
