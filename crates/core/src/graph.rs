//! In-memory model of a ComfyUI job graph ("API format" workflow).
//!
//! The wire shape is an object keyed by node id:
//!
//! ```json
//! {
//!   "3": { "class_type": "KSampler", "inputs": { "seed": 42, "model": ["16", 0] } },
//!   "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "..." } }
//! }
//! ```
//!
//! Node order is preserved from the source document because role
//! resolution picks the *first* matching node when scanning.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single node of a job graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// ComfyUI class type (e.g. "KSampler", "CLIPTextEncode").
    pub class_type: String,
    /// Literal values and `[node_id, output_index]` links.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Editor metadata (node titles). Passed through untouched.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl NodeSpec {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: Map::new(),
            meta: None,
        }
    }

    /// Builder-style helper used mostly by tests and fixtures.
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }
}

/// Ordered map from node id to [`NodeSpec`].
///
/// A graph is owned by exactly one in-flight submission; load a fresh
/// copy from the template store for every job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGraph {
    nodes: IndexMap<String, NodeSpec>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append (or replace) a node, keeping first-insertion order.
    pub fn insert(&mut self, id: impl Into<String>, node: NodeSpec) {
        self.nodes.insert(id.into(), node);
    }

    pub fn get(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut NodeSpec> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterate nodes in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeSpec)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Convenience accessor for a node input value.
    pub fn input(&self, node_id: &str, field: &str) -> Option<&Value> {
        self.nodes.get(node_id).and_then(|n| n.inputs.get(field))
    }

    /// Serialize into the JSON value posted to `/prompt`.
    pub fn to_value(&self) -> Value {
        // A map of plain structs with string keys cannot fail to serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl FromIterator<(String, NodeSpec)> for JobGraph {
    fn from_iter<T: IntoIterator<Item = (String, NodeSpec)>>(iter: T) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}
