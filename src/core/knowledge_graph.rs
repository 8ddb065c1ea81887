//! An explicit property-graph structure describing the physical system that the sensors observe
//! (e.g. a water distribution network).
//!
//! The graph is stored as an arena of nodes plus an adjacency index:
//! - Nodes live in a flat `Vec` and are addressed by their `NodeId` (the index into the arena).
//! - A name index maps stable node names to ids for string-keyed lookups.
//! - Edges are undirected and labeled with a relation type; both directions are indexed.
//!
//! Node attributes are heterogeneous (numeric, text, nested objects, lists), modeled with the
//! `AttributeValue` sum type. Before encoding, nested attributes are flattened into plain
//! key/value pairs ("linearization"): child keys are joined to their parent key with `_`, and
//! list elements receive 1-based positional suffixes.
//!
//! Sensors are first-class nodes with the label `Sensor`, attached to the node they are placed in
//! via a `Placed_In` edge. The encoder resolves a sensor's semantic context through this
//! placement edge.

use anyhow::{bail, Result};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Node label given to sensor nodes created by `add_sensor`.
pub const SENSOR_LABEL: &str = "Sensor";

/// Relation type linking a sensor to the node it is placed in.
pub const PLACED_IN: &str = "Placed_In";

/// Identifies a node in the graph arena.
pub type NodeId = usize;

/// A dynamically-typed attribute value on a graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A plain numeric value.
    Number(f64),

    /// A plain textual (categorical) value.
    Text(String),

    /// An ordered list of values; linearized with 1-based positional suffixes.
    List(Vec<AttributeValue>),

    /// A nested object; linearized by joining parent and child keys with `_`.
    Map(Vec<(String, AttributeValue)>),
}

impl AttributeValue {
    /// Returns the textual form of a scalar value, used as a one-hot class label.
    #[inline]
    pub fn as_text(&self) -> String {
        match self {
            AttributeValue::Number(n) => format!("{}", n),
            AttributeValue::Text(t) => t.clone(),
            AttributeValue::List(_) | AttributeValue::Map(_) => String::new(),
        }
    }
}

/// A node in the knowledge graph with a stable name, a type label, and a property map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable node name, used purely as an identifier; never encoded as a feature.
    pub name: String,

    /// Node type label (e.g. `Junction`, `Pipe`, `Sensor`).
    pub label: String,

    /// Property map in insertion order. Order is preserved so encoding is deterministic.
    pub properties: Vec<(String, AttributeValue)>,
}

impl Node {
    /// Looks up a property value by key.
    #[inline]
    pub fn property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// An undirected edge endpoint with its relation type.
#[derive(Debug, Clone)]
pub struct Edge {
    /// The node on the other side of the edge.
    pub target: NodeId,

    /// Relation type label (e.g. `Placed_In`, `Connected_To`).
    pub relation: String,
}

/// An arena-backed property graph with a name index and undirected adjacency lists.
#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    nodes: Vec<Node>,
    by_name: FxHashMap<String, NodeId>,
    adjacency: Vec<Vec<Edge>>,
}

impl KnowledgeGraph {
    /// Creates an empty knowledge graph.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes in the graph.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a node, or returns the id of the existing node with the same name.
    /// Properties of an existing node are left untouched.
    #[inline]
    pub fn add_node(
        &mut self,
        name: &str,
        label: &str,
        properties: Vec<(String, AttributeValue)>,
    ) -> NodeId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            label: label.to_string(),
            properties,
        });
        self.adjacency.push(Vec::new());
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Adds an undirected edge between two nodes. Duplicate edges with the same
    /// relation type are ignored, keeping edge insertion idempotent.
    #[inline]
    pub fn add_edge(&mut self, a: NodeId, b: NodeId, relation: &str) {
        let exists = self.adjacency[a]
            .iter()
            .any(|e| e.target == b && e.relation == relation);
        if exists {
            return;
        }
        self.adjacency[a].push(Edge {
            target: b,
            relation: relation.to_string(),
        });
        self.adjacency[b].push(Edge {
            target: a,
            relation: relation.to_string(),
        });
    }

    /// Returns the node stored under the given id.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Looks up a node id by its stable name.
    #[inline]
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Returns the edges incident to the given node.
    #[inline]
    pub fn edges(&self, id: NodeId) -> &[Edge] {
        &self.adjacency[id]
    }

    /// Iterates over all node ids in the arena.
    #[inline]
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    /// Idempotent sensor upsert: creates a `Sensor` node carrying the measurement aspect
    /// of the sensor and a `Placed_In` edge to the named host node. Calling this twice
    /// with the same sensor name neither duplicates the node nor the edge.
    ///
    /// Fails if the host node is not part of the graph, since a sensor without a
    /// resolvable placement cannot be enriched later.
    pub fn add_sensor(&mut self, sensor_name: &str, sensor_type: &str, host: &str) -> Result<NodeId> {
        let Some(host_id) = self.node_by_name(host) else {
            bail!("sensor '{sensor_name}' references host node '{host}' which is not in the knowledge graph");
        };
        let sensor_id = self.add_node(
            sensor_name,
            SENSOR_LABEL,
            vec![
                (
                    "name".to_string(),
                    AttributeValue::Text(sensor_name.to_string()),
                ),
                (
                    "measurement_aspect".to_string(),
                    AttributeValue::Text(sensor_type.to_string()),
                ),
            ],
        );
        self.add_edge(sensor_id, host_id, PLACED_IN);
        Ok(sensor_id)
    }

    /// Resolves the node a sensor is placed in: the nearest non-sensor neighbor within
    /// `max_degree` hops of the sensor node. Returns `None` if the sensor node itself is
    /// unknown or no placement exists within range.
    pub fn placement_host(&self, sensor_name: &str, max_degree: usize) -> Option<NodeId> {
        let start = self.node_by_name(sensor_name)?;
        self.neighbors_within(start, max_degree)
            .into_iter()
            .find(|&id| self.nodes[id].label != SENSOR_LABEL)
    }

    /// Collects all neighbors of `start` reachable within `max_degree` hops, in breadth-first
    /// order. The start node itself is excluded.
    pub fn neighbors_within(&self, start: NodeId, max_degree: usize) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        visited[start] = true;
        let mut frontier = vec![start];
        let mut collected = Vec::new();
        for _ in 0..max_degree {
            let mut next = Vec::new();
            for &id in &frontier {
                for edge in &self.adjacency[id] {
                    if !visited[edge.target] {
                        visited[edge.target] = true;
                        collected.push(edge.target);
                        next.push(edge.target);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        collected
    }

    /// Returns the sorted unique textual values observed for a linearized attribute key
    /// across all nodes in the graph. Used to build one-hot domains for categorical
    /// attributes.
    pub fn unique_attribute_values(&self, key: &str) -> Vec<String> {
        let mut values: Vec<String> = Vec::new();
        for node in &self.nodes {
            for (k, v) in linearize(&node.properties) {
                if k == key {
                    let text = v.as_text();
                    if !values.contains(&text) {
                        values.push(text);
                    }
                }
            }
        }
        values.sort();
        values
    }
}

/// Flattens a nested property map into plain key/value pairs.
///
/// - A nested map rewrites `{a: {b: v}}` to `a_b = v`.
/// - A list rewrites `{l: [x, y]}` to `l_1 = x, l_2 = y`; maps inside lists recurse
///   under the positional key, so `{l: [{a: v}]}` becomes `l_1_a = v`.
///
/// Scalars pass through untouched, so the result contains only `Number` and `Text` values.
pub fn linearize(properties: &[(String, AttributeValue)]) -> Vec<(String, AttributeValue)> {
    let mut flat = Vec::new();
    for (key, value) in properties {
        flatten_into(key, value, &mut flat);
    }
    flat
}

fn flatten_into(key: &str, value: &AttributeValue, into: &mut Vec<(String, AttributeValue)>) {
    match value {
        AttributeValue::Map(inner) => {
            for (child_key, child) in inner {
                flatten_into(&format!("{key}_{child_key}"), child, into);
            }
        }
        AttributeValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(&format!("{key}_{}", index + 1), item, into);
            }
        }
        scalar => into.push((key.to_string(), scalar.clone())),
    }
}
